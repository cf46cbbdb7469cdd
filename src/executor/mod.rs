pub mod output_parser;
pub mod terraform;
