use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::workspace::operation::OpType;

/// Failure modes of the workspace lifecycle engine.
///
/// The reconciler matches on these: `Busy` means back off and retry,
/// `ResourceGone` means deletion is complete, everything else is surfaced on
/// the managed resource.
#[derive(Debug, Error)]
pub enum Error {
    /// Another terraform invocation owns the workspace.
    #[error("{op} operation that started at {started_at} is still running")]
    Busy {
        op: OpType,
        started_at: DateTime<Utc>,
    },

    /// The provisioner exited with a failure code.
    #[error("cannot {op}: terraform exited with code {code}: {detail}")]
    Exec { op: OpType, code: i32, detail: String },

    /// The provisioner binary could not be started at all.
    #[error("cannot spawn {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The provisioner produced output we do not understand.
    #[error("cannot find the change summary line in plan log: {output}")]
    Parse { output: String },

    /// The resource could not be projected to JSON.
    #[error("cannot serialize {what}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The state file the provisioner should have written is missing,
    /// unreadable, or unparseable.
    #[error("cannot read terraform state file {}", .path.display())]
    StateRead {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Deletion completed; there is no resource left to observe.
    #[error("resource is gone")]
    ResourceGone,

    /// A finished asynchronous operation failed; surfaced by the refresh
    /// that observed it.
    #[error("{op} operation failed: {message}")]
    Operation { op: OpType, message: String },

    /// Workspace directory or file maintenance failed.
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the caller should simply retry on the next reconcile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
