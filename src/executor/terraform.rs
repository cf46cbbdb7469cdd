use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing;

use crate::error::{Error, Result};
use crate::executor::output_parser;

/// Upper bound on retained output lines per stream. Terraform's `-json` mode
/// emits one record per event and large refreshes produce thousands; only
/// the tail matters for diagnostics.
const MAX_CAPTURED_LINES: usize = 2048;

/// Result of a terraform command execution.
#[derive(Debug)]
pub struct TerraformResult {
    pub exit_code: i32,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl TerraformResult {
    /// Extract a human-readable error message from the result.
    pub fn error_message(&self) -> String {
        // First try extracting errors from JSON stdout (terraform -json output)
        let json_errors = output_parser::extract_errors(&self.stdout_lines);
        if !json_errors.is_empty() {
            return json_errors.join("; ");
        }

        // Fall back to stderr
        let stderr = self.stderr_lines.join("\n");
        if !stderr.is_empty() {
            return stderr;
        }

        // Fall back to raw stdout for non-JSON error output
        let meaningful: Vec<&String> = self
            .stdout_lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .collect();
        if !meaningful.is_empty() {
            return meaningful
                .iter()
                .rev()
                .take(5)
                .rev()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("\n");
        }

        format!("exit code {}", self.exit_code)
    }
}

/// Run a terraform command in the given workspace directory.
///
/// Output is captured line-by-line into capped buffers. Cancelling `cancel`
/// kills the child (on Unix, its whole process group, so provider plugin
/// subprocesses do not survive) and the call returns the exit status of the
/// killed process.
pub async fn run_terraform(
    binary: &str,
    dir: &Path,
    args: &[&str],
    cancel: &CancellationToken,
) -> Result<TerraformResult> {
    tracing::info!(binary = binary, args = ?args, dir = %dir.display(), "Running terraform");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(dir)
        .env("TF_IN_AUTOMATION", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        binary: binary.to_string(),
        source: e,
    })?;

    let stdout = child.stdout.take().unwrap();
    let stderr = child.stderr.take().unwrap();

    let stdout_handle = tokio::spawn(capture_lines(stdout, "stdout"));
    let stderr_handle = tokio::spawn(capture_lines(stderr, "stderr"));

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            tracing::info!(dir = %dir.display(), "Cancellation requested, killing terraform");
            kill(&mut child).await;
            child.wait().await
        }
    }
    .map_err(|e| Error::Io {
        context: format!("cannot wait for {binary}"),
        source: e,
    })?;

    let stdout_lines = stdout_handle.await.unwrap_or_default();
    let stderr_lines = stderr_handle.await.unwrap_or_default();
    let exit_code = status.code().unwrap_or(-1);

    tracing::info!(exit_code = exit_code, "Terraform command completed");

    Ok(TerraformResult {
        exit_code,
        stdout_lines,
        stderr_lines,
    })
}

/// Read a child stream to EOF, keeping at most the trailing
/// `MAX_CAPTURED_LINES` lines.
async fn capture_lines<R>(stream: R, name: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = VecDeque::new();
    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        tracing::debug!(stream = name, "{}", line);
        if lines.len() == MAX_CAPTURED_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }
    lines.into()
}

async fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Terraform forks provider plugins; killing only the leader would
        // orphan them.
        unsafe { libc::killpg(pid as i32, libc::SIGKILL) };
        return;
    }
    let _ = child.kill().await;
}
