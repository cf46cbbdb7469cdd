pub mod files;
pub mod operation;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::output_parser;
use crate::executor::terraform::{run_terraform, TerraformResult};
use crate::state::models::{read_state_file, StateV4};
use self::operation::{Observed, OpType, Operation};

/// Asks the control plane to schedule another reconciliation of this
/// workspace's resource. Must be non-blocking, idempotent, and safe to call
/// from any thread.
pub type EnqueueFn = Arc<dyn Fn() + Send + Sync>;

/// Upper bound on a detached apply or destroy, measured from its start.
const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Verdict of a plan run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanResult {
    /// Derived from the plan's add count: nothing left to add means the
    /// resource is already there.
    pub exists: bool,
    pub up_to_date: bool,
}

/// Outcome of the reconciliation probe.
///
/// At most one of the flags is set; `state` is present only when the probe
/// actually ran a refresh. `last_operation_error` is the parked failure of a
/// finished asynchronous operation, delivered here exactly once.
#[derive(Debug, Default)]
pub struct RefreshResult {
    pub is_applying: bool,
    pub is_destroying: bool,
    pub state: Option<StateV4>,
    pub last_operation_error: Option<Error>,
}

/// Single-directory, single-resource driver of the provisioner CLI.
///
/// The operation record serializes invocations: at most one provisioner
/// process per workspace at any instant. Handles are shared through the
/// [`store::WorkspaceStore`]; the directory is exclusively this workspace's.
pub struct Workspace {
    dir: PathBuf,
    binary: String,
    last_operation: Operation,
    enqueue: EnqueueFn,
}

impl Workspace {
    pub fn new(dir: impl Into<PathBuf>, binary: impl Into<String>, enqueue: EnqueueFn) -> Self {
        Self {
            dir: dir.into(),
            binary: binary.into(),
            last_operation: Operation::default(),
            enqueue,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run a plan with refresh disabled and report existence and
    /// up-to-dateness from the change summary.
    pub async fn plan(&self, cancel: &CancellationToken) -> Result<PlanResult> {
        self.last_operation.ensure_not_running()?;
        let result = self.run(&["plan", "-refresh=false"], cancel).await?;
        // -detailed-exitcode: 0 clean, 2 pending changes, anything else failed
        if result.exit_code != 0 && result.exit_code != 2 {
            return Err(exec_error(OpType::Plan, &result));
        }
        let summary = output_parser::find_change_summary(&result.stdout_lines).ok_or_else(|| {
            Error::Parse {
                output: result.stdout_lines.join("\n"),
            }
        })?;
        Ok(PlanResult {
            exists: summary.add == 0,
            up_to_date: summary.change == 0,
        })
    }

    /// Apply synchronously and hand back the state file the provisioner
    /// itself wrote.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<StateV4> {
        self.last_operation.ensure_not_running()?;
        let result = self.run(&["apply", "-auto-approve"], cancel).await?;
        if result.exit_code != 0 {
            return Err(exec_error(OpType::Apply, &result));
        }
        read_state_file(&self.dir).await
    }

    /// Start a detached apply and return immediately. Completion is observed
    /// through [`Workspace::refresh`] and announced through the enqueue
    /// callback.
    ///
    /// The caller's token is not propagated: the work outlives the request
    /// that triggered it and is bounded by its own deadline instead.
    pub fn apply_async(&self, _cancel: &CancellationToken) -> Result<()> {
        self.last_operation.try_start(OpType::Apply)?;
        self.spawn_detached(OpType::Apply);
        Ok(())
    }

    /// Start a detached destroy. Repeated calls while a destroy is pending
    /// or just finished are successful no-ops, so the reconciler may retry
    /// deletion freely.
    pub fn destroy(&self, _cancel: &CancellationToken) -> Result<()> {
        if !self.last_operation.try_start_destroy()? {
            return Ok(());
        }
        self.spawn_detached(OpType::Destroy);
        Ok(())
    }

    /// The reconciliation probe.
    ///
    /// While an operation runs only its kind is reported and the provisioner
    /// is left alone. A finished operation is flushed by this read: its
    /// error surfaces here exactly once, a clean destroy surfaces as
    /// [`Error::ResourceGone`] exactly once, and a clean apply falls through
    /// to a refresh-only invocation that re-reads the state file.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshResult> {
        match self.last_operation.observe() {
            Observed::Running { op, .. } => Ok(RefreshResult {
                is_applying: op == OpType::Apply,
                is_destroying: op == OpType::Destroy,
                ..Default::default()
            }),
            Observed::Finished {
                op,
                err: Some(message),
            } => Ok(RefreshResult {
                is_applying: op == OpType::Apply,
                is_destroying: op == OpType::Destroy,
                last_operation_error: Some(Error::Operation { op, message }),
                ..Default::default()
            }),
            Observed::Finished {
                op: OpType::Destroy,
                err: None,
            } => Err(Error::ResourceGone),
            Observed::Finished { .. } | Observed::Idle => {
                let result = self
                    .run(&["apply", "-refresh-only", "-auto-approve"], cancel)
                    .await?;
                if result.exit_code != 0 {
                    return Err(exec_error(OpType::Refresh, &result));
                }
                let state = read_state_file(&self.dir).await?;
                Ok(RefreshResult {
                    state: Some(state),
                    ..Default::default()
                })
            }
        }
    }

    async fn run(&self, head: &[&'static str], cancel: &CancellationToken) -> Result<TerraformResult> {
        run_terraform(&self.binary, &self.dir, &tf_args(head), cancel).await
    }

    /// Run `op` in the background with a bounded deadline, then record the
    /// outcome and wake the reconciler.
    fn spawn_detached(&self, op: OpType) {
        let dir = self.dir.clone();
        let binary = self.binary.clone();
        let operation = self.last_operation.clone();
        let enqueue = Arc::clone(&self.enqueue);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let head: &[&'static str] = match op {
                OpType::Destroy => &["destroy", "-auto-approve"],
                _ => &["apply", "-auto-approve"],
            };
            let outcome = tokio::time::timeout(
                DEFAULT_ASYNC_TIMEOUT,
                run_terraform(&binary, &dir, &tf_args(head), &cancel),
            )
            .await;
            let err = match outcome {
                Err(_) => Some(format!(
                    "{op} timed out after {}s",
                    DEFAULT_ASYNC_TIMEOUT.as_secs()
                )),
                Ok(Err(e)) => Some(e.to_string()),
                Ok(Ok(result)) if result.exit_code != 0 => {
                    Some(format!("cannot {op}: {}", result.error_message()))
                }
                Ok(Ok(_)) => None,
            };
            if let Some(ref message) = err {
                info!(dir = %dir.display(), op = %op, error = %message, "Async terraform operation failed");
            } else {
                debug!(dir = %dir.display(), op = %op, "Async terraform operation completed");
            }
            operation.mark_end(err);
            // The outcome has to land on the managed resource as soon as
            // possible; waking the reconciler beats waiting for its next
            // periodic sync.
            (*enqueue)();
        });
    }
}

/// Subcommand plus the flags every invocation carries.
fn tf_args(head: &[&'static str]) -> Vec<&'static str> {
    let mut args = head.to_vec();
    args.extend(["-input=false", "-detailed-exitcode", "-json"]);
    args
}

fn exec_error(op: OpType, result: &TerraformResult) -> Error {
    Error::Exec {
        op,
        code: result.exit_code,
        detail: result.error_message(),
    }
}
