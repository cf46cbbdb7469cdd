use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Kind of provisioner invocation a workspace can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpType {
    #[default]
    None,
    Apply,
    Destroy,
    Plan,
    Refresh,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpType::None => "",
            OpType::Apply => "apply",
            OpType::Destroy => "destroy",
            OpType::Plan => "plan",
            OpType::Refresh => "refresh",
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Record {
    op: OpType,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    err: Option<String>,
}

/// Tracks the in-flight provisioner invocation of one workspace: kind,
/// start/end timestamps, terminal error.
///
/// Cloning yields a handle to the same record, so the foreground caller that
/// starts an operation and the background task that finishes it always see
/// one state. Transitions: idle to running on `try_start`, running to
/// finished on `mark_end`, finished back to idle when `observe` reads the
/// outcome.
#[derive(Debug, Clone, Default)]
pub struct Operation {
    record: Arc<Mutex<Record>>,
}

/// What `observe` found. A finished record has already been flushed by the
/// time the caller holds this.
#[derive(Debug)]
pub enum Observed {
    Idle,
    Running {
        op: OpType,
        started_at: DateTime<Utc>,
    },
    Finished {
        op: OpType,
        err: Option<String>,
    },
}

impl Operation {
    /// Begin `op`. Fails with [`Error::Busy`] while another operation runs;
    /// a finished-but-unobserved record is overwritten.
    pub fn try_start(&self, op: OpType) -> Result<()> {
        let mut r = self.record.lock().unwrap();
        if let Some(started_at) = running_since(&r) {
            return Err(Error::Busy {
                op: r.op,
                started_at,
            });
        }
        *r = Record {
            op,
            started_at: Some(Utc::now()),
            ended_at: None,
            err: None,
        };
        Ok(())
    }

    /// Begin a destroy. Destroy is idempotent on its own kind: when the
    /// current record is already a destroy, running or finished, nothing is
    /// started and `Ok(false)` is returned.
    pub fn try_start_destroy(&self) -> Result<bool> {
        let mut r = self.record.lock().unwrap();
        if r.op == OpType::Destroy && r.started_at.is_some() {
            return Ok(false);
        }
        if let Some(started_at) = running_since(&r) {
            return Err(Error::Busy {
                op: r.op,
                started_at,
            });
        }
        *r = Record {
            op: OpType::Destroy,
            started_at: Some(Utc::now()),
            ended_at: None,
            err: None,
        };
        Ok(true)
    }

    /// Fail fast while an operation runs. Used by the synchronous entry
    /// points, which never take ownership of the record.
    pub fn ensure_not_running(&self) -> Result<()> {
        let r = self.record.lock().unwrap();
        match running_since(&r) {
            Some(started_at) => Err(Error::Busy {
                op: r.op,
                started_at,
            }),
            None => Ok(()),
        }
    }

    /// Finish the running operation, recording its terminal error if any.
    pub fn mark_end(&self, err: Option<String>) {
        let mut r = self.record.lock().unwrap();
        r.ended_at = Some(Utc::now());
        r.err = err;
    }

    /// Read the current state. Observing a finished operation flushes it:
    /// the outcome is delivered exactly once and the record returns to idle,
    /// so the next operation can start without a separate acknowledgment.
    pub fn observe(&self) -> Observed {
        let mut r = self.record.lock().unwrap();
        match (r.started_at, r.ended_at) {
            (None, _) => Observed::Idle,
            (Some(started_at), None) => Observed::Running {
                op: r.op,
                started_at,
            },
            (Some(_), Some(_)) => {
                let observed = Observed::Finished {
                    op: r.op,
                    err: r.err.take(),
                };
                *r = Record::default();
                observed
            }
        }
    }

    #[cfg(test)]
    fn timestamps(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let r = self.record.lock().unwrap();
        (r.started_at, r.ended_at)
    }
}

fn running_since(r: &Record) -> Option<DateTime<Utc>> {
    match (r.started_at, r.ended_at) {
        (Some(s), None) => Some(s),
        _ => None,
    }
}
