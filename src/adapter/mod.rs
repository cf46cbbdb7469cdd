use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{has_prior_state, Reconciled};
use crate::state::models::StateV4;
use crate::workspace::store::WorkspaceStore;
use crate::workspace::EnqueueFn;

/// What the control plane learns from one observation.
#[derive(Debug, Default)]
pub struct Observation {
    pub exists: bool,
    pub up_to_date: bool,
    /// The refreshed state filled in a parameter the declaration left null.
    pub late_initialized: bool,
    pub connection_details: HashMap<String, String>,
}

/// Result of triggering a creation.
#[derive(Debug, Default)]
pub struct Creation {
    pub connection_details: HashMap<String, String>,
}

/// Result of triggering an update.
#[derive(Debug, Default)]
pub struct Update {
    pub connection_details: HashMap<String, String>,
}

/// The synchronous contract the reconciler drives.
///
/// Long-running work is fire-and-check: `update` and `delete` return once
/// the operation is launched, and the enqueue callback wired through the
/// store announces completion.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn observe(
        &self,
        tr: &mut dyn Reconciled,
        cancel: &CancellationToken,
    ) -> Result<Observation>;

    async fn create(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<Creation>;

    async fn update(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<Update>;

    async fn delete(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<()>;
}

/// Translates control-plane verbs into workspace calls.
pub struct External {
    store: Arc<WorkspaceStore>,
    enqueue: EnqueueFn,
}

impl External {
    pub fn new(store: Arc<WorkspaceStore>, enqueue: EnqueueFn) -> Self {
        Self { store, enqueue }
    }
}

#[async_trait]
impl ExternalClient for External {
    async fn observe(
        &self,
        tr: &mut dyn Reconciled,
        cancel: &CancellationToken,
    ) -> Result<Observation> {
        // Nothing was ever provisioned: report absence without touching disk.
        if tr.external_name().is_empty() && !has_prior_state(tr) {
            return Ok(Observation::default());
        }

        let ws = self.store.acquire(tr, Arc::clone(&self.enqueue)).await?;
        let res = match ws.refresh(cancel).await {
            // A flushed clean destroy: deletion is complete.
            Err(Error::ResourceGone) => return Ok(Observation::default()),
            other => other?,
        };

        // Mid-operation the resource is reported existing and current so the
        // reconciler does not pile further work onto the workspace.
        if res.is_applying || res.is_destroying {
            tr.mark_available();
            return Ok(Observation {
                exists: true,
                up_to_date: true,
                ..Default::default()
            });
        }
        if let Some(err) = res.last_operation_error {
            return Err(err);
        }

        let plan = ws.plan(cancel).await?;
        if plan.exists {
            // Terraform waits for readiness during apply, so existence
            // implies the resource is usable.
            tr.mark_available();
        }
        Ok(Observation {
            exists: plan.exists,
            up_to_date: plan.up_to_date,
            late_initialized: late_initialized(tr, res.state.as_ref())?,
            connection_details: connection_details(tr, res.state.as_ref()),
        })
    }

    async fn create(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<Creation> {
        // The provisioner does not distinguish create from update.
        let update = self.update(tr, cancel).await?;
        Ok(Creation {
            connection_details: update.connection_details,
        })
    }

    async fn update(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<Update> {
        let ws = self.store.acquire(tr, Arc::clone(&self.enqueue)).await?;
        ws.apply_async(cancel)?;
        debug!(key = tr.key(), "Triggered apply");
        // Connection details flow from the observe that follows completion.
        Ok(Update::default())
    }

    async fn delete(&self, tr: &dyn Reconciled, cancel: &CancellationToken) -> Result<()> {
        let ws = self.store.acquire(tr, Arc::clone(&self.enqueue)).await?;
        ws.destroy(cancel)?;
        debug!(key = tr.key(), "Triggered destroy");
        Ok(())
    }
}

/// Whether the refreshed state carries a non-null value for a parameter the
/// declaration left null.
fn late_initialized(tr: &dyn Reconciled, state: Option<&StateV4>) -> Result<bool> {
    let Some(attrs) = state.and_then(StateV4::attributes).and_then(Value::as_object) else {
        return Ok(false);
    };
    let parameters = tr.parameters()?;
    Ok(parameters
        .iter()
        .any(|(k, v)| v.is_null() && attrs.get(k).is_some_and(|a| !a.is_null())))
}

/// Publish the resource's sensitive attributes, plus its identifier, from
/// the refreshed state.
fn connection_details(tr: &dyn Reconciled, state: Option<&StateV4>) -> HashMap<String, String> {
    let mut details = HashMap::new();
    let Some(attrs) = state.and_then(StateV4::attributes).and_then(Value::as_object) else {
        return details;
    };
    let mut keys = tr.sensitive_attributes();
    keys.push("id".to_string());
    for key in keys {
        match attrs.get(&key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => {
                details.insert(key, s.clone());
            }
            Some(other) => {
                details.insert(key, other.to_string());
            }
        }
    }
    details
}
