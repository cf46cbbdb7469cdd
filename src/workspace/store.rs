use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{ProviderSetup, Reconciled};
use crate::state::models::STATE_FILE;
use crate::workspace::files::{FileProducer, MAIN_TF_FILE};
use crate::workspace::{EnqueueFn, Workspace};

/// Default provisioner binary, resolved via PATH.
const DEFAULT_BINARY: &str = "terraform";

/// Process-wide registry of workspaces keyed by resource identity.
///
/// Lookups and insertions go through a concurrent map because parallel
/// reconciles acquire and release entries at the same time, and rehashing
/// under plain mutation would corrupt it.
pub struct WorkspaceStore {
    setup: ProviderSetup,
    binary: String,
    root: PathBuf,
    registry: DashMap<String, Arc<Workspace>>,
}

impl WorkspaceStore {
    /// A store whose workspaces live under the system temp directory.
    pub fn new(setup: ProviderSetup) -> Self {
        Self::with_root(setup, std::env::temp_dir())
    }

    /// A store rooted at `root` instead of the system temp directory.
    pub fn with_root(setup: ProviderSetup, root: impl Into<PathBuf>) -> Self {
        Self {
            setup,
            binary: DEFAULT_BINARY.to_string(),
            root: root.into(),
            registry: DashMap::new(),
        }
    }

    /// Substitute the provisioner binary invoked in every workspace.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn setup(&self) -> &ProviderSetup {
        &self.setup
    }

    /// Materialize the workspace for `tr` and return the shared handle.
    /// Repeated calls with the same key return the same workspace until
    /// [`WorkspaceStore::release`].
    ///
    /// The state file is seeded only when absent. Concurrent callers race on
    /// that first write and the winner's copy stands, which is sound because
    /// all racers project the same resource snapshot. The config file is
    /// rewritten on every call so parameter edits reach the provisioner.
    pub async fn acquire(&self, tr: &dyn Reconciled, enqueue: EnqueueFn) -> Result<Arc<Workspace>> {
        let dir = self.root.join(tr.key());
        let fp = FileProducer::new(tr, &self.setup)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Io {
            context: format!("cannot create workspace directory {}", dir.display()),
            source: e,
        })?;

        let state_path = dir.join(STATE_FILE);
        let have_state = tokio::fs::try_exists(&state_path)
            .await
            .map_err(|e| Error::Io {
                context: format!("cannot stat {}", state_path.display()),
                source: e,
            })?;
        if !have_state {
            let state = fp.tf_state()?;
            let raw = serde_json::to_vec_pretty(&state).map_err(|e| Error::Serialization {
                what: "state file",
                source: e,
            })?;
            write_atomic(&state_path, &raw).await?;
            debug!(key = tr.key(), dir = %dir.display(), "Seeded workspace state file");
        }

        let config = serde_json::to_vec_pretty(&fp.main_tf()).map_err(|e| Error::Serialization {
            what: "main.tf.json",
            source: e,
        })?;
        write_atomic(&dir.join(MAIN_TF_FILE), &config).await?;

        let ws = self
            .registry
            .entry(tr.key().to_string())
            .or_insert_with(|| Arc::new(Workspace::new(dir, self.binary.clone(), enqueue)))
            .clone();
        Ok(ws)
    }

    /// Tear down the workspace for `tr`: remove its directory tree and drop
    /// the registry entry. Succeeds when no workspace exists.
    ///
    /// Does not wait for or abort a running operation; the caller is
    /// responsible for sequencing deletion.
    pub async fn release(&self, tr: &dyn Reconciled) -> Result<()> {
        let Some(ws) = self.registry.get(tr.key()).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };
        tokio::fs::remove_dir_all(ws.dir())
            .await
            .map_err(|e| Error::Io {
                context: format!("cannot remove workspace directory {}", ws.dir().display()),
                source: e,
            })?;
        self.registry.remove(tr.key());
        debug!(key = tr.key(), "Released workspace");
        Ok(())
    }
}

/// Write `bytes` to `path` through a sibling temp file and rename, so a
/// concurrent provisioner never reads a torn artifact.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(|e| Error::Io {
        context: format!("cannot write {}", tmp.display()),
        source: e,
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| Error::Io {
        context: format!("cannot rename {} into place", tmp.display()),
        source: e,
    })
}
