#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use tfbridge::resource::{DeclaredResource, ProviderSetup};
use tfbridge::workspace::EnqueueFn;

/// Write an executable fake provisioner into `dir` and return its path.
///
/// The script logs every invocation (one line of arguments) to
/// `invocations.log` in its working directory, which is always the
/// workspace, then runs `body` with `$cmd` bound to the subcommand.
pub fn fake_terraform(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("terraform-fake");
    let script = format!("#!/bin/sh\necho \"$@\" >> invocations.log\ncmd=\"$1\"\n{body}\n");
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// A body that answers every subcommand cleanly: plans report no changes,
/// applies and destroys succeed without touching the state file.
pub const CLEAN_BODY: &str = r#"case "$cmd" in
  plan)
    echo '{"@level":"info","@message":"Plan: 0 to add, 0 to change, 0 to destroy.","type":"change_summary","changes":{"add":0,"change":0,"remove":0,"operation":"plan"}}'
    exit 0
    ;;
  apply|destroy)
    exit 0
    ;;
esac
exit 1"#;

pub fn provider_setup() -> ProviderSetup {
    ProviderSetup {
        version: "1.5.0".to_string(),
        source: "hashicorp/null".to_string(),
        configuration: obj(serde_json::json!({"region": "us-east-1"})),
    }
}

pub fn declared(key: &str) -> DeclaredResource {
    DeclaredResource {
        key: key.to_string(),
        name: "example".to_string(),
        resource_type: "null_resource".to_string(),
        parameters: obj(serde_json::json!({"triggers": {"a": "b"}})),
        ..Default::default()
    }
}

pub fn obj(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

/// An enqueue callback that counts its invocations.
pub fn counting_enqueue() -> (EnqueueFn, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let enqueue: EnqueueFn = Arc::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (enqueue, count)
}

/// Poll `cond` every 10ms, panicking if it does not hold within five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within five seconds");
}

/// Lines logged by the fake provisioner in `workspace_dir`, in order.
pub fn invocations(workspace_dir: &Path) -> Vec<String> {
    std::fs::read_to_string(workspace_dir.join("invocations.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
