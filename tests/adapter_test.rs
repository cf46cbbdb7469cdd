mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tfbridge::adapter::{External, ExternalClient};
use tfbridge::resource::{DeclaredResource, ANNOTATION_STATE};
use tfbridge::workspace::store::WorkspaceStore;
use tfbridge::Error;

use common::{counting_enqueue, declared, fake_terraform, obj, wait_until, CLEAN_BODY};

struct Fixture {
    _root: TempDir,
    external: External,
    count: Arc<AtomicUsize>,
    workspace_root: std::path::PathBuf,
}

/// A store rooted in a temp directory whose provisioner is a fake script.
fn fixture(body: &str) -> Fixture {
    let root = TempDir::new().unwrap();
    let bin_dir = root.path().join("bin");
    let ws_root = root.path().join("workspaces");
    std::fs::create_dir_all(&bin_dir).unwrap();
    std::fs::create_dir_all(&ws_root).unwrap();
    let bin = fake_terraform(&bin_dir, body);

    let store = WorkspaceStore::with_root(common::provider_setup(), &ws_root)
        .with_binary(bin.to_str().unwrap());
    let (enqueue, count) = counting_enqueue();
    Fixture {
        _root: root,
        external: External::new(Arc::new(store), enqueue),
        count,
        workspace_root: ws_root,
    }
}

/// A resource that has been provisioned before, so observation does not
/// short-circuit.
fn provisioned(key: &str) -> DeclaredResource {
    let mut tr = declared(key);
    tr.external_name = "ext-1".to_string();
    tr
}

#[tokio::test]
async fn observe_before_any_provisioning_reports_absence() {
    let fx = fixture(CLEAN_BODY);
    let mut tr = declared("uid-new");

    let obs = fx
        .external
        .observe(&mut tr, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!obs.exists);
    assert!(!tr.available);
    // The provisioner was never involved; no workspace was materialized.
    assert!(!fx.workspace_root.join("uid-new").exists());
}

#[tokio::test]
async fn annotated_state_alone_is_enough_to_observe() {
    let fx = fixture(CLEAN_BODY);
    let mut tr = declared("uid-annotated");
    tr.annotations
        .insert(ANNOTATION_STATE.to_string(), "recorded".to_string());

    let obs = fx
        .external
        .observe(&mut tr, &CancellationToken::new())
        .await
        .unwrap();

    assert!(obs.exists);
    assert!(fx.workspace_root.join("uid-annotated").exists());
}

#[tokio::test]
async fn create_applies_then_observe_sees_a_ready_resource() {
    let fx = fixture(CLEAN_BODY);
    let cancel = CancellationToken::new();
    let mut tr = provisioned("uid-1");

    fx.external.create(&tr, &cancel).await.unwrap();
    wait_until(|| fx.count.load(Ordering::SeqCst) == 1).await;

    let obs = fx.external.observe(&mut tr, &cancel).await.unwrap();
    assert!(obs.exists);
    assert!(obs.up_to_date);
    assert!(tr.available);
}

#[tokio::test]
async fn observe_mid_apply_reports_existing_and_current() {
    let body = r#"case "$*" in
  *-refresh-only*) exit 0 ;;
esac
case "$cmd" in
  apply) sleep 1; exit 0 ;;
esac
exit 1"#;
    let fx = fixture(body);
    let cancel = CancellationToken::new();
    let mut tr = provisioned("uid-2");

    fx.external.update(&tr, &cancel).await.unwrap();

    let obs = fx.external.observe(&mut tr, &cancel).await.unwrap();
    assert!(obs.exists);
    assert!(obs.up_to_date);
    assert!(tr.available);
    // Mid-operation nothing was refreshed, so nothing is published.
    assert!(obs.connection_details.is_empty());

    wait_until(|| fx.count.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn failed_apply_is_surfaced_then_cleared() {
    let body = r#"case "$*" in
  *-refresh-only*) exit 0 ;;
esac
case "$cmd" in
  plan)
    echo '{"type":"change_summary","changes":{"add":0,"change":0,"remove":0}}'
    exit 0
    ;;
  apply) echo 'quota exceeded' >&2; exit 1 ;;
esac
exit 1"#;
    let fx = fixture(body);
    let cancel = CancellationToken::new();
    let mut tr = provisioned("uid-3");

    fx.external.update(&tr, &cancel).await.unwrap();
    wait_until(|| fx.count.load(Ordering::SeqCst) == 1).await;

    let err = fx.external.observe(&mut tr, &cancel).await.unwrap_err();
    match err {
        Error::Operation { message, .. } => assert!(message.contains("quota exceeded")),
        other => panic!("unexpected error: {other}"),
    }

    // The failure was flushed by that observe; the next one proceeds.
    let obs = fx.external.observe(&mut tr, &cancel).await.unwrap();
    assert!(obs.exists);
}

#[tokio::test]
async fn delete_destroys_then_observe_reports_absence() {
    let fx = fixture(CLEAN_BODY);
    let cancel = CancellationToken::new();
    let mut tr = provisioned("uid-4");
    tr.marked_for_deletion = true;

    fx.external.delete(&tr, &cancel).await.unwrap();
    // Deletion retries are harmless.
    fx.external.delete(&tr, &cancel).await.unwrap();
    wait_until(|| fx.count.load(Ordering::SeqCst) == 1).await;

    let obs = fx.external.observe(&mut tr, &cancel).await.unwrap();
    assert!(!obs.exists);
}

#[tokio::test]
async fn observe_publishes_connection_details_and_late_init() {
    let fx = fixture(CLEAN_BODY);
    let cancel = CancellationToken::new();
    let mut tr = provisioned("uid-5");
    tr.parameters = obj(json!({"password": "hunter2", "region": null}));
    tr.observation = obj(json!({"region": "us-east-1"}));
    tr.sensitive_attributes = vec!["password".to_string()];
    tr.external_name = "ext-5".to_string();

    let obs = fx.external.observe(&mut tr, &cancel).await.unwrap();

    assert!(obs.exists);
    assert_eq!(obs.connection_details.get("password").unwrap(), "hunter2");
    assert_eq!(obs.connection_details.get("id").unwrap(), "ext-5");
    // The declaration left `region` null and the provider filled it in.
    assert!(obs.late_initialized);
}
