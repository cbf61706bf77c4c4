use crate::api::{InMemoryPolicyCenter, PolicyCenter};
use crate::defaults::default_snapshot;
use crate::loader::{load_snapshot, load_snapshot_with_options, LoadOptions};
use crate::model::{PolicySource, RuntimeOverrideSpec};
use appsearch_core_types::CallType;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

fn override_spec(path: &str, value: serde_json::Value, ttl_seconds: u64) -> RuntimeOverrideSpec {
    RuntimeOverrideSpec {
        path: path.into(),
        value,
        owner: "test".into(),
        reason: "unit test".into(),
        ttl_seconds,
    }
}

#[test]
fn default_snapshot_has_reasonable_limits() {
    let snapshot = default_snapshot();
    assert_eq!(snapshot.executor.per_user_queue_capacity, 1_000);
    assert!(!snapshot.rate_limit.enabled);
    assert_eq!(snapshot.rate_limit.per_package_capacity(), 500);
    assert_eq!(
        snapshot.maintenance.full_persist_interval().unwrap(),
        Duration::from_secs(24 * 60 * 60)
    );
}

#[test]
fn file_overlay_replaces_defaults() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("service.yaml");
    std::fs::write(
        &file_path,
        r#"executor:
  per_user_queue_capacity: 8
rate_limit:
  enabled: true
  total_capacity: 20
  api_costs: "localPutDocuments:4"
denylist:
  source: "pkg=com.bad&apis=localSearch"
"#,
    )
    .unwrap();

    let snapshot = load_snapshot(Some(&file_path)).unwrap();
    assert_eq!(snapshot.executor.per_user_queue_capacity, 8);
    assert!(snapshot.rate_limit.enabled);
    assert_eq!(snapshot.rate_limit.per_package_capacity(), 10);
    assert_eq!(
        snapshot
            .provenance
            .get("executor.per_user_queue_capacity")
            .unwrap()
            .source,
        PolicySource::File
    );
    assert_eq!(
        snapshot.provenance.get("stats.recent_calls_capacity").unwrap().source,
        PolicySource::Builtin
    );
}

#[test]
fn unknown_file_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("service.yaml");
    std::fs::write(&file_path, "executor:\n  warp_factor: 9\n").unwrap();
    let options = LoadOptions {
        paths: vec![file_path],
        include_env: false,
    };
    assert!(load_snapshot_with_options(&options).is_err());
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let options = LoadOptions {
        paths: vec!["/nonexistent/appsearch/service.yaml".into()],
        include_env: false,
    };
    let snapshot = load_snapshot_with_options(&options).unwrap();
    assert_eq!(snapshot.stats.recent_calls_capacity, 64);
}

#[test]
fn env_overlay_wins_over_defaults() {
    let _guard = env_guard().lock().unwrap();
    let key = "APPSEARCH_POLICY__EXECUTOR__PER_USER_QUEUE_CAPACITY";
    env::set_var(key, "4");
    let snapshot = load_snapshot(None).expect("load snapshot");
    env::remove_var(key);
    assert_eq!(snapshot.executor.per_user_queue_capacity, 4);
    assert_eq!(
        snapshot
            .provenance
            .get("executor.per_user_queue_capacity")
            .expect("provenance")
            .source,
        PolicySource::Env
    );
}

#[test]
fn env_json_overlay_keeps_denylist_verbatim() {
    let _guard = env_guard().lock().unwrap();
    env::set_var(
        "APPSEARCH_POLICY_OVERRIDE_JSON",
        r#"{"denylist":{"source":"pkg=com.a&db=mail&apis=localPutDocuments"}}"#,
    );
    let snapshot = load_snapshot(None).expect("load snapshot with json");
    env::remove_var("APPSEARCH_POLICY_OVERRIDE_JSON");
    assert_eq!(
        snapshot.denylist.source,
        "pkg=com.a&db=mail&apis=localPutDocuments"
    );
}

#[tokio::test]
async fn override_updates_current_view() {
    let center = InMemoryPolicyCenter::new(default_snapshot());
    let before = center.current();
    center
        .apply_override(override_spec(
            "denylist.source",
            serde_json::json!("pkg=com.a&apis=globalSearch"),
            0,
        ))
        .await
        .unwrap();
    let after = center.current();
    assert!(after.rev > before.rev);
    assert!(after.denylist.is_denied("com.a", None, CallType::GlobalSearch));
    assert!(!before.denylist.is_denied("com.a", None, CallType::GlobalSearch));
}

#[tokio::test]
async fn invalid_override_leaves_view_untouched() {
    let center = InMemoryPolicyCenter::new(default_snapshot());
    let rev = center.current().rev;
    let err = center
        .apply_override(override_spec(
            "rate_limit.per_package_percentage",
            serde_json::json!(1.5),
            0,
        ))
        .await;
    assert!(err.is_err());
    assert!(center
        .apply_override(override_spec("nope.nothing", serde_json::json!(1), 0))
        .await
        .is_err());
    assert_eq!(center.current().rev, rev);
}

#[tokio::test]
async fn subscribe_streams_updates() {
    let center = InMemoryPolicyCenter::new(default_snapshot());
    let mut rx = center.subscribe();
    let original_rev = rx.borrow().rev;

    center
        .apply_override(override_spec(
            "stats.recent_calls_capacity",
            serde_json::json!(16),
            0,
        ))
        .await
        .unwrap();
    rx.changed().await.unwrap();
    let view = Arc::clone(&rx.borrow());
    assert_ne!(view.rev, original_rev);
    assert_eq!(view.snapshot.stats.recent_calls_capacity, 16);
}

#[tokio::test]
async fn reload_keeps_runtime_overrides() {
    let center = InMemoryPolicyCenter::new(default_snapshot());
    center
        .apply_override(override_spec("rate_limit.enabled", serde_json::json!(true), 0))
        .await
        .unwrap();
    let mut fresh = default_snapshot();
    fresh.executor.per_user_queue_capacity = 12;
    center.reload(fresh).await.unwrap();
    let view = center.current();
    assert!(view.snapshot.rate_limit.enabled);
    assert_eq!(view.snapshot.executor.per_user_queue_capacity, 12);
}

#[tokio::test]
async fn override_expires_after_ttl() {
    let center = InMemoryPolicyCenter::new(default_snapshot());
    let mut rx = center.subscribe();
    center
        .apply_override(override_spec("maintenance.enabled", serde_json::json!(false), 1))
        .await
        .unwrap();
    rx.changed().await.unwrap();
    assert!(!rx.borrow().snapshot.maintenance.enabled);

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("expiry published")
        .unwrap();
    assert!(center.current().snapshot.maintenance.enabled);
}

fn env_guard() -> &'static Mutex<()> {
    static ENV_GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_GUARD.get_or_init(|| Mutex::new(()))
}
