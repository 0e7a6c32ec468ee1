//! Configuration files, builder validation and manifest-described libraries

mod common;

use callgate::introspect::InvocationHandle;
use callgate::resilience::PoolScope;
use callgate::{Dispatcher, Error, ErrorKind, GatewayConfig, LibraryManifest, StaticLibrary};
use common::echo;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn temp_file(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("callgate-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_config_file() {
    let path = temp_file(
        r#"
resilience:
  circuit_failure_threshold: 2
  circuit_cooldown_seconds: 0.5
  retry_max_attempts: 4
  pool_size: 2
  pool_scope: per_service
services:
  echo:
    retry_max_attempts: 1
health:
  error_rate_threshold: 0.25
scanner:
  exclude: ["^debug_"]
"#,
    );
    let cfg = GatewayConfig::from_path(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.resilience.pool_scope, PoolScope::PerService);
    assert_eq!(cfg.health.error_rate_threshold, 0.25);
    let echo_policy = cfg.policy_for("echo");
    assert_eq!(echo_policy.retry.max_attempts, 1);
    assert_eq!(echo_policy.breaker.cooldown, Duration::from_millis(500));
    assert_eq!(cfg.policy_for("other").retry.max_attempts, 4);
}

#[test]
fn test_unreadable_config_file_names_the_path() {
    let path = std::env::temp_dir().join(format!("callgate-missing-{}.yaml", uuid::Uuid::new_v4()));
    let err = GatewayConfig::from_path(&path).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    let expected = path.display().to_string();
    assert_eq!(
        err.context().and_then(|c| c.field_path.as_deref()),
        Some(expected.as_str())
    );
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = Dispatcher::builder()
        .library(StaticLibrary::new("x").function(echo()))
        .config(GatewayConfig::default().with_retry_max_attempts(0))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(
        err.context().and_then(|c| c.field_path.as_deref()),
        Some("resilience.retry_max_attempts")
    );
}

#[test]
fn test_builder_requires_library() {
    let err = Dispatcher::builder().build().err().unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_builder_fails_on_unusable_library() {
    let err = Dispatcher::builder()
        .library(StaticLibrary::unavailable("gone", "not installed"))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::Scan(_)));
}

#[tokio::test]
async fn test_scanner_exclusions_apply_through_config() {
    let cfg = GatewayConfig::from_yaml_str("scanner:\n  exclude: [\"^echo$\"]\n").unwrap();
    let d = Dispatcher::builder()
        .library(StaticLibrary::new("x").function(echo()))
        .config(cfg)
        .build()
        .unwrap();
    assert!(d.registry().is_empty());
    assert_eq!(d.registry().report().skipped_excluded, 1);
}

#[tokio::test]
async fn test_manifest_library_end_to_end() {
    let manifest = LibraryManifest::from_yaml_str(
        r#"
name: whisper
members:
  - name: transcribe
    doc: Transcribe an audio file.
    params:
      - { name: audio, type: bytes }
      - { name: language, type: "Optional[str]", default: null }
  - name: models
    members:
      - name: list
        handler: list_models
        params: []
"#,
    )
    .unwrap();

    let mut handlers = HashMap::new();
    handlers.insert(
        "transcribe".to_string(),
        InvocationHandle::async_fn(|args| async move {
            let upload = args.upload("audio").map(|u| u.upload_id).unwrap_or_default();
            Ok(json!({"upload": upload, "language": args.get("language").cloned()}))
        }),
    );
    handlers.insert(
        "list_models".to_string(),
        InvocationHandle::blocking(|_| Ok(json!(["tiny", "base"]))),
    );

    let d = Dispatcher::builder()
        .library(manifest.bind(&handlers))
        .build()
        .unwrap();
    assert_eq!(
        d.registry().names().collect::<Vec<_>>(),
        ["models.list", "transcribe"]
    );

    let r = d.dispatch("transcribe", json!({"audio": "up-9"})).await;
    assert_eq!(r.value(), Some(&json!({"upload": "up-9", "language": null})));

    let r = d.dispatch("models.list", json!(null)).await;
    assert_eq!(r.value(), Some(&json!(["tiny", "base"])));

    let r = d.dispatch("transcribe", json!({"language": "de"})).await;
    assert_eq!(r.error_kind(), Some(ErrorKind::ValidationFailed));
}
