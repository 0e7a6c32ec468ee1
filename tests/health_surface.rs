//! Health-check surface after real dispatches

mod common;

use callgate::resilience::CircuitState;
use callgate::{DeclaredParam, FunctionDef, HealthStatus, LibraryFailure, StaticLibrary};
use common::{build, echo, quick_config};
use serde_json::json;
use std::time::Duration;

fn library() -> StaticLibrary {
    StaticLibrary::new("health")
        .function(echo())
        .function(
            FunctionDef::blocking("unstable", |args| {
                std::thread::sleep(Duration::from_millis(2));
                if args.get_bool("fail").unwrap_or(false) {
                    Err(LibraryFailure::new("backend unavailable"))
                } else {
                    Ok(json!("ok"))
                }
            })
            .param(DeclaredParam::new("fail").with_default(json!(false))),
        )
}

#[tokio::test]
async fn test_counts_match_outcomes() {
    let d = build(
        library(),
        quick_config()
            .with_retry_max_attempts(1)
            .with_circuit_failure_threshold(100),
    );
    for fail in [false, true, false, true, false] {
        d.dispatch("unstable", json!({"fail": fail})).await;
    }
    let record = d.health_record("unstable");
    assert_eq!(record.call_count, 5);
    assert_eq!(record.error_count, 2);
    let avg = record.avg_response_time().unwrap();
    assert!(avg >= Duration::from_millis(2));
    assert_eq!(record.error_rate(), Some(0.4));

    let report = d.health_report();
    assert_eq!(report.status, HealthStatus::Healthy);

    for _ in 0..3 {
        d.dispatch("unstable", json!({"fail": true})).await;
    }
    let report = d.health_report();
    assert_eq!(report.status, HealthStatus::Degraded);
    let row = report.service("unstable").unwrap();
    assert_eq!((row.call_count, row.error_count), (8, 5));
    assert!(row.available);
}

#[tokio::test]
async fn test_idle_services_report_no_data() {
    let d = build(library(), quick_config());
    let report = d.health_report();
    assert!(report.is_healthy());
    assert_eq!(report.services.len(), 2);
    for row in &report.services {
        assert_eq!(row.call_count, 0);
        assert!(row.avg_response_time_ms.is_none());
        assert!(row.error_rate.is_none());
        assert_eq!(row.circuit, CircuitState::Closed);
    }
}

#[tokio::test]
async fn test_open_circuit_marks_service_unavailable() {
    let d = build(
        library(),
        quick_config()
            .with_retry_max_attempts(1)
            .with_circuit_failure_threshold(1),
    );
    d.dispatch("unstable", json!({"fail": true})).await;
    let row = d.service_health("unstable").unwrap();
    assert!(!row.available);
    assert_eq!(row.circuit, CircuitState::Open);
    assert!(d.service_health("echo").unwrap().available);

    let json = serde_json::to_value(d.health_report()).unwrap();
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_reset_health_clears_counters() {
    let d = build(library(), quick_config());
    d.dispatch("echo", json!({"text": "a"})).await;
    assert_eq!(d.health_record("echo").call_count, 1);
    d.reset_health();
    assert_eq!(d.health_record("echo").call_count, 0);
}
