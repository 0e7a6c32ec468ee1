//! End-to-end dispatch scenarios over in-process libraries

mod common;

use callgate::resilience::{CircuitState, PoolScope};
use callgate::{
    DeclaredParam, Dispatcher, ErrorKind, FunctionDef, InvocationResult, LibraryFailure,
    ServiceOverrides, StaticLibrary,
};
use common::{build, echo, quick_config, Probe};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_echo_success_validation_and_unknown_service() {
    let d = build(StaticLibrary::new("demo").function(echo()), quick_config());

    let ok = d.dispatch("echo", json!({"text": "hi"})).await;
    assert_eq!(ok, InvocationResult::Success(json!("hi")));

    let missing = d.dispatch("echo", json!({})).await;
    let err = missing.error().unwrap();
    assert_eq!(err.kind, ErrorKind::ValidationFailed);
    assert_eq!(err.field.as_deref(), Some("text"));

    let unknown = d.dispatch("missing", json!({"text": "hi"})).await;
    assert_eq!(unknown.error_kind(), Some(ErrorKind::UnknownService));
}

#[tokio::test]
async fn test_circuit_trips_after_threshold_without_reaching_library() {
    let probe = Probe::failing();
    let d = build(
        StaticLibrary::new("flaky").function(probe.function("fetch")),
        quick_config()
            .with_circuit_failure_threshold(2)
            .with_retry_max_attempts(1),
    );

    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(d.dispatch("fetch", json!({})).await.error_kind().unwrap());
    }
    assert_eq!(
        kinds,
        [
            ErrorKind::LibraryError,
            ErrorKind::LibraryError,
            ErrorKind::CircuitOpen
        ]
    );
    assert_eq!(probe.calls(), 2);
    assert!(!d.service_health("fetch").unwrap().available);
}

#[tokio::test]
async fn test_retry_sequence_stops_when_circuit_opens() {
    let probe = Probe::failing();
    let d = build(
        StaticLibrary::new("flaky").function(probe.function("fetch")),
        quick_config()
            .with_circuit_failure_threshold(2)
            .with_retry_max_attempts(5),
    );
    let err = d.dispatch("fetch", json!({})).await.into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitOpen);
    assert_eq!(err.attempts, 3);
    assert_eq!(probe.calls(), 2);
}

#[tokio::test]
async fn test_half_open_trial_recovers_circuit() {
    let probe = Probe::failing();
    let d = build(
        StaticLibrary::new("flaky").function(probe.function("fetch")),
        quick_config()
            .with_circuit_failure_threshold(1)
            .with_circuit_cooldown(Duration::from_millis(40))
            .with_retry_max_attempts(1),
    );
    assert_eq!(
        d.dispatch("fetch", json!({})).await.error_kind(),
        Some(ErrorKind::LibraryError)
    );
    assert_eq!(
        d.dispatch("fetch", json!({})).await.error_kind(),
        Some(ErrorKind::CircuitOpen)
    );

    probe.set_failing(false);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(d.dispatch("fetch", json!({})).await.is_success());
    let snapshot = d.circuit_snapshot("fetch").unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn test_half_open_admits_one_concurrent_trial() {
    let probe = Probe::failing();
    let d = Arc::new(build(
        StaticLibrary::new("slow").function(probe.slow_function("work", Duration::from_millis(80))),
        quick_config()
            .with_circuit_failure_threshold(1)
            .with_circuit_cooldown(Duration::from_millis(30))
            .with_retry_max_attempts(1),
    ));
    assert_eq!(
        d.dispatch("work", json!({})).await.error_kind(),
        Some(ErrorKind::LibraryError)
    );
    probe.set_failing(false);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch("work", json!({})).await })
        })
        .collect();
    let mut successes = 0;
    let mut refused = 0;
    for h in handles {
        match h.await.unwrap().error_kind() {
            None => successes += 1,
            Some(ErrorKind::CircuitOpen) => refused += 1,
            Some(other) => panic!("unexpected outcome {other}"),
        }
    }
    assert_eq!((successes, refused), (1, 4));
    assert_eq!(probe.calls(), 2);
}

#[tokio::test]
async fn test_pool_exhaustion_is_terminal() {
    let probe = Probe::default();
    let d = Arc::new(build(
        StaticLibrary::new("slow").function(probe.slow_function("work", Duration::from_millis(200))),
        quick_config()
            .with_pool_size(1)
            .with_pool_acquire_timeout(Duration::from_millis(20)),
    ));

    let first = {
        let d = Arc::clone(&d);
        tokio::spawn(async move { d.dispatch("work", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let second = d.dispatch("work", json!({})).await;
    assert_eq!(second.error_kind(), Some(ErrorKind::PoolExhausted));
    assert!(first.await.unwrap().is_success());
    assert_eq!(probe.calls(), 1);
    assert_eq!(d.pool_snapshot("work").unwrap().in_use, 0);
}

/// Blocking callable that sleeps and records the most calls ever running at once.
fn gauged_blocking(
    name: &str,
    delay: Duration,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> FunctionDef {
    FunctionDef::blocking(name, move |_| {
        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(delay);
        live.fetch_sub(1, Ordering::SeqCst);
        Ok(json!("done"))
    })
}

#[tokio::test]
async fn test_timed_out_blocking_calls_stay_within_pool_size() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let d = build(
        StaticLibrary::new("native").function(gauged_blocking(
            "decode",
            Duration::from_millis(150),
            Arc::clone(&live),
            Arc::clone(&peak),
        )),
        quick_config()
            .with_pool_size(1)
            .with_pool_acquire_timeout(Duration::from_secs(2))
            .with_retry_max_attempts(3)
            .with_invocation_timeout(Duration::from_millis(20)),
    );

    let err = d.dispatch("decode", json!({})).await.into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::RetriesExhausted);
    assert_eq!(err.root().kind, ErrorKind::Timeout);
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    // the last abandoned call still owns the only slot
    assert_eq!(d.pool_snapshot("decode").unwrap().in_use, 1);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(d.pool_snapshot("decode").unwrap().in_use, 0);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deadline_does_not_free_slot_of_running_blocking_call() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let d = build(
        StaticLibrary::new("native").function(gauged_blocking(
            "decode",
            Duration::from_millis(150),
            Arc::clone(&live),
            Arc::clone(&peak),
        )),
        quick_config()
            .with_pool_size(1)
            .with_pool_acquire_timeout(Duration::ZERO),
    );

    let r = d
        .dispatch_with_deadline("decode", json!({}), Duration::from_millis(20))
        .await;
    assert_eq!(r.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(
        d.dispatch("decode", json!({})).await.error_kind(),
        Some(ErrorKind::PoolExhausted)
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(d.dispatch("decode", json!({})).await.is_success());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_per_service_pools_isolate_backpressure() {
    let probe = Probe::default();
    let d = Arc::new(build(
        StaticLibrary::new("mixed")
            .function(probe.slow_function("slow", Duration::from_millis(200)))
            .function(echo()),
        quick_config()
            .with_pool_scope(PoolScope::PerService)
            .with_pool_acquire_timeout(Duration::ZERO)
            .with_service("slow", ServiceOverrides::new().with_pool_size(1)),
    ));

    let busy = {
        let d = Arc::clone(&d);
        tokio::spawn(async move { d.dispatch("slow", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        d.dispatch("slow", json!({})).await.error_kind(),
        Some(ErrorKind::PoolExhausted)
    );
    assert!(d.dispatch("echo", json!({"text": "free"})).await.is_success());
    assert!(busy.await.unwrap().is_success());
}

#[tokio::test]
async fn test_deadline_cancels_and_counts_as_failure() {
    let probe = Probe::default();
    let d = build(
        StaticLibrary::new("slow").function(probe.slow_function("work", Duration::from_millis(500))),
        quick_config(),
    );
    let r = d
        .dispatch_with_deadline("work", json!({}), Duration::from_millis(30))
        .await;
    assert_eq!(r.error_kind(), Some(ErrorKind::Cancelled));

    let health = d.health_record("work");
    assert_eq!((health.call_count, health.error_count), (1, 1));
    assert_eq!(d.pool_snapshot("work").unwrap().in_use, 0);
    assert_eq!(d.circuit_snapshot("work").unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn test_configured_request_timeout_applies() {
    let probe = Probe::default();
    let d = build(
        StaticLibrary::new("slow").function(probe.slow_function("work", Duration::from_millis(500))),
        quick_config().with_request_timeout(Duration::from_millis(30)),
    );
    assert_eq!(
        d.dispatch("work", json!({})).await.error_kind(),
        Some(ErrorKind::Cancelled)
    );
}

#[tokio::test]
async fn test_panicking_library_yields_library_error() {
    let lib = StaticLibrary::new("crashy").function(FunctionDef::blocking("boom", |_| {
        let reason = "segment table corrupt";
        if !reason.is_empty() {
            panic!("{}", reason);
        }
        Ok(json!(null))
    }));
    let d = build(lib, quick_config().with_retry_max_attempts(1));
    let err = d.dispatch("boom", json!({})).await.into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::LibraryError);
    assert!(err.message.contains("segment table corrupt"));
}

#[tokio::test]
async fn test_binary_parameters_take_upload_references() {
    let lib = StaticLibrary::new("audio").function(
        FunctionDef::blocking("transcribe", |args| {
            let upload = args
                .upload("audio")
                .ok_or_else(|| LibraryFailure::client_input("no audio"))?;
            Ok(json!({
                "upload_id": upload.upload_id,
                "language": args.get("language").cloned(),
            }))
        })
        .param(DeclaredParam::new("audio").annotated("bytes"))
        .param(DeclaredParam::new("language").annotated("str").with_default(json!("en"))),
    );
    let d = build(lib, quick_config());

    let ok = d
        .dispatch("transcribe", json!({"audio": {"upload_id": "up-1", "filename": "a.wav"}}))
        .await;
    assert_eq!(ok.value(), Some(&json!({"upload_id": "up-1", "language": "en"})));

    let by_id = d.dispatch("transcribe", json!({"audio": "up-2"})).await;
    assert_eq!(by_id.value().unwrap()["upload_id"], "up-2");

    let inline = d.dispatch("transcribe", json!({"audio": 42})).await;
    let err = inline.error().unwrap();
    assert_eq!(err.kind, ErrorKind::ValidationFailed);
    assert_eq!(err.field.as_deref(), Some("audio"));
}

#[tokio::test]
async fn test_degraded_service_forwards_payload() {
    let lib = StaticLibrary::new("legacy")
        .function(FunctionDef::blocking("raw", |args| Ok(args.to_json())).without_metadata());
    let d = build(lib, quick_config());
    assert!(d.registry().get("raw").unwrap().degraded);
    let r = d.dispatch("raw", json!({"x": 1, "y": "two"})).await;
    assert_eq!(r.value(), Some(&json!({"x": 1, "y": "two"})));
}

#[tokio::test]
async fn test_failures_stay_within_one_service() {
    let bad = Probe::failing();
    let d = build(
        StaticLibrary::new("two")
            .function(bad.function("bad"))
            .function(echo()),
        quick_config()
            .with_circuit_failure_threshold(1)
            .with_retry_max_attempts(1),
    );
    d.dispatch("bad", json!({})).await;
    assert_eq!(d.circuit_snapshot("bad").unwrap().state, CircuitState::Open);
    assert_eq!(d.circuit_snapshot("echo").unwrap().state, CircuitState::Closed);
    assert!(d.dispatch("echo", json!({"text": "still"})).await.is_success());
}

#[tokio::test]
async fn test_reset_service_closes_circuit() {
    let bad = Probe::failing();
    let d: Dispatcher = build(
        StaticLibrary::new("one").function(bad.function("bad")),
        quick_config()
            .with_circuit_failure_threshold(1)
            .with_retry_max_attempts(1),
    );
    d.dispatch("bad", json!({})).await;
    d.reset_service("bad");
    assert_eq!(d.circuit_snapshot("bad").unwrap().state, CircuitState::Closed);
    assert_eq!(d.health_record("bad").call_count, 0);
}
