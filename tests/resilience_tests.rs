//! Retry, timeout and fallback behaviour of the resilient adapter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use mcp_tool_server::adapter::{
    service_fn, AdapterOutput, BaseAdapter, ExecutionOptions, FallbackConfig, FallbackHooks,
    FallbackStrategy, FnService, ResilientAdapter, ToolContext,
};
use mcp_tool_server::cache::MemoryCache;
use mcp_tool_server::error::{ErrorCategory, ToolError};
use mcp_tool_server::protocol::ToolErrorData;

fn policy(max_retries: u32, strategy: FallbackStrategy, enable_fallback: bool) -> FallbackConfig {
    FallbackConfig {
        enable_fallback,
        fallback_strategy: strategy,
        max_retries,
        retry_delay: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_retry_delay: Duration::from_millis(4),
        operation_timeout: Duration::from_secs(5),
        cancel_on_timeout: false,
    }
}

/// Service whose core fails with `error()` every time and counts calls.
fn failing<F>(calls: Arc<AtomicUsize>, error: F) -> FnService
where
    F: Fn() -> ToolError + Send + Sync + 'static,
{
    FnService::new(
        "flaky",
        "Fails on every call",
        json!({ "type": "object", "properties": { "q": { "type": "string" } } }),
        move |_params: Value, _ctx: ToolContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            let err = error();
            async move { Err::<Value, _>(anyhow::Error::from(err)) }
        },
    )
}

fn resilient(service: FnService, config: FallbackConfig) -> ResilientAdapter<FnService> {
    let base = BaseAdapter::new(service, Arc::new(MemoryCache::default())).unwrap();
    ResilientAdapter::new(base, config)
}

async fn run(adapter: &ResilientAdapter<FnService>, params: Value) -> Result<AdapterOutput, ToolError> {
    let ctx = ToolContext::new("flaky", params.clone());
    adapter.execute(&params, &ctx, &ExecutionOptions::default()).await
}

#[tokio::test]
async fn transient_failures_run_max_retries_plus_one_times() {
    for max_retries in [0u32, 1, 3] {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = failing(calls.clone(), || ToolError::from_message("upstream timed out"));
        let adapter = resilient(service, policy(max_retries, FallbackStrategy::Fail, false));

        let err = run(&adapter, json!({})).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Performance);
        assert_eq!(calls.load(Ordering::SeqCst), max_retries as usize + 1);
    }
}

#[tokio::test]
async fn rate_limit_external_and_system_failures_are_retried() {
    for category in [ErrorCategory::RateLimit, ErrorCategory::External, ErrorCategory::System] {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = failing(calls.clone(), move || ToolError::execution(category, "transient"));
        let adapter = resilient(service, policy(2, FallbackStrategy::Fail, false));

        run(&adapter, json!({})).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3, "{category}");
    }
}

#[tokio::test]
async fn deterministic_failures_run_exactly_once() {
    let errors: Vec<fn() -> ToolError> = vec![
        || ToolError::validation("bad input", Vec::new()),
        || ToolError::permission("permission denied"),
        || ToolError::resource("file not found"),
        || ToolError::execution(ErrorCategory::Integration, "schema mismatch"),
    ];

    for make in errors {
        let calls = Arc::new(AtomicUsize::new(0));
        let expected = make().category();
        let adapter = resilient(failing(calls.clone(), make), policy(5, FallbackStrategy::Fail, false));

        let err = run(&adapter, json!({})).await.unwrap_err();

        assert_eq!(err.category(), expected);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{expected}");
    }
}

#[tokio::test]
async fn disabled_fallback_returns_primary_error_unchanged() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = failing(calls, || ToolError::resource("file not found: data.csv"));
    let adapter = resilient(service, policy(2, FallbackStrategy::Default, false));

    let err = run(&adapter, json!({})).await.unwrap_err();

    assert!(matches!(err, ToolError::Resource { .. }));
    assert_eq!(err.to_string(), "file not found: data.csv");
}

#[tokio::test]
async fn default_strategy_returns_default_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = failing(calls.clone(), || ToolError::from_message("engine crashed"))
        .with_default(service_fn(|params: Value, _ctx: ToolContext| async move {
            Ok::<_, anyhow::Error>(json!({ "default": true, "params": params }))
        }));
    let adapter = resilient(service, policy(2, FallbackStrategy::Default, true));

    let output = run(&adapter, json!({ "q": "x" })).await.unwrap();

    assert_eq!(output.data, json!({ "default": true, "params": { "q": "x" } }));
    assert_eq!(output.fallback, Some(FallbackStrategy::Default));
    assert_eq!(output.attempts, 3);
    assert!(!output.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn validation_failure_goes_straight_to_fallback() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = failing(calls.clone(), || ToolError::from_message("engine crashed"))
        .with_default(service_fn(|_params: Value, _ctx: ToolContext| async move {
            Ok::<_, anyhow::Error>(json!({ "default": true }))
        }));
    let adapter = resilient(service, policy(3, FallbackStrategy::Default, true));

    let output = run(&adapter, json!({ "q": 42 })).await.unwrap();

    assert_eq!(output.data, json!({ "default": true }));
    assert_eq!(output.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Core always fails; simplified and partial hooks answer.
fn with_reduced_hooks() -> FnService {
    let hooks = FallbackHooks {
        simplified: Some(service_fn(|_p: Value, _c: ToolContext| async move {
            Ok::<_, anyhow::Error>(json!("simplified"))
        })),
        ..FallbackHooks::default()
    };
    failing(Arc::new(AtomicUsize::new(0)), || ToolError::from_message("engine crashed"))
        .with_hooks(hooks)
        .with_partial(service_fn(|_p: Value, _c: ToolContext| async move {
            Ok::<_, anyhow::Error>(json!("partial"))
        }))
}

#[tokio::test]
async fn simplified_and_partial_hooks_are_dispatched() {
    for (strategy, expected) in [
        (FallbackStrategy::Simplified, "simplified"),
        (FallbackStrategy::Partial, "partial"),
    ] {
        let adapter = resilient(with_reduced_hooks(), policy(0, strategy, true));
        let output = run(&adapter, json!({})).await.unwrap();
        assert_eq!(output.data, json!(expected));
        assert_eq!(output.fallback, Some(strategy));
    }
}

#[tokio::test]
async fn missing_hook_yields_composite_error_with_both_messages() {
    let service = failing(Arc::new(AtomicUsize::new(0)), || ToolError::from_message("engine crashed"));
    let adapter = resilient(service, policy(1, FallbackStrategy::Simplified, true));

    let err = run(&adapter, json!({})).await.unwrap_err();

    let ToolError::Composite { primary, fallback } = &err else {
        panic!("expected composite error, got {err:?}");
    };
    assert_eq!(primary.to_string(), "engine crashed");
    assert_eq!(
        fallback.to_string(),
        "simplified fallback not implemented for 'flaky'"
    );

    let data = ToolErrorData::from(&err);
    assert_eq!(data.kind, "CompositeError");
    assert_eq!(data.category, ErrorCategory::System);
    assert_eq!(data.primary.as_deref(), Some("engine crashed"));
    assert_eq!(
        data.fallback.as_deref(),
        Some("simplified fallback not implemented for 'flaky'")
    );
    assert!(data.message.contains("engine crashed"));
    assert!(data.message.contains("not implemented"));
}

#[tokio::test]
async fn fail_strategy_always_raises_and_names_itself() {
    let service = failing(Arc::new(AtomicUsize::new(0)), || ToolError::from_message("engine crashed"));
    let adapter = resilient(service, policy(0, FallbackStrategy::Fail, true));

    let err = run(&adapter, json!({})).await.unwrap_err();

    let ToolError::Composite { fallback, .. } = &err else {
        panic!("expected composite error, got {err:?}");
    };
    assert!(fallback.to_string().contains("Fallback strategy 'fail'"));
}

#[tokio::test]
async fn cache_strategy_serves_stale_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let service = FnService::new(
        "flaky",
        "Succeeds once, then fails",
        json!({ "type": "object" }),
        move |params: Value, _ctx: ToolContext| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Ok(json!({ "fresh": params }))
                } else {
                    Err(anyhow::anyhow!("backend unavailable"))
                }
            }
        },
    )
    .with_ttl(Duration::from_millis(20));
    let adapter = resilient(service, policy(1, FallbackStrategy::Cache, true));
    let params = json!({ "q": "x" });

    let first = run(&adapter, params.clone()).await.unwrap();
    assert!(!first.from_cache);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let second = run(&adapter, params).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.fallback, Some(FallbackStrategy::Cache));
    assert_eq!(second.data, first.data);
    assert_eq!(second.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cache_strategy_without_data_reports_resource_error() {
    let service = failing(Arc::new(AtomicUsize::new(0)), || ToolError::from_message("engine crashed"));
    let adapter = resilient(service, policy(0, FallbackStrategy::Cache, true));

    let err = run(&adapter, json!({})).await.unwrap_err();

    let ToolError::Composite { fallback, .. } = &err else {
        panic!("expected composite error, got {err:?}");
    };
    assert_eq!(fallback.category(), ErrorCategory::Resource);
    assert_eq!(fallback.to_string(), "No cached data available for 'flaky'");
}

fn sleeping(started: Arc<AtomicUsize>, finished: Arc<AtomicBool>, work: Duration) -> FnService {
    FnService::new(
        "slow",
        "Sleeps before answering",
        json!({ "type": "object" }),
        move |_params: Value, _ctx: ToolContext| {
            let started = started.clone();
            let finished = finished.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                finished.store(true, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(json!("done"))
            }
        },
    )
}

#[tokio::test(start_paused = true)]
async fn attempts_time_out_and_are_retried() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let service = sleeping(started.clone(), finished, Duration::from_secs(10));
    let config = FallbackConfig {
        operation_timeout: Duration::from_millis(100),
        ..policy(1, FallbackStrategy::Fail, false)
    };
    let adapter = resilient(service, config);

    let err = run(&adapter, json!({})).await.unwrap_err();

    assert!(matches!(err, ToolError::Timeout { timeout_ms: Some(100), .. }));
    assert_eq!(err.to_string(), "Operation 'slow' timed out after 100ms");
    assert_eq!(started.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_when_the_call_budget_is_spent() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let service = sleeping(started.clone(), finished, Duration::from_secs(10));
    let config = FallbackConfig {
        operation_timeout: Duration::from_millis(100),
        retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(40),
        ..policy(5, FallbackStrategy::Fail, false)
    };
    let adapter = resilient(service, config);
    let options = ExecutionOptions {
        timeout: Duration::from_millis(250),
        ..ExecutionOptions::default()
    };

    let begun = tokio::time::Instant::now();
    let err = adapter
        .execute(&json!({}), &ToolContext::new("slow", json!({})), &options)
        .await
        .unwrap_err();

    // 100ms + 10ms + 100ms + 20ms, then a last attempt cut to the 20ms left.
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert!(matches!(err, ToolError::Timeout { timeout_ms: Some(20), .. }), "{err:?}");
    let elapsed = begun.elapsed();
    assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(260), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn timed_out_work_keeps_running_by_default() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let service = sleeping(started, finished.clone(), Duration::from_millis(200));
    let config = FallbackConfig {
        operation_timeout: Duration::from_millis(50),
        ..policy(0, FallbackStrategy::Fail, false)
    };
    let adapter = resilient(service, config);

    run(&adapter, json!({})).await.unwrap_err();
    assert!(!finished.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn cancel_on_timeout_drops_the_attempt() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let service = sleeping(started, finished.clone(), Duration::from_millis(200));
    let config = FallbackConfig {
        operation_timeout: Duration::from_millis(50),
        cancel_on_timeout: true,
        ..policy(0, FallbackStrategy::Fail, false)
    };
    let adapter = resilient(service, config);

    run(&adapter, json!({})).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn backoff_is_non_decreasing_and_capped() {
    let configs = [
        (100, 2.0, 500, 6),
        (1000, 2.0, 10_000, 8),
        (250, 1.5, 1000, 10),
        (7, 3.0, 7, 4),
    ];

    for (delay, multiplier, max, retries) in configs {
        let config = FallbackConfig {
            retry_delay: Duration::from_millis(delay),
            backoff_multiplier: multiplier,
            max_retry_delay: Duration::from_millis(max),
            max_retries: retries,
            ..FallbackConfig::default()
        };
        let delays = config.retry_delays();
        assert_eq!(delays.len(), retries as usize);
        assert_eq!(delays[0], Duration::from_millis(delay));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
            assert_eq!(pair[1], config.next_retry_delay(pair[0]));
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(max)));
    }
}
