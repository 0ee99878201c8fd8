use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use toolcore_content_store::ContentStore;
use toolcore_executor::{ErrorCode, ExecutorConfig, InvokeOptions, InvokeRequest, TaskExecutor};

async fn executor_with(config: ExecutorConfig) -> (TaskExecutor, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new().expect("tempdir");
    let store = ContentStore::open(temp.path()).await.expect("open store");
    (TaskExecutor::new(store, config), temp)
}

async fn default_executor() -> (TaskExecutor, TempDir) {
    executor_with(ExecutorConfig::default()).await
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timeout waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_scenario_serves_second_call_from_cache() {
    let (executor, _temp) = default_executor().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    executor.register_fn("echo", move |args, _trace_id| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args["msg"].clone())
        }
    });

    let first = executor
        .execute(InvokeRequest::new("echo", json!({"msg": "hi"}), "trace-1"))
        .await;
    assert!(first.success);
    assert_eq!(first.data, Some(json!("hi")));
    assert!(first.artifact.is_none());
    assert!(!first.meta.cache_hit);
    assert_eq!(first.meta.tool_name, "echo");
    assert_eq!(first.meta.trace_id, "trace-1");

    let second = executor
        .execute(InvokeRequest::new("echo", json!({"msg": "hi"}), "trace-2"))
        .await;
    assert!(second.success);
    assert_eq!(second.data, Some(json!("hi")));
    assert!(second.meta.cache_hit);
    assert_eq!(second.meta.execution_time_ms, 0);
    assert_eq!(second.meta.trace_id, "trace-2");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dedup_is_insensitive_to_arg_key_order() {
    let (executor, _temp) = default_executor().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    executor.register_fn("lookup", move |_args, _trace_id| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    });

    let args_a: serde_json::Value =
        serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).expect("json");
    let args_b: serde_json::Value =
        serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).expect("json");

    let first = executor
        .execute(InvokeRequest::new("lookup", args_a, "trace-1"))
        .await;
    let second = executor
        .execute(InvokeRequest::new("lookup", args_b, "trace-2"))
        .await;

    assert!(!first.meta.cache_hit);
    assert!(second.meta.cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_outputs_go_to_the_store() {
    let (executor, _temp) = default_executor().await;
    executor.register_fn("big", |_args, _trace_id| async move {
        Ok(json!("x".repeat(5_000)))
    });
    executor.register_fn("small", |_args, _trace_id| async move {
        Ok(json!("tiny"))
    });

    let big = executor
        .execute(InvokeRequest::new("big", json!({}), "trace-1"))
        .await;
    assert!(big.success);
    assert!(big.data.is_none());
    let artifact = big.artifact.expect("oversized output is stored");
    let expected = serde_json::to_vec(&json!("x".repeat(5_000))).expect("serialize");
    assert_eq!(artifact.size, expected.len() as u64);
    let stored = executor
        .store()
        .get(&artifact.content_ref)
        .await
        .expect("get")
        .expect("payload present");
    assert_eq!(stored, expected);

    let small = executor
        .execute(InvokeRequest::new("small", json!({}), "trace-2"))
        .await;
    assert!(small.success);
    assert_eq!(small.data, Some(json!("tiny")));
    assert!(small.artifact.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cache_hit_on_stored_output_returns_the_descriptor() {
    let (executor, _temp) = default_executor().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    executor.register_fn("big", move |_args, _trace_id| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("y".repeat(10_000)))
        }
    });

    let first = executor
        .execute(InvokeRequest::new("big", json!({}), "trace-1"))
        .await;
    let second = executor
        .execute(InvokeRequest::new("big", json!({}), "trace-2"))
        .await;

    assert!(second.meta.cache_hit);
    assert_eq!(second.meta.execution_time_ms, 0);
    assert_eq!(
        second.artifact.expect("cached descriptor").content_ref,
        first.artifact.expect("stored descriptor").content_ref
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn return_ref_forces_storage_of_small_outputs() {
    let (executor, _temp) = default_executor().await;
    executor.register_fn("small", |_args, _trace_id| async move { Ok(json!("tiny")) });

    let options = InvokeOptions {
        return_ref: true,
        ..InvokeOptions::default()
    };
    let result = executor
        .execute(InvokeRequest::new("small", json!({}), "trace-1").with_options(options))
        .await;

    assert!(result.success);
    assert!(result.data.is_none());
    let artifact = result.artifact.expect("forced ref");
    assert_eq!(artifact.size, "\"tiny\"".len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn max_output_size_overrides_the_inline_threshold() {
    let (executor, _temp) = default_executor().await;
    executor.register_fn("medium", |_args, _trace_id| async move {
        Ok(json!("z".repeat(100)))
    });

    let options = InvokeOptions {
        max_output_size: Some(10),
        ..InvokeOptions::default()
    };
    let result = executor
        .execute(InvokeRequest::new("medium", json!({}), "trace-1").with_options(options))
        .await;

    assert!(result.success);
    assert!(result.data.is_none(), "102 bytes > 10 byte override");
    assert!(result.artifact.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_handler_fails_the_task_not_the_executor() {
    let (executor, _temp) = default_executor().await;
    executor.register_fn("echo", |args, _trace_id| async move { Ok(args) });

    let result = executor
        .execute(InvokeRequest::new("nope", json!({}), "trace-1"))
        .await;
    assert!(!result.success);
    let error = result.error.expect("failure envelope");
    assert_eq!(error.code, ErrorCode::ExecutionError);
    assert!(error.message.contains("no handler registered"));

    // The executor keeps serving other tools.
    let ok = executor
        .execute(InvokeRequest::new("echo", json!({"k": 1}), "trace-2"))
        .await;
    assert!(ok.success);

    let stats = executor.stats();
    assert_eq!(stats.failed_count, 1);
    assert_eq!(stats.completed_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_tool_names_are_rejected_without_a_task() {
    let (executor, _temp) = default_executor().await;

    for bad in ["", " padded ", &"a".repeat(101)] {
        let result = executor
            .execute(InvokeRequest::new(bad, json!({}), "trace-1"))
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.expect("failure envelope").code,
            ErrorCode::InvalidRequest
        );
    }

    let stats = executor.stats();
    assert_eq!(stats, Default::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_identical_requests_execute_once() {
    let (executor, _temp) = default_executor().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let counter = calls.clone();
    let handler_gate = gate.clone();
    executor.register_fn("slow", move |_args, _trace_id| {
        let counter = counter.clone();
        let gate = handler_gate.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let permit = gate.acquire().await?;
            permit.forget();
            Ok(json!("slow result"))
        }
    });

    let primary = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .execute(InvokeRequest::new("slow", json!({"q": 1}), "trace-0"))
                .await
        })
    };
    wait_for("primary task to start", || executor.stats().active_count == 1).await;

    let joiners: Vec<_> = (1..=3)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .execute(InvokeRequest::new(
                        "slow",
                        json!({"q": 1}),
                        format!("trace-{i}"),
                    ))
                    .await
            })
        })
        .collect();

    // Joiners attach to the in-flight task instead of queuing new work.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.stats().active_count, 1);
    assert_eq!(executor.stats().queued_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.add_permits(1);

    let primary = primary.await.expect("join primary");
    assert!(primary.success);
    assert_eq!(primary.data, Some(json!("slow result")));
    assert!(!primary.meta.cache_hit);

    for joiner in joiners {
        let result = joiner.await.expect("join duplicate");
        assert!(result.success);
        assert_eq!(result.data, Some(json!("slow result")));
        assert!(result.meta.cache_hit);
        assert_eq!(result.meta.execution_time_ms, 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_tasks_are_not_served_from_cache() {
    let config = ExecutorConfig {
        max_retries: 0,
        ..ExecutorConfig::default()
    };
    let (executor, _temp) = executor_with(config).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    executor.register_fn("flaky", move |_args, _trace_id| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("transient outage");
            }
            Ok(json!("recovered"))
        }
    });

    let first = executor
        .execute(InvokeRequest::new("flaky", json!({}), "trace-1"))
        .await;
    assert!(!first.success);
    assert!(first
        .error
        .expect("failure envelope")
        .message
        .contains("transient outage"));

    let second = executor
        .execute(InvokeRequest::new("flaky", json!({}), "trace-2"))
        .await;
    assert!(second.success);
    assert!(!second.meta.cache_hit, "failures must not be cached");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
