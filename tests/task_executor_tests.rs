//! Integration tests for the task executor state machine
//!
//! These tests verify:
//! - Retry accounting and the terminal failure predicate
//! - `ignore_errors` downgrading failures without consuming retries
//! - `when`, `loop`, `register` and `failed_when` evaluation per host
//! - Per-host fan-out and result bookkeeping
//! - Conflict retries, timeouts and cancellation

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use kubeplay::converter::block_to_task;
use kubeplay::executor::task::{FAILED_WHEN_MESSAGE, ITEM_VAR};
use kubeplay::executor::{ExecutorConfig, ExecutorError, TaskExecutor};
use kubeplay::playbook::{Block, When};
use kubeplay::resources::{Task, TaskPhase};

fn to_task(h: &Harness, hosts: &[String], block: &Block, ignore_errors: bool) -> Task {
    block_to_task(&h.ctx, None, hosts, &When::new(), ignore_errors, block).unwrap()
}

async fn run(h: &Harness, hosts: &[String], block: &Block) -> Result<Task, ExecutorError> {
    TaskExecutor::new(h.ctx.clone())
        .exec(to_task(h, hosts, block, false))
        .await
}

// ============================================================================
// Phases and Retries
// ============================================================================

#[tokio::test]
async fn test_success_records_every_host() {
    let h = Harness::new(&["h1", "h2", "h3"]);
    let all = hosts(&["h1", "h2", "h3"]);
    let task = run(&h, &all, &probe("ping", json!({"stdout": "pong"}))).await.unwrap();

    assert_eq!(task.status.phase, TaskPhase::Success);
    assert_eq!(task.status.restart_count, 0);
    let result_hosts: Vec<&str> = task.status.host_results.iter().map(|r| r.host.as_str()).collect();
    assert_eq!(result_hosts, vec!["h1", "h2", "h3"]);
    assert!(task.status.host_results.iter().all(|r| r.error.is_empty() && r.stdout == "pong"));
    assert_eq!(h.probe.hosts_for("ping"), all);

    let counters = h.ctx.counters();
    assert_eq!((counters.total, counters.success), (1, 1));
}

#[tokio::test]
async fn test_retries_exhausted_before_terminal_failure() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("flaky", json!({"fail": true}));
    task_fields(&mut block).retries = 2;

    let err = run(&h, &hosts(&["h1"]), &block).await.unwrap_err();
    assert!(matches!(err, ExecutorError::TaskFailed { ref task, .. } if task == "flaky"));
    assert_eq!(err.exit_code(), 2);

    // One initial pass plus two restarts.
    assert_eq!(h.probe.calls().len(), 3);
    let stored = h.tasks().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status.phase, TaskPhase::Failed);
    assert_eq!(stored[0].status.restart_count, 2);
    assert!(stored[0].is_failed());

    let counters = h.ctx.counters();
    assert_eq!((counters.total, counters.failed), (1, 1));
    let detail = h.ctx.state.lock().failed_detail.clone();
    assert_eq!(detail.len(), 1);
    assert_eq!(detail[0].task, "flaky");
}

#[tokio::test]
async fn test_ignore_errors_stops_after_first_pass() {
    let h = Harness::new(&["h1", "h2"]);
    let mut block = probe("tolerated", json!({"fail": true}));
    task_fields(&mut block).retries = 3;
    let task = to_task(&h, &hosts(&["h1", "h2"]), &block, true);

    let task = TaskExecutor::new(h.ctx.clone()).exec(task).await.unwrap();
    assert_eq!(task.status.phase, TaskPhase::Ignored);
    assert_eq!(task.status.restart_count, 0);
    assert_eq!(h.probe.calls().len(), 2);
    assert!(task.status.host_results.iter().all(|r| r.is_failed()));
    assert_eq!(h.ctx.counters().ignored, 1);
    assert!(h.log().contains("ignore"));
}

#[tokio::test]
async fn test_failure_message_lists_hosts_and_items() {
    let h = Harness::new(&["h1", "h2"]);
    let mut block = probe("partial", json!({"fail": "{{ inventory_hostname == 'h2' }}"}));
    task_fields(&mut block).loop_spec = Some(json!(["a"]));

    let err = run(&h, &hosts(&["h1", "h2"]), &block).await.unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("task \"partial\" run failed:"), "{}", text);
    assert!(text.contains("[h2]: probe failed on h2"), "{}", text);
    assert!(!text.contains("[h1]"));
    assert!(text.contains("  - item: \"a\""));
}

// ============================================================================
// Conditionals, Loops and Register
// ============================================================================

#[tokio::test]
async fn test_when_false_records_skip() {
    let h = Harness::new(&["h1"]);
    let block = probe("guarded", json!({}));
    let task = block_to_task(
        &h.ctx,
        None,
        &hosts(&["h1"]),
        &When::from(vec!["1 == 2"]),
        false,
        &block,
    )
    .unwrap();

    let task = TaskExecutor::new(h.ctx.clone()).exec(task).await.unwrap();
    assert_eq!(task.status.phase, TaskPhase::Success);
    assert_eq!(task.status.host_results[0].stdout, "skip");
    assert!(h.probe.calls().is_empty());
    assert!(h.log().contains("skip"));
}

#[tokio::test]
async fn test_malformed_when_fails_host() {
    let h = Harness::new(&["h1"]);
    let block = probe("broken", json!({}));
    let task = block_to_task(
        &h.ctx,
        None,
        &hosts(&["h1"]),
        &When::from(vec!["(("]),
        false,
        &block,
    )
    .unwrap();

    let err = TaskExecutor::new(h.ctx.clone()).exec(task).await.unwrap_err();
    assert!(err.to_string().contains("parse when condition error"));
}

#[tokio::test]
async fn test_register_without_loop_is_flat() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("emit", json!({"stdout": "hello"}));
    task_fields(&mut block).register = Some("x".to_string());
    run(&h, &hosts(&["h1"]), &block).await.unwrap();

    let x = h.vars.runtime_var("h1", "x").unwrap();
    assert_eq!(x, json!({"stdout": "hello", "stderr": "", "error": ""}));
}

#[tokio::test]
async fn test_register_with_loop_is_list() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("emit", json!({"stdout": "v-{{ item }}"}));
    let fields = task_fields(&mut block);
    fields.register = Some("x".to_string());
    fields.loop_spec = Some(json!([1, 2]));
    run(&h, &hosts(&["h1"]), &block).await.unwrap();

    let x = h.vars.runtime_var("h1", "x").unwrap();
    assert_eq!(
        x,
        json!([
            {"item": 1, "stdout": "v-1", "stderr": "", "error": ""},
            {"item": 2, "stdout": "v-2", "stderr": "", "error": ""},
        ])
    );
}

#[tokio::test]
async fn test_register_parses_json_stdout() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("emit", json!({"stdout": "{\"ready\": true}"}));
    task_fields(&mut block).register = Some("status".to_string());
    run(&h, &hosts(&["h1"]), &block).await.unwrap();

    let next = Block::task("check", "assert", json!({"that": ["status.stdout.ready"]}));
    run(&h, &hosts(&["h1"]), &next).await.unwrap();
}

#[tokio::test]
async fn test_loop_items_are_sequential_and_cleared() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("each", json!({"stdout": "{{ item }}"}));
    task_fields(&mut block).loop_spec = Some(json!(["a", "b", "c"]));
    let task = run(&h, &hosts(&["h1"]), &block).await.unwrap();

    let seen: Vec<String> = h
        .probe
        .calls()
        .into_iter()
        .map(|c| c.args["stdout"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(task.status.host_results[0].items.len(), 3);
    assert_eq!(task.status.host_results[0].stdout, "c");
    assert!(h.vars.runtime_var("h1", ITEM_VAR).is_none());
}

#[tokio::test]
async fn test_register_not_visible_during_loop() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("each", json!({}));
    let fields = task_fields(&mut block);
    fields.loop_spec = Some(json!([1, 2]));
    fields.register = Some("seen".to_string());
    let task = block_to_task(
        &h.ctx,
        None,
        &hosts(&["h1"]),
        &When::from(vec!["seen is not defined"]),
        false,
        &block,
    )
    .unwrap();

    let task = TaskExecutor::new(h.ctx.clone()).exec(task).await.unwrap();
    assert_eq!(h.probe.calls().len(), 2);
    assert!(task.status.host_results[0].items.iter().all(|i| i.stdout == "ok"));
    assert!(h.vars.runtime_var("h1", "seen").is_some());
}

#[tokio::test]
async fn test_loop_from_expression() {
    let h = Harness::new(&["h1"]);
    h.vars.merge_runtime(
        json!({"packages": ["etcd", "kubelet"]}).as_object().unwrap(),
        &hosts(&["h1"]),
    );
    let mut block = probe("install", json!({"stdout": "{{ item }}"}));
    task_fields(&mut block).loop_spec = Some(json!("{{ packages }}"));
    run(&h, &hosts(&["h1"]), &block).await.unwrap();
    assert_eq!(h.probe.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_when_overrides_success() {
    let h = Harness::new(&["h1"]);
    let mut block = probe("check", json!({"stdout": "degraded"}));
    let fields = task_fields(&mut block);
    fields.register = Some("out".to_string());
    fields.failed_when = When::from(vec!["out.stdout == 'degraded'"]);

    let err = run(&h, &hosts(&["h1"]), &block).await.unwrap_err();
    assert!(err.to_string().contains(FAILED_WHEN_MESSAGE));

    let stored = h.tasks().await;
    let result = &stored[0].status.host_results[0];
    assert_eq!(result.stdout, "degraded");
    assert_eq!(result.error, FAILED_WHEN_MESSAGE);
}

#[tokio::test]
async fn test_per_host_failure_does_not_stop_siblings() {
    let h = Harness::new(&["h1", "h2", "h3"]);
    let block = probe("mixed", json!({"fail": "{{ inventory_hostname == 'h2' }}"}));
    let err = run(&h, &hosts(&["h1", "h2", "h3"]), &block).await.unwrap_err();
    assert!(matches!(err, ExecutorError::TaskFailed { .. }));

    let stored = h.tasks().await;
    let failed: Vec<&str> = stored[0]
        .status
        .host_results
        .iter()
        .filter(|r| r.is_failed())
        .map(|r| r.host.as_str())
        .collect();
    assert_eq!(failed, vec!["h2"]);
    assert_eq!(h.probe.calls().len(), 3);
}

// ============================================================================
// Store, Timeout and Cancellation
// ============================================================================

#[tokio::test]
async fn test_status_conflicts_are_retried() {
    let store = Arc::new(ConflictStore::new(2));
    let h = Harness::with_store(&["h1"], store.clone());
    let task = run(&h, &hosts(&["h1"]), &probe("ping", json!({}))).await.unwrap();

    assert_eq!(task.status.phase, TaskPhase::Success);
    assert_eq!(store.injected.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_conflicts_beyond_limit_surface() {
    let store = Arc::new(ConflictStore::new(10));
    let h = Harness::with_store(&["h1"], store).with_config(ExecutorConfig {
        conflict_retries: 1,
        ..Default::default()
    });
    let err = run(&h, &hosts(&["h1"]), &probe("ping", json!({}))).await.unwrap_err();
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_task_timeout() {
    let h = Harness::new(&["h1"]).with_config(ExecutorConfig {
        task_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let err = run(&h, &hosts(&["h1"]), &probe("slow", json!({"sleep_ms": 5_000})))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Timeout { ref task, .. } if task == "slow"));
    let counters = h.ctx.counters();
    assert_eq!((counters.total, counters.failed), (1, 0));
    assert!(h.ctx.state.lock().failed_detail.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_hosts() {
    let h = Harness::new(&["h1", "h2"]);
    let cancel = h.ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = run(&h, &hosts(&["h1", "h2"]), &probe("slow", json!({"sleep_ms": 10_000})))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));

    let counters = h.ctx.counters();
    assert_eq!(
        (counters.total, counters.success, counters.failed, counters.ignored),
        (1, 0, 0, 0)
    );
    assert!(h.ctx.state.lock().failed_detail.is_empty());
}

#[tokio::test]
async fn test_hosts_run_concurrently() {
    let names = ["h1", "h2", "h3", "h4"];
    let h = Harness::new(&names);

    let started = std::time::Instant::now();
    let task = run(&h, &hosts(&names), &probe("nap", json!({"sleep_ms": 300})))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(task.status.host_results.len(), 4);
    assert!(
        elapsed < Duration::from_millis(900),
        "4 hosts x 300ms took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_cancelled_context_creates_nothing() {
    let h = Harness::new(&["h1"]);
    h.ctx.cancel.cancel();
    let err = run(&h, &hosts(&["h1"]), &probe("never", json!({}))).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(h.tasks().await.is_empty());
}

#[test]
fn test_executor_on_current_thread_runtime() {
    let h = Harness::new(&["h1", "h2"]);
    let task = tokio_test::block_on(run(&h, &hosts(&["h1", "h2"]), &probe("ping", json!({}))))
        .unwrap();
    assert_eq!(task.status.phase, TaskPhase::Success);
    assert_eq!(task.status.host_results.len(), 2);
}
