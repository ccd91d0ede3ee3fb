//! Structured tracing events emitted around executions.

use std::time::Duration;

use codeact_core::obs::{
    emit_execution_completed, emit_execution_faulted, emit_execution_started,
    emit_execution_timed_out, emit_worker_abandoned, ExecSpan,
};
use codeact_core::{tool_fn, BoundedExecutor, CallContext, ExecutionState, Value};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_functions_log_event_names() {
    let _span = ExecSpan::enter("exec-1", "trace-1");
    emit_execution_started("exec-1", "digest", 1.5);
    emit_execution_completed("exec-1", 12, 4);
    emit_execution_faulted("exec-1", "ValueError", 3);
    emit_execution_timed_out("exec-1", 0.2);
    emit_worker_abandoned("exec-1", 100);

    assert!(logs_contain("exec.started"));
    assert!(logs_contain("exec.completed"));
    assert!(logs_contain("kind=ValueError"));
    assert!(logs_contain("exec.timed_out"));
    assert!(logs_contain("exec.abandoned"));
}

#[traced_test]
#[tokio::test]
async fn test_execution_emits_started_and_completed() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let ctx = CallContext::new().with_trace_id("trace-obs-1");
    let record = executor
        .execute_detailed(ctx, &ExecutionState::empty(), "print('hi')", None)
        .await;
    assert_eq!(record.output, "hi\n");

    assert!(logs_contain("exec.started"));
    assert!(logs_contain("exec.completed"));
    assert!(logs_contain("trace-obs-1"));
}

#[traced_test]
#[tokio::test]
async fn test_fault_emits_faulted_event() {
    let executor = BoundedExecutor::builder().build().unwrap();
    executor
        .execute(&ExecutionState::empty(), "raise KeyError('ui')", None)
        .await;
    assert!(logs_contain("exec.faulted"));
    assert!(logs_contain("kind=KeyError"));
}

#[traced_test]
#[tokio::test]
async fn test_stuck_tool_logs_abandonment() {
    let executor = BoundedExecutor::builder()
        .tool(tool_fn("wait_for_device", |_| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Value::None)
        }))
        .cancel_grace(Duration::from_millis(20))
        .build()
        .unwrap();
    let out = executor
        .execute(
            &ExecutionState::empty(),
            "wait_for_device()",
            Some(Duration::from_millis(50)),
        )
        .await;
    assert_eq!(out, "Error: Execution timed out after 0.05 seconds");
    assert!(logs_contain("exec.timed_out"));
    assert!(logs_contain("exec.abandoned"));
}
