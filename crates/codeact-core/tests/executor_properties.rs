//! End-to-end contract tests for the bounded executor.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use codeact_core::{
    tool_fn, BoundedExecutor, ExecutionState, SafeExecutionConfig, Value,
};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn state() -> ExecutionState {
    ExecutionState::empty()
}

// -------------------------------------------------------------------------
// Output capture
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_fault_free_code_returns_captured_output() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor
        .execute(
            &state(),
            "total = 0\nfor i in range(4):\n    total += i\nprint('total', total)",
            None,
        )
        .await;
    assert_eq!(out, "total 6\n");
}

#[tokio::test]
async fn test_no_output_yields_empty_string() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor.execute(&state(), "x = 1", None).await;
    assert_eq!(out, "");
}

#[tokio::test]
async fn test_stdout_and_stderr_are_joined_by_newline() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor
        .execute(
            &state(),
            "import sys\nprint('out', end='')\nprint('err', end='', file=sys.stderr)",
            None,
        )
        .await;
    assert_eq!(out, "out\nerr");
}

// -------------------------------------------------------------------------
// Faults
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_raised_exception_names_kind_and_message() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor
        .execute(&state(), "raise RuntimeError('device not found')", None)
        .await;
    assert!(out.starts_with("Error: RuntimeError: device not found\n"));
    assert!(out.contains("Traceback (most recent call last):"));
    assert!(out.trim_end().ends_with("RuntimeError: device not found"));
}

#[tokio::test]
async fn test_traceback_lists_every_frame() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let code = "def inner():\n    return 1 / 0\n\ndef outer():\n    return inner()\n\nouter()\n";
    let out = executor.execute(&state(), code, None).await;
    assert!(out.starts_with("Error: ZeroDivisionError: division by zero\n"));
    let module = out.find("line 7, in <module>").unwrap();
    let outer = out.find("line 5, in outer").unwrap();
    let inner = out.find("line 2, in inner").unwrap();
    assert!(module < outer && outer < inner);
}

#[tokio::test]
async fn test_syntax_error_is_reported_not_raised() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor.execute(&state(), "if True print(1)", None).await;
    assert!(out.starts_with("Error: SyntaxError:"));
}

#[tokio::test]
async fn test_executor_survives_faults() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let _ = executor.execute(&state(), "undefined_name", None).await;
    let out = executor.execute(&state(), "print('still here')", None).await;
    assert_eq!(out, "still here\n");
}

// -------------------------------------------------------------------------
// Deadlines
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_timeout_returns_in_about_t_and_names_t() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let started = Instant::now();
    let out = executor
        .execute(
            &state(),
            "import time\ntime.sleep(5)\nprint('late')",
            Some(Duration::from_millis(200)),
        )
        .await;
    let elapsed = started.elapsed();
    assert_eq!(out, "Error: Execution timed out after 0.2 seconds");
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn test_busy_loop_is_cancelled_at_deadline() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let out = executor
        .execute(
            &state(),
            "n = 0\nwhile True:\n    n += 1",
            Some(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(out, "Error: Execution timed out after 0.1 seconds");

    // The cancelled worker released the bindings; the next call runs.
    let out = executor.execute(&state(), "print(n > 0)", None).await;
    assert_eq!(out, "True\n");
}

#[tokio::test]
async fn test_builtin_loop_over_huge_range_is_cancelled() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let started = Instant::now();
    let out = executor
        .execute(&state(), "sum(range(10**13))", Some(Duration::from_millis(300)))
        .await;
    assert_eq!(out, "Error: Execution timed out after 0.3 seconds");
    assert!(started.elapsed() < Duration::from_secs(3));

    let out = executor.execute(&state(), "print('next')", None).await;
    assert_eq!(out, "next\n");
}

#[tokio::test]
async fn test_reductions_and_conversions_poll_for_cancellation() {
    let executor = BoundedExecutor::builder().build().unwrap();
    for code in [
        "max(range(10**13))",
        "any(x < 0 for x in range(10**13))",
        "all(range(1, 10**13))",
    ] {
        let out = executor
            .execute(&state(), code, Some(Duration::from_millis(200)))
            .await;
        assert!(out.starts_with("Error: "), "{code}: {out}");
        let out = executor.execute(&state(), "print('ok')", None).await;
        assert_eq!(out, "ok\n", "after {code}");
    }
}

// -------------------------------------------------------------------------
// Resource limits
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_huge_repetition_is_a_memory_error() {
    let executor = BoundedExecutor::builder().build().unwrap();
    for code in [
        "x = 'a' * 10**13",
        "x = [0] * 10**13",
        "x = 'ab'.center(10**13)",
        "x = 'ab'.zfill(10**13)",
        "x = list(range(10**13))",
    ] {
        let out = executor.execute(&state(), code, None).await;
        assert!(out.starts_with("Error: MemoryError:"), "{code}: {out}");
    }
    let out = executor
        .execute(&state(), "print('a' * 3, [] * 10**13, '' * 10**13 == '')", None)
        .await;
    assert_eq!(out, "aaa [] True\n");
}

#[tokio::test]
async fn test_allocation_limit_is_configurable() {
    let executor = BoundedExecutor::builder()
        .max_alloc_bytes(1024)
        .build()
        .unwrap();
    let out = executor.execute(&state(), "x = 'a' * 4096", None).await;
    assert!(out.starts_with("Error: MemoryError:"), "{out}");
    let out = executor.execute(&state(), "print(len('a' * 100))", None).await;
    assert_eq!(out, "100\n");
}

#[tokio::test]
async fn test_deep_nesting_is_a_syntax_error_not_a_crash() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
    let out = executor.execute(&state(), &parens, None).await;
    assert!(out.starts_with("Error: SyntaxError:"), "{out}");
    assert!(out.contains("too many nested parentheses"));

    let chain = format!("1{}", "+1".repeat(300_000));
    let out = executor.execute(&state(), &chain, None).await;
    assert!(out.starts_with("Error: RecursionError:"), "{out}");

    let out = executor.execute(&state(), "print((((1 + 2))))", None).await;
    assert_eq!(out, "3\n");
}

#[tokio::test]
async fn test_blocking_tool_is_abandoned_after_grace() {
    let executor = BoundedExecutor::builder()
        .tool(tool_fn("hang", |_| {
            std::thread::sleep(Duration::from_millis(600));
            Ok(Value::None)
        }))
        .cancel_grace(Duration::from_millis(50))
        .build()
        .unwrap();
    let started = Instant::now();
    let out = executor
        .execute(&state(), "hang()", Some(Duration::from_millis(100)))
        .await;
    assert_eq!(out, "Error: Execution timed out after 0.1 seconds");
    assert!(started.elapsed() < Duration::from_millis(500));
}

// -------------------------------------------------------------------------
// Capability policy
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_allowed_modules_permit_only_listed() {
    let executor = BoundedExecutor::builder()
        .safe_mode(SafeExecutionConfig {
            safe_mode: true,
            allowed_modules: Some(names(&["math"])),
            ..SafeExecutionConfig::default()
        })
        .build()
        .unwrap();
    let out = executor
        .execute(&state(), "import math\nprint(math.sqrt(16))", None)
        .await;
    assert_eq!(out, "4.0\n");
    let out = executor.execute(&state(), "import os", None).await;
    assert!(out.starts_with("Error: PolicyViolation: import of module 'os' is not allowed"));
}

#[tokio::test]
async fn test_empty_allowed_modules_deny_every_import() {
    let executor = BoundedExecutor::builder()
        .safe_mode(SafeExecutionConfig {
            safe_mode: true,
            allowed_modules: Some(BTreeSet::new()),
            ..SafeExecutionConfig::default()
        })
        .build()
        .unwrap();
    for module in ["math", "json", "re", "time"] {
        let out = executor
            .execute(&state(), &format!("import {module}"), None)
            .await;
        assert!(out.starts_with("Error: PolicyViolation:"), "{module}: {out}");
    }
}

#[tokio::test]
async fn test_tools_stay_callable_under_safe_mode() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let executor = BoundedExecutor::builder()
        .tool(tool_fn("tap", move |call| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(call.args.first().cloned().unwrap_or(Value::None))
        }))
        .safe_mode(SafeExecutionConfig {
            safe_mode: true,
            allowed_modules: Some(BTreeSet::new()),
            allowed_builtins: Some(names(&["print"])),
            ..SafeExecutionConfig::default()
        })
        .build()
        .unwrap();
    let out = executor.execute(&state(), "print(tap(3))", None).await;
    assert_eq!(out, "3\n");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let out = executor.execute(&state(), "print(len('abc'))", None).await;
    assert!(out.starts_with("Error: PolicyViolation: use of builtin 'len' is not allowed"));
}

// -------------------------------------------------------------------------
// Scope persistence
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_shared_scope_persists_top_level_names() {
    let executor = BoundedExecutor::builder()
        .shared_scope(true)
        .build()
        .unwrap();
    executor
        .execute(&state(), "counter = 41\ndef bump():\n    return counter + 1", None)
        .await;
    let out = executor.execute(&state(), "print(bump())", None).await;
    assert_eq!(out, "42\n");
}

#[tokio::test]
async fn test_separate_scope_does_not_persist() {
    let executor = BoundedExecutor::builder()
        .shared_scope(false)
        .build()
        .unwrap();
    executor.execute(&state(), "counter = 41", None).await;
    let out = executor.execute(&state(), "print(counter)", None).await;
    assert!(out.starts_with("Error: NameError: name 'counter' is not defined"));
}

// -------------------------------------------------------------------------
// State injection
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_ui_state_is_injected_and_replaced() {
    let executor = BoundedExecutor::builder().build().unwrap();
    let first = ExecutionState::new(serde_json::json!({"activity": "Settings", "clickable": 3}));
    let out = executor
        .execute(&first, "print(ui_state['activity'], ui_state['clickable'])", None)
        .await;
    assert_eq!(out, "Settings 3\n");

    let second = ExecutionState::new(serde_json::json!({"activity": "Home"}));
    let out = executor
        .execute(&second, "print('clickable' in ui_state)", None)
        .await;
    assert_eq!(out, "False\n");
}

#[tokio::test]
async fn test_concurrent_calls_are_serialized() {
    let executor = Arc::new(
        BoundedExecutor::builder()
            .global("hits", Value::Int(0))
            .build()
            .unwrap(),
    );
    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            executor
                .execute(&ExecutionState::empty(), "current = hits\nhits = current + 1", None)
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), "");
    }
    let out = executor.execute(&state(), "print(hits)", None).await;
    assert_eq!(out, "8\n");
}
