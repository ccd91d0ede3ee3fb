//! Binding precedence and scope lifetime across executions.

use std::collections::BTreeMap;
use std::sync::Arc;

use codeact_core::{
    tool_fn, BoundedExecutor, ExecutionState, SandboxError, Tool, ToolError, Tools, Value,
};

fn state() -> ExecutionState {
    ExecutionState::empty()
}

fn constant(name: &str, value: i64) -> Arc<dyn Tool> {
    tool_fn(name, move |_| Ok(Value::Int(value)))
}

#[tokio::test]
async fn test_tools_are_not_clobbered_by_globals() {
    let executor = BoundedExecutor::builder()
        .tool(constant("battery", 87))
        .global("battery", Value::Int(0))
        .build()
        .unwrap();
    let out = executor.execute(&state(), "print(battery())", None).await;
    assert_eq!(out, "87\n");
}

#[tokio::test]
async fn test_locals_override_tools() {
    let executor = BoundedExecutor::builder()
        .tool(constant("battery", 87))
        .local("battery", Value::str("mocked"))
        .build()
        .unwrap();
    let out = executor.execute(&state(), "print(battery)", None).await;
    assert_eq!(out, "mocked\n");
}

#[tokio::test]
async fn test_globals_shadow_builtins() {
    let executor = BoundedExecutor::builder()
        .global("max", Value::Int(3))
        .build()
        .unwrap();
    let out = executor.execute(&state(), "print(max + 1)", None).await;
    assert_eq!(out, "4\n");
}

#[tokio::test]
async fn test_map_tools_bind_under_keys() {
    let mut map: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
    map.insert("press_back".to_string(), constant("back", 1));
    let executor = BoundedExecutor::builder().tools(map).build().unwrap();
    let out = executor.execute(&state(), "print(press_back())", None).await;
    assert_eq!(out, "1\n");
    let out = executor.execute(&state(), "back()", None).await;
    assert!(out.starts_with("Error: NameError: name 'back' is not defined"));
}

#[test]
fn test_invalid_tool_set_is_a_construction_error() {
    let err = BoundedExecutor::builder()
        .tools(Tools::List(vec![constant("open app", 1)]))
        .build()
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidTools(_)));
}

#[tokio::test]
async fn test_separate_scope_keeps_globals_but_resets_locals() {
    let executor = BoundedExecutor::builder()
        .shared_scope(false)
        .local("step", Value::Int(0))
        .build()
        .unwrap();
    let out = executor
        .execute(&state(), "step = step + 1\nprint(step)", None)
        .await;
    assert_eq!(out, "1\n");
    // Locals start from the initial value again.
    let out = executor
        .execute(&state(), "step = step + 1\nprint(step)", None)
        .await;
    assert_eq!(out, "1\n");
}

#[tokio::test]
async fn test_shared_scope_functions_see_later_assignments() {
    let executor = BoundedExecutor::builder().build().unwrap();
    executor
        .execute(&state(), "def greet():\n    return 'hi ' + name", None)
        .await;
    executor.execute(&state(), "name = 'ada'", None).await;
    let out = executor.execute(&state(), "print(greet())", None).await;
    assert_eq!(out, "hi ada\n");
}

#[tokio::test]
async fn test_tool_receives_kwargs_context_and_output() {
    let executor = BoundedExecutor::builder()
        .tool(tool_fn("swipe", |mut call| {
            let direction = call.require_str(0, "direction")?.to_string();
            let steps = call
                .kwarg("steps")
                .and_then(Value::as_int)
                .ok_or_else(|| ToolError::with_kind("ValueError", "steps is required"))?;
            let has_trace = !call.context.trace_id.is_empty();
            call.print(&format!("swiped {direction} x{steps} traced={has_trace}"));
            Ok(Value::Bool(true))
        }))
        .build()
        .unwrap();
    let out = executor
        .execute(&state(), "ok = swipe('up', steps=2)\nprint(ok)", None)
        .await;
    assert_eq!(out, "swiped up x2 traced=true\nTrue\n");

    let out = executor.execute(&state(), "swipe('up')", None).await;
    assert!(out.starts_with("Error: ValueError: steps is required"));
}

#[tokio::test]
async fn test_tool_error_kind_is_catchable() {
    let executor = BoundedExecutor::builder()
        .tool(tool_fn("tap", |_| Err(ToolError::new("element not visible"))))
        .build()
        .unwrap();
    let code = "try:\n    tap()\nexcept ToolError as e:\n    print('retry:', e)";
    let out = executor.execute(&state(), code, None).await;
    assert_eq!(out, "retry: element not visible\n");
}

#[test]
fn test_bindings_expose_names() {
    let executor = BoundedExecutor::builder()
        .tool(constant("tap", 1))
        .global("retries", Value::Int(3))
        .build()
        .unwrap();
    let names = executor.bindings().names();
    assert_eq!(names, vec!["retries".to_string(), "tap".to_string()]);
    assert!(matches!(executor.bindings().get("retries"), Some(Value::Int(3))));
}
