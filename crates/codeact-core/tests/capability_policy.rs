//! Capability policy behaviour as seen through the executor.

use std::collections::BTreeSet;

use codeact_core::sandbox::capability::{CapabilityPolicy, Decision, ImportGuard, NameFilter};
use codeact_core::{BoundedExecutor, ExecutionState, SafeExecutionConfig};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn run(safe: SafeExecutionConfig, code: &str) -> String {
    let executor = BoundedExecutor::builder().safe_mode(safe).build().unwrap();
    executor.execute(&ExecutionState::empty(), code, None).await
}

#[tokio::test]
async fn test_blocked_module_wins_over_allowed() {
    let safe = SafeExecutionConfig {
        safe_mode: true,
        allowed_modules: Some(names(&["json", "re"])),
        blocked_modules: Some(names(&["re"])),
        ..SafeExecutionConfig::default()
    };
    let out = run(safe, "import json\nimport re").await;
    assert!(out.starts_with("Error: PolicyViolation: import of module 're' is not allowed"));
    assert!(out.contains("line 2, in <module>"));
}

#[tokio::test]
async fn test_from_import_is_guarded() {
    let safe = SafeExecutionConfig {
        safe_mode: true,
        blocked_modules: Some(names(&["os"])),
        ..SafeExecutionConfig::default()
    };
    let out = run(safe, "from os import getcwd").await;
    assert!(out.starts_with("Error: PolicyViolation:"));
}

#[tokio::test]
async fn test_submodule_follows_package_decision() {
    let safe = SafeExecutionConfig {
        safe_mode: true,
        blocked_modules: Some(names(&["os"])),
        ..SafeExecutionConfig::default()
    };
    let out = run(safe, "import os.path").await;
    assert!(out.starts_with("Error: PolicyViolation: import of module 'os.path' is not allowed"));
}

#[tokio::test]
async fn test_dunder_import_is_guarded() {
    let safe = SafeExecutionConfig {
        safe_mode: true,
        allowed_modules: Some(names(&["math"])),
        ..SafeExecutionConfig::default()
    };
    let out = run(safe.clone(), "m = __import__('math')\nprint(m.floor(2.7))").await;
    assert_eq!(out, "2\n");
    let out = run(safe, "__import__('os')").await;
    assert!(out.starts_with("Error: PolicyViolation:"));
}

#[tokio::test]
async fn test_policy_violation_is_catchable_like_any_fault() {
    let safe = SafeExecutionConfig {
        safe_mode: true,
        allowed_modules: Some(BTreeSet::new()),
        ..SafeExecutionConfig::default()
    };
    let code = "try:\n    import json\nexcept Exception as e:\n    print('denied:', e)";
    let out = run(safe, code).await;
    assert_eq!(out, "denied: import of module 'json' is not allowed\n");
}

#[tokio::test]
async fn test_hardened_preset_blocks_eval_and_os() {
    let out = run(SafeExecutionConfig::hardened(), "eval('1 + 1')").await;
    assert!(out.starts_with("Error: PolicyViolation: use of builtin 'eval' is not allowed"));
    let out = run(SafeExecutionConfig::hardened(), "import sys").await;
    assert!(out.starts_with("Error: PolicyViolation:"));
    let out = run(SafeExecutionConfig::hardened(), "import math\nprint(math.pi > 3)").await;
    assert_eq!(out, "True\n");
}

#[tokio::test]
async fn test_lists_ignored_without_safe_mode() {
    let safe = SafeExecutionConfig {
        safe_mode: false,
        allowed_modules: Some(BTreeSet::new()),
        allowed_builtins: Some(BTreeSet::new()),
        ..SafeExecutionConfig::default()
    };
    let out = run(safe, "import json\nprint(len(json.dumps([1])))").await;
    assert_eq!(out, "3\n");
}

#[tokio::test]
async fn test_explicit_policy_overrides_config() {
    let executor = BoundedExecutor::builder()
        .policy(CapabilityPolicy {
            builtins: NameFilter::allow_all(),
            modules: NameFilter::resolve(Some(names(&["time"])), None),
        })
        .build()
        .unwrap();
    let out = executor
        .execute(&ExecutionState::empty(), "import json", None)
        .await;
    assert!(out.starts_with("Error: PolicyViolation:"));
    assert_eq!(
        executor.policy().modules.decision("time"),
        Decision::Allowed
    );
}

#[test]
fn test_import_guard_decisions() {
    let guard = ImportGuard::new(NameFilter::resolve(
        Some(names(&["os", "json"])),
        Some(names(&["os.path"])),
    ));
    assert_eq!(guard.decision("json"), Decision::Allowed);
    assert_eq!(guard.decision("os"), Decision::Allowed);
    assert_eq!(guard.decision("os.path"), Decision::Blocked);
    assert_eq!(guard.decision("math"), Decision::NotAllowListed);
}
