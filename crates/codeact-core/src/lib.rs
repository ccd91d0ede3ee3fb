//! codeact core library
//!
//! Bounded execution of agent-generated code against device-automation
//! tools: a restricted script interpreter, a capability policy, persistent
//! bindings and a deadline-enforcing executor.

pub mod config;
pub mod metrics;
pub mod obs;
pub mod sandbox;
pub mod script;
pub mod telemetry;
pub mod tools;
pub mod trajectory;

pub use config::{ExecutorConfig, SafeExecutionConfig};

pub use sandbox::{
    run_once, timeout_message, Bindings, BoundedExecutor, CallContext, CancelFlag,
    CapabilityPolicy, CodeBackend, Decision, ExecutionState, ExecutorBuilder, ImportGuard,
    NameFilter, RunOutcome, RunResult, SandboxError, SandboxResult, ScriptBackend,
};

pub use script::{Fault, FaultKind, Scope, Value};

pub use tools::{tool_fn, FnTool, Tool, ToolCall, ToolError, ToolSet, Tools};

pub use trajectory::{
    code_digest, ExecutionObserver, ExecutionOutcome, ExecutionRecord, TrajectoryLog,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
