//! Sandbox: bounded, policy-restricted execution of agent-generated code.
//!
//! A [`BoundedExecutor`] owns the [`Bindings`] (tools, caller state and the
//! variables earlier runs left behind) and runs each code string on a
//! blocking worker under a deadline. In safe mode a [`CapabilityPolicy`]
//! limits which builtins and modules the code may reach; tools stay callable
//! regardless.
//!
//! # Modules
//!
//! - [`capability`] — `NameFilter`, `ImportGuard`, `CapabilityPolicy`
//! - [`bindings`]   — `Bindings`, the namespaces shared across runs
//! - [`runner`]     — `CodeBackend`, `ScriptBackend`, `run_once()`
//! - [`executor`]   — `BoundedExecutor`, `ExecutorBuilder`
//! - [`context`]    — `CallContext`, `CancelFlag`
//! - [`state`]      — `ExecutionState`, injected as `ui_state`
//! - [`error`]      — `SandboxError` / `SandboxResult`

pub mod bindings;
pub mod capability;
pub mod context;
pub mod error;
pub mod executor;
pub mod runner;
pub mod state;

pub use bindings::Bindings;
pub use capability::{CapabilityPolicy, Decision, ImportGuard, NameFilter};
pub use context::{CallContext, CancelFlag};
pub use error::{SandboxError, SandboxResult};
pub use executor::{timeout_message, BoundedExecutor, ExecutorBuilder};
pub use runner::{run_once, CodeBackend, RunOutcome, RunResult, ScriptBackend};
pub use state::{ExecutionState, STATE_BINDING};
