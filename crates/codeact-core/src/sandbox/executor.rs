//! Bounded executor: the public entry point.
//!
//! Each `execute` dispatches one run to tokio's blocking pool and races it
//! against a deadline. Every outcome, including a timeout or a panicking
//! tool, resolves to a string; nothing is propagated to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, Span};

use crate::config::ExecutorConfig;
use crate::metrics::METRICS;
use crate::obs;
use crate::script::{Limits, Scope, Value};
use crate::tools::{Tool, ToolSet, Tools};
use crate::trajectory::{ExecutionObserver, ExecutionOutcome, ExecutionRecord};

use super::bindings::Bindings;
use super::capability::CapabilityPolicy;
use super::context::{CallContext, CancelFlag};
use super::error::SandboxResult;
use super::runner::{self, CodeBackend, RunOutcome, RunResult, ScriptBackend};
use super::state::ExecutionState;

/// The string returned when a run misses its deadline.
pub fn timeout_message(timeout: Duration) -> String {
    format!(
        "Error: Execution timed out after {:?} seconds",
        timeout.as_secs_f64()
    )
}

/// Whole milliseconds for log and record fields, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Executes code strings against persistent bindings under a deadline.
pub struct BoundedExecutor {
    bindings: Arc<Bindings>,
    backend: Arc<dyn CodeBackend>,
    policy: CapabilityPolicy,
    default_timeout: Duration,
    cancel_grace: Duration,
    observer: Option<Arc<dyn ExecutionObserver>>,
}

impl BoundedExecutor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Run `code` with a fresh [`CallContext`] and return its result string.
    /// `timeout` falls back to the configured default.
    pub async fn execute(
        &self,
        state: &ExecutionState,
        code: &str,
        timeout: Option<Duration>,
    ) -> String {
        self.execute_detailed(CallContext::new(), state, code, timeout)
            .await
            .output
    }

    /// Like [`execute`](Self::execute), returning the full record.
    pub async fn execute_detailed(
        &self,
        ctx: CallContext,
        state: &ExecutionState,
        code: &str,
        timeout: Option<Duration>,
    ) -> ExecutionRecord {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut record = ExecutionRecord::begin(ctx.trace_id.clone(), code);
        let execution_id = record.id.to_string();
        let span = obs::exec_span(&execution_id, &ctx.trace_id);

        async {
            obs::emit_execution_started(&execution_id, &record.code_digest, timeout.as_secs_f64());
            METRICS.inc_started();
            let started = Instant::now();

            let (output, outcome) = self
                .dispatch(&execution_id, code, state.clone(), ctx, timeout)
                .await;

            let duration_ms = millis(started.elapsed());
            match &outcome {
                ExecutionOutcome::Completed => {
                    METRICS.inc_completed();
                    obs::emit_execution_completed(&execution_id, duration_ms, output.len());
                }
                ExecutionOutcome::Faulted { kind } => {
                    METRICS.inc_faulted();
                    obs::emit_execution_faulted(&execution_id, kind, duration_ms);
                }
                ExecutionOutcome::TimedOut { .. } => {
                    METRICS.inc_timed_out();
                    obs::emit_execution_timed_out(&execution_id, timeout.as_secs_f64());
                }
            }
            record.output = output;
            record.outcome = outcome;
            record.duration_ms = duration_ms;

            if let Some(observer) = &self.observer {
                observer.on_execution(&record).await;
            }
        }
        .instrument(span)
        .await;

        record
    }

    async fn dispatch(
        &self,
        execution_id: &str,
        code: &str,
        state: ExecutionState,
        ctx: CallContext,
        timeout: Duration,
    ) -> (String, ExecutionOutcome) {
        let bindings = Arc::clone(&self.bindings);
        let backend = Arc::clone(&self.backend);
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let code = code.to_string();
        let parent = Span::current();

        let mut handle = tokio::task::spawn_blocking(move || {
            runner::run_isolated(|| {
                runner::run_once(
                    backend.as_ref(),
                    &code,
                    &bindings,
                    &state,
                    &ctx,
                    &worker_cancel,
                    &parent,
                )
            })
        });

        let result = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let message = match join_err.try_into_panic() {
                    Ok(payload) => runner::panic_message(payload.as_ref()),
                    Err(err) => err.to_string(),
                };
                RunResult::panicked(&message)
            }
            Err(_elapsed) => {
                cancel.cancel();
                match tokio::time::timeout(self.cancel_grace, &mut handle).await {
                    Ok(_) => tracing::debug!("worker stopped after cancellation"),
                    Err(_) => obs::emit_worker_abandoned(
                        execution_id,
                        millis(self.cancel_grace),
                    ),
                }
                return (
                    timeout_message(timeout),
                    ExecutionOutcome::TimedOut {
                        timeout_ms: millis(timeout),
                    },
                );
            }
        };

        let outcome = match result.outcome {
            RunOutcome::Completed => ExecutionOutcome::Completed,
            RunOutcome::Faulted { kind } => ExecutionOutcome::Faulted { kind },
            // Only the deadline raises the flag, so this is a timeout that
            // raced the completion check.
            RunOutcome::Cancelled => {
                return (
                    timeout_message(timeout),
                    ExecutionOutcome::TimedOut {
                        timeout_ms: millis(timeout),
                    },
                )
            }
        };
        (result.text, outcome)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("backend", &self.backend.name())
            .field("bindings", &self.bindings)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Builder for [`BoundedExecutor`]. Construction is the only place that can
/// fail.
#[derive(Default)]
pub struct ExecutorBuilder {
    tools: Vec<Arc<dyn Tool>>,
    named_tools: Vec<(String, Arc<dyn Tool>)>,
    locals: Scope,
    globals: Scope,
    config: ExecutorConfig,
    policy: Option<CapabilityPolicy>,
    backend: Option<Arc<dyn CodeBackend>>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    /// Exact durations set on the builder; they win over the config's
    /// seconds and milliseconds.
    default_timeout: Option<Duration>,
    cancel_grace: Option<Duration>,
}

impl ExecutorBuilder {
    /// Start from a loaded configuration.
    pub fn from_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Add tools bound under their own names, or under map keys.
    pub fn tools(mut self, tools: impl Into<Tools>) -> Self {
        match tools.into() {
            Tools::List(list) => self.tools.extend(list),
            Tools::Map(map) => self.named_tools.extend(map),
        }
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn local(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    pub fn global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn locals(mut self, locals: Scope) -> Self {
        self.locals.extend(locals);
        self
    }

    pub fn globals(mut self, globals: Scope) -> Self {
        self.globals.extend(globals);
        self
    }

    pub fn shared_scope(mut self, shared: bool) -> Self {
        self.config.use_same_scope = shared;
        self
    }

    /// Enable safe mode with the given lists.
    pub fn safe_mode(mut self, safe: crate::config::SafeExecutionConfig) -> Self {
        self.config.safe = safe;
        self
    }

    /// Use an explicit policy instead of resolving one from the config.
    pub fn policy(mut self, policy: CapabilityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    pub fn max_alloc_bytes(mut self, bytes: usize) -> Self {
        self.config.max_alloc_bytes = bytes;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CodeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> SandboxResult<BoundedExecutor> {
        self.config.validate()?;
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(super::error::SandboxError::InvalidConfig(
                "default timeout must be positive".to_string(),
            ));
        }
        let tools = if self.named_tools.is_empty() {
            ToolSet::new(Tools::List(self.tools))?
        } else {
            let mut map: std::collections::BTreeMap<String, Arc<dyn Tool>> =
                std::collections::BTreeMap::new();
            for (name, tool) in self.named_tools {
                map.insert(name, tool);
            }
            for tool in self.tools {
                let name = tool.name().to_string();
                if map.contains_key(&name) {
                    return Err(super::error::SandboxError::InvalidTools(format!(
                        "duplicate tool name '{name}'"
                    )));
                }
                map.insert(name, tool);
            }
            ToolSet::new(Tools::Map(map))?
        };

        let policy = self
            .policy
            .unwrap_or_else(|| CapabilityPolicy::from_config(&self.config.safe));
        let bindings = Bindings::build(
            &tools,
            self.locals,
            self.globals,
            policy.builtins_table(),
            policy.import_guard(),
            self.config.use_same_scope,
        )?;
        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(ScriptBackend::new(Limits {
                max_call_depth: self.config.max_call_depth,
                max_alloc_bytes: self.config.max_alloc_bytes,
            }))
        });

        tracing::info!(
            backend = backend.name(),
            tools = tools.len(),
            safe_mode = self.config.safe.safe_mode,
            shared_scope = self.config.use_same_scope,
            "executor ready"
        );

        Ok(BoundedExecutor {
            bindings: Arc::new(bindings),
            backend,
            policy,
            default_timeout: self
                .default_timeout
                .unwrap_or_else(|| self.config.default_timeout()),
            cancel_grace: self
                .cancel_grace
                .unwrap_or_else(|| self.config.cancel_grace()),
            observer: self.observer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::error::SandboxError;
    use crate::tools::tool_fn;

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_micros(1500)), 1);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn timeout_message_prints_float_seconds() {
        assert_eq!(
            timeout_message(Duration::from_millis(200)),
            "Error: Execution timed out after 0.2 seconds"
        );
        assert_eq!(
            timeout_message(Duration::from_secs(50)),
            "Error: Execution timed out after 50.0 seconds"
        );
    }

    #[test]
    fn builder_rejects_duplicate_tools() {
        let err = BoundedExecutor::builder()
            .tool(tool_fn("tap", |_| Ok(Value::None)))
            .tool(tool_fn("tap", |_| Ok(Value::None)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidTools(_)));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let mut config = ExecutorConfig::default();
        config.default_timeout_secs = 0.0;
        let err = ExecutorBuilder::from_config(config).build().unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[test]
    fn builder_keeps_exact_durations() {
        let executor = BoundedExecutor::builder()
            .default_timeout(Duration::from_nanos(1_500_000_001))
            .cancel_grace(Duration::from_micros(2_500))
            .build()
            .unwrap();
        assert_eq!(executor.default_timeout(), Duration::from_nanos(1_500_000_001));
        assert_eq!(executor.cancel_grace(), Duration::from_micros(2_500));

        let err = BoundedExecutor::builder()
            .default_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_unrepresentable_timeout() {
        let config = ExecutorConfig {
            default_timeout_secs: 1e300,
            ..ExecutorConfig::default()
        };
        let err = ExecutorBuilder::from_config(config).build().unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn simple_execution() {
        let executor = BoundedExecutor::builder().build().unwrap();
        let out = executor
            .execute(&ExecutionState::empty(), "print(1 + 2)", None)
            .await;
        assert_eq!(out, "3\n");
        assert_eq!(executor.backend_name(), "script");
        assert_eq!(executor.default_timeout(), Duration::from_secs(50));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_string() {
        let executor = BoundedExecutor::builder()
            .tool(tool_fn("explode", |_| panic!("device bridge crashed")))
            .build()
            .unwrap();
        let out = executor
            .execute(&ExecutionState::empty(), "explode()", None)
            .await;
        assert_eq!(out, "Error: Panic: device bridge crashed\n");
        // The poisoned scope lock is recovered for the next call.
        let out = executor
            .execute(&ExecutionState::empty(), "print('ok')", None)
            .await;
        assert_eq!(out, "ok\n");
    }
}
