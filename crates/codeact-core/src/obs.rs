//! Structured lifecycle events for code executions.
//!
//! - `ExecSpan`, an RAII guard entering a span tagged with the execution and
//!   trace ids
//! - `emit_*` functions for start, completion, fault, timeout and abandonment
//!
//! Events carry an `event = "exec.*"` field so they can be filtered in JSON
//! output (`codeact --json`).

use tracing::{info, warn};

/// RAII guard that keeps an execution-scoped span entered.
///
/// ```ignore
/// let _span = ExecSpan::enter(&execution_id, &ctx.trace_id);
/// ```
pub struct ExecSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecSpan {
    pub fn enter(execution_id: &str, trace_id: &str) -> Self {
        Self {
            _span: exec_span(execution_id, trace_id).entered(),
        }
    }
}

/// The execution-scoped span, for use with `Instrument` across awaits.
pub fn exec_span(execution_id: &str, trace_id: &str) -> tracing::Span {
    tracing::info_span!(
        "codeact.exec",
        execution_id = %execution_id,
        trace_id = %trace_id
    )
}

pub fn emit_execution_started(execution_id: &str, code_digest: &str, timeout_secs: f64) {
    info!(
        event = "exec.started",
        execution_id = %execution_id,
        code_digest = %code_digest,
        timeout_secs = timeout_secs,
    );
}

pub fn emit_execution_completed(execution_id: &str, duration_ms: u64, output_len: usize) {
    info!(
        event = "exec.completed",
        execution_id = %execution_id,
        duration_ms = duration_ms,
        output_len = output_len,
    );
}

/// The script raised; `kind` is the fault kind name.
pub fn emit_execution_faulted(execution_id: &str, kind: &str, duration_ms: u64) {
    info!(
        event = "exec.faulted",
        execution_id = %execution_id,
        kind = %kind,
        duration_ms = duration_ms,
    );
}

pub fn emit_execution_timed_out(execution_id: &str, timeout_secs: f64) {
    warn!(
        event = "exec.timed_out",
        execution_id = %execution_id,
        timeout_secs = timeout_secs,
    );
}

/// The worker did not reach a cancellation checkpoint within the grace period.
pub fn emit_worker_abandoned(execution_id: &str, grace_ms: u64) {
    warn!(
        event = "exec.abandoned",
        execution_id = %execution_id,
        grace_ms = grace_ms,
        "worker still running after cancellation; abandoning it"
    );
}
