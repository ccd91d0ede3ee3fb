//! Global atomic counters for executor observability.
//!
//! Counters are bumped silently at the call site; [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    executions_started: AtomicU64,
    executions_completed: AtomicU64,
    executions_faulted: AtomicU64,
    executions_timed_out: AtomicU64,
    policy_violations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_completed: AtomicU64::new(0),
            executions_faulted: AtomicU64::new(0),
            executions_timed_out: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_started", "counter incremented");
    }

    pub fn inc_completed(&self) {
        self.executions_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_completed", "counter incremented");
    }

    pub fn inc_faulted(&self) {
        self.executions_faulted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_faulted", "counter incremented");
    }

    pub fn inc_timed_out(&self) {
        self.executions_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_timed_out", "counter incremented");
    }

    /// A denied import or builtin reference.
    pub fn inc_policy_violations(&self) {
        self.policy_violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_violations", "counter incremented");
    }

    /// Emit all counters as a single `info!` event. Call at natural
    /// boundaries (end of a CLI run, shutdown) rather than per execution.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions_started = self.executions_started(),
            executions_completed = self.executions_completed(),
            executions_faulted = self.executions_faulted(),
            executions_timed_out = self.executions_timed_out(),
            policy_violations = self.policy_violations(),
        );
    }

    pub fn executions_started(&self) -> u64 {
        self.executions_started.load(Ordering::Relaxed)
    }

    pub fn executions_completed(&self) -> u64 {
        self.executions_completed.load(Ordering::Relaxed)
    }

    pub fn executions_faulted(&self) -> u64 {
        self.executions_faulted.load(Ordering::Relaxed)
    }

    pub fn executions_timed_out(&self) -> u64 {
        self.executions_timed_out.load(Ordering::Relaxed)
    }

    pub fn policy_violations(&self) -> u64 {
        self.policy_violations.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.executions_started.store(0, Ordering::Relaxed);
        self.executions_completed.store(0, Ordering::Relaxed);
        self.executions_faulted.store(0, Ordering::Relaxed);
        self.executions_timed_out.store(0, Ordering::Relaxed);
        self.policy_violations.store(0, Ordering::Relaxed);
    }
}
