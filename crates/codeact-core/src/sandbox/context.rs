//! Per-call context and the cancellation flag shared with the worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifiers that travel with one `execute` call.
///
/// Passed explicitly to the worker and to every tool call; it is never
/// stored anywhere that outlives the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl CallContext {
    /// A context with a fresh v4 trace id.
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            request_id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// One-way cancellation signal, raised by the executor at the deadline and
/// polled by the interpreter at its checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_gets_unique_trace_ids() {
        let a = CallContext::new();
        let b = CallContext::new();
        assert_ne!(a.trace_id, b.trace_id);
        assert!(uuid::Uuid::parse_str(&a.trace_id).is_ok());
    }

    #[test]
    fn builders_set_fields() {
        let ctx = CallContext::new()
            .with_trace_id("t-1")
            .with_request_id("r-9")
            .with_attribute("device", "pixel-7");
        assert_eq!(ctx.trace_id, "t-1");
        assert_eq!(ctx.request_id.as_deref(), Some("r-9"));
        assert_eq!(ctx.attribute("device"), Some("pixel-7"));
        assert_eq!(ctx.attribute("missing"), None);
    }

    #[test]
    fn serde_skips_empty_optionals() {
        let ctx = CallContext::new().with_trace_id("t");
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, r#"{"trace_id":"t"}"#);
        let back: CallContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let flag = CancelFlag::new();
        let worker = flag.clone();
        assert!(!worker.is_cancelled());
        flag.cancel();
        assert!(worker.is_cancelled());
    }
}
