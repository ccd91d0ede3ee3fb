//! Caller-owned state injected before each run.

use serde::{Deserialize, Serialize};

use crate::script::Value;

/// Binding name the state is injected under.
pub const STATE_BINDING: &str = "ui_state";

/// Opaque snapshot (typically of a device UI) handed in by the caller.
///
/// The executor never inspects or merges it: every call replaces the
/// previous `ui_state` binding wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub ui_state: Option<serde_json::Value>,
}

impl ExecutionState {
    pub fn new(ui_state: serde_json::Value) -> Self {
        Self {
            ui_state: Some(ui_state),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The script value bound to [`STATE_BINDING`].
    pub fn to_value(&self) -> Value {
        match &self.ui_state {
            Some(json) => Value::from_json(json),
            None => Value::None,
        }
    }
}

impl From<serde_json::Value> for ExecutionState {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}
