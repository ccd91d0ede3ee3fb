//! Tools: host functions injected into the script namespace.
//!
//! A tool is bound under its name for the lifetime of an executor and stays
//! callable whatever the capability policy says. Tool calls see the call's
//! [`CallContext`] and write into the call's own output capture.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::sandbox::context::CallContext;
use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::script::{is_identifier, Fault, FaultKind, OutputCapture, StreamKind, Value};

/// Error returned by a tool. Surfaces in the script as a fault of `kind`,
/// so scripts can catch it by name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "ToolError".to_string(),
            message: message.into(),
        }
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<ToolError> for Fault {
    fn from(err: ToolError) -> Self {
        Fault::new(FaultKind::from_name(&err.kind), err.message)
    }
}

/// Arguments and per-call resources handed to [`Tool::call`].
pub struct ToolCall<'a> {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
    pub context: &'a CallContext,
    pub output: &'a mut OutputCapture,
}

impl ToolCall<'_> {
    /// Positional argument `index`, falling back to keyword `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwarg(name))
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn require(&self, index: usize, name: &str) -> Result<&Value, ToolError> {
        self.arg(index, name).ok_or_else(|| {
            ToolError::with_kind("TypeError", format!("missing required argument '{name}'"))
        })
    }

    pub fn require_str(&self, index: usize, name: &str) -> Result<&str, ToolError> {
        let value = self.require(index, name)?;
        value.as_str().ok_or_else(|| {
            ToolError::with_kind(
                "TypeError",
                format!("argument '{name}' must be str, not {}", value.type_name()),
            )
        })
    }

    /// Write a line to the captured stdout, as `print` would.
    pub fn print(&mut self, text: &str) {
        self.output.write(StreamKind::Stdout, text);
        self.output.write(StreamKind::Stdout, "\n");
    }
}

/// A host function callable from script code.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn call(&self, call: ToolCall<'_>) -> Result<Value, ToolError>;
}

/// A [`Tool`] backed by a closure.
pub struct FnTool<F> {
    name: String,
    description: String,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(ToolCall<'_>) -> Result<Value, ToolError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            func,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<F> Tool for FnTool<F>
where
    F: Fn(ToolCall<'_>) -> Result<Value, ToolError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn call(&self, call: ToolCall<'_>) -> Result<Value, ToolError> {
        (self.func)(call)
    }
}

impl<F> fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

/// Shorthand for a closure tool behind an `Arc`.
pub fn tool_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn Tool>
where
    F: Fn(ToolCall<'_>) -> Result<Value, ToolError> + Send + Sync + 'static,
{
    Arc::new(FnTool::new(name, func))
}

/// The two shapes a caller may hand tools over in.
pub enum Tools {
    /// Bound under the map key, whatever the tool calls itself.
    Map(BTreeMap<String, Arc<dyn Tool>>),
    /// Bound under each tool's own name.
    List(Vec<Arc<dyn Tool>>),
}

impl Default for Tools {
    fn default() -> Self {
        Tools::List(Vec::new())
    }
}

impl From<Vec<Arc<dyn Tool>>> for Tools {
    fn from(tools: Vec<Arc<dyn Tool>>) -> Self {
        Tools::List(tools)
    }
}

impl From<BTreeMap<String, Arc<dyn Tool>>> for Tools {
    fn from(tools: BTreeMap<String, Arc<dyn Tool>>) -> Self {
        Tools::Map(tools)
    }
}

/// Validated tool bindings: unique, well-formed identifiers.
#[derive(Clone, Default)]
pub struct ToolSet {
    entries: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolSet {
    pub fn new(tools: Tools) -> SandboxResult<Self> {
        let pairs: Vec<(String, Arc<dyn Tool>)> = match tools {
            Tools::Map(map) => map.into_iter().collect(),
            Tools::List(list) => list
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect(),
        };
        let mut entries: Vec<(String, Arc<dyn Tool>)> = Vec::with_capacity(pairs.len());
        for (name, tool) in pairs {
            if !is_identifier(&name) {
                return Err(SandboxError::InvalidTools(format!(
                    "'{name}' is not a valid tool name"
                )));
            }
            if entries.iter().any(|(existing, _)| *existing == name) {
                return Err(SandboxError::InvalidTools(format!(
                    "duplicate tool name '{name}'"
                )));
            }
            entries.push((name, tool));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, tool)| tool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Tool>)> {
        self.entries.iter().map(|(name, tool)| (name.as_str(), tool))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str) -> Arc<dyn Tool> {
        tool_fn(name, |call| Ok(call.args.first().cloned().unwrap_or(Value::None)))
    }

    #[test]
    fn list_binds_under_tool_names() {
        let set = ToolSet::new(Tools::List(vec![echo("tap"), echo("swipe")])).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["tap", "swipe"]);
        assert!(set.get("tap").is_some());
    }

    #[test]
    fn map_binds_under_keys() {
        let mut map = BTreeMap::new();
        map.insert("click".to_string(), echo("tap"));
        let set = ToolSet::new(Tools::Map(map)).unwrap();
        assert!(set.get("click").is_some());
        assert!(set.get("tap").is_none());
    }

    #[test]
    fn rejects_invalid_and_duplicate_names() {
        let err = ToolSet::new(Tools::List(vec![echo("long-press")])).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidTools(_)));
        assert!(err.to_string().contains("long-press"));

        let err = ToolSet::new(Tools::List(vec![echo("tap"), echo("tap")])).unwrap_err();
        assert!(err.to_string().contains("duplicate tool name 'tap'"));
    }

    #[test]
    fn tool_error_maps_to_fault_kind() {
        let fault = Fault::from(ToolError::new("device offline"));
        assert_eq!(fault.kind, FaultKind::Custom("ToolError".into()));
        let fault = Fault::from(ToolError::with_kind("ValueError", "bad index"));
        assert_eq!(fault.kind, FaultKind::Value);
        assert_eq!(fault.message, "bad index");
    }

    #[test]
    fn tool_call_helpers() {
        let ctx = CallContext::new();
        let mut output = OutputCapture::new();
        let mut call = ToolCall {
            args: vec![Value::str("hello")],
            kwargs: vec![("count".to_string(), Value::Int(2))],
            context: &ctx,
            output: &mut output,
        };
        assert_eq!(call.require_str(0, "text").unwrap(), "hello");
        assert_eq!(call.arg(1, "count").and_then(Value::as_int), Some(2));
        assert!(call.require(2, "missing").is_err());
        call.print("done");
        assert_eq!(output.stdout(), "done\n");
    }
}
