//! Runtime values of the script language.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::ast::Stmt;
use super::fault::{Fault, FaultKind, ScriptResult};
use super::interp::Interpreter;
use super::output::StreamKind;
use crate::tools::Tool;

/// Builtins that double as type objects for `isinstance()` and `type()`.
pub const TYPE_BUILTINS: &[&str] = &["int", "float", "str", "bool", "list", "tuple", "dict"];

/// A name → value mapping; the unit the bindings and call frames are made of.
pub type Scope = HashMap<String, Value>;

/// Signature of functions implemented in Rust (builtins and module members).
pub type NativeImpl = fn(&mut Interpreter<'_>, CallArgs) -> ScriptResult<Value>;

/// Lock a value's interior, recovering from a poisoned mutex.
///
/// A poisoned lock only means another run panicked mid-update; the data is
/// still structurally valid for the script's purposes.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    Dict(Arc<Mutex<Dict>>),
    Range(Range),
    Function(Arc<Function>),
    Native(Arc<NativeFunction>),
    Tool(Arc<dyn Tool>),
    Module(Arc<Module>),
    BoundMethod(Arc<BoundMethod>),
    /// An exception class, or the type of a value as returned by `type()`.
    Class(Arc<str>),
    Exception(Arc<ExceptionValue>),
    Stream(StreamKind),
    Match(Arc<MatchValue>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Arc::new(Mutex::new(dict)))
    }

    pub fn native(name: &'static str, func: NativeImpl) -> Self {
        Value::Native(Arc::new(NativeFunction { name, func }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Tool(_) => "tool",
            Value::Module(_) => "module",
            Value::BoundMethod(_) => "method",
            Value::Class(_) => "type",
            Value::Exception(_) => "exception",
            Value::Stream(_) => "TextIOWrapper",
            Value::Match(_) => "Match",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !lock(items).is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !lock(dict).is_empty(),
            Value::Range(range) => range.len() > 0,
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// `str(value)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::List(items) => {
                let items = lock(items).clone();
                format!("[{}]", join_repr(&items))
            }
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(dict) => {
                let entries = lock(dict).entries.clone();
                let body = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}")
            }
            Value::Range(r) if r.step == 1 => format!("range({}, {})", r.start, r.stop),
            Value::Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Native(func) if TYPE_BUILTINS.contains(&func.name) => {
                format!("<class '{}'>", func.name)
            }
            Value::Native(func) => format!("<built-in function {}>", func.name),
            Value::Tool(tool) => format!("<tool {}>", tool.name()),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::BoundMethod(method) => format!(
                "<bound method {}.{}>",
                method.receiver.type_name(),
                method.name
            ),
            Value::Class(name) => format!("<class '{name}'>"),
            Value::Exception(exc) => format!("{}({})", exc.kind, quote_str(&exc.message)),
            Value::Stream(kind) => format!("<{}>", kind.name()),
            Value::Match(m) => format!(
                "<re.Match object; span=({}, {}), match={}>",
                m.start,
                m.end,
                quote_str(m.groups[0].as_deref().unwrap_or(""))
            ),
        }
    }

    /// Structural equality as `==` sees it.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = lock(a).clone();
                let b = lock(b).clone();
                seq_equals(&a, &b)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = lock(a).clone();
                let b = lock(b).clone();
                a.len() == b.len()
                    && a.entries.iter().all(|(k, v)| {
                        b.get(k).map(|other| other.equals(v)).unwrap_or(false)
                    })
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.name == b.name,
            (Value::Tool(a), Value::Tool(b)) => a.name() == b.name(),
            (Value::Module(a), Value::Module(b)) => a.name == b.name,
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => {
                    if let (Some(i), Some(j)) = (a.as_int(), b.as_int()) {
                        i == j
                    } else {
                        x == y
                    }
                }
                _ => false,
            },
        }
    }

    /// `is` identity: reference identity for containers, equality for scalars.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, _) | (_, Value::None) => false,
            (a, b) => a.type_name() == b.type_name() && a.equals(b),
        }
    }

    /// Ordering for `<`, `sorted()`, `min()` and `max()`.
    pub fn compare(&self, other: &Value) -> ScriptResult<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let a = lock(a).clone();
                let b = lock(b).clone();
                compare_seq(&a, &b)
            }
            (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => match (a.as_float(), b.as_float()) {
                    (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                    _ => Err(Fault::type_error(format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        a.type_name(),
                        b.type_name()
                    ))),
                },
            },
        }
    }

    /// Whether the value may be used as a dict key.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Dict(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => true,
        }
    }

    /// Convert into JSON, as `json.dumps` and the trajectory record need.
    pub fn to_json(&self) -> ScriptResult<serde_json::Value> {
        use serde_json::Value as Json;
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| Fault::value_error("Out of range float values are not JSON compliant"))?,
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => {
                let items = lock(items).clone();
                Json::Array(items.iter().map(Value::to_json).collect::<ScriptResult<_>>()?)
            }
            Value::Tuple(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<ScriptResult<_>>()?)
            }
            Value::Dict(dict) => {
                let entries = lock(dict).entries.clone();
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match key {
                        Value::Str(s) => s.to_string(),
                        Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::None => {
                            key.to_display()
                        }
                        other => {
                            return Err(Fault::type_error(format!(
                                "keys must be str, int, float, bool or None, not {}",
                                other.type_name()
                            )))
                        }
                    };
                    map.insert(key, value.to_json()?);
                }
                Json::Object(map)
            }
            other => {
                return Err(Fault::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::str(s),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (key, value) in map {
                    dict.insert(Value::str(key), Value::from_json(value));
                }
                Value::dict(dict)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn compare_seq(a: &[Value], b: &[Value]) -> ScriptResult<std::cmp::Ordering> {
    for (x, y) in a.iter().zip(b) {
        let ord = x.compare(y)?;
        if ord != std::cmp::Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

pub(crate) fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Insertion-ordered mapping. Scripts build small dicts, so lookups are linear.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k.equals(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

/// A lazy `range(start, stop, step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        // Widened so spans across the whole i64 domain cannot overflow.
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let span = if step > 0 { stop - start } else { start - stop };
        if span <= 0 {
            0
        } else {
            usize::try_from((span - 1) / step.abs() + 1).unwrap_or(usize::MAX)
        }
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = i128::from(self.start) + i128::from(self.step) * index as i128;
        i64::try_from(value).ok()
    }
}

/// How a declared parameter binds call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    /// Declared after `*args` or a bare `*`; bound by keyword only.
    KeywordOnly,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone)]
pub struct FnParam {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
}

/// A function defined by script code (`def` or `lambda`).
pub struct Function {
    pub name: String,
    pub params: Vec<FnParam>,
    pub body: Arc<Vec<Stmt>>,
    /// Locals of the enclosing function at definition time, if any.
    pub captured: Option<Arc<Scope>>,
}

pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeImpl,
}

/// A module made available through `import`.
pub struct Module {
    pub name: String,
    pub attrs: Scope,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Scope::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn function(self, name: &'static str, func: NativeImpl) -> Self {
        self.with(name, Value::native(name, func))
    }
}

/// A method looked up on a value, waiting to be called.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// An exception instance created by calling an exception type.
#[derive(Debug, Clone)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

impl ExceptionValue {
    pub fn from_fault(fault: &Fault) -> Self {
        Self {
            kind: fault.kind.name().to_string(),
            message: fault.message.clone(),
        }
    }

    pub fn to_fault(&self) -> Fault {
        Fault::new(FaultKind::from_name(&self.kind), self.message.clone())
    }
}

/// Result of `re.search` / `re.match`.
#[derive(Debug, Clone)]
pub struct MatchValue {
    pub groups: Vec<Option<String>>,
    pub start: usize,
    pub end: usize,
}

/// Arguments of one call: positional values followed by keyword values.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Positional argument `index`, falling back to the keyword `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index).or_else(|| self.keyword(name))
    }

    pub fn require(&self, index: usize, name: &str, func: &str) -> ScriptResult<&Value> {
        self.arg(index, name).ok_or_else(|| {
            Fault::type_error(format!(
                "{func}() missing required argument: '{name}' (pos {})",
                index + 1
            ))
        })
    }

    pub fn expect_at_most(&self, max: usize, func: &str) -> ScriptResult<()> {
        if self.positional.len() > max {
            return Err(Fault::type_error(format!(
                "{func}() takes at most {max} arguments ({} given)",
                self.positional.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_python_conventions() {
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Float(0.25).repr(), "0.25");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let mut dict = Dict::new();
        dict.insert(Value::str("a"), Value::list(vec![Value::Int(1), Value::None]));
        assert_eq!(Value::dict(dict).repr(), "{'a': [1, None]}");
    }

    #[test]
    fn test_int_float_equality() {
        assert!(Value::Int(3).equals(&Value::Float(3.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::str("1").equals(&Value::Int(1)));
    }

    #[test]
    fn test_range_len_handles_negative_steps() {
        assert_eq!(Range { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(Range { start: 10, stop: 0, step: -2 }.len(), 5);
        assert_eq!(Range { start: 5, stop: 5, step: 1 }.len(), 0);
    }

    #[test]
    fn test_range_len_near_integer_bounds() {
        let evens = Range { start: 0, stop: i64::MAX, step: 2 };
        assert_eq!(evens.len(), 4_611_686_018_427_387_904);
        assert_eq!(evens.get(evens.len() - 1), Some(i64::MAX - 1));
        let whole = Range { start: i64::MIN, stop: i64::MAX, step: 1 };
        assert_eq!(whole.len(), usize::MAX);
        let down = Range { start: i64::MAX, stop: i64::MIN, step: i64::MIN };
        assert_eq!(down.len(), 2);
        assert_eq!(down.get(1), Some(-1));
    }

    #[test]
    fn test_json_conversion_preserves_structure() {
        let json = serde_json::json!({"screen": "home", "elements": [1, 2.5, null, true]});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
    }
}
