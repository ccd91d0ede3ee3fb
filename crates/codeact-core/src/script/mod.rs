//! A restricted, Python-flavoured scripting language.
//!
//! This is the default code backend of the sandbox: agent-generated snippets
//! are parsed with `rustpython-parser`, lowered into a smaller tree and
//! evaluated in-process, against namespaces owned by the executor. Imports and builtins are mediated so the capability policy
//! has a single enforcement point.

pub mod ast;
pub mod builtins;
pub mod fault;
pub mod format;
pub mod interp;
pub mod methods;
pub mod modules;
pub mod output;
pub mod parser;
pub mod value;

pub use builtins::Builtins;
pub use fault::{Fault, FaultKind, ScriptResult, TraceEntry};
pub use interp::{Interpreter, Limits, RunEnv};
pub use output::{OutputCapture, StreamKind};
pub use parser::{is_identifier, parse_expression, parse_program};
pub use value::{CallArgs, Dict, Scope, Value};
