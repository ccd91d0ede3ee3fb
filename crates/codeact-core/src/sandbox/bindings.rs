//! The namespaces an executor keeps between runs.
//!
//! Precedence, lowest to highest: builtins, initial globals, tools, initial
//! locals. Builtins are consulted last by the interpreter, so they are kept
//! in their own table rather than copied into the namespace.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::script::{Builtins, Scope, Value};
use crate::tools::ToolSet;

use super::capability::ImportGuard;
use super::error::{SandboxError, SandboxResult};
use super::state::STATE_BINDING;

/// Namespaces guarded by the run lock.
pub(crate) struct ScopeState {
    /// The globals mapping. In shared mode this is also the locals mapping.
    pub(crate) globals: Scope,
    /// Template for each run's fresh locals in separate mode. Empty in
    /// shared mode, where initial locals are folded into `globals`.
    pub(crate) initial_locals: Scope,
}

/// Bindings owned by one executor and handed to every run.
///
/// A run holds the scope lock from start to finish, so concurrent runs on
/// the same bindings are serialized.
pub struct Bindings {
    scope: Mutex<ScopeState>,
    builtins: Arc<Builtins>,
    imports: Arc<ImportGuard>,
    shared: bool,
}

impl Bindings {
    pub fn build(
        tools: &ToolSet,
        initial_locals: Scope,
        initial_globals: Scope,
        builtins: Builtins,
        imports: ImportGuard,
        shared_scope: bool,
    ) -> SandboxResult<Self> {
        for name in initial_locals.keys().chain(initial_globals.keys()) {
            if !crate::script::is_identifier(name) {
                return Err(SandboxError::InvalidBindings(format!(
                    "'{name}' is not a valid identifier"
                )));
            }
        }

        let mut globals = initial_globals;
        for (name, tool) in tools.iter() {
            globals.insert(name.to_string(), Value::Tool(tool.clone()));
        }
        let initial_locals = if shared_scope {
            globals.extend(initial_locals);
            Scope::new()
        } else {
            initial_locals
        };

        tracing::debug!(
            tools = tools.len(),
            globals = globals.len(),
            locals = initial_locals.len(),
            builtins = builtins.len(),
            shared_scope,
            "bindings built"
        );

        Ok(Self {
            scope: Mutex::new(ScopeState {
                globals,
                initial_locals,
            }),
            builtins: Arc::new(builtins),
            imports: Arc::new(imports),
            shared: shared_scope,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn imports(&self) -> &ImportGuard {
        &self.imports
    }

    /// Resolve `name` as a run starting now would see it, excluding the
    /// per-run `ui_state` binding.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.lock_scope();
        if name == STATE_BINDING {
            return None;
        }
        scope
            .initial_locals
            .get(name)
            .or_else(|| scope.globals.get(name))
            .cloned()
            .or_else(|| self.builtins.lookup(name).ok())
    }

    /// Names defined in the persistent namespaces, sorted.
    pub fn names(&self) -> Vec<String> {
        let scope = self.lock_scope();
        let mut names: Vec<String> = scope
            .globals
            .keys()
            .chain(scope.initial_locals.keys())
            .filter(|name| name.as_str() != STATE_BINDING)
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Lock the namespaces for one run. A poisoned lock is recovered: a
    /// panicking run leaves the namespaces as it found them mid-statement,
    /// which is the same guarantee a fault gives.
    pub(crate) fn lock_scope(&self) -> MutexGuard<'_, ScopeState> {
        crate::script::value::lock(&self.scope)
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("shared", &self.shared)
            .field("builtins", &self.builtins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::NameFilter;
    use crate::tools::{tool_fn, Tools};

    fn scope(pairs: &[(&str, Value)]) -> Scope {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn build(locals: Scope, globals: Scope, shared: bool) -> Bindings {
        let tools = ToolSet::new(Tools::List(vec![tool_fn("tap", |_| Ok(Value::None))])).unwrap();
        Bindings::build(
            &tools,
            locals,
            globals,
            Builtins::full(),
            ImportGuard::new(NameFilter::allow_all()),
            shared,
        )
        .unwrap()
    }

    #[test]
    fn tools_beat_globals_and_locals_beat_tools() {
        let bindings = build(
            scope(&[("x", Value::Int(2))]),
            scope(&[("tap", Value::Int(0)), ("x", Value::Int(1)), ("len", Value::Int(5))]),
            false,
        );
        assert!(matches!(bindings.get("tap"), Some(Value::Tool(_))));
        assert!(matches!(bindings.get("x"), Some(Value::Int(2))));
        assert!(matches!(bindings.get("len"), Some(Value::Int(5))));
        assert!(matches!(bindings.get("print"), Some(Value::Native(_))));
    }

    #[test]
    fn shared_mode_folds_locals_into_globals() {
        let bindings = build(scope(&[("tap", Value::Int(9))]), Scope::new(), true);
        assert!(matches!(bindings.get("tap"), Some(Value::Int(9))));
        assert!(bindings.lock_scope().initial_locals.is_empty());
        assert_eq!(bindings.names(), vec!["tap".to_string()]);
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let tools = ToolSet::default();
        let err = Bindings::build(
            &tools,
            scope(&[("not valid", Value::None)]),
            Scope::new(),
            Builtins::full(),
            ImportGuard::new(NameFilter::allow_all()),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidBindings(_)));
    }
}
