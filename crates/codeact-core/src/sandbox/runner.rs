//! Runs one code string against the bindings and turns the outcome into text.
//!
//! Everything here is synchronous and runs on a blocking worker; the deadline
//! lives one layer up in the executor.

use std::any::Any;

use tracing::Span;

use crate::script::{parse_program, Fault, Interpreter, Limits, OutputCapture, RunEnv};

use super::bindings::Bindings;
use super::context::{CallContext, CancelFlag};
use super::state::{ExecutionState, STATE_BINDING};

/// File name reported in tracebacks.
pub const CODE_FILENAME: &str = "<code>";

/// Stack for the thread the interpreter runs on. Parsing, lowering and
/// evaluation all recurse; the parser's nesting bounds and the interpreter's
/// depth limits keep them well inside this.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Something that can execute code against a prepared environment.
pub trait CodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, code: &str, env: RunEnv<'_>) -> Result<(), Fault>;
}

/// The in-crate script interpreter.
#[derive(Debug, Clone, Default)]
pub struct ScriptBackend {
    pub limits: Limits,
}

impl ScriptBackend {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }
}

impl CodeBackend for ScriptBackend {
    fn name(&self) -> &'static str {
        "script"
    }

    fn run(&self, code: &str, mut env: RunEnv<'_>) -> Result<(), Fault> {
        let program = parse_program(code)?;
        env.limits = self.limits;
        Interpreter::new(env).run(&program)
    }
}

/// How a run ended, before any deadline is taken into account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Faulted { kind: String },
    /// Stopped at a checkpoint after the cancel flag was raised.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub text: String,
    pub outcome: RunOutcome,
}

impl RunResult {
    fn faulted(kind: impl Into<String>, text: String) -> Self {
        Self {
            text,
            outcome: RunOutcome::Faulted { kind: kind.into() },
        }
    }

    /// The result reported when the worker panicked.
    pub fn panicked(message: &str) -> Self {
        Self::faulted("Panic", format!("Error: Panic: {message}\n"))
    }
}

/// Execute `code` once.
///
/// Injects `state` as `ui_state`, runs with a capture owned by this call and
/// renders a fault as `Error: Kind: message` plus a traceback. Output written
/// before a fault is discarded. `parent` is the caller's span, re-entered
/// here because this runs on another thread.
pub fn run_once(
    backend: &dyn CodeBackend,
    code: &str,
    bindings: &Bindings,
    state: &ExecutionState,
    ctx: &CallContext,
    cancel: &CancelFlag,
    parent: &Span,
) -> RunResult {
    let span = tracing::debug_span!(
        parent: parent,
        "code_run",
        backend = backend.name(),
        trace_id = %ctx.trace_id
    );
    let _entered = span.enter();

    let mut guard = bindings.lock_scope();
    let scopes = &mut *guard;
    let mut fresh_locals;
    let (module, globals) = if bindings.is_shared() {
        (&mut scopes.globals, None)
    } else {
        fresh_locals = scopes.initial_locals.clone();
        (&mut fresh_locals, Some(&mut scopes.globals))
    };
    module.insert(STATE_BINDING.to_string(), state.to_value());

    let mut output = OutputCapture::new();
    let result = backend.run(
        code,
        RunEnv {
            module,
            globals,
            builtins: bindings.builtins(),
            imports: bindings.imports(),
            output: &mut output,
            context: ctx,
            cancel,
            limits: Limits::default(),
        },
    );
    drop(guard);

    match result {
        Ok(()) => RunResult {
            text: output.into_combined(),
            outcome: RunOutcome::Completed,
        },
        Err(fault) if fault.is_cancelled() => {
            tracing::debug!("run stopped at a cancellation checkpoint");
            RunResult {
                text: String::new(),
                outcome: RunOutcome::Cancelled,
            }
        }
        Err(fault) => {
            tracing::debug!(kind = %fault.kind, message = %fault.message, "run faulted");
            RunResult::faulted(fault.kind.name(), fault.render(CODE_FILENAME))
        }
    }
}

/// Run `job` on a dedicated thread with a large stack, converting a panic
/// into a [`RunResult`].
pub fn run_isolated<F>(job: F) -> RunResult
where
    F: FnOnce() -> RunResult + Send,
{
    std::thread::scope(|scope| {
        let spawned = std::thread::Builder::new()
            .name("codeact-run".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn_scoped(scope, job);
        match spawned {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|payload| RunResult::panicked(&panic_message(payload.as_ref()))),
            Err(err) => RunResult::faulted(
                "RuntimeError",
                format!("Error: RuntimeError: could not start worker thread: {err}\n"),
            ),
        }
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::{ImportGuard, NameFilter};
    use crate::script::{Builtins, Scope};
    use crate::tools::ToolSet;

    fn bindings(shared: bool) -> Bindings {
        Bindings::build(
            &ToolSet::default(),
            Scope::new(),
            Scope::new(),
            Builtins::full(),
            ImportGuard::new(NameFilter::allow_all()),
            shared,
        )
        .unwrap()
    }

    fn run(code: &str, bindings: &Bindings, state: &ExecutionState) -> RunResult {
        run_once(
            &ScriptBackend::default(),
            code,
            bindings,
            state,
            &CallContext::new(),
            &CancelFlag::new(),
            &Span::none(),
        )
    }

    #[test]
    fn stdout_then_stderr() {
        let b = bindings(true);
        let result = run(
            "import sys\nprint('out', end='')\nsys.stderr.write('err')",
            &b,
            &ExecutionState::empty(),
        );
        assert_eq!(result.text, "out\nerr");
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[test]
    fn fault_discards_output_and_renders_traceback() {
        let b = bindings(true);
        let result = run(
            "print('partial')\nraise ValueError('boom')",
            &b,
            &ExecutionState::empty(),
        );
        assert!(result.text.starts_with("Error: ValueError: boom\n"));
        assert!(result.text.contains("Traceback (most recent call last):"));
        assert!(result.text.contains("File \"<code>\", line 2, in <module>"));
        assert!(!result.text.contains("partial"));
        assert_eq!(
            result.outcome,
            RunOutcome::Faulted {
                kind: "ValueError".into()
            }
        );
    }

    #[test]
    fn ui_state_is_replaced_each_run() {
        let b = bindings(true);
        let first = ExecutionState::new(serde_json::json!({"screen": "home"}));
        assert_eq!(run("print(ui_state['screen'])", &b, &first).text, "home\n");
        let result = run("print(ui_state)", &b, &ExecutionState::empty());
        assert_eq!(result.text, "None\n");
    }

    #[test]
    fn separate_scope_resets_locals() {
        let b = bindings(false);
        run("x = 1", &b, &ExecutionState::empty());
        let result = run("print(x)", &b, &ExecutionState::empty());
        assert!(result.text.starts_with("Error: NameError: name 'x' is not defined"));
    }

    #[test]
    fn cancelled_run_reports_cancelled() {
        let b = bindings(true);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = run_once(
            &ScriptBackend::default(),
            "while True:\n    pass",
            &b,
            &ExecutionState::empty(),
            &CallContext::new(),
            &cancel,
            &Span::none(),
        );
        assert_eq!(result.outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn isolated_panic_becomes_result() {
        let result = run_isolated(|| panic!("tool exploded"));
        assert_eq!(result.text, "Error: Panic: tool exploded\n");
        assert_eq!(
            result.outcome,
            RunOutcome::Faulted {
                kind: "Panic".into()
            }
        );
    }
}
