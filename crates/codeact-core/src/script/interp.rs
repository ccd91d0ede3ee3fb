//! Tree-walking evaluator.
//!
//! One [`Interpreter`] exists per run. It borrows the run's namespaces,
//! output capture, call context and cancel flag; nothing it touches outlives
//! the run except the values written into the namespaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ast::*;
use super::builtins::Builtins;
use super::fault::{Fault, FaultKind, ScriptResult, TraceEntry};
use super::format;
use super::methods;
use super::modules;
use super::output::OutputCapture;
use super::parser;
use super::value::*;
use crate::sandbox::capability::ImportGuard;
use crate::sandbox::context::{CallContext, CancelFlag};
use crate::tools::ToolCall;

/// Nesting bound for expression evaluation, across all active calls.
const MAX_EVAL_DEPTH: usize = 1000;

/// Resource limits enforced by the interpreter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_call_depth: usize,
    /// Largest string or list, in bytes, a single operation may build.
    pub max_alloc_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_alloc_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Refuse to build `count` units of `unit` bytes when that passes the allocation limit.
    pub fn check_alloc(&self, count: usize, unit: usize) -> ScriptResult<()> {
        match count.checked_mul(unit) {
            Some(bytes) if bytes <= self.max_alloc_bytes => Ok(()),
            _ => Err(Fault::new(
                FaultKind::Memory,
                format!(
                    "result would exceed the {} byte allocation limit",
                    self.max_alloc_bytes
                ),
            )),
        }
    }

    pub fn check_items(&self, count: usize) -> ScriptResult<()> {
        self.check_alloc(count, VALUE_SIZE)
    }

    pub fn check_text(&self, bytes: usize) -> ScriptResult<()> {
        self.check_alloc(bytes, 1)
    }
}

const VALUE_SIZE: usize = std::mem::size_of::<Value>();

/// Builtins folding over long iterables poll for cancellation this often.
const POLL_INTERVAL: usize = 1024;

/// Everything one run borrows from its caller.
pub struct RunEnv<'a> {
    /// Namespace top-level assignments write to.
    pub module: &'a mut Scope,
    /// Read fallback behind `module`; `None` when both are one mapping.
    pub globals: Option<&'a mut Scope>,
    pub builtins: &'a Builtins,
    pub imports: &'a ImportGuard,
    pub output: &'a mut OutputCapture,
    pub context: &'a CallContext,
    pub cancel: &'a CancelFlag,
    pub limits: Limits,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    name: String,
    line: usize,
    /// `None` for the module frame, which reads and writes `RunEnv::module`.
    locals: Option<Scope>,
    captured: Option<Arc<Scope>>,
    function: Option<Arc<Function>>,
}

pub struct Interpreter<'a> {
    module: &'a mut Scope,
    globals: Option<&'a mut Scope>,
    builtins: &'a Builtins,
    imports: &'a ImportGuard,
    output: &'a mut OutputCapture,
    context: &'a CallContext,
    cancel: &'a CancelFlag,
    limits: Limits,
    frames: Vec<Frame>,
    modules: HashMap<String, Value>,
    handling: Vec<Fault>,
    started: Instant,
    eval_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: RunEnv<'a>) -> Self {
        Self {
            module: env.module,
            globals: env.globals,
            builtins: env.builtins,
            imports: env.imports,
            output: env.output,
            context: env.context,
            cancel: env.cancel,
            limits: env.limits,
            frames: vec![Frame {
                name: "<module>".to_string(),
                line: 0,
                locals: None,
                captured: None,
                function: None,
            }],
            modules: HashMap::new(),
            handling: Vec::new(),
            started: Instant::now(),
            eval_depth: 0,
        }
    }

    /// Execute a parsed program at module level.
    pub fn run(&mut self, program: &[Stmt]) -> ScriptResult<()> {
        self.exec_block(program).map(|_| ())
    }

    /// Parse and execute source text in the current frame (`exec()`).
    pub fn exec_source(&mut self, src: &str) -> ScriptResult<()> {
        let program = parser::parse_program(src)?;
        self.exec_block(&program).map(|_| ())
    }

    /// Parse and evaluate an expression in the current frame (`eval()`).
    pub fn eval_source(&mut self, src: &str) -> ScriptResult<Value> {
        let expr = parser::parse_expression(src, self.line())?;
        self.eval(&expr)
    }

    pub fn output(&mut self) -> &mut OutputCapture {
        &mut *self.output
    }

    pub fn context(&self) -> &CallContext {
        self.context
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Cancellation checkpoint for the `index`-th step of a loop inside a
    /// builtin; only every few steps actually look at the flag.
    pub fn poll(&self, index: usize) -> ScriptResult<()> {
        if index % POLL_INTERVAL == 0 {
            self.checkpoint()
        } else {
            Ok(())
        }
    }

    /// Materialize an iterable, refusing ranges too large for the allocation
    /// limit and polling for cancellation while a range is expanded.
    pub fn collect(&self, value: &Value) -> ScriptResult<Vec<Value>> {
        let Value::Range(range) = value else {
            return iterate(value);
        };
        let len = range.len();
        self.limits.check_items(len)?;
        let mut items = Vec::with_capacity(len);
        for index in 0..len {
            self.poll(index)?;
            if let Some(item) = range.get(index) {
                items.push(Value::Int(item));
            }
        }
        Ok(items)
    }

    /// Cancellation checkpoint.
    pub fn checkpoint(&self) -> ScriptResult<()> {
        if self.cancel.is_cancelled() {
            Err(Fault::cancelled())
        } else {
            Ok(())
        }
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn line(&self) -> usize {
        self.frames.last().map(|f| f.line).unwrap_or(0)
    }

    fn traceback(&self) -> Vec<TraceEntry> {
        self.frames
            .iter()
            .map(|frame| TraceEntry {
                function: frame.name.clone(),
                line: frame.line,
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Names
    // ---------------------------------------------------------------------

    pub fn lookup(&self, name: &str) -> ScriptResult<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.as_ref().and_then(|l| l.get(name)) {
                return Ok(value.clone());
            }
            if let Some(value) = frame.captured.as_ref().and_then(|c| c.get(name)) {
                return Ok(value.clone());
            }
            if let Some(func) = frame.function.as_ref().filter(|f| f.name == name) {
                return Ok(Value::Function(func.clone()));
            }
        }
        if let Some(value) = self.module.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.as_ref().and_then(|g| g.get(name)) {
            return Ok(value.clone());
        }
        self.builtins.lookup(name)
    }

    fn scope_mut(&mut self) -> &mut Scope {
        match self.frames.last_mut().and_then(|f| f.locals.as_mut()) {
            Some(locals) => locals,
            None => &mut *self.module,
        }
    }

    pub fn assign_name(&mut self, name: &str, value: Value) {
        self.scope_mut().insert(name.to_string(), value);
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ScriptResult<Flow> {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = stmt.line;
        }
        self.checkpoint()?;
        match self.exec_kind(&stmt.kind) {
            Err(mut fault) => {
                if fault.traceback.is_empty() {
                    fault.traceback = self.traceback();
                }
                Err(fault)
            }
            ok => ok,
        }
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> ScriptResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body, orelse } => {
                loop {
                    self.checkpoint()?;
                    if !self.eval(cond)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut items = ValueIter::new(&iterable)?;
                loop {
                    self.checkpoint()?;
                    let Some(item) = items.next() else {
                        return self.exec_block(orelse);
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Def { name, params, body } => {
                let func = self.make_function(name, params, body.clone())?;
                self.assign_name(name, Value::Function(Arc::new(func)));
            }
            StmtKind::Import { module, alias } => {
                let leaf = self.import(module)?;
                match alias {
                    Some(alias) => self.assign_name(alias, leaf),
                    None => {
                        let root = module.split('.').next().unwrap_or(module);
                        let value = self.modules.get(root).cloned().unwrap_or(leaf);
                        self.assign_name(root, value);
                    }
                }
            }
            StmtKind::FromImport { module, names } => {
                let value = self.import(module)?;
                let Value::Module(m) = &value else {
                    return Err(Fault::new(FaultKind::Import, format!("No module named '{module}'")));
                };
                for (name, alias) in names {
                    let item = match m.attrs.get(name) {
                        Some(item) => item.clone(),
                        None => {
                            return Err(Fault::new(
                                FaultKind::Import,
                                format!("cannot import name '{name}' from '{module}'"),
                            ))
                        }
                    };
                    self.assign_name(alias.as_ref().unwrap_or(name), item);
                }
            }
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                let outcome = match self.exec_block(body) {
                    Ok(Flow::Normal) => self.exec_block(orelse),
                    Ok(flow) => Ok(flow),
                    Err(fault) => self.handle(fault, handlers),
                };
                if !finally.is_empty() {
                    match self.exec_block(finally)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assert { cond, message } => {
                if !self.eval(cond)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr)?.to_display(),
                        None => String::new(),
                    };
                    return Err(Fault::new(
                        FaultKind::Custom("AssertionError".to_string()),
                        message,
                    ));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn raise(&mut self, exc: Option<&Expr>) -> ScriptResult<Fault> {
        let Some(expr) = exc else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                Fault::new(FaultKind::Runtime, "No active exception to reraise")
            }));
        };
        match self.eval(expr)? {
            Value::Exception(exc) => Ok(exc.to_fault()),
            Value::Class(name) if is_exception_name(&name) => {
                Ok(Fault::new(FaultKind::from_name(&name), ""))
            }
            other => Ok(Fault::type_error(format!(
                "exceptions must derive from BaseException, not {}",
                other.type_name()
            ))),
        }
    }

    fn handle(&mut self, fault: Fault, handlers: &[Handler]) -> ScriptResult<Flow> {
        for handler in handlers {
            let caught = if handler.kinds.is_empty() {
                fault.kind.is_catchable()
            } else {
                handler
                    .kinds
                    .iter()
                    .any(|k| fault.kind.matches(k.rsplit('.').next().unwrap_or(k)))
            };
            if !caught {
                continue;
            }
            if let Some(name) = &handler.binding {
                let exc = ExceptionValue::from_fault(&fault);
                self.assign_name(name, Value::Exception(Arc::new(exc)));
            }
            self.handling.push(fault);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            return result;
        }
        Err(fault)
    }

    fn make_function(
        &mut self,
        name: &str,
        params: &[Param],
        body: Arc<Vec<Stmt>>,
    ) -> ScriptResult<Function> {
        let mut resolved = Vec::with_capacity(params.len());
        for param in params {
            let default = match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            };
            resolved.push(FnParam {
                name: param.name.clone(),
                kind: param.kind,
                default,
            });
        }
        let captured = self.frames.last().and_then(|frame| {
            frame.locals.as_ref().map(|locals| {
                let mut scope = frame.captured.as_deref().cloned().unwrap_or_default();
                scope.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));
                Arc::new(scope)
            })
        });
        Ok(Function {
            name: name.to_string(),
            params: resolved,
            body,
            captured,
        })
    }

    pub fn import(&mut self, name: &str) -> ScriptResult<Value> {
        self.imports.check(name)?;
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let not_found = || Fault::new(FaultKind::Import, format!("No module named '{name}'"));
        let mut segments = name.split('.');
        let root = segments.next().unwrap_or(name);
        let mut value = match self.modules.get(root) {
            Some(module) => module.clone(),
            None => {
                let module = Value::Module(Arc::new(modules::load(root).ok_or_else(not_found)?));
                self.modules.insert(root.to_string(), module.clone());
                module
            }
        };
        for segment in segments {
            value = match &value {
                Value::Module(m) => match m.attrs.get(segment) {
                    Some(sub @ Value::Module(_)) => sub.clone(),
                    _ => return Err(not_found()),
                },
                _ => return Err(not_found()),
            };
        }
        self.modules.insert(name.to_string(), value.clone());
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Assignment
    // ---------------------------------------------------------------------

    fn assign(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                self.assign_name(name, value);
                Ok(())
            }
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                set_item(&obj, index, value)
            }
            Target::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                Err(Fault::new(
                    FaultKind::Attribute,
                    format!("'{}' object attribute '{name}' is read-only", obj.type_name()),
                ))
            }
            Target::Unpack(targets) => {
                let items = self.collect(&value)?;
                if items.len() < targets.len() {
                    return Err(Fault::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(Fault::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = in_place_op(self, &current, op, &rhs)?;
                self.assign_name(name, updated);
                Ok(())
            }
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let updated = in_place_op(self, &current, op, &rhs)?;
                set_item(&obj, index, updated)
            }
            Target::Attr(..) | Target::Unpack(_) => {
                Err(Fault::syntax(self.line(), "illegal expression for augmented assignment"))
            }
        }
    }

    fn delete(&mut self, target: &Target) -> ScriptResult<()> {
        match target {
            Target::Name(name) => match self.scope_mut().remove(name) {
                Some(_) => Ok(()),
                None => Err(Fault::name_error(name)),
            },
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                match &obj {
                    Value::List(items) => {
                        let mut items = lock(items);
                        let i = index_arg(&index)?;
                        let pos = normalize_index(i, items.len()).ok_or_else(|| {
                            Fault::new(FaultKind::Index, "list assignment index out of range")
                        })?;
                        items.remove(pos);
                        Ok(())
                    }
                    Value::Dict(dict) => match lock(dict).remove(&index) {
                        Some(_) => Ok(()),
                        None => Err(Fault::new(FaultKind::Key, index.repr())),
                    },
                    other => Err(Fault::type_error(format!(
                        "'{}' object does not support item deletion",
                        other.type_name()
                    ))),
                }
            }
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Target::Attr(..) => Err(Fault::new(FaultKind::Attribute, "cannot delete attribute")),
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn render_fstring(&mut self, parts: &[FPart]) -> ScriptResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Literal(text) => out.push_str(text),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::str(value.repr()),
                        Some('s') => Value::str(value.to_display()),
                        _ => value,
                    };
                    // `{x:{width}}`: the spec is itself formatted first.
                    let spec = self.render_fstring(spec)?;
                    out.push_str(&format::format_value(&value, &spec)?);
                }
            }
        }
        Ok(out)
    }

    pub fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        if self.eval_depth >= MAX_EVAL_DEPTH {
            return Err(Fault::new(
                FaultKind::Recursion,
                "maximum recursion depth exceeded while evaluating an expression",
            ));
        }
        self.eval_depth += 1;
        let result = self.eval_expr(expr);
        self.eval_depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::FString(parts) => Ok(Value::from(self.render_fstring(parts)?)),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::tuple(items))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    check_hashable(&key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::BinOp(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(&left, *op, &right, &self.limits)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary_op(*op, &value)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare_op(&left, *op, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { cond, then, orelse } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let positional = self.eval_all(args)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    keywords.push((name.clone(), self.eval(expr)?));
                }
                self.call_value(
                    &func,
                    CallArgs {
                        positional,
                        keywords,
                    },
                )
            }
            Expr::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                self.get_attr(&obj, name)
            }
            Expr::Index(obj, index) => {
                let obj = self.eval(obj)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let lower = self.eval_opt(lower.as_deref())?;
                    let upper = self.eval_opt(upper.as_deref())?;
                    let step = self.eval_opt(step.as_deref())?;
                    return slice(&obj, lower, upper, step);
                }
                let index = self.eval(index)?;
                get_item(&obj, &index)
            }
            Expr::Slice { .. } => Err(Fault::syntax(self.line(), "slice outside of subscript")),
            Expr::ListComp { element, clauses } => {
                let saved = self.save_targets(clauses);
                let mut out = Vec::new();
                let result = self.run_clauses(clauses, &mut |interp: &mut Interpreter<'a>| {
                    interp.limits.check_items(out.len() + 1)?;
                    out.push(interp.eval(element)?);
                    Ok(())
                });
                self.restore_targets(saved);
                result?;
                Ok(Value::list(out))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let saved = self.save_targets(clauses);
                let mut dict = Dict::new();
                let result = self.run_clauses(clauses, &mut |interp: &mut Interpreter<'a>| {
                    let k = interp.eval(key)?;
                    check_hashable(&k)?;
                    let v = interp.eval(value)?;
                    interp.limits.check_items(dict.len().saturating_add(1).saturating_mul(2))?;
                    dict.insert(k, v);
                    Ok(())
                });
                self.restore_targets(saved);
                result?;
                Ok(Value::dict(dict))
            }
            Expr::Lambda { params, body } => {
                let line = self.line();
                let body = Arc::new(vec![Stmt {
                    kind: StmtKind::Return(Some((**body).clone())),
                    line,
                }]);
                Ok(Value::Function(Arc::new(
                    self.make_function("<lambda>", params, body)?,
                )))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> ScriptResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_opt(&mut self, expr: Option<&Expr>) -> ScriptResult<Option<Value>> {
        match expr {
            Some(expr) => self.eval(expr).map(Some),
            None => Ok(None),
        }
    }

    fn run_clauses(
        &mut self,
        clauses: &[CompClause],
        emit: &mut dyn FnMut(&mut Interpreter<'a>) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let Some((first, rest)) = clauses.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        let mut items = ValueIter::new(&iterable)?;
        'items: while let Some(item) = items.next() {
            self.checkpoint()?;
            self.assign(&first.target, item)?;
            for cond in &first.conditions {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.run_clauses(rest, emit)?;
        }
        Ok(())
    }

    /// Comprehension variables do not leak: remember what they shadowed.
    fn save_targets(&mut self, clauses: &[CompClause]) -> Vec<(String, Option<Value>)> {
        let mut names = Vec::new();
        for clause in clauses {
            target_names(&clause.target, &mut names);
        }
        let scope = self.scope_mut();
        names
            .into_iter()
            .map(|name| {
                let old = scope.get(&name).cloned();
                (name, old)
            })
            .collect()
    }

    fn restore_targets(&mut self, saved: Vec<(String, Option<Value>)>) {
        let scope = self.scope_mut();
        for (name, old) in saved {
            match old {
                Some(value) => scope.insert(name, value),
                None => scope.remove(&name),
            };
        }
    }

    // ---------------------------------------------------------------------
    // Calls and attributes
    // ---------------------------------------------------------------------

    pub fn call_value(&mut self, func: &Value, args: CallArgs) -> ScriptResult<Value> {
        self.checkpoint()?;
        match func {
            Value::Function(func) => self.call_function(func, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Tool(tool) => {
                let call = ToolCall {
                    args: args.positional,
                    kwargs: args.keywords,
                    context: self.context,
                    output: &mut *self.output,
                };
                tool.call(call).map_err(Fault::from)
            }
            Value::BoundMethod(method) => {
                methods::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Class(name) if is_exception_name(name) => {
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [single] => single.to_display(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Arc::new(ExceptionValue {
                    kind: name.to_string(),
                    message,
                })))
            }
            Value::Class(name) => Err(Fault::type_error(format!("cannot create '{name}' instances"))),
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Arc<Function>, args: CallArgs) -> ScriptResult<Value> {
        if self.frames.len() > self.limits.max_call_depth {
            return Err(Fault::new(
                FaultKind::Recursion,
                "maximum recursion depth exceeded",
            ));
        }
        let locals = bind_arguments(func, args)?;
        self.frames.push(Frame {
            name: func.name.clone(),
            line: func.body.first().map(|s| s.line).unwrap_or(0),
            locals: Some(locals),
            captured: func.captured.clone(),
            function: Some(func.clone()),
        });
        let result = self.exec_block(&func.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    pub fn get_attr(&mut self, value: &Value, name: &str) -> ScriptResult<Value> {
        match (value, name) {
            (Value::Module(module), _) => module.attrs.get(name).cloned().ok_or_else(|| {
                Fault::new(
                    FaultKind::Attribute,
                    format!("module '{}' has no attribute '{name}'", module.name),
                )
            }),
            (Value::Function(func), "__name__") => Ok(Value::str(&func.name)),
            (Value::Native(func), "__name__") => Ok(Value::str(func.name)),
            (Value::Class(class), "__name__") => Ok(Value::Str(class.clone())),
            (Value::Tool(tool), "__name__") => Ok(Value::str(tool.name())),
            (Value::Tool(tool), "__doc__") => Ok(Value::str(tool.description())),
            (Value::Exception(exc), "args") => Ok(Value::tuple(vec![Value::str(&exc.message)])),
            (Value::Match(m), "string") => Ok(Value::str(m.groups[0].as_deref().unwrap_or(""))),
            _ if methods::has_method(value, name) => Ok(Value::BoundMethod(Arc::new(BoundMethod {
                receiver: value.clone(),
                name: name.to_string(),
            }))),
            _ => Err(Fault::new(
                FaultKind::Attribute,
                format!("'{}' object has no attribute '{name}'", value.type_name()),
            )),
        }
    }
}

/// Whether a class name denotes an exception type that can be raised.
pub fn is_exception_name(name: &str) -> bool {
    name.ends_with("Error")
        || name.ends_with("Exception")
        || name.ends_with("Warning")
        || matches!(name, "BaseException" | "PolicyViolation" | "StopIteration" | "KeyboardInterrupt")
}

fn bind_arguments(func: &Function, args: CallArgs) -> ScriptResult<Scope> {
    let mut locals = Scope::new();
    let CallArgs {
        positional,
        keywords,
    } = args;
    let named: Vec<&FnParam> = func
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Positional)
        .collect();
    let keyword_only: Vec<&FnParam> = func
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::KeywordOnly)
        .collect();
    let varargs = func.params.iter().find(|p| p.kind == ParamKind::VarArgs);
    let kwargs = func.params.iter().find(|p| p.kind == ParamKind::KwArgs);

    let mut extra = Vec::new();
    for (i, value) in positional.into_iter().enumerate() {
        match named.get(i) {
            Some(param) => {
                locals.insert(param.name.clone(), value);
            }
            None => extra.push(value),
        }
    }
    if !extra.is_empty() {
        match varargs {
            Some(param) => {
                locals.insert(param.name.clone(), Value::tuple(extra));
            }
            None => {
                return Err(Fault::type_error(format!(
                    "{}() takes {} positional arguments but {} were given",
                    func.name,
                    named.len(),
                    named.len() + extra.len()
                )))
            }
        }
    } else if let Some(param) = varargs {
        locals.insert(param.name.clone(), Value::tuple(Vec::new()));
    }

    let mut extra_keywords = Dict::new();
    for (name, value) in keywords {
        if named.iter().chain(&keyword_only).any(|p| p.name == name) {
            if locals.contains_key(&name) {
                return Err(Fault::type_error(format!(
                    "{}() got multiple values for argument '{name}'",
                    func.name
                )));
            }
            locals.insert(name, value);
        } else if kwargs.is_some() {
            extra_keywords.insert(Value::from(name), value);
        } else {
            return Err(Fault::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                func.name
            )));
        }
    }
    if let Some(param) = kwargs {
        locals.insert(param.name.clone(), Value::dict(extra_keywords));
    }

    for param in named.iter().chain(&keyword_only) {
        if locals.contains_key(&param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                locals.insert(param.name.clone(), default.clone());
            }
            None => {
                let role = match param.kind {
                    ParamKind::KeywordOnly => "keyword-only",
                    _ => "positional",
                };
                return Err(Fault::type_error(format!(
                    "{}() missing 1 required {role} argument: '{}'",
                    func.name, param.name
                )));
            }
        }
    }
    Ok(locals)
}

fn target_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(name) => out.push(name.clone()),
        Target::Unpack(targets) => targets.iter().for_each(|t| target_names(t, out)),
        Target::Index(..) | Target::Attr(..) => {}
    }
}

// -------------------------------------------------------------------------
// Iteration
// -------------------------------------------------------------------------

/// Iteration over a value; ranges are produced lazily.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { range: Range, index: usize },
}

impl ValueIter {
    pub fn new(value: &Value) -> ScriptResult<Self> {
        match value {
            Value::Range(range) => Ok(ValueIter::Range {
                range: *range,
                index: 0,
            }),
            other => Ok(ValueIter::Items(iterate(other)?.into_iter())),
        }
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { range, index } => {
                let value = range.get(*index)?;
                *index += 1;
                Some(Value::Int(value))
            }
        }
    }
}

/// Materialize an iterable into its items.
pub fn iterate(value: &Value) -> ScriptResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(lock(items).clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Dict(dict) => Ok(lock(dict).keys()),
        Value::Range(range) => Ok((0..range.len())
            .filter_map(|i| range.get(i))
            .map(Value::Int)
            .collect()),
        other => Err(Fault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

// -------------------------------------------------------------------------
// Operators
// -------------------------------------------------------------------------

enum Numbers {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numbers(left: &Value, right: &Value) -> Option<Numbers> {
    let is_number = |v: &Value| matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    if !is_number(left) || !is_number(right) {
        return None;
    }
    match (left.as_int(), right.as_int()) {
        (Some(a), Some(b)) => Some(Numbers::Ints(a, b)),
        _ => Some(Numbers::Floats(left.as_float()?, right.as_float()?)),
    }
}

fn overflow() -> Fault {
    Fault::new(FaultKind::Overflow, "integer overflow")
}

fn zero_division(message: &str) -> Fault {
    Fault::new(FaultKind::ZeroDivision, message)
}

pub fn binary_op(left: &Value, op: BinOp, right: &Value, limits: &Limits) -> ScriptResult<Value> {
    if let Some(nums) = numbers(left, right) {
        return numeric_op(nums, op);
    }
    let unsupported = || {
        Fault::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            limits.check_text(a.len().saturating_add(b.len()))?;
            Ok(Value::from(format!("{a}{b}")))
        }
        (BinOp::Add, Value::Str(_), _) => Err(Fault::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            right.type_name()
        ))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = lock(a).clone();
            let extra = lock(b).clone();
            limits.check_items(items.len().saturating_add(extra.len()))?;
            items.extend(extra);
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            limits.check_items(a.len().saturating_add(b.len()))?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = repeat_count(n);
            limits.check_alloc(times, s.len())?;
            Ok(Value::from(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let times = repeat_count(n);
            let items = lock(items).clone();
            limits.check_alloc(times, items.len().saturating_mul(VALUE_SIZE))?;
            Ok(Value::list(items.iter().cycle().take(items.len().saturating_mul(times)).cloned().collect()))
        }
        (BinOp::Mod, Value::Str(template), args) => {
            format::percent_format(template, args).map(Value::from)
        }
        _ => Err(unsupported()),
    }
}

/// `seq * n` repeats: negative counts give an empty result.
fn repeat_count(n: &Value) -> usize {
    usize::try_from(n.as_int().unwrap_or(0).max(0)).unwrap_or(usize::MAX)
}

fn numeric_op(nums: Numbers, op: BinOp) -> ScriptResult<Value> {
    match nums {
        Numbers::Ints(a, b) => match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    Err(zero_division("division by zero"))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q }))
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(zero_division("integer modulo by zero"));
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            BinOp::Pow => {
                if b >= 0 {
                    u32::try_from(b)
                        .ok()
                        .and_then(|e| a.checked_pow(e))
                        .map(Value::Int)
                        .ok_or_else(overflow)
                } else if a == 0 {
                    Err(zero_division("0.0 cannot be raised to a negative power"))
                } else {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                }
            }
        },
        Numbers::Floats(a, b) => match op {
            BinOp::Add => Ok(Value::Float(a + b)),
            BinOp::Sub => Ok(Value::Float(a - b)),
            BinOp::Mul => Ok(Value::Float(a * b)),
            BinOp::Div => {
                if b == 0.0 {
                    Err(zero_division("float division by zero"))
                } else {
                    Ok(Value::Float(a / b))
                }
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    Err(zero_division("float floor division by zero"))
                } else {
                    Ok(Value::Float((a / b).floor()))
                }
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(zero_division("float modulo"));
                }
                let r = a % b;
                Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
            }
            BinOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    Err(zero_division("0.0 cannot be raised to a negative power"))
                } else {
                    Ok(Value::Float(a.powf(b)))
                }
            }
        },
    }
}

/// `+=` and friends: lists extend in place, everything else rebinds.
fn in_place_op(interp: &Interpreter<'_>, current: &Value, op: BinOp, rhs: &Value) -> ScriptResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        let extra = interp.collect(rhs)?;
        let mut items = lock(items);
        interp.limits().check_items(items.len().saturating_add(extra.len()))?;
        items.extend(extra);
        return Ok(current.clone());
    }
    binary_op(current, op, rhs, interp.limits())
}

fn unary_op(op: UnaryOp, value: &Value) -> ScriptResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (op, v) => Err(Fault::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Not => "not",
            },
            v.type_name()
        ))),
    }
}

fn compare_op(left: &Value, op: CmpOp, right: &Value) -> ScriptResult<bool> {
    use std::cmp::Ordering;
    Ok(match op {
        CmpOp::Eq => left.equals(right),
        CmpOp::NotEq => !left.equals(right),
        CmpOp::Lt => left.compare(right)? == Ordering::Less,
        CmpOp::LtE => left.compare(right)? != Ordering::Greater,
        CmpOp::Gt => left.compare(right)? == Ordering::Greater,
        CmpOp::GtE => left.compare(right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => left.identical(right),
        CmpOp::IsNot => !left.identical(right),
    })
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(lock(items).iter().any(|v| v.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(dict) => Ok(lock(dict).contains_key(item)),
        Value::Range(range) => Ok(match item.as_int() {
            Some(i) => {
                let offset = i - range.start;
                let in_bounds = if range.step > 0 {
                    i >= range.start && i < range.stop
                } else {
                    i <= range.start && i > range.stop
                };
                in_bounds && offset % range.step == 0
            }
            None => false,
        }),
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

// -------------------------------------------------------------------------
// Subscripts
// -------------------------------------------------------------------------

pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

fn index_arg(index: &Value) -> ScriptResult<i64> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(Fault::type_error(format!(
            "indices must be integers, not {}",
            other.type_name()
        ))),
    }
}

fn check_hashable(key: &Value) -> ScriptResult<()> {
    if key.is_hashable() {
        Ok(())
    } else {
        Err(Fault::type_error(format!("unhashable type: '{}'", key.type_name())))
    }
}

pub fn get_item(obj: &Value, index: &Value) -> ScriptResult<Value> {
    let out_of_range = |what: &str| Fault::new(FaultKind::Index, format!("{what} index out of range"));
    match obj {
        Value::List(items) => {
            let items = lock(items);
            let i = normalize_index(index_arg(index)?, items.len()).ok_or_else(|| out_of_range("list"))?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index_arg(index)?, items.len()).ok_or_else(|| out_of_range("tuple"))?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index_arg(index)?, chars.len()).ok_or_else(|| out_of_range("string"))?;
            Ok(Value::from(chars[i].to_string()))
        }
        Value::Range(range) => {
            let i = normalize_index(index_arg(index)?, range.len()).ok_or_else(|| out_of_range("range object"))?;
            Ok(Value::Int(range.get(i).unwrap_or(0)))
        }
        Value::Dict(dict) => {
            check_hashable(index)?;
            lock(dict)
                .get(index)
                .cloned()
                .ok_or_else(|| Fault::new(FaultKind::Key, index.repr()))
        }
        Value::Match(m) => {
            let i = index_arg(index)?;
            usize::try_from(i)
                .ok()
                .and_then(|i| m.groups.get(i))
                .map(|g| g.as_deref().map(Value::str).unwrap_or(Value::None))
                .ok_or_else(|| Fault::new(FaultKind::Index, "no such group"))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(obj: &Value, index: Value, value: Value) -> ScriptResult<()> {
    match obj {
        Value::List(items) => {
            let mut items = lock(items);
            let i = normalize_index(index_arg(&index)?, items.len()).ok_or_else(|| {
                Fault::new(FaultKind::Index, "list assignment index out of range")
            })?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            check_hashable(&index)?;
            lock(dict).insert(index, value);
            Ok(())
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_positions(len: usize, lower: Option<Value>, upper: Option<Value>, step: Option<Value>) -> ScriptResult<Vec<usize>> {
    let bound = |v: Option<Value>| -> ScriptResult<Option<i64>> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(v) => index_arg(&v).map(Some),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(Fault::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| {
        let v = if v < 0 { v + len } else { v };
        v.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = bound(lower)?.map(|v| clamp(v, 0, len)).unwrap_or(0);
        let stop = bound(upper)?.map(|v| clamp(v, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = bound(lower)?.map(|v| clamp(v, -1, len - 1)).unwrap_or(len - 1);
        let stop = bound(upper)?.map(|v| clamp(v, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn slice(obj: &Value, lower: Option<Value>, upper: Option<Value>, step: Option<Value>) -> ScriptResult<Value> {
    match obj {
        Value::List(items) => {
            let items = lock(items).clone();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Range(range) => {
            let picked = slice_positions(range.len(), lower, upper, step)?;
            Ok(Value::list(
                picked
                    .into_iter()
                    .filter_map(|i| range.get(i))
                    .map(Value::Int)
                    .collect(),
            ))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::NameFilter;

    fn run(src: &str) -> (ScriptResult<()>, String, Scope) {
        run_with(src, Limits::default())
    }

    fn run_with(src: &str, limits: Limits) -> (ScriptResult<()>, String, Scope) {
        let mut module = Scope::new();
        let builtins = Builtins::full();
        let imports = ImportGuard::new(NameFilter::allow_all());
        let mut output = OutputCapture::new();
        let context = CallContext::new();
        let cancel = CancelFlag::new();
        let result = {
            let mut interp = Interpreter::new(RunEnv {
                module: &mut module,
                globals: None,
                builtins: &builtins,
                imports: &imports,
                output: &mut output,
                context: &context,
                cancel: &cancel,
                limits,
            });
            parser::parse_program(src).and_then(|program| interp.run(&program))
        };
        (result, output.into_combined(), module)
    }

    #[test]
    fn test_arithmetic_follows_floor_semantics() {
        let (result, out, _) = run("print(7 // -2, -7 % 3, 2 ** 10, 7 / 2)\n");
        result.unwrap();
        assert_eq!(out, "-4 2 1024 3.5\n");
    }

    #[test]
    fn test_closures_and_recursion() {
        let (result, out, _) = run(
            "def outer(n):\n    def fact(k):\n        return 1 if k <= 1 else k * fact(k - 1)\n    return fact(n)\nprint(outer(5))\n",
        );
        result.unwrap();
        assert_eq!(out, "120\n");
    }

    #[test]
    fn test_comprehension_variables_do_not_leak() {
        let (result, _, module) = run("x = 'kept'\nsquares = [x * x for x in range(4)]\n");
        result.unwrap();
        assert_eq!(module["x"].as_str(), Some("kept"));
        assert_eq!(module["squares"].repr(), "[0, 1, 4, 9]");
    }

    #[test]
    fn test_try_except_finally_ordering() {
        let (result, out, _) = run(
            "try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    print('caught', e)\nfinally:\n    print('done')\n",
        );
        result.unwrap();
        assert_eq!(out, "caught division by zero\ndone\n");
    }

    #[test]
    fn test_fault_traceback_lists_frames() {
        let (result, _, _) = run("def f():\n    return {}['missing']\n\nf()\n");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Key);
        assert_eq!(fault.message, "'missing'");
        let frames: Vec<_> = fault
            .traceback
            .iter()
            .map(|t| (t.function.as_str(), t.line))
            .collect();
        assert_eq!(frames, vec![("<module>", 4), ("f", 2)]);
    }

    #[test]
    fn test_recursion_limit() {
        let (result, _, _) = run_with(
            "def f(n):\n    return f(n + 1)\nf(0)\n",
            Limits {
                max_call_depth: 16,
                ..Limits::default()
            },
        );
        assert_eq!(result.unwrap_err().kind, FaultKind::Recursion);
    }

    #[test]
    fn test_slicing_and_negative_indexes() {
        let (result, out, _) = run("xs = [1, 2, 3, 4, 5]\nprint(xs[-1], xs[1:3], xs[::-2], 'hello'[1:-1])\n");
        result.unwrap();
        assert_eq!(out, "5 [2, 3] [5, 3, 1] ell\n");
    }

    #[test]
    fn test_list_augmented_add_is_in_place() {
        let (result, out, _) = run("a = [1]\nb = a\na += [2]\nprint(b)\n");
        result.unwrap();
        assert_eq!(out, "[1, 2]\n");
    }

    #[test]
    fn test_cancelled_run_stops_at_checkpoint() {
        let mut module = Scope::new();
        let builtins = Builtins::full();
        let imports = ImportGuard::new(NameFilter::allow_all());
        let mut output = OutputCapture::new();
        let context = CallContext::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut interp = Interpreter::new(RunEnv {
            module: &mut module,
            globals: None,
            builtins: &builtins,
            imports: &imports,
            output: &mut output,
            context: &context,
            cancel: &cancel,
            limits: Limits::default(),
        });
        let program = parser::parse_program("while True:\n    pass\n").unwrap();
        assert!(interp.run(&program).unwrap_err().is_cancelled());
    }
}
