//! Front end: Python source to the trees the evaluator walks.
//!
//! Source is tokenized and parsed by `rustpython-parser`. The resulting AST
//! is lowered into [`super::ast`], which holds only the constructs the
//! evaluator implements; anything else becomes a `SyntaxError` here, before
//! a single statement runs.
//!
//! A pass over the token stream runs first and bounds bracket nesting,
//! indentation and operator chains. The parser, the lowering below and the
//! evaluator all recurse over the tree, so its depth must be known to fit
//! the worker's stack before the tree is built.

use std::sync::Arc;

use rustpython_parser::ast::{self as py, Constant, Ranged};
use rustpython_parser::text_size::TextSize;
use rustpython_parser::{lexer, Mode, Parse, ParseError, StringKind, Tok};

use super::ast::{BinOp, CmpOp, CompClause, Expr, FPart, Handler, Param, Stmt, StmtKind, Target, UnaryOp};
use super::fault::{Fault, FaultKind, ScriptResult, TraceEntry};
use super::value::ParamKind;
use crate::sandbox::runner::CODE_FILENAME;

/// Bracket nesting limit, the same bound CPython's parser applies.
const MAX_NESTING: usize = 200;
const MAX_INDENT: usize = 100;
/// Longest chain of operators, attribute accesses and calls that may nest
/// inside one expression, summed over its enclosing brackets.
const MAX_CHAIN: usize = 400;

const RESERVED: &[&str] = &[
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not",
    "or", "pass", "raise", "return", "try", "while", "with", "yield", "async", "await",
];

/// Whether `name` can be bound and referenced by script code.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic());
    head_ok
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && !RESERVED.contains(&name)
        && !matches!(name, "None" | "True" | "False")
}

/// Parse a whole program.
pub fn parse_program(src: &str) -> ScriptResult<Vec<Stmt>> {
    let lines = LineIndex::new(src);
    let lower = Lower {
        lines: &lines,
        fixed_line: None,
    };
    lower.check_nesting(src, Mode::Module)?;
    let suite = py::Suite::parse(src, CODE_FILENAME).map_err(|err| lower.parse_error(&err))?;
    lower.block(suite)
}

/// Parse a single expression, as `eval()` needs. Faults report `line`, the
/// line of the calling code.
pub fn parse_expression(src: &str, line: usize) -> ScriptResult<Expr> {
    let src = src.trim();
    let lines = LineIndex::new(src);
    let lower = Lower {
        lines: &lines,
        fixed_line: Some(line),
    };
    lower.check_nesting(src, Mode::Expression)?;
    let expr = py::Expr::parse(src, CODE_FILENAME).map_err(|err| lower.parse_error(&err))?;
    lower.expr(expr)
}

/// Byte offset to 1-based line number.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line(&self, offset: TextSize) -> usize {
        let offset = usize::from(offset);
        self.starts.partition_point(|&start| start <= offset)
    }
}

fn is_chain_token(tok: &Tok) -> bool {
    matches!(
        tok,
        Tok::Plus
            | Tok::Minus
            | Tok::Star
            | Tok::Slash
            | Tok::DoubleSlash
            | Tok::Percent
            | Tok::DoubleStar
            | Tok::At
            | Tok::Vbar
            | Tok::Amper
            | Tok::CircumFlex
            | Tok::LeftShift
            | Tok::RightShift
            | Tok::Tilde
            | Tok::Dot
            | Tok::Not
            | Tok::And
            | Tok::Or
            | Tok::If
            | Tok::Lambda
    )
}

/// Bracket depth and operator count inside the text of an f-string, whose
/// fields the lexer does not tokenize.
fn fstring_weight(text: &str) -> (usize, usize) {
    let (mut depth, mut deepest, mut ops) = (0usize, 0usize, 0usize);
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '+' | '-' | '*' | '/' | '%' | '@' | '|' | '&' | '^' | '~' | '.' => ops += 1,
            _ => {}
        }
    }
    (deepest, ops)
}

struct Lower<'s> {
    lines: &'s LineIndex,
    /// Set for `eval()` input, whose own line numbers mean nothing to the caller.
    fixed_line: Option<usize>,
}

impl Lower<'_> {
    fn line(&self, at: TextSize) -> usize {
        self.fixed_line.unwrap_or_else(|| self.lines.line(at))
    }

    fn syntax(&self, at: TextSize, message: impl Into<String>) -> Fault {
        Fault::syntax(self.line(at), message)
    }

    fn unsupported(&self, at: TextSize, what: &str) -> Fault {
        self.syntax(at, format!("{what} are not supported"))
    }

    fn parse_error(&self, err: &ParseError) -> Fault {
        self.syntax(err.offset, err.error.to_string())
    }

    fn check_nesting(&self, src: &str, mode: Mode) -> ScriptResult<()> {
        let mut brackets = 0usize;
        let mut indent = 0usize;
        // One running chain length per open bracket; separators reset the
        // innermost one because they start a sibling expression.
        let mut chains: Vec<usize> = vec![0];
        for token in lexer::lex(src, mode) {
            // Lexical errors are reported by the parser with better context.
            let Ok((tok, range)) = token else { break };
            let at = range.start();
            let mut grow = 0;
            match &tok {
                Tok::Lpar | Tok::Lsqb | Tok::Lbrace => {
                    brackets += 1;
                    if brackets > MAX_NESTING {
                        return Err(self.syntax(at, "too many nested parentheses"));
                    }
                    chains.push(0);
                }
                Tok::Rpar | Tok::Rsqb | Tok::Rbrace => {
                    brackets = brackets.saturating_sub(1);
                    if chains.len() > 1 {
                        chains.pop();
                    }
                    // The closed group is one more level for whatever applies to it.
                    grow = 1;
                }
                Tok::Indent => {
                    indent += 1;
                    if indent > MAX_INDENT {
                        return Err(self.syntax(at, "too many levels of indentation"));
                    }
                }
                Tok::Dedent => indent = indent.saturating_sub(1),
                Tok::Newline => {
                    chains.clear();
                    chains.push(0);
                }
                Tok::Comma | Tok::Semi => {
                    if let Some(chain) = chains.last_mut() {
                        *chain = 0;
                    }
                }
                Tok::String { value, kind, .. }
                    if matches!(kind, StringKind::FString | StringKind::RawFString) =>
                {
                    let (depth, ops) = fstring_weight(value);
                    if brackets + depth > MAX_NESTING {
                        return Err(self.syntax(at, "too many nested parentheses"));
                    }
                    grow = ops + depth;
                }
                other if is_chain_token(other) => grow = 1,
                _ => {}
            }
            if grow > 0 {
                if let Some(chain) = chains.last_mut() {
                    *chain += grow;
                }
                if chains.iter().sum::<usize>() > MAX_CHAIN {
                    let mut fault = Fault::new(
                        FaultKind::Recursion,
                        "expression is too deeply nested to compile",
                    );
                    fault.traceback.push(TraceEntry {
                        function: "<module>".to_string(),
                        line: self.line(at),
                    });
                    return Err(fault);
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn block(&self, body: Vec<py::Stmt>) -> ScriptResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    fn stmt(&self, stmt: py::Stmt, out: &mut Vec<Stmt>) -> ScriptResult<()> {
        let at = stmt.start();
        let line = self.line(at);
        let kind = match stmt {
            py::Stmt::Expr(s) => StmtKind::Expr(self.expr(*s.value)?),
            py::Stmt::Assign(s) => StmtKind::Assign {
                targets: s
                    .targets
                    .into_iter()
                    .map(|t| self.target(t))
                    .collect::<ScriptResult<_>>()?,
                value: self.expr(*s.value)?,
            },
            py::Stmt::AugAssign(s) => StmtKind::AugAssign {
                target: self.target(*s.target)?,
                op: self.operator(s.op, at)?,
                value: self.expr(*s.value)?,
            },
            // Annotations are accepted and dropped.
            py::Stmt::AnnAssign(s) => match s.value {
                Some(value) => StmtKind::Assign {
                    targets: vec![self.target(*s.target)?],
                    value: self.expr(*value)?,
                },
                None => StmtKind::Pass,
            },
            py::Stmt::If(s) => {
                let mut branches = vec![(self.expr(*s.test)?, self.block(s.body)?)];
                let mut orelse = s.orelse;
                // `elif` arrives as an `else` holding a single `if`.
                while orelse.len() == 1 && matches!(orelse[0], py::Stmt::If(_)) {
                    let Some(py::Stmt::If(next)) = orelse.pop() else {
                        break;
                    };
                    branches.push((self.expr(*next.test)?, self.block(next.body)?));
                    orelse = next.orelse;
                }
                StmtKind::If {
                    branches,
                    orelse: self.block(orelse)?,
                }
            }
            py::Stmt::While(s) => StmtKind::While {
                cond: self.expr(*s.test)?,
                body: self.block(s.body)?,
                orelse: self.block(s.orelse)?,
            },
            py::Stmt::For(s) => StmtKind::For {
                target: self.target(*s.target)?,
                iter: self.expr(*s.iter)?,
                body: self.block(s.body)?,
                orelse: self.block(s.orelse)?,
            },
            py::Stmt::Break(_) => StmtKind::Break,
            py::Stmt::Continue(_) => StmtKind::Continue,
            py::Stmt::Pass(_) => StmtKind::Pass,
            py::Stmt::Return(s) => StmtKind::Return(self.opt_expr(s.value)?),
            py::Stmt::FunctionDef(s) => {
                if !s.decorator_list.is_empty() {
                    return Err(self.unsupported(at, "decorators"));
                }
                StmtKind::Def {
                    name: s.name.as_str().to_owned(),
                    params: self.params(*s.args)?,
                    body: Arc::new(self.block(s.body)?),
                }
            }
            py::Stmt::Import(s) => {
                // `import a, b` binds like two statements on the same line.
                for alias in s.names {
                    out.push(Stmt {
                        kind: StmtKind::Import {
                            module: alias.name.as_str().to_owned(),
                            alias: alias.asname.map(|a| a.as_str().to_owned()),
                        },
                        line,
                    });
                }
                return Ok(());
            }
            py::Stmt::ImportFrom(s) => {
                if s.level.is_some_and(|level| level.to_u32() > 0) {
                    return Err(self.unsupported(at, "relative imports"));
                }
                let Some(module) = s.module else {
                    return Err(self.syntax(at, "expected a module name"));
                };
                let mut names = Vec::with_capacity(s.names.len());
                for alias in s.names {
                    if alias.name.as_str() == "*" {
                        return Err(self.unsupported(at, "wildcard imports"));
                    }
                    names.push((
                        alias.name.as_str().to_owned(),
                        alias.asname.map(|a| a.as_str().to_owned()),
                    ));
                }
                StmtKind::FromImport {
                    module: module.as_str().to_owned(),
                    names,
                }
            }
            // The cause of `raise X from Y` is evaluated by nobody; it only
            // decorates CPython tracebacks.
            py::Stmt::Raise(s) => StmtKind::Raise(self.opt_expr(s.exc)?),
            py::Stmt::Try(s) => StmtKind::Try {
                body: self.block(s.body)?,
                handlers: s
                    .handlers
                    .into_iter()
                    .map(|h| self.handler(h))
                    .collect::<ScriptResult<_>>()?,
                orelse: self.block(s.orelse)?,
                finally: self.block(s.finalbody)?,
            },
            py::Stmt::Delete(s) => StmtKind::Del(
                s.targets
                    .into_iter()
                    .map(|t| self.target(t))
                    .collect::<ScriptResult<_>>()?,
            ),
            py::Stmt::Assert(s) => StmtKind::Assert {
                cond: self.expr(*s.test)?,
                message: self.opt_expr(s.msg)?,
            },
            py::Stmt::ClassDef(_) => return Err(self.unsupported(at, "class definitions")),
            py::Stmt::With(_) => return Err(self.unsupported(at, "'with' statements")),
            py::Stmt::Global(_) | py::Stmt::Nonlocal(_) => {
                return Err(self.unsupported(at, "'global' and 'nonlocal' declarations"))
            }
            _ => return Err(self.unsupported(at, "async, match and type statements")),
        };
        out.push(Stmt { kind, line });
        Ok(())
    }

    fn handler(&self, handler: py::ExceptHandler) -> ScriptResult<Handler> {
        let py::ExceptHandler::ExceptHandler(h) = handler;
        let line = self.line(h.range.start());
        let kinds = match h.type_ {
            None => Vec::new(),
            Some(kind) => match *kind {
                py::Expr::Tuple(t) => t
                    .elts
                    .into_iter()
                    .map(|e| self.exception_name(e))
                    .collect::<ScriptResult<_>>()?,
                other => vec![self.exception_name(other)?],
            },
        };
        Ok(Handler {
            kinds,
            binding: h.name.map(|n| n.as_str().to_owned()),
            body: self.block(h.body)?,
            line,
        })
    }

    fn exception_name(&self, expr: py::Expr) -> ScriptResult<String> {
        let at = expr.start();
        match expr {
            py::Expr::Name(n) => Ok(n.id.as_str().to_owned()),
            py::Expr::Attribute(a) => Ok(format!(
                "{}.{}",
                self.exception_name(*a.value)?,
                a.attr.as_str()
            )),
            _ => Err(self.syntax(at, "except clauses must name exception types")),
        }
    }

    fn params(&self, args: py::Arguments) -> ScriptResult<Vec<Param>> {
        let mut params = Vec::new();
        for arg in args.posonlyargs.into_iter().chain(args.args) {
            params.push(self.param(arg, ParamKind::Positional)?);
        }
        if let Some(vararg) = args.vararg {
            params.push(Param {
                name: vararg.arg.as_str().to_owned(),
                kind: ParamKind::VarArgs,
                default: None,
            });
        }
        for arg in args.kwonlyargs {
            params.push(self.param(arg, ParamKind::KeywordOnly)?);
        }
        if let Some(kwarg) = args.kwarg {
            params.push(Param {
                name: kwarg.arg.as_str().to_owned(),
                kind: ParamKind::KwArgs,
                default: None,
            });
        }
        Ok(params)
    }

    fn param(&self, arg: py::ArgWithDefault, kind: ParamKind) -> ScriptResult<Param> {
        Ok(Param {
            name: arg.def.arg.as_str().to_owned(),
            kind,
            default: self.opt_expr(arg.default)?,
        })
    }

    fn target(&self, expr: py::Expr) -> ScriptResult<Target> {
        let at = expr.start();
        match expr {
            py::Expr::Name(n) => Ok(Target::Name(n.id.as_str().to_owned())),
            py::Expr::Subscript(s) => Ok(Target::Index(
                Box::new(self.expr(*s.value)?),
                Box::new(self.expr(*s.slice)?),
            )),
            py::Expr::Attribute(a) => Ok(Target::Attr(
                Box::new(self.expr(*a.value)?),
                a.attr.as_str().to_owned(),
            )),
            py::Expr::Tuple(t) => Ok(Target::Unpack(self.targets(t.elts)?)),
            py::Expr::List(l) => Ok(Target::Unpack(self.targets(l.elts)?)),
            py::Expr::Starred(_) => Err(self.unsupported(at, "starred assignment targets")),
            _ => Err(self.syntax(at, "cannot assign to expression")),
        }
    }

    fn targets(&self, exprs: Vec<py::Expr>) -> ScriptResult<Vec<Target>> {
        exprs.into_iter().map(|e| self.target(e)).collect()
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn expr(&self, expr: py::Expr) -> ScriptResult<Expr> {
        let at = expr.start();
        Ok(match expr {
            py::Expr::Constant(c) => self.constant(c.value, at)?,
            py::Expr::JoinedStr(j) => Expr::FString(self.fstring(j.values)?),
            py::Expr::Name(n) => Expr::Name(n.id.as_str().to_owned()),
            py::Expr::List(l) => Expr::List(self.exprs(l.elts)?),
            py::Expr::Tuple(t) => Expr::Tuple(self.exprs(t.elts)?),
            py::Expr::Dict(d) => {
                let mut entries = Vec::with_capacity(d.values.len());
                for (key, value) in d.keys.into_iter().zip(d.values) {
                    let Some(key) = key else {
                        return Err(self.unsupported(at, "dictionary unpackings"));
                    };
                    entries.push((self.expr(key)?, self.expr(value)?));
                }
                Expr::Dict(entries)
            }
            py::Expr::BinOp(b) => Expr::BinOp(
                Box::new(self.expr(*b.left)?),
                self.operator(b.op, at)?,
                Box::new(self.expr(*b.right)?),
            ),
            py::Expr::UnaryOp(u) => {
                let op = match u.op {
                    py::UnaryOp::Not => UnaryOp::Not,
                    py::UnaryOp::USub => UnaryOp::Neg,
                    py::UnaryOp::UAdd => UnaryOp::Pos,
                    py::UnaryOp::Invert => return Err(self.unsupported(at, "bitwise operators")),
                };
                Expr::Unary(op, Box::new(self.expr(*u.operand)?))
            }
            py::Expr::BoolOp(b) => {
                let is_and = matches!(b.op, py::BoolOp::And);
                let mut values = b.values.into_iter();
                let Some(first) = values.next() else {
                    return Err(self.syntax(at, "invalid syntax"));
                };
                let mut acc = self.expr(first)?;
                for value in values {
                    let right = Box::new(self.expr(value)?);
                    acc = if is_and {
                        Expr::And(Box::new(acc), right)
                    } else {
                        Expr::Or(Box::new(acc), right)
                    };
                }
                acc
            }
            py::Expr::Compare(c) => {
                let mut ops = Vec::with_capacity(c.ops.len());
                for (op, operand) in c.ops.into_iter().zip(c.comparators) {
                    ops.push((cmp_op(op), self.expr(operand)?));
                }
                Expr::Compare(Box::new(self.expr(*c.left)?), ops)
            }
            py::Expr::IfExp(i) => Expr::IfExp {
                cond: Box::new(self.expr(*i.test)?),
                then: Box::new(self.expr(*i.body)?),
                orelse: Box::new(self.expr(*i.orelse)?),
            },
            py::Expr::Call(c) => {
                let mut args = Vec::with_capacity(c.args.len());
                for arg in c.args {
                    if matches!(arg, py::Expr::Starred(_)) {
                        return Err(self.unsupported(at, "argument unpackings"));
                    }
                    args.push(self.expr(arg)?);
                }
                let mut kwargs = Vec::with_capacity(c.keywords.len());
                for keyword in c.keywords {
                    let Some(name) = keyword.arg else {
                        return Err(self.unsupported(at, "keyword argument unpackings"));
                    };
                    kwargs.push((name.as_str().to_owned(), self.expr(keyword.value)?));
                }
                Expr::Call {
                    func: Box::new(self.expr(*c.func)?),
                    args,
                    kwargs,
                }
            }
            py::Expr::Attribute(a) => {
                Expr::Attr(Box::new(self.expr(*a.value)?), a.attr.as_str().to_owned())
            }
            py::Expr::Subscript(s) => Expr::Index(
                Box::new(self.expr(*s.value)?),
                Box::new(self.expr(*s.slice)?),
            ),
            py::Expr::Slice(s) => Expr::Slice {
                lower: self.opt_boxed(s.lower)?,
                upper: self.opt_boxed(s.upper)?,
                step: self.opt_boxed(s.step)?,
            },
            py::Expr::ListComp(c) => Expr::ListComp {
                element: Box::new(self.expr(*c.elt)?),
                clauses: self.clauses(c.generators, at)?,
            },
            // Generators are evaluated eagerly: `sum(x for x in xs)`.
            py::Expr::GeneratorExp(g) => Expr::ListComp {
                element: Box::new(self.expr(*g.elt)?),
                clauses: self.clauses(g.generators, at)?,
            },
            py::Expr::DictComp(d) => Expr::DictComp {
                key: Box::new(self.expr(*d.key)?),
                value: Box::new(self.expr(*d.value)?),
                clauses: self.clauses(d.generators, at)?,
            },
            py::Expr::Lambda(l) => Expr::Lambda {
                params: self.params(*l.args)?,
                body: Box::new(self.expr(*l.body)?),
            },
            py::Expr::Set(_) | py::Expr::SetComp(_) => return Err(self.unsupported(at, "sets")),
            py::Expr::Starred(_) => return Err(self.unsupported(at, "starred expressions")),
            py::Expr::NamedExpr(_) => return Err(self.unsupported(at, "assignment expressions")),
            _ => return Err(self.unsupported(at, "await and yield expressions")),
        })
    }

    fn exprs(&self, exprs: Vec<py::Expr>) -> ScriptResult<Vec<Expr>> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn opt_expr(&self, expr: Option<Box<py::Expr>>) -> ScriptResult<Option<Expr>> {
        expr.map(|e| self.expr(*e)).transpose()
    }

    fn opt_boxed(&self, expr: Option<Box<py::Expr>>) -> ScriptResult<Option<Box<Expr>>> {
        Ok(self.opt_expr(expr)?.map(Box::new))
    }

    fn clauses(&self, generators: Vec<py::Comprehension>, at: TextSize) -> ScriptResult<Vec<CompClause>> {
        let mut clauses = Vec::with_capacity(generators.len());
        for generator in generators {
            if generator.is_async {
                return Err(self.unsupported(at, "async comprehensions"));
            }
            clauses.push(CompClause {
                target: self.target(generator.target)?,
                iter: self.expr(generator.iter)?,
                conditions: self.exprs(generator.ifs)?,
            });
        }
        Ok(clauses)
    }

    fn constant(&self, value: Constant, at: TextSize) -> ScriptResult<Expr> {
        Ok(match value {
            Constant::None => Expr::None,
            Constant::Bool(b) => Expr::Bool(b),
            Constant::Str(s) => Expr::Str(s),
            Constant::Float(f) => Expr::Float(f),
            Constant::Int(big) => {
                let text = big.to_string();
                match text.parse::<i64>() {
                    Ok(i) => Expr::Int(i),
                    Err(_) => {
                        let mut fault = Fault::new(
                            FaultKind::Overflow,
                            format!("integer literal {text} does not fit in 64 bits"),
                        );
                        fault.traceback.push(TraceEntry {
                            function: "<module>".to_string(),
                            line: self.line(at),
                        });
                        return Err(fault);
                    }
                }
            }
            Constant::Tuple(items) => Expr::Tuple(
                items
                    .into_iter()
                    .map(|item| self.constant(item, at))
                    .collect::<ScriptResult<_>>()?,
            ),
            _ => return Err(self.unsupported(at, "bytes, complex and ellipsis literals")),
        })
    }

    fn fstring(&self, values: Vec<py::Expr>) -> ScriptResult<Vec<FPart>> {
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            let at = value.start();
            match value {
                py::Expr::Constant(c) => match c.value {
                    Constant::Str(s) => parts.push(FPart::Literal(s)),
                    _ => return Err(self.syntax(at, "invalid f-string")),
                },
                py::Expr::FormattedValue(f) => {
                    let conversion = match f.conversion as i8 {
                        -1 => None,
                        flag => Some(char::from(flag as u8)),
                    };
                    let spec = match f.format_spec {
                        None => Vec::new(),
                        Some(spec) => match *spec {
                            py::Expr::JoinedStr(j) => self.fstring(j.values)?,
                            other => self.fstring(vec![other])?,
                        },
                    };
                    parts.push(FPart::Field {
                        expr: self.expr(*f.value)?,
                        conversion,
                        spec,
                    });
                }
                py::Expr::JoinedStr(j) => parts.extend(self.fstring(j.values)?),
                _ => return Err(self.syntax(at, "invalid f-string")),
            }
        }
        Ok(parts)
    }

    fn operator(&self, op: py::Operator, at: TextSize) -> ScriptResult<BinOp> {
        Ok(match op {
            py::Operator::Add => BinOp::Add,
            py::Operator::Sub => BinOp::Sub,
            py::Operator::Mult => BinOp::Mul,
            py::Operator::Div => BinOp::Div,
            py::Operator::FloorDiv => BinOp::FloorDiv,
            py::Operator::Mod => BinOp::Mod,
            py::Operator::Pow => BinOp::Pow,
            _ => return Err(self.unsupported(at, "bitwise and matrix operators")),
        })
    }
}

fn cmp_op(op: py::CmpOp) -> CmpOp {
    match op {
        py::CmpOp::Eq => CmpOp::Eq,
        py::CmpOp::NotEq => CmpOp::NotEq,
        py::CmpOp::Lt => CmpOp::Lt,
        py::CmpOp::LtE => CmpOp::LtE,
        py::CmpOp::Gt => CmpOp::Gt,
        py::CmpOp::GtE => CmpOp::GtE,
        py::CmpOp::In => CmpOp::In,
        py::CmpOp::NotIn => CmpOp::NotIn,
        py::CmpOp::Is => CmpOp::Is,
        py::CmpOp::IsNot => CmpOp::IsNot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(fault: &Fault) -> &str {
        fault.kind.name()
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("tap_element"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("with"));
        assert!(!is_identifier("None"));
        assert!(!is_identifier("swipe-up"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_parses_compound_statements() {
        let program = parse_program(
            "def f(a, b=2):\n    if a > b:\n        return a\n    elif a == b:\n        return 0\n    return b\n\nfor i in range(3):\n    print(f(i))\n",
        )
        .unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program[0].kind, StmtKind::Def { .. }));
        assert!(matches!(program[1].kind, StmtKind::For { .. }));
        assert_eq!(program[1].line, 8);
    }

    #[test]
    fn test_elif_chain_is_flattened() {
        let program =
            parse_program("if a:\n    x = 1\nelif b:\n    x = 2\nelif c:\n    x = 3\nelse:\n    x = 4\n")
                .unwrap();
        match &program[0].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 3);
                assert_eq!(orelse.len(), 1);
                assert_eq!(orelse[0].line, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_conditional_expression_vs_comprehension_filter() {
        let expr = parse_expression("[x for x in xs if x > 1]", 1).unwrap();
        assert!(matches!(expr, Expr::ListComp { ref clauses, .. } if clauses[0].conditions.len() == 1));
        let expr = parse_expression("a if c else b", 1).unwrap();
        assert!(matches!(expr, Expr::IfExp { .. }));
    }

    #[test]
    fn test_tuple_unpacking_and_chained_assignment() {
        let program = parse_program("a, b = 1, 2\nx = y = 0\n").unwrap();
        match &program[0].kind {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(targets[0], Target::Unpack(ref t) if t.len() == 2))
            }
            other => panic!("unexpected {other:?}"),
        }
        match &program[1].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_try_except_else_finally() {
        let program = parse_program(
            "try:\n    x = 1\nexcept (KeyError, ValueError) as e:\n    pass\nelse:\n    y = 2\nfinally:\n    z = 3\n",
        )
        .unwrap();
        match &program[0].kind {
            StmtKind::Try {
                handlers,
                orelse,
                finally,
                ..
            } => {
                assert_eq!(handlers[0].kinds, vec!["KeyError", "ValueError"]);
                assert_eq!(handlers[0].binding.as_deref(), Some("e"));
                assert_eq!(handlers[0].line, 3);
                assert_eq!(orelse.len(), 1);
                assert_eq!(finally.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_import_lists_expand_to_one_statement_each() {
        let program = parse_program("import json, re as regex\nfrom math import floor, sqrt as root\n").unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(&program[1].kind, StmtKind::Import { module, alias } if module == "re" && alias.as_deref() == Some("regex")));
        assert!(matches!(&program[2].kind, StmtKind::FromImport { names, .. } if names.len() == 2));
        assert!(parse_program("from . import x\n").is_err());
        assert!(parse_program("from os import *\n").is_err());
    }

    #[test]
    fn test_parameter_kinds() {
        let program = parse_program("def f(a, /, b=1, *rest, flag=False, **extra):\n    pass\n").unwrap();
        let StmtKind::Def { params, .. } = &program[0].kind else {
            panic!("expected a def");
        };
        let kinds: Vec<ParamKind> = params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::Positional,
                ParamKind::Positional,
                ParamKind::VarArgs,
                ParamKind::KeywordOnly,
                ParamKind::KwArgs
            ]
        );
    }

    #[test]
    fn test_fstring_fields_with_conversion_and_nested_spec() {
        let expr = parse_expression("f'{name!r:>{width}} done'", 1).unwrap();
        let Expr::FString(parts) = expr else {
            panic!("expected an f-string");
        };
        match &parts[0] {
            FPart::Field { conversion, spec, .. } => {
                assert_eq!(*conversion, Some('r'));
                assert!(matches!(spec.as_slice(), [FPart::Literal(l), FPart::Field { .. }] if l == ">"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&parts[1], FPart::Literal(l) if l == " done"));
    }

    #[test]
    fn test_rejects_unsupported_and_malformed_code() {
        assert!(parse_program("class A:\n    pass\n").is_err());
        assert!(parse_program("with open('f') as f:\n    pass\n").is_err());
        assert!(parse_program("x = = 1\n").is_err());
        assert!(parse_program("1 = x\n").is_err());
        assert!(parse_program("if x\n    pass\n").is_err());
        assert!(parse_program("x = {1, 2}\n").is_err());
        assert!(parse_program("x = a | b\n").is_err());
    }

    #[test]
    fn test_syntax_errors_report_their_line() {
        let fault = parse_program("x = 1\ny = (\n").unwrap_err();
        assert_eq!(fault.kind, FaultKind::Syntax);
        let fault = parse_program("x = 1\nclass A:\n    pass\n").unwrap_err();
        assert_eq!(fault.traceback[0].line, 2);
    }

    #[test]
    fn test_annotations_are_accepted() {
        let program = parse_program("def f(x: int) -> str:\n    return str(x)\ny: int = 3\n").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_expression("-2 ** 2", 1).unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn test_integer_literal_overflow_is_reported() {
        let fault = parse_program("x = 99999999999999999999\n").unwrap_err();
        assert_eq!(kind_of(&fault), "OverflowError");
        assert!(parse_expression("9223372036854775807", 1).is_ok());
    }

    #[test]
    fn test_deep_bracket_nesting_is_a_syntax_error() {
        let src = format!("x = {}1{}\n", "(".repeat(200_000), ")".repeat(200_000));
        let fault = parse_program(&src).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Syntax);
        assert!(fault.message.contains("too many nested parentheses"));

        let ok = format!("x = {}1{}\n", "(".repeat(50), ")".repeat(50));
        assert!(parse_program(&ok).is_ok());
    }

    #[test]
    fn test_long_operator_chains_are_refused() {
        let src = format!("x = 1{}\n", "+1".repeat(300_000));
        let fault = parse_program(&src).unwrap_err();
        assert_eq!(kind_of(&fault), "RecursionError");

        let calls = format!("f{}\n", "()".repeat(100_000));
        assert_eq!(kind_of(&parse_program(&calls).unwrap_err()), "RecursionError");

        // Long but flat: separators restart the chain.
        let flat = format!("xs = [{}]\n", vec!["a + 1"; 5_000].join(", "));
        assert!(parse_program(&flat).is_ok());
    }

    #[test]
    fn test_deep_indentation_is_refused() {
        let mut src = String::new();
        for level in 0..150 {
            src.push_str(&"    ".repeat(level));
            src.push_str("if True:\n");
        }
        src.push_str(&"    ".repeat(150));
        src.push_str("pass\n");
        let fault = parse_program(&src).unwrap_err();
        assert!(fault.message.contains("indentation"));
    }
}
