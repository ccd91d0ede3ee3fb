//! The builtin namespace: functions, type constructors and exception classes.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::fault::{Fault, FaultKind, ScriptResult};
use super::format;
use super::interp::{binary_op, Interpreter, ValueIter};
use super::ast::BinOp;
use super::output::StreamKind;
use super::value::*;

/// Exception classes bound as builtins.
pub const EXCEPTION_CLASSES: &[&str] = &[
    "BaseException",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

const FUNCTIONS: &[(&str, NativeImpl)] = &[
    ("print", print),
    ("len", len),
    ("str", str_),
    ("int", int),
    ("float", float),
    ("bool", bool_),
    ("repr", repr),
    ("type", type_),
    ("range", range),
    ("list", list),
    ("tuple", tuple),
    ("dict", dict),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("sorted", sorted),
    ("reversed", reversed),
    ("enumerate", enumerate),
    ("zip", zip),
    ("map", map),
    ("filter", filter),
    ("round", round),
    ("divmod", divmod),
    ("any", any),
    ("all", all),
    ("isinstance", isinstance),
    ("hasattr", hasattr),
    ("getattr", getattr),
    ("callable", callable),
    ("format", format_),
    ("chr", chr),
    ("ord", ord),
    ("eval", eval),
    ("exec", exec),
    ("__import__", import),
];

/// The builtins visible to a run, with the names the capability policy removed.
#[derive(Debug, Clone)]
pub struct Builtins {
    table: Scope,
    denied: BTreeSet<String>,
}

impl Builtins {
    /// Every builtin, unrestricted.
    pub fn full() -> Self {
        let mut table = Scope::new();
        for (name, func) in FUNCTIONS {
            table.insert(name.to_string(), Value::native(name, *func));
        }
        for name in EXCEPTION_CLASSES {
            table.insert(name.to_string(), Value::Class(Arc::from(*name)));
        }
        table.insert("None".to_string(), Value::None);
        table.insert("True".to_string(), Value::Bool(true));
        table.insert("False".to_string(), Value::Bool(false));
        Self {
            table,
            denied: BTreeSet::new(),
        }
    }

    /// Keep only the builtins `permits` accepts; the rest are remembered as
    /// denied so a reference to them reports a policy violation.
    pub fn filtered(permits: impl Fn(&str) -> bool) -> Self {
        let full = Self::full();
        let mut table = Scope::new();
        let mut denied = BTreeSet::new();
        for (name, value) in full.table {
            if permits(&name) {
                table.insert(name, value);
            } else {
                denied.insert(name);
            }
        }
        Self { table, denied }
    }

    pub fn lookup(&self, name: &str) -> ScriptResult<Value> {
        if let Some(value) = self.table.get(name) {
            return Ok(value.clone());
        }
        if self.denied.contains(name) {
            crate::metrics::METRICS.inc_policy_violations();
            return Err(Fault::new(
                FaultKind::PolicyViolation,
                format!("use of builtin '{name}' is not allowed"),
            ));
        }
        Err(Fault::name_error(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.denied.contains(name)
    }

    /// Names of the available builtins, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.denied.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Names of every builtin the interpreter knows, including constants.
pub fn all_names() -> Vec<String> {
    Builtins::full().names()
}

fn one<'v>(args: &'v CallArgs, func: &str) -> ScriptResult<&'v Value> {
    args.expect_at_most(1, func)?;
    args.require(0, "obj", func)
}

fn int_arg(value: &Value, func: &str) -> ScriptResult<i64> {
    value.as_int().ok_or_else(|| {
        Fault::type_error(format!(
            "{func}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

fn print(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let sep = match args.keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(v) => v.to_display(),
    };
    let end = match args.keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(v) => v.to_display(),
    };
    let stream = match args.keyword("file") {
        Some(Value::Stream(kind)) => *kind,
        Some(Value::None) | None => StreamKind::Stdout,
        Some(other) => {
            return Err(Fault::new(
                FaultKind::Attribute,
                format!("'{}' object has no attribute 'write'", other.type_name()),
            ))
        }
    };
    let text = args
        .positional
        .iter()
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(&sep);
    let output = interp.output();
    output.write(stream, &text);
    output.write(stream, &end);
    Ok(Value::None)
}

fn len(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let value = one(&args, "len")?;
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => lock(items).len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => lock(dict).len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(Fault::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn str_(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "str")?;
    Ok(match args.get(0) {
        Some(value) => Value::str(value.to_display()),
        None => Value::str(""),
    })
}

fn int(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "int")?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Int(0));
    };
    let base = match args.arg(1, "base") {
        Some(b) => int_arg(b, "int")?,
        None => 10,
    };
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(Fault::new(
            if f.is_nan() { FaultKind::Value } else { FaultKind::Overflow },
            "cannot convert float to integer",
        )),
        Value::Str(s) => {
            let text = s.trim().replace('_', "");
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest.to_string()),
                None => (false, text.strip_prefix('+').unwrap_or(&text).to_string()),
            };
            let digits = match base {
                16 => digits
                    .strip_prefix("0x")
                    .or_else(|| digits.strip_prefix("0X"))
                    .unwrap_or(&digits)
                    .to_string(),
                _ => digits,
            };
            let radix = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| Fault::value_error("int() base must be >= 2 and <= 36"))?;
            i64::from_str_radix(&digits, radix)
                .map(|i| Value::Int(if negative { -i } else { i }))
                .map_err(|_| {
                    Fault::value_error(format!(
                        "invalid literal for int() with base {base}: {}",
                        value.repr()
                    ))
                })
        }
        other => Err(Fault::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    let text = text.trim().to_ascii_lowercase();
    match text.as_str() {
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        other => other.replace('_', "").parse().ok(),
    }
}

fn float(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "float")?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(s) => parse_float(s).map(Value::Float).ok_or_else(|| {
            Fault::value_error(format!("could not convert string to float: {}", value.repr()))
        }),
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            Fault::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn bool_(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "bool")?;
    Ok(Value::Bool(args.get(0).map(Value::truthy).unwrap_or(false)))
}

fn repr(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    Ok(Value::str(one(&args, "repr")?.repr()))
}

fn type_(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let value = one(&args, "type")?;
    let name = match value {
        Value::Exception(exc) => return Ok(Value::Class(Arc::from(exc.kind.as_str()))),
        other => other.type_name(),
    };
    if TYPE_BUILTINS.contains(&name) {
        if let Ok(builtin) = interp.lookup(name) {
            return Ok(builtin);
        }
    }
    Ok(Value::Class(Arc::from(name)))
}

fn range(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(3, "range")?;
    let ints = args
        .positional
        .iter()
        .map(|v| int_arg(v, "range"))
        .collect::<ScriptResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Fault::type_error("range expected at least 1 argument, got 0")),
    };
    if step == 0 {
        return Err(Fault::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn list(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "list")?;
    match args.get(0) {
        Some(value) => Ok(Value::list(interp.collect(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn tuple(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "tuple")?;
    match args.get(0) {
        Some(value) => Ok(Value::tuple(interp.collect(value)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn dict(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "dict")?;
    let mut out = Dict::new();
    match args.get(0) {
        Some(Value::Dict(source)) => {
            for (k, v) in lock(source).items() {
                out.insert(k.clone(), v.clone());
            }
        }
        Some(pairs) => {
            for pair in interp.collect(pairs)? {
                let items = interp.collect(&pair)?;
                let [k, v] = <[Value; 2]>::try_from(items).map_err(|items| {
                    Fault::value_error(format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        items.len()
                    ))
                })?;
                out.insert(k, v);
            }
        }
        None => {}
    }
    for (k, v) in args.keywords {
        out.insert(Value::from(k), v);
    }
    Ok(Value::dict(out))
}

fn abs(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    match one(&args, "abs")? {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => match v.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| Fault::new(FaultKind::Overflow, "integer overflow")),
            None => Err(Fault::type_error(format!(
                "bad operand type for abs(): '{}'",
                v.type_name()
            ))),
        },
    }
}

fn extreme(
    interp: &mut Interpreter<'_>,
    args: CallArgs,
    func: &str,
    want: std::cmp::Ordering,
) -> ScriptResult<Value> {
    let items: Box<dyn Iterator<Item = Value>> = match args.positional.as_slice() {
        [] => {
            return Err(Fault::type_error(format!(
                "{func} expected at least 1 argument, got 0"
            )))
        }
        [single] => Box::new(ValueIter::new(single)?),
        many => Box::new(many.to_vec().into_iter()),
    };
    let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
    let mut best: Option<(Value, Value)> = None;
    for (index, item) in items.enumerate() {
        interp.poll(index)?;
        let rank = match &key {
            Some(key) => interp.call_value(key, CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank.compare(best_rank)? == want,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match best {
        Some((_, item)) => Ok(item),
        None => args
            .keyword("default")
            .cloned()
            .ok_or_else(|| Fault::value_error(format!("{func}() arg is an empty sequence"))),
    }
}

fn min(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    extreme(interp, args, "min", std::cmp::Ordering::Less)
}

fn max(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    extreme(interp, args, "max", std::cmp::Ordering::Greater)
}

fn sum(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "sum")?;
    let items = ValueIter::new(args.require(0, "iterable", "sum")?)?;
    let mut total = args.arg(1, "start").cloned().unwrap_or(Value::Int(0));
    if total.as_str().is_some() {
        return Err(Fault::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for (index, item) in items.enumerate() {
        interp.poll(index)?;
        total = binary_op(&total, BinOp::Add, &item, interp.limits())?;
    }
    Ok(total)
}

/// Sort `items` by `key` (or by themselves), stable, optionally reversed.
pub(crate) fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> ScriptResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match key {
            Some(key) if !key.is_none() => {
                interp.call_value(key, CallArgs::new(vec![item.clone()]))?
            }
            _ => item.clone(),
        };
        keyed.push((rank, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = a.compare(b).unwrap_or_else(|fault| {
            failure.get_or_insert(fault);
            std::cmp::Ordering::Equal
        });
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
    match failure {
        Some(fault) => Err(fault),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn sorted(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(1, "sorted")?;
    let items = interp.collect(args.require(0, "iterable", "sorted")?)?;
    let reverse = args.keyword("reverse").map(Value::truthy).unwrap_or(false);
    let sorted = sort_values(interp, items, args.keyword("key"), reverse)?;
    Ok(Value::list(sorted))
}

fn reversed(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let mut items = interp.collect(one(&args, "reversed")?)?;
    items.reverse();
    Ok(Value::list(items))
}

fn enumerate(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "enumerate")?;
    let items = interp.collect(args.require(0, "iterable", "enumerate")?)?;
    let start = match args.arg(1, "start") {
        Some(v) => int_arg(v, "enumerate")?,
        None => 0,
    };
    Ok(Value::list(
        items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
            .collect(),
    ))
}

fn zip(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let columns = args
        .positional
        .iter()
        .map(|column| interp.collect(column))
        .collect::<ScriptResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

fn map(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let func = args.require(0, "function", "map")?.clone();
    let columns = args.positional[1..]
        .iter()
        .map(|column| interp.collect(column))
        .collect::<ScriptResult<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Fault::type_error("map() must have at least two arguments."));
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let row = columns.iter().map(|c| c[i].clone()).collect();
        out.push(interp.call_value(&func, CallArgs::new(row))?);
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "filter")?;
    let func = args.require(0, "function", "filter")?.clone();
    let items = interp.collect(args.require(1, "iterable", "filter")?)?;
    let mut out = Vec::new();
    for item in items {
        let keep = if func.is_none() {
            item.truthy()
        } else {
            interp
                .call_value(&func, CallArgs::new(vec![item.clone()]))?
                .truthy()
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn round(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "round")?;
    let value = args.require(0, "number", "round")?;
    let digits = match args.arg(1, "ndigits") {
        Some(Value::None) | None => None,
        Some(v) => Some(int_arg(v, "round")?),
    };
    match (value, digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (Value::Bool(b), _) => Ok(Value::Int(i64::from(*b))),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(Fault::value_error("cannot convert float to integer"));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Value::Float(f), Some(n)) => {
            let factor = 10f64.powi(n.clamp(-300, 300) as i32);
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
        (other, _) => Err(Fault::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn divmod(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "divmod")?;
    let a = args.require(0, "a", "divmod")?;
    let b = args.require(1, "b", "divmod")?;
    Ok(Value::tuple(vec![
        binary_op(a, BinOp::FloorDiv, b, interp.limits())?,
        binary_op(a, BinOp::Mod, b, interp.limits())?,
    ]))
}

fn any(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    for (index, item) in ValueIter::new(one(&args, "any")?)?.enumerate() {
        interp.poll(index)?;
        if item.truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    for (index, item) in ValueIter::new(one(&args, "all")?)?.enumerate() {
        interp.poll(index)?;
        if !item.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn instance_of(value: &Value, class: &Value) -> ScriptResult<bool> {
    match class {
        Value::Native(native) if TYPE_BUILTINS.contains(&native.name) => {
            Ok(match (native.name, value) {
                ("int", Value::Bool(_)) => true,
                (name, value) => value.type_name() == name,
            })
        }
        Value::Class(name) => Ok(match value {
            Value::Exception(exc) => FaultKind::from_name(&exc.kind).matches(name),
            other => other.type_name() == name.as_ref(),
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if instance_of(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(Fault::type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not {}",
            other.type_name()
        ))),
    }
}

fn isinstance(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "isinstance")?;
    let value = args.require(0, "obj", "isinstance")?;
    let class = args.require(1, "class_or_tuple", "isinstance")?;
    instance_of(value, class).map(Value::Bool)
}

fn hasattr(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "hasattr")?;
    let value = args.require(0, "obj", "hasattr")?;
    let name = args.require(1, "name", "hasattr")?;
    let name = name
        .as_str()
        .ok_or_else(|| Fault::type_error("hasattr(): attribute name must be string"))?;
    Ok(Value::Bool(interp.get_attr(value, name).is_ok()))
}

fn getattr(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(3, "getattr")?;
    let value = args.require(0, "obj", "getattr")?;
    let name = args
        .require(1, "name", "getattr")?
        .as_str()
        .ok_or_else(|| Fault::type_error("getattr(): attribute name must be string"))?
        .to_string();
    match (interp.get_attr(value, &name), args.get(2)) {
        (Ok(found), _) => Ok(found),
        (Err(fault), Some(default)) if fault.kind == FaultKind::Attribute => Ok(default.clone()),
        (Err(fault), _) => Err(fault),
    }
}

fn callable(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    Ok(Value::Bool(matches!(
        one(&args, "callable")?,
        Value::Function(_) | Value::Native(_) | Value::Tool(_) | Value::BoundMethod(_) | Value::Class(_)
    )))
}

fn format_(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    args.expect_at_most(2, "format")?;
    let value = args.require(0, "value", "format")?;
    let spec = match args.arg(1, "format_spec") {
        Some(spec) => spec.to_display(),
        None => String::new(),
    };
    format::format_value(value, &spec).map(Value::from)
}

fn chr(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let code = int_arg(one(&args, "chr")?, "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| Fault::value_error("chr() arg not in range(0x110000)"))
}

fn ord(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let value = one(&args, "ord")?;
    let text = value.as_str().ok_or_else(|| {
        Fault::type_error(format!(
            "ord() expected string of length 1, but {} found",
            value.type_name()
        ))
    })?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
        _ => Err(Fault::type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn source_arg(args: &CallArgs, func: &str) -> ScriptResult<String> {
    args.expect_at_most(1, func)?;
    match args.require(0, "source", func)? {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Fault::type_error(format!(
            "{func}() arg 1 must be a string, not {}",
            other.type_name()
        ))),
    }
}

fn eval(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let src = source_arg(&args, "eval")?;
    interp.eval_source(&src)
}

fn exec(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let src = source_arg(&args, "exec")?;
    interp.exec_source(&src)?;
    Ok(Value::None)
}

fn import(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let name = args.require(0, "name", "__import__")?;
    let name = name
        .as_str()
        .ok_or_else(|| Fault::type_error("__import__() argument 1 must be str"))?
        .to_string();
    interp.import(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_builtins_remember_denied_names() {
        let builtins = Builtins::filtered(|name| name != "eval");
        assert!(!builtins.contains("eval"));
        assert!(builtins.contains("print"));
        assert!(builtins.is_denied("eval"));
        let fault = builtins.lookup("eval").unwrap_err();
        assert_eq!(fault.kind, FaultKind::PolicyViolation);
        assert_eq!(builtins.lookup("nope").unwrap_err().kind, FaultKind::Name);
    }

    #[test]
    fn test_full_table_has_exceptions_and_constants() {
        let builtins = Builtins::full();
        assert!(matches!(builtins.lookup("ValueError"), Ok(Value::Class(_))));
        assert!(matches!(builtins.lookup("True"), Ok(Value::Bool(true))));
        assert!(all_names().contains(&"__import__".to_string()));
    }

    #[test]
    fn test_parse_float_special_values() {
        assert_eq!(parse_float(" 2.5 "), Some(2.5));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("abc").is_none());
    }
}
