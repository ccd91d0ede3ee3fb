//! Importable modules: `math`, `time`, `json`, `re`, `sys` and `os`.
//!
//! Whether a script may import one of these is decided by the import guard
//! before [`load`] is ever called.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use super::fault::{Fault, FaultKind, ScriptResult};
use super::interp::{iterate, Interpreter};
use super::output::StreamKind;
use super::value::*;

/// Modules this interpreter can provide, by import name.
pub const AVAILABLE: &[&str] = &["json", "math", "os", "re", "sys", "time"];

pub fn load(name: &str) -> Option<Module> {
    Some(match name {
        "math" => math(),
        "time" => time(),
        "json" => json(),
        "re" => re(),
        "sys" => sys(),
        "os" => os(),
        _ => return None,
    })
}

fn number(args: &CallArgs, index: usize, name: &str, func: &str) -> ScriptResult<f64> {
    let value = args.require(index, name, func)?;
    value.as_float().ok_or_else(|| {
        Fault::type_error(format!("must be real number, not {}", value.type_name()))
    })
}

fn text_arg<'v>(args: &'v CallArgs, index: usize, name: &str, func: &str) -> ScriptResult<&'v str> {
    let value = args.require(index, name, func)?;
    value.as_str().ok_or_else(|| {
        Fault::type_error(format!(
            "{func}() argument '{name}' must be str, not {}",
            value.type_name()
        ))
    })
}

// -------------------------------------------------------------------------
// math
// -------------------------------------------------------------------------

fn math_domain() -> Fault {
    Fault::value_error("math domain error")
}

macro_rules! unary_math {
    ($name:ident, $label:literal, $body:expr) => {
        fn $name(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
            let x = number(&args, 0, "x", $label)?;
            let f: fn(f64) -> ScriptResult<Value> = $body;
            f(x)
        }
    };
}

unary_math!(math_sqrt, "sqrt", |x| if x < 0.0 { Err(math_domain()) } else { Ok(Value::Float(x.sqrt())) });
unary_math!(math_floor, "floor", |x| to_int(x.floor()));
unary_math!(math_ceil, "ceil", |x| to_int(x.ceil()));
unary_math!(math_trunc, "trunc", |x| to_int(x.trunc()));
unary_math!(math_fabs, "fabs", |x| Ok(Value::Float(x.abs())));
unary_math!(math_exp, "exp", |x| Ok(Value::Float(x.exp())));
unary_math!(math_log10, "log10", |x| if x <= 0.0 { Err(math_domain()) } else { Ok(Value::Float(x.log10())) });
unary_math!(math_sin, "sin", |x| Ok(Value::Float(x.sin())));
unary_math!(math_cos, "cos", |x| Ok(Value::Float(x.cos())));
unary_math!(math_tan, "tan", |x| Ok(Value::Float(x.tan())));
unary_math!(math_isnan, "isnan", |x| Ok(Value::Bool(x.is_nan())));
unary_math!(math_isinf, "isinf", |x| Ok(Value::Bool(x.is_infinite())));
unary_math!(math_radians, "radians", |x| Ok(Value::Float(x.to_radians())));
unary_math!(math_degrees, "degrees", |x| Ok(Value::Float(x.to_degrees())));

fn to_int(x: f64) -> ScriptResult<Value> {
    if x.is_nan() {
        return Err(Fault::value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() || x.abs() >= 9.2e18 {
        return Err(Fault::new(FaultKind::Overflow, "cannot convert float infinity to integer"));
    }
    Ok(Value::Int(x as i64))
}

fn math_log(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let x = number(&args, 0, "x", "log")?;
    if x <= 0.0 {
        return Err(math_domain());
    }
    match args.arg(1, "base") {
        Some(base) => {
            let base = base.as_float().ok_or_else(math_domain)?;
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

fn math_pow(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let x = number(&args, 0, "x", "pow")?;
    let y = number(&args, 1, "y", "pow")?;
    Ok(Value::Float(x.powf(y)))
}

fn math_atan2(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let y = number(&args, 0, "y", "atan2")?;
    let x = number(&args, 1, "x", "atan2")?;
    Ok(Value::Float(y.atan2(x)))
}

fn math_hypot(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let mut total = 0.0f64;
    for (i, _) in args.positional.iter().enumerate() {
        let v = number(&args, i, "x", "hypot")?;
        total += v * v;
    }
    Ok(Value::Float(total.sqrt()))
}

fn math_isclose(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let a = number(&args, 0, "a", "isclose")?;
    let b = number(&args, 1, "b", "isclose")?;
    let rel = args.keyword("rel_tol").and_then(Value::as_float).unwrap_or(1e-9);
    let abs = args.keyword("abs_tol").and_then(Value::as_float).unwrap_or(0.0);
    let close = a == b || (a - b).abs() <= (rel * a.abs().max(b.abs())).max(abs);
    Ok(Value::Bool(close))
}

fn math() -> Module {
    Module::new("math")
        .with("pi", Value::Float(std::f64::consts::PI))
        .with("e", Value::Float(std::f64::consts::E))
        .with("tau", Value::Float(std::f64::consts::TAU))
        .with("inf", Value::Float(f64::INFINITY))
        .with("nan", Value::Float(f64::NAN))
        .function("sqrt", math_sqrt)
        .function("floor", math_floor)
        .function("ceil", math_ceil)
        .function("trunc", math_trunc)
        .function("fabs", math_fabs)
        .function("exp", math_exp)
        .function("log", math_log)
        .function("log10", math_log10)
        .function("pow", math_pow)
        .function("sin", math_sin)
        .function("cos", math_cos)
        .function("tan", math_tan)
        .function("atan2", math_atan2)
        .function("hypot", math_hypot)
        .function("isclose", math_isclose)
        .function("isnan", math_isnan)
        .function("isinf", math_isinf)
        .function("radians", math_radians)
        .function("degrees", math_degrees)
}

// -------------------------------------------------------------------------
// time
// -------------------------------------------------------------------------

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Sleeps in short slices so a cancelled run stops within one slice.
fn time_sleep(interp: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let secs = number(&args, 0, "secs", "sleep")?;
    if secs.is_nan() || secs < 0.0 {
        return Err(Fault::value_error("sleep length must be non-negative"));
    }
    let mut remaining = Duration::try_from_secs_f64(secs)
        .map_err(|_| Fault::new(FaultKind::Overflow, "sleep length is too large"))?;
    while !remaining.is_zero() {
        interp.checkpoint()?;
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    interp.checkpoint()?;
    Ok(Value::None)
}

fn time_time(_: &mut Interpreter<'_>, _: CallArgs) -> ScriptResult<Value> {
    let now = chrono::Utc::now();
    Ok(Value::Float(now.timestamp_micros() as f64 / 1_000_000.0))
}

fn time_monotonic(interp: &mut Interpreter<'_>, _: CallArgs) -> ScriptResult<Value> {
    Ok(Value::Float(interp.elapsed().as_secs_f64()))
}

fn time_strftime(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let pattern = text_arg(&args, 0, "format", "strftime")?;
    let now = chrono::Local::now();
    let mut out = String::new();
    use std::fmt::Write;
    write!(out, "{}", now.format(pattern))
        .map_err(|_| Fault::value_error("Invalid format string"))?;
    Ok(Value::from(out))
}

fn time() -> Module {
    Module::new("time")
        .function("sleep", time_sleep)
        .function("time", time_time)
        .function("monotonic", time_monotonic)
        .function("perf_counter", time_monotonic)
        .function("strftime", time_strftime)
}

// -------------------------------------------------------------------------
// json
// -------------------------------------------------------------------------

fn dump_value(value: &Value, indent: Option<usize>, level: usize, out: &mut String) -> ScriptResult<()> {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match value {
        Value::None => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => out.push_str(&escape_json(s)),
        Value::List(_) | Value::Tuple(_) => {
            let items = iterate(value)?;
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                dump_value(item, indent, level + 1, out)?;
            }
            newline(out, level);
            out.push(']');
        }
        Value::Dict(dict) => {
            let entries = lock(dict).items().to_vec();
            if entries.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                let key = match key {
                    Value::Str(s) => s.to_string(),
                    Value::Int(_) | Value::Float(_) => key.to_display(),
                    Value::Bool(b) => b.to_string(),
                    Value::None => "null".to_string(),
                    other => {
                        return Err(Fault::type_error(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )))
                    }
                };
                out.push_str(&escape_json(&key));
                out.push_str(": ");
                dump_value(item, indent, level + 1, out)?;
            }
            newline(out, level);
            out.push('}');
        }
        other => {
            return Err(Fault::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn escape_json(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

const MAX_JSON_INDENT: i64 = 64;

fn json_dumps(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let value = args.require(0, "obj", "dumps")?;
    let indent = match args.keyword("indent") {
        None | Some(Value::None) => None,
        Some(v) => Some(v.as_int().unwrap_or(0).clamp(0, MAX_JSON_INDENT) as usize),
    };
    let mut out = String::new();
    dump_value(value, indent, 0, &mut out)?;
    Ok(Value::from(out))
}

fn json_loads(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let text = text_arg(&args, 0, "s", "loads")?;
    let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        Fault::new(FaultKind::Custom("JSONDecodeError".to_string()), e.to_string())
    })?;
    Ok(Value::from_json(&parsed))
}

fn json() -> Module {
    Module::new("json")
        .function("dumps", json_dumps)
        .function("loads", json_loads)
}

// -------------------------------------------------------------------------
// re
// -------------------------------------------------------------------------

fn compile(pattern: &str) -> ScriptResult<Regex> {
    Regex::new(pattern).map_err(|e| Fault::new(FaultKind::Custom("re.error".to_string()), e.to_string()))
}

fn to_match(caps: &regex::Captures<'_>) -> Value {
    let whole = caps.get(0);
    Value::Match(Arc::new(MatchValue {
        groups: caps.iter().map(|g| g.map(|m| m.as_str().to_string())).collect(),
        start: whole.map(|m| m.start()).unwrap_or(0),
        end: whole.map(|m| m.end()).unwrap_or(0),
    }))
}

/// Python replacement syntax (`\1`, `\g<name>`) to the regex crate's (`${1}`).
fn translate_replacement(repl: &str) -> String {
    let chars: Vec<char> = repl.chars().collect();
    let mut out = String::with_capacity(repl.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '$' => out.push_str("$$"),
            '\\' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                out.push_str("${");
                out.extend(&chars[start..end]);
                out.push('}');
                i = end;
                continue;
            }
            '\\' if chars.get(i + 1) == Some(&'g') && chars.get(i + 2) == Some(&'<') => {
                if let Some(close) = chars[i..].iter().position(|&c| c == '>') {
                    out.push_str("${");
                    out.extend(&chars[i + 3..i + close]);
                    out.push('}');
                    i += close + 1;
                    continue;
                }
                out.push('\\');
            }
            '\\' if chars.get(i + 1) == Some(&'n') => {
                out.push('\n');
                i += 2;
                continue;
            }
            '\\' if chars.get(i + 1) == Some(&'\\') => {
                out.push('\\');
                i += 2;
                continue;
            }
            c => out.push(c),
        }
        i += 1;
    }
    out
}

fn re_findall(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let regex = compile(text_arg(&args, 0, "pattern", "findall")?)?;
    let text = text_arg(&args, 1, "string", "findall")?;
    let groups = regex.captures_len() - 1;
    let found = regex
        .captures_iter(text)
        .map(|caps| {
            let group = |i: usize| Value::str(caps.get(i).map(|m| m.as_str()).unwrap_or(""));
            match groups {
                0 => group(0),
                1 => group(1),
                n => Value::tuple((1..=n).map(group).collect()),
            }
        })
        .collect();
    Ok(Value::list(found))
}

fn re_sub(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let regex = compile(text_arg(&args, 0, "pattern", "sub")?)?;
    let repl = translate_replacement(text_arg(&args, 1, "repl", "sub")?);
    let text = text_arg(&args, 2, "string", "sub")?;
    let count = args
        .arg(3, "count")
        .and_then(Value::as_int)
        .unwrap_or(0)
        .max(0) as usize;
    Ok(Value::from(regex.replacen(text, count, repl.as_str()).into_owned()))
}

fn re_split(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let regex = compile(text_arg(&args, 0, "pattern", "split")?)?;
    let text = text_arg(&args, 1, "string", "split")?;
    let limit = args.arg(2, "maxsplit").and_then(Value::as_int).unwrap_or(0);
    let parts: Vec<Value> = if limit > 0 {
        regex.splitn(text, limit as usize + 1).map(Value::str).collect()
    } else {
        regex.split(text).map(Value::str).collect()
    };
    Ok(Value::list(parts))
}

fn re_search(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let regex = compile(text_arg(&args, 0, "pattern", "search")?)?;
    let text = text_arg(&args, 1, "string", "search")?;
    Ok(regex.captures(text).map(|c| to_match(&c)).unwrap_or(Value::None))
}

fn re_match(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let pattern = text_arg(&args, 0, "pattern", "match")?;
    let regex = compile(&format!(r"\A(?:{pattern})"))?;
    let text = text_arg(&args, 1, "string", "match")?;
    Ok(regex.captures(text).map(|c| to_match(&c)).unwrap_or(Value::None))
}

fn re_fullmatch(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let pattern = text_arg(&args, 0, "pattern", "fullmatch")?;
    let regex = compile(&format!(r"\A(?:{pattern})\z"))?;
    let text = text_arg(&args, 1, "string", "fullmatch")?;
    Ok(regex.captures(text).map(|c| to_match(&c)).unwrap_or(Value::None))
}

fn re_escape(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    Ok(Value::from(regex::escape(text_arg(&args, 0, "pattern", "escape")?)))
}

fn re() -> Module {
    Module::new("re")
        .function("findall", re_findall)
        .function("sub", re_sub)
        .function("split", re_split)
        .function("search", re_search)
        .function("match", re_match)
        .function("fullmatch", re_fullmatch)
        .function("escape", re_escape)
}

// -------------------------------------------------------------------------
// sys / os
// -------------------------------------------------------------------------

fn sys() -> Module {
    Module::new("sys")
        .with("stdout", Value::Stream(StreamKind::Stdout))
        .with("stderr", Value::Stream(StreamKind::Stderr))
        .with("version", Value::str(concat!("codeact-script ", env!("CARGO_PKG_VERSION"))))
        .with("platform", Value::str(std::env::consts::OS))
        .with("argv", Value::list(vec![Value::str("<code>")]))
        .with("maxsize", Value::Int(i64::MAX))
}

fn os_error(err: std::io::Error, path: &str) -> Fault {
    Fault::new(FaultKind::Os, format!("{err}: '{path}'"))
}

fn os_getcwd(_: &mut Interpreter<'_>, _: CallArgs) -> ScriptResult<Value> {
    std::env::current_dir()
        .map(|p| Value::from(p.display().to_string()))
        .map_err(|e| os_error(e, "."))
}

fn os_getenv(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let key = text_arg(&args, 0, "key", "getenv")?;
    Ok(match std::env::var(key) {
        Ok(value) => Value::from(value),
        Err(_) => args.arg(1, "default").cloned().unwrap_or(Value::None),
    })
}

fn os_listdir(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = match args.arg(0, "path") {
        Some(Value::Str(p)) => p.to_string(),
        _ => ".".to_string(),
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&path).map_err(|e| os_error(e, &path))? {
        let entry = entry.map_err(|e| os_error(e, &path))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::from).collect()))
}

fn path_join(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let mut path = std::path::PathBuf::new();
    for (i, _) in args.positional.iter().enumerate() {
        path.push(text_arg(&args, i, "path", "join")?);
    }
    Ok(Value::from(path.display().to_string()))
}

fn path_exists(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = text_arg(&args, 0, "path", "exists")?;
    Ok(Value::Bool(std::path::Path::new(path).exists()))
}

fn path_isfile(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = text_arg(&args, 0, "path", "isfile")?;
    Ok(Value::Bool(std::path::Path::new(path).is_file()))
}

fn path_isdir(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = text_arg(&args, 0, "path", "isdir")?;
    Ok(Value::Bool(std::path::Path::new(path).is_dir()))
}

fn path_basename(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = text_arg(&args, 0, "path", "basename")?;
    Ok(Value::str(path.rsplit('/').next().unwrap_or("")))
}

fn path_dirname(_: &mut Interpreter<'_>, args: CallArgs) -> ScriptResult<Value> {
    let path = text_arg(&args, 0, "path", "dirname")?;
    Ok(Value::str(path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")))
}

fn os() -> Module {
    let path = Module::new("os.path")
        .function("join", path_join)
        .function("exists", path_exists)
        .function("isfile", path_isfile)
        .function("isdir", path_isdir)
        .function("basename", path_basename)
        .function("dirname", path_dirname);
    Module::new("os")
        .with("sep", Value::str(std::path::MAIN_SEPARATOR.to_string()))
        .with("name", Value::str(if cfg!(windows) { "nt" } else { "posix" }))
        .with("path", Value::Module(Arc::new(path)))
        .function("getcwd", os_getcwd)
        .function("getenv", os_getenv)
        .function("listdir", os_listdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_available_module_loads() {
        for name in AVAILABLE {
            assert!(load(name).is_some(), "{name} should load");
        }
        assert!(load("socket").is_none());
    }

    #[test]
    fn test_replacement_translation() {
        assert_eq!(translate_replacement(r"\1-\2"), "${1}-${2}");
        assert_eq!(translate_replacement(r"\g<word>!"), "${word}!");
        assert_eq!(translate_replacement("$5"), "$$5");
    }

    #[test]
    fn test_json_dump_keeps_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Value::str("z"), Value::Int(1));
        dict.insert(Value::str("a"), Value::list(vec![Value::Bool(true), Value::None]));
        let mut out = String::new();
        dump_value(&Value::dict(dict), None, 0, &mut out).unwrap();
        assert_eq!(out, r#"{"z": 1, "a": [true, null]}"#);
    }
}
