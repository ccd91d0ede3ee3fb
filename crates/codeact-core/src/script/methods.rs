//! Methods on builtin values (`"a".upper()`, `xs.append(1)`, `d.get(k)`, ...).

use super::builtins::sort_values;
use super::fault::{Fault, FaultKind, ScriptResult};
use super::format;
use super::interp::{normalize_index, Interpreter, Limits};
use super::value::*;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "rsplit", "splitlines", "join",
    "replace", "startswith", "endswith", "find", "rfind", "index", "count", "format", "isdigit",
    "isnumeric", "isalpha", "isalnum", "isspace", "isupper", "islower", "title", "capitalize",
    "zfill", "center", "ljust", "rjust", "partition",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "update", "setdefault", "clear", "copy",
];
const STREAM_METHODS: &[&str] = &["write", "flush"];
const MATCH_METHODS: &[&str] = &["group", "groups", "start", "end", "span"];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Stream(_) => STREAM_METHODS,
        Value::Match(_) => MATCH_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> ScriptResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(items) => list_method(interp, items, name, args),
        Value::Tuple(items) => seq_method(items, name, &args, "tuple"),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        Value::Stream(kind) => match name {
            "write" => {
                let text = args.require(0, "s", "write")?;
                let text = text.as_str().ok_or_else(|| {
                    Fault::type_error(format!(
                        "write() argument must be str, not {}",
                        text.type_name()
                    ))
                })?;
                interp.output().write(*kind, text);
                Ok(Value::Int(text.chars().count() as i64))
            }
            _ => Ok(Value::None),
        },
        Value::Match(m) => match_method(m, name, &args),
        other => Err(no_attribute(other, name)),
    }
}

fn no_attribute(value: &Value, name: &str) -> Fault {
    Fault::new(
        FaultKind::Attribute,
        format!("'{}' object has no attribute '{name}'", value.type_name()),
    )
}

fn str_arg<'v>(args: &'v CallArgs, index: usize, name: &str, func: &str) -> ScriptResult<&'v str> {
    let value = args.require(index, name, func)?;
    value.as_str().ok_or_else(|| {
        Fault::type_error(format!(
            "{func}() argument must be str, not {}",
            value.type_name()
        ))
    })
}

fn opt_str<'v>(args: &'v CallArgs, index: usize, name: &str) -> Option<&'v str> {
    args.arg(index, name).and_then(Value::as_str)
}

fn opt_int(args: &CallArgs, index: usize, name: &str) -> ScriptResult<Option<i64>> {
    match args.arg(index, name) {
        None | Some(Value::None) => Ok(None),
        Some(v) => v
            .as_int()
            .map(Some)
            .ok_or_else(|| Fault::type_error(format!("'{}' object cannot be interpreted as an integer", v.type_name()))),
    }
}

fn strs(items: Vec<String>) -> Value {
    Value::list(items.into_iter().map(Value::from).collect())
}

fn pad_to(s: &str, width: usize, fill: char, align: char, limits: &Limits) -> ScriptResult<String> {
    let len = s.chars().count();
    if len >= width {
        return Ok(s.to_string());
    }
    limits.check_text(width.saturating_mul(fill.len_utf8()).saturating_add(s.len()))?;
    let padding = width - len;
    let fill_n = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{s}{}", fill_n(padding)),
        '>' => format!("{}{s}", fill_n(padding)),
        _ => format!("{}{s}{}", fill_n(padding / 2), fill_n(padding - padding / 2)),
    })
}

fn str_method(interp: &Interpreter<'_>, s: &str, name: &str, args: CallArgs) -> ScriptResult<Value> {
    let limits = interp.limits();
    let chars_arg = |args: &CallArgs| opt_str(args, 0, "chars").map(|c| c.chars().collect::<Vec<_>>());
    Ok(match name {
        "upper" => Value::from(s.to_uppercase()),
        "lower" => Value::from(s.to_lowercase()),
        "strip" => Value::str(match chars_arg(&args) {
            Some(set) => s.trim_matches(|c| set.contains(&c)),
            None => s.trim(),
        }),
        "lstrip" => Value::str(match chars_arg(&args) {
            Some(set) => s.trim_start_matches(|c| set.contains(&c)),
            None => s.trim_start(),
        }),
        "rstrip" => Value::str(match chars_arg(&args) {
            Some(set) => s.trim_end_matches(|c| set.contains(&c)),
            None => s.trim_end(),
        }),
        "split" | "rsplit" => {
            let sep = opt_str(&args, 0, "sep");
            let limit = opt_int(&args, 1, "maxsplit")?.filter(|n| *n >= 0).map(|n| n as usize);
            let parts: Vec<String> = match (sep, limit) {
                (Some(""), _) => return Err(Fault::value_error("empty separator")),
                (Some(sep), None) => s.split(sep).map(String::from).collect(),
                (Some(sep), Some(n)) if name == "split" => {
                    s.splitn(n + 1, sep).map(String::from).collect()
                }
                (Some(sep), Some(n)) => {
                    let mut parts: Vec<String> = s.rsplitn(n + 1, sep).map(String::from).collect();
                    parts.reverse();
                    parts
                }
                (None, None) => s.split_whitespace().map(String::from).collect(),
                (None, Some(n)) => {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = s.trim_start();
                    while !rest.is_empty() && parts.len() < n {
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    if !rest.is_empty() {
                        parts.push(rest.to_string());
                    }
                    parts
                }
            };
            strs(parts)
        }
        "splitlines" => strs(s.lines().map(String::from).collect()),
        "join" => {
            let items = interp.collect(args.require(0, "iterable", "join")?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(text) => parts.push(text.to_string()),
                    None => {
                        return Err(Fault::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            item.type_name()
                        )))
                    }
                }
            }
            let total = parts
                .iter()
                .map(String::len)
                .fold(s.len().saturating_mul(parts.len()), usize::saturating_add);
            limits.check_text(total)?;
            Value::from(parts.join(s))
        }
        "replace" => {
            let old = str_arg(&args, 0, "old", "replace")?;
            let new = str_arg(&args, 1, "new", "replace")?;
            let hits = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old).count() };
            limits.check_text(s.len().saturating_add(hits.saturating_mul(new.len())))?;
            match opt_int(&args, 2, "count")? {
                Some(n) if n >= 0 => Value::from(s.replacen(old, new, n as usize)),
                _ => Value::from(s.replace(old, new)),
            }
        }
        "startswith" | "endswith" => {
            let probe = args.require(0, "prefix", name)?;
            let candidates: Vec<String> = match probe {
                Value::Tuple(items) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                Value::Str(p) => vec![p.to_string()],
                other => {
                    return Err(Fault::type_error(format!(
                        "{name} first arg must be str or a tuple of str, not {}",
                        other.type_name()
                    )))
                }
            };
            Value::Bool(candidates.iter().any(|c| {
                if name == "startswith" {
                    s.starts_with(c.as_str())
                } else {
                    s.ends_with(c.as_str())
                }
            }))
        }
        "find" | "rfind" | "index" => {
            let needle = str_arg(&args, 0, "sub", name)?;
            let found = if name == "rfind" { s.rfind(needle) } else { s.find(needle) };
            match found {
                Some(byte) => Value::Int(s[..byte].chars().count() as i64),
                None if name == "index" => return Err(Fault::value_error("substring not found")),
                None => Value::Int(-1),
            }
        }
        "count" => {
            let needle = str_arg(&args, 0, "sub", "count")?;
            if needle.is_empty() {
                Value::Int(s.chars().count() as i64 + 1)
            } else {
                Value::Int(s.matches(needle).count() as i64)
            }
        }
        "format" => Value::from(format::format_template(s, &args.positional, &args.keywords)?),
        "isdigit" | "isnumeric" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)),
        "islower" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut boundary = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if boundary {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    boundary = false;
                } else {
                    out.push(c);
                    boundary = true;
                }
            }
            Value::from(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            Value::from(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "zfill" => {
            let width = opt_int(&args, 0, "width")?.unwrap_or(0).max(0) as usize;
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('-' | '+')) => (c.to_string(), &s[1..]),
                _ => (String::new(), s),
            };
            let len = s.chars().count();
            if len >= width {
                Value::str(s)
            } else {
                limits.check_text(width)?;
                Value::from(format!("{sign}{}{digits}", "0".repeat(width - len)))
            }
        }
        "center" | "ljust" | "rjust" => {
            let width = opt_int(&args, 0, "width")?.unwrap_or(0).max(0) as usize;
            let fill = opt_str(&args, 1, "fillchar")
                .and_then(|f| f.chars().next())
                .unwrap_or(' ');
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Value::from(pad_to(s, width, fill, align, limits)?)
        }
        "partition" => {
            let sep = str_arg(&args, 0, "sep", "partition")?;
            match s.split_once(sep) {
                Some((head, tail)) => Value::tuple(vec![Value::str(head), Value::str(sep), Value::str(tail)]),
                None => Value::tuple(vec![Value::str(s), Value::str(""), Value::str("")]),
            }
        }
        _ => return Err(no_attribute(&Value::str(s), name)),
    })
}

fn seq_method(items: &[Value], name: &str, args: &CallArgs, type_name: &str) -> ScriptResult<Value> {
    match name {
        "index" => {
            let needle = args.require(0, "value", "index")?;
            items
                .iter()
                .position(|v| v.equals(needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| Fault::value_error(format!("{type_name}.index(x): x not in {type_name}")))
        }
        "count" => {
            let needle = args.require(0, "value", "count")?;
            Ok(Value::Int(items.iter().filter(|v| v.equals(needle)).count() as i64))
        }
        _ => Err(Fault::new(
            FaultKind::Attribute,
            format!("'{type_name}' object has no attribute '{name}'"),
        )),
    }
}

fn list_method(
    interp: &mut Interpreter<'_>,
    items: &std::sync::Arc<std::sync::Mutex<Vec<Value>>>,
    name: &str,
    args: CallArgs,
) -> ScriptResult<Value> {
    match name {
        "append" => {
            let value = args.require(0, "object", "append")?.clone();
            let mut items = lock(items);
            interp.limits().check_items(items.len() + 1)?;
            items.push(value);
        }
        "extend" => {
            let extra = interp.collect(args.require(0, "iterable", "extend")?)?;
            let mut items = lock(items);
            interp.limits().check_items(items.len().saturating_add(extra.len()))?;
            items.extend(extra);
        }
        "pop" => {
            let mut items = lock(items);
            if items.is_empty() {
                return Err(Fault::new(FaultKind::Index, "pop from empty list"));
            }
            let index = opt_int(&args, 0, "index")?.unwrap_or(-1);
            let pos = normalize_index(index, items.len())
                .ok_or_else(|| Fault::new(FaultKind::Index, "pop index out of range"))?;
            return Ok(items.remove(pos));
        }
        "insert" => {
            let index = opt_int(&args, 0, "index")?.unwrap_or(0);
            let value = args.require(1, "object", "insert")?.clone();
            let mut items = lock(items);
            let len = items.len() as i64;
            let pos = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(pos as usize, value);
        }
        "remove" => {
            let needle = args.require(0, "value", "remove")?;
            let mut items = lock(items);
            let pos = items
                .iter()
                .position(|v| v.equals(needle))
                .ok_or_else(|| Fault::value_error("list.remove(x): x not in list"))?;
            items.remove(pos);
        }
        "index" | "count" => {
            let snapshot = lock(items).clone();
            return seq_method(&snapshot, name, &args, "list");
        }
        "sort" => {
            let snapshot = lock(items).clone();
            let reverse = args.keyword("reverse").map(Value::truthy).unwrap_or(false);
            let sorted = sort_values(interp, snapshot, args.keyword("key"), reverse)?;
            *lock(items) = sorted;
        }
        "reverse" => lock(items).reverse(),
        "clear" => lock(items).clear(),
        "copy" => return Ok(Value::list(lock(items).clone())),
        _ => return Err(no_attribute(&Value::List(items.clone()), name)),
    }
    Ok(Value::None)
}

fn dict_method(
    interp: &Interpreter<'_>,
    dict: &std::sync::Arc<std::sync::Mutex<Dict>>,
    name: &str,
    args: CallArgs,
) -> ScriptResult<Value> {
    Ok(match name {
        "get" => {
            let key = args.require(0, "key", "get")?;
            lock(dict)
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.arg(1, "default").cloned().unwrap_or(Value::None))
        }
        "keys" => Value::list(lock(dict).keys()),
        "values" => Value::list(lock(dict).values()),
        "items" => Value::list(
            lock(dict)
                .items()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        "pop" => {
            let key = args.require(0, "key", "pop")?;
            match (lock(dict).remove(key), args.get(1)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(Fault::new(FaultKind::Key, key.repr())),
            }
        }
        "update" => {
            let mut updates: Vec<(Value, Value)> = match args.get(0) {
                Some(Value::Dict(other)) => lock(other).items().to_vec(),
                Some(pairs) => interp
                    .collect(pairs)?
                    .iter()
                    .map(|pair| match interp.collect(pair)?.as_slice() {
                        [k, v] => Ok((k.clone(), v.clone())),
                        _ => Err(Fault::value_error("dictionary update sequence element has wrong length")),
                    })
                    .collect::<ScriptResult<_>>()?,
                None => Vec::new(),
            };
            updates.extend(args.keywords.iter().map(|(k, v)| (Value::str(k), v.clone())));
            let mut dict = lock(dict);
            for (k, v) in updates {
                dict.insert(k, v);
            }
            Value::None
        }
        "setdefault" => {
            let key = args.require(0, "key", "setdefault")?.clone();
            let default = args.arg(1, "default").cloned().unwrap_or(Value::None);
            let mut dict = lock(dict);
            match dict.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    dict.insert(key, default.clone());
                    default
                }
            }
        }
        "clear" => {
            lock(dict).clear();
            Value::None
        }
        "copy" => Value::dict(lock(dict).clone()),
        _ => return Err(no_attribute(&Value::Dict(dict.clone()), name)),
    })
}

fn match_method(m: &MatchValue, name: &str, args: &CallArgs) -> ScriptResult<Value> {
    let group = |index: usize| -> ScriptResult<Value> {
        m.groups
            .get(index)
            .map(|g| g.as_deref().map(Value::str).unwrap_or(Value::None))
            .ok_or_else(|| Fault::new(FaultKind::Index, "no such group"))
    };
    match name {
        "group" => {
            if args.len() > 1 {
                let picked = args
                    .positional
                    .iter()
                    .map(|v| group(v.as_int().unwrap_or(-1).max(0) as usize))
                    .collect::<ScriptResult<Vec<_>>>()?;
                return Ok(Value::tuple(picked));
            }
            let index = opt_int(args, 0, "group")?.unwrap_or(0);
            group(usize::try_from(index).map_err(|_| Fault::new(FaultKind::Index, "no such group"))?)
        }
        "groups" => Ok(Value::tuple(
            (1..m.groups.len()).map(group).collect::<ScriptResult<Vec<_>>>()?,
        )),
        "start" => Ok(Value::Int(m.start as i64)),
        "end" => Ok(Value::Int(m.end as i64)),
        "span" => Ok(Value::tuple(vec![
            Value::Int(m.start as i64),
            Value::Int(m.end as i64),
        ])),
        _ => Err(no_attribute(&Value::Match(std::sync::Arc::new(m.clone())), name)),
    }
}
