//! String formatting: format specs, `str.format` and the `%` operator.

use super::fault::{Fault, FaultKind, ScriptResult};
use super::value::{format_float, lock, Value};

/// Widest field or precision a spec may request.
const MAX_FIELD_WIDTH: usize = 1 << 24;

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        out.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '#' {
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        if out.fill.is_none() {
            out.fill = Some('0');
            out.align.get_or_insert('=');
        }
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = field_size(&chars[start..i])?;
    }
    if i < chars.len() && matches!(chars[i], ',' | '_') {
        out.grouping = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(Fault::value_error("Format specifier missing precision"));
        }
        out.precision = Some(field_size(&chars[start..i])?);
    }
    if i < chars.len() {
        out.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(Fault::value_error("Invalid format specifier"));
    }
    Ok(out)
}

fn field_size(digits: &[char]) -> ScriptResult<usize> {
    digits
        .iter()
        .collect::<String>()
        .parse::<usize>()
        .ok()
        .filter(|n| *n <= MAX_FIELD_WIDTH)
        .ok_or_else(|| Fault::new(FaultKind::Memory, "format field width too large"))
}

/// Apply a format spec (`.2f`, `>10`, `,d`, ...) to a value.
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let spec = parse_spec(spec)?;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let body = match spec.kind {
        Some('s') | None if !numeric => {
            if spec.sign.is_some() {
                return Err(Fault::value_error("Sign not allowed in string format specifier"));
            }
            let text = value.to_display();
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        Some('s') => {
            return Err(Fault::value_error(format!(
                "Unknown format code 's' for object of type '{}'",
                value.type_name()
            )))
        }
        kind => format_number(value, &spec, kind)?,
    };
    let default_align = if numeric { '>' } else { '<' };
    Ok(pad(&body, &spec, default_align))
}

fn format_number(value: &Value, spec: &Spec, kind: Option<char>) -> ScriptResult<String> {
    let unknown = || {
        Fault::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            kind.unwrap_or(' '),
            value.type_name()
        ))
    };
    let (negative, digits) = match kind {
        Some('d') | Some('x') | Some('X') | Some('o') | Some('b') => {
            let i = match value {
                Value::Int(i) => *i,
                Value::Bool(b) => i64::from(*b),
                _ => return Err(unknown()),
            };
            let magnitude = i.unsigned_abs();
            let digits = match kind {
                Some('x') => format!("{magnitude:x}"),
                Some('X') => format!("{magnitude:X}"),
                Some('o') => format!("{magnitude:o}"),
                Some('b') => format!("{magnitude:b}"),
                _ => group(&magnitude.to_string(), spec.grouping),
            };
            (i < 0, digits)
        }
        Some('f') | Some('F') | Some('%') | Some('e') | Some('E') | Some('g') | Some('G') | None => {
            let f = value.as_float().ok_or_else(unknown)?;
            let (f, suffix) = if kind == Some('%') {
                (f * 100.0, "%")
            } else {
                (f, "")
            };
            let negative = f.is_sign_negative() && f != 0.0;
            let f = f.abs();
            let body = match kind {
                Some('f') | Some('F') | Some('%') => {
                    fixed(f, spec.precision.unwrap_or(6), spec.grouping)
                }
                Some('e') | Some('E') => {
                    let text = exponent(f, spec.precision.unwrap_or(6));
                    if kind == Some('E') {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
                Some('g') | Some('G') => general(f, spec.precision.unwrap_or(6)),
                _ => match (value, spec.precision) {
                    (Value::Int(i), _) => group(&i.unsigned_abs().to_string(), spec.grouping),
                    (Value::Bool(b), _) => i64::from(*b).to_string(),
                    (_, Some(p)) => general(f, p.max(1)),
                    (_, None) => {
                        let text = format_float(f);
                        match spec.grouping {
                            Some(sep) => match text.split_once('.') {
                                Some((int, frac)) => format!("{}.{frac}", group(int, Some(sep))),
                                None => text,
                            },
                            None => text,
                        }
                    }
                },
            };
            (negative, format!("{body}{suffix}"))
        }
        _ => return Err(unknown()),
    };
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    Ok(format!("{sign}{digits}"))
}

fn fixed(f: f64, precision: usize, grouping: Option<char>) -> String {
    let text = format!("{f:.precision$}");
    match (grouping, text.split_once('.')) {
        (Some(sep), Some((int, frac))) => format!("{}.{frac}", group(int, Some(sep))),
        (Some(sep), None) => group(&text, Some(sep)),
        _ => text,
    }
}

/// `1.5e3` in the `1.500000e+03` shape.
fn exponent(f: f64, precision: usize) -> String {
    let text = format!("{f:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

fn general(f: f64, precision: usize) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if !f.is_finite() {
        return format_float(f);
    }
    let precision = precision.max(1);
    let exp = f.log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let text = exponent(f, precision - 1);
        match text.split_once('e') {
            Some((mantissa, rest)) => format!("{}e{rest}", trim_zeros(mantissa)),
            None => text,
        }
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{f:.decimals$}")).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn pad(body: &str, spec: &Spec, default_align: char) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body.to_string();
    }
    let fill = spec.fill.unwrap_or(' ');
    let padding = spec.width - len;
    let repeat = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{body}{}", repeat(padding)),
        '^' => format!("{}{body}{}", repeat(padding / 2), repeat(padding - padding / 2)),
        '=' => {
            let (sign, rest) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (c.to_string(), &body[1..]),
                _ => (String::new(), body),
            };
            format!("{sign}{}{rest}", repeat(padding))
        }
        _ => format!("{}{body}", repeat(padding)),
    }
}

/// `template.format(*args, **kwargs)`.
pub fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> ScriptResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => return Err(Fault::value_error("Single '}' encountered in format string")),
            '{' => {
                let close = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| i + p)
                    .ok_or_else(|| Fault::value_error("Single '{' encountered in format string"))?;
                let field: String = chars[i + 1..close].iter().collect();
                let (head, spec) = match field.split_once(':') {
                    Some((head, spec)) => (head.to_string(), spec.to_string()),
                    None => (field.clone(), String::new()),
                };
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conv)) => (name.to_string(), conv.chars().next()),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let value = args.get(auto_index).cloned().ok_or_else(|| {
                        Fault::new(
                            super::fault::FaultKind::Index,
                            format!("Replacement index {auto_index} out of range for positional args tuple"),
                        )
                    })?;
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index).cloned().ok_or_else(|| {
                        Fault::new(
                            super::fault::FaultKind::Index,
                            format!("Replacement index {index} out of range for positional args tuple"),
                        )
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            Fault::new(super::fault::FaultKind::Key, format!("'{name}'"))
                        })?
                };
                let value = match conversion {
                    Some('r') => Value::str(value.repr()),
                    Some('s') => Value::str(value.to_display()),
                    _ => value,
                };
                out.push_str(&format_value(&value, &spec)?);
                i = close + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// `template % args`, printf-style.
pub fn percent_format(template: &str, args: &Value) -> ScriptResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(dict) => Some(lock(dict).clone()),
        _ => None,
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut next = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut value = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| i + p)
                .ok_or_else(|| Fault::value_error("incomplete format key"))?;
            let key: String = chars[i + 1..close].iter().collect();
            let dict = mapping
                .as_ref()
                .ok_or_else(|| Fault::type_error("format requires a mapping"))?;
            value = Some(
                dict.get(&Value::str(&key))
                    .cloned()
                    .ok_or_else(|| Fault::new(super::fault::FaultKind::Key, format!("'{key}'")))?,
            );
            i = close + 1;
        }
        let mut flags = String::new();
        while i < chars.len() && matches!(chars[i], '-' | '+' | ' ' | '0' | '#') {
            flags.push(chars[i]);
            i += 1;
        }
        let mut width = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            width.push(chars[i]);
            i += 1;
        }
        let mut precision = None;
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut digits = String::new();
            while i < chars.len() && chars[i].is_ascii_digit() {
                digits.push(chars[i]);
                i += 1;
            }
            precision = Some(digits);
        }
        let conversion = *chars
            .get(i)
            .ok_or_else(|| Fault::value_error("incomplete format"))?;
        i += 1;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = match value {
            Some(v) => v,
            None => {
                let v = positional
                    .get(next)
                    .cloned()
                    .ok_or_else(|| Fault::type_error("not enough arguments for format string"))?;
                next += 1;
                v
            }
        };
        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        let text = match conversion {
            's' => format_value(&Value::str(value.to_display()), &spec)?,
            'r' | 'a' => format_value(&Value::str(value.repr()), &spec)?,
            'd' | 'i' | 'u' => {
                let int = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    other => other.clone(),
                };
                spec.push('d');
                format_value(&int, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                spec.push('.');
                spec.push_str(precision.as_deref().filter(|p| !p.is_empty()).unwrap_or("6"));
                spec.push(conversion);
                let float = Value::Float(value.as_float().ok_or_else(|| {
                    Fault::type_error(format!("must be real number, not {}", value.type_name()))
                })?);
                format_value(&float, &spec)?
            }
            'x' | 'X' | 'o' => {
                spec.push(conversion);
                format_value(&value, &spec)?
            }
            other => {
                return Err(Fault::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };
        out.push_str(&text);
    }
    if mapping.is_none() && next < positional.len() {
        return Err(Fault::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_spec_variants() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::Int(-7), "05d").unwrap(), "-0007");
        assert_eq!(format_value(&Value::Float(1500.0), ".2e").unwrap(), "1.50e+03");
    }

    #[test]
    fn test_unknown_code_is_value_error() {
        let err = format_value(&Value::str("x"), "d").unwrap_err();
        assert_eq!(err.kind, super::super::fault::FaultKind::Value);
    }

    #[test]
    fn test_template_fields() {
        let text = format_template(
            "{} + {name} = {0:.1f} {{ok}}",
            &[Value::Float(1.0)],
            &[("name".to_string(), Value::str("x"))],
        )
        .unwrap();
        assert_eq!(text, "1.0 + x = 1.0 {ok}");
    }

    #[test]
    fn test_percent_operator() {
        let args = Value::tuple(vec![Value::str("tap"), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(
            percent_format("%s x%d (%.2f) 100%%", &args).unwrap(),
            "tap x3 (0.50) 100%"
        );
        assert!(percent_format("%s %s", &Value::str("one")).is_err());
    }
}
