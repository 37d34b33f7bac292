//! Text formatting: the format-spec mini-language (`format()`, f-strings,
//! `str.format`) and printf-style `%` formatting.

use super::fault::{raise, ExcType, RuntimeResult};
use super::integer;
use super::interpreter::get_item;
use super::value::{float_repr, Value};

#[derive(Debug, Default, Clone, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid_spec<T>() -> RuntimeResult<T> {
    raise(ExcType::ValueError, "Invalid format specifier")
}

fn parse_spec(spec: &str) -> RuntimeResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = digits(&chars[start..i])?;
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return raise(ExcType::ValueError, "Format specifier missing precision");
        }
        out.precision = Some(digits(&chars[start..i])?);
    }
    match chars.len() - i {
        0 => {}
        1 => out.kind = Some(chars[i]),
        _ => return invalid_spec(),
    }
    Ok(out)
}

fn digits(chars: &[char]) -> RuntimeResult<usize> {
    let text: String = chars.iter().collect();
    match text.parse::<usize>() {
        Ok(n) if n <= 10_000 => Ok(n),
        _ => raise(ExcType::ValueError, "Too many decimal digits in format string"),
    }
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> RuntimeResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    match value {
        Value::Str(s) => format_str(s, &spec),
        Value::Bool(b) if spec.kind.is_none() => format_str(if *b { "True" } else { "False" }, &spec),
        Value::Int(_) | Value::Bool(_) | Value::BigInt(_) => match spec.kind {
            Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
                let f = match value {
                    Value::BigInt(big) => integer::to_f64(big)?,
                    other => other.as_int().unwrap_or_default() as f64,
                };
                format_float(f, &spec)
            }
            _ => format_int(value, &spec),
        },
        Value::Float(f) => format_float(*f, &spec),
        other => raise(
            ExcType::TypeError,
            format!(
                "unsupported format string passed to {}.__format__",
                other.type_name()
            ),
        ),
    }
}

fn format_str(s: &str, spec: &FormatSpec) -> RuntimeResult<String> {
    if !matches!(spec.kind, None | Some('s')) {
        return raise(
            ExcType::ValueError,
            format!(
                "Unknown format code '{}' for object of type 'str'",
                spec.kind.unwrap_or('s')
            ),
        );
    }
    if spec.sign.is_some() {
        return raise(ExcType::ValueError, "Sign not allowed in string format specifier");
    }
    let text: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad(String::new(), text, spec, '<'))
}

/// Formats an `int` or `bool` value.
fn format_int(value: &Value, spec: &FormatSpec) -> RuntimeResult<String> {
    if spec.precision.is_some() {
        return raise(
            ExcType::ValueError,
            "Precision not allowed in integer format specifier",
        );
    }
    let (body, prefix) = match spec.kind {
        None | Some('d') | Some('n') => (integer::magnitude_digits(value, 10), ""),
        Some('b') => (integer::magnitude_digits(value, 2), "0b"),
        Some('o') => (integer::magnitude_digits(value, 8), "0o"),
        Some('x') => (integer::magnitude_digits(value, 16), "0x"),
        Some('X') => (integer::magnitude_digits(value, 16).to_uppercase(), "0X"),
        Some('c') => {
            let c = value
                .as_int()
                .and_then(|i| u32::try_from(i).ok())
                .and_then(char::from_u32)
                .map_or_else(|| raise(ExcType::OverflowError, "%c arg not in range(0x110000)"), Ok)?;
            return Ok(pad(String::new(), c.to_string(), spec, '<'));
        }
        Some(other) => {
            return raise(
                ExcType::ValueError,
                format!("Unknown format code '{}' for object of type 'int'", other),
            )
        }
    };
    let body = match spec.grouping {
        Some(sep) => group_digits(&body, sep, if prefix.is_empty() { 3 } else { 4 }),
        None => body,
    };
    let mut sign = sign_prefix(integer::is_negative(value), spec);
    if spec.alternate {
        sign.push_str(prefix);
    }
    Ok(pad(sign, body, spec, '>'))
}

fn format_float(f: f64, spec: &FormatSpec) -> RuntimeResult<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let magnitude = f.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let mut body = if !magnitude.is_finite() {
        if magnitude.is_nan() { "nan" } else { "inf" }.to_string()
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => exponent_form(magnitude, spec.precision.unwrap_or(6)),
            Some('g' | 'G') => general_form(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None | Some('n') => match spec.precision {
                Some(p) => {
                    let text = general_form(magnitude, p, spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        text + ".0"
                    }
                }
                None => float_repr(magnitude),
            },
            Some(other) => {
                return raise(
                    ExcType::ValueError,
                    format!("Unknown format code '{}' for object of type 'float'", other),
                )
            }
        }
    };
    if upper {
        body = body.to_uppercase();
    }
    if let Some(sep) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        let (int_part, rest) = body.split_at(split);
        body = group_digits(int_part, sep, 3) + rest;
    }
    let sign = sign_prefix(negative, spec);
    Ok(pad(sign, body, spec, '>'))
}

/// `d.dddde+XX` with at least two exponent digits.
fn exponent_form(f: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, f);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    format!(
        "{}e{}{:02}",
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

fn general_form(f: f64, precision: usize, keep_zeros: bool) -> String {
    let p = precision.max(1);
    if f == 0.0 {
        return if keep_zeros {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let scientific = format!("{:.*e}", p - 1, f);
    let exponent: i32 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exponent >= -4 && exponent < p as i32 {
        let decimals = (p as i32 - 1 - exponent).max(0) as usize;
        let text = format!("{:.*}", decimals, f);
        if keep_zeros {
            text
        } else {
            strip_zeros(&text)
        }
    } else {
        let text = exponent_form(f, p - 1);
        if keep_zeros {
            return text;
        }
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, ""));
        format!("{}e{}", strip_zeros(mantissa), exp)
    }
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn sign_prefix(negative: bool, spec: &FormatSpec) -> String {
    if negative {
        "-".to_string()
    } else {
        match spec.sign {
            Some('+') => "+".to_string(),
            Some(' ') => " ".to_string(),
            _ => String::new(),
        }
    }
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(digits.len() + count / every);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn pad(sign: String, body: String, spec: &FormatSpec, default_align: char) -> String {
    let (fill, align) = if spec.zero && spec.align.is_none() && spec.fill.is_none() {
        ('0', if default_align == '<' { '<' } else { '=' })
    } else {
        (spec.fill.unwrap_or(' '), spec.align.unwrap_or(default_align))
    };
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return sign + &body;
    }
    let padding = spec.width - len;
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match align {
        '<' => sign + &body + &fill_str(padding),
        '^' => {
            let left = padding / 2;
            fill_str(left) + &sign + &body + &fill_str(padding - left)
        }
        '=' => sign + &fill_str(padding) + &body,
        _ => fill_str(padding) + &sign + &body,
    }
}

/// Applies an `!r` / `!s` / `!a` conversion, then the format spec.
pub fn format_field(value: &Value, conversion: Option<char>, spec: &str) -> RuntimeResult<String> {
    match conversion {
        Some('r') | Some('a') => format_value(&Value::from(value.repr()), spec),
        Some('s') => format_value(&Value::from(value.to_str()), spec),
        _ => format_value(value, spec),
    }
}

/// `template.format(*args, **kwargs)`.
pub fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> RuntimeResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0usize;
    let mut used_manual = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return raise(ExcType::ValueError, "Single '}' encountered in format string");
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }

        let start = i + 1;
        let mut depth = 1;
        let mut end = start;
        while end < chars.len() {
            match chars[end] {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            end += 1;
        }
        if end >= chars.len() {
            return raise(ExcType::ValueError, "Single '{' encountered in format string");
        }
        let field: String = chars[start..end].iter().collect();
        i = end + 1;

        let (head, spec) = match field.find(':') {
            Some(pos) => (&field[..pos], &field[pos + 1..]),
            None => (field.as_str(), ""),
        };
        let (name, conversion) = match head.find('!') {
            Some(pos) => {
                let conv = &head[pos + 1..];
                let mut conv_chars = conv.chars();
                match (conv_chars.next(), conv_chars.next()) {
                    (Some(c @ ('r' | 's' | 'a')), None) => (&head[..pos], Some(c)),
                    _ => {
                        return raise(
                            ExcType::ValueError,
                            "Unknown conversion specifier in format string",
                        )
                    }
                }
            }
            None => (head, None),
        };
        let (name, keys) = split_field_name(name)?;

        let mut value = if name.is_empty() {
            if used_manual {
                return raise(
                    ExcType::ValueError,
                    "cannot switch from manual field specification to automatic field numbering",
                );
            }
            let value = args.get(auto_index).cloned();
            auto_index += 1;
            value.map_or_else(
                || raise(ExcType::IndexError, "Replacement index out of range for positional args tuple"),
                Ok,
            )?
        } else if let Ok(index) = name.parse::<usize>() {
            if auto_index > 0 {
                return raise(
                    ExcType::ValueError,
                    "cannot switch from automatic field numbering to manual field specification",
                );
            }
            used_manual = true;
            args.get(index).cloned().map_or_else(
                || raise(ExcType::IndexError, "Replacement index out of range for positional args tuple"),
                Ok,
            )?
        } else {
            kwargs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .map_or_else(|| raise(ExcType::KeyError, format!("'{}'", name)), Ok)?
        };
        for key in keys {
            value = get_item(&value, &key)?;
        }

        let spec = if spec.contains('{') {
            str_format(spec, args, kwargs)?
        } else {
            spec.to_string()
        };
        out.push_str(&format_field(&value, conversion, &spec)?);
    }
    Ok(out)
}

/// Splits `name[0][key]` into the argument name and its item keys. Digit
/// keys index by integer, anything else is a string key. Attribute lookups
/// are refused.
fn split_field_name(field: &str) -> RuntimeResult<(&str, Vec<Value>)> {
    if field.contains('.') {
        return raise(
            ExcType::ValueError,
            "attribute lookups in format fields are not supported",
        );
    }
    let Some(open) = field.find('[') else {
        return Ok((field, Vec::new()));
    };
    let (name, mut rest) = field.split_at(open);
    let mut keys = Vec::new();
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return raise(ExcType::ValueError, "Missing ']' in format string");
        };
        let key = &inner[..close];
        if key.is_empty() {
            return raise(ExcType::ValueError, "Empty attribute in format string");
        }
        keys.push(match key.parse::<i64>() {
            Ok(index) if key.bytes().all(|b| b.is_ascii_digit()) => Value::Int(index),
            _ => Value::from(key),
        });
        rest = &inner[close + 1..];
    }
    if !rest.is_empty() {
        return raise(
            ExcType::ValueError,
            "Only '.' or '[' may follow ']' in format field specifier",
        );
    }
    Ok((name, keys))
}

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> RuntimeResult<String> {
    let (positional, mapping): (Vec<Value>, Option<&Value>) = match args {
        Value::Tuple(items) => (items.to_vec(), None),
        Value::Dict(_) => (vec![args.clone()], Some(args)),
        other => (vec![other.clone()], None),
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut next = 0usize;
    let mut used_mapping = false;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }

        let mut keyed: Option<Value> = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| p + i)
                .map_or_else(|| raise(ExcType::ValueError, "incomplete format key"), Ok)?;
            let key: String = chars[i + 1..close].iter().collect();
            let Some(Value::Dict(dict)) = mapping else {
                return raise(ExcType::TypeError, "format requires a mapping");
            };
            let found = dict
                .borrow()
                .get(&Value::from(key.as_str()).hash_key()?)
                .map(|(_, v)| v.clone());
            keyed = Some(found.map_or_else(|| raise(ExcType::KeyError, format!("'{}'", key)), Ok)?);
            used_mapping = true;
            i = close + 1;
        }

        let mut spec = FormatSpec::default();
        while let Some(&flag @ ('-' | '+' | ' ' | '#' | '0')) = chars.get(i) {
            match flag {
                '-' => spec.align = Some('<'),
                '+' | ' ' => {
                    if spec.sign != Some('+') {
                        spec.sign = Some(flag)
                    }
                }
                '#' => spec.alternate = true,
                _ => spec.zero = true,
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            spec.width = digits(&chars[start..i])?;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            spec.precision = Some(if i > start { digits(&chars[start..i])? } else { 0 });
        }
        if spec.align == Some('<') {
            spec.zero = false;
        }

        let Some(&conversion) = chars.get(i) else {
            return raise(ExcType::ValueError, "incomplete format");
        };
        i += 1;

        let value = match keyed {
            Some(v) => v,
            None => {
                let Some(v) = positional.get(next).cloned() else {
                    return raise(ExcType::TypeError, "not enough arguments for format string");
                };
                next += 1;
                v
            }
        };

        let text = match conversion {
            's' => {
                let s = value.to_str();
                let s = match spec.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                pad(String::new(), s, &FormatSpec { zero: false, ..spec.clone() }, '>')
            }
            'r' | 'a' => pad(String::new(), value.repr(), &FormatSpec { zero: false, ..spec.clone() }, '>'),
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                let number = match &value {
                    Value::Float(f) if f.is_finite() => integer::from_integral_f64(f.trunc()),
                    v @ (Value::Int(_) | Value::Bool(_) | Value::BigInt(_)) => v.clone(),
                    v => {
                        return raise(
                            ExcType::TypeError,
                            format!(
                                "%{} format: a real number is required, not {}",
                                conversion,
                                v.type_name()
                            ),
                        )
                    }
                };
                let kind = match conversion {
                    'x' | 'X' | 'o' => Some(conversion),
                    _ => None,
                };
                let mut int_spec = FormatSpec { kind, precision: None, ..spec.clone() };
                if let Some(p) = spec.precision {
                    int_spec.width = int_spec.width.max(p);
                    int_spec.zero = int_spec.zero || spec.width <= p;
                }
                format_int(&number, &int_spec)?
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                let Some(f) = value.as_float() else {
                    return raise(
                        ExcType::TypeError,
                        format!("must be real number, not {}", value.type_name()),
                    );
                };
                format_float(f, &FormatSpec { kind: Some(conversion), ..spec.clone() })?
            }
            'c' => match &value {
                Value::Str(s) if s.chars().count() == 1 => pad(String::new(), s.to_string(), &spec, '>'),
                v => match v.as_int() {
                    Some(_) => format_int(v, &FormatSpec { kind: Some('c'), align: Some(spec.align.unwrap_or('>')), ..spec.clone() })?,
                    None => return raise(ExcType::TypeError, "%c requires int or char"),
                },
            },
            other => {
                return raise(
                    ExcType::ValueError,
                    format!("unsupported format character '{}'", other),
                )
            }
        };
        out.push_str(&text);
    }

    if !used_mapping && next < positional.len() && mapping.is_none() {
        return raise(
            ExcType::TypeError,
            "not all arguments converted during string formatting",
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::DictEntries;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn test_float_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(1234567.891), ",.2f"), "1,234,567.89");
        assert_eq!(fmt(Value::Float(0.5), ".1%"), "50.0%");
        assert_eq!(fmt(Value::Float(12345.678), ".3e"), "1.235e+04");
        assert_eq!(fmt(Value::Float(0.0001234), "g"), "0.0001234");
        assert_eq!(fmt(Value::Float(1e20), "g"), "1e+20");
        assert_eq!(fmt(Value::Float(2.5), "08.3f"), "0002.500");
        assert_eq!(fmt(Value::Float(-2.5), "+.1f"), "-2.5");
    }

    #[test]
    fn test_int_specs() {
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(5), "03d"), "005");
        assert_eq!(fmt(Value::Int(-5), "05d"), "-0005");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(42), ">6"), "    42");
        assert_eq!(fmt(Value::Int(42), "*^6"), "**42**");
        assert!(format_value(&Value::Int(1), ".2d").is_err());

        let wide = Value::from("-100000000000000000000".parse::<num_bigint::BigInt>().unwrap());
        assert_eq!(fmt(wide.clone(), ","), "-100,000,000,000,000,000,000");
        assert_eq!(fmt(wide.clone(), "#x"), "-0x56bc75e2d63100000");
        assert_eq!(fmt(wide, ".1e"), "-1.0e+20");
    }

    #[test]
    fn test_str_specs() {
        assert_eq!(fmt(Value::from("ab"), "<5"), "ab   ");
        assert_eq!(fmt(Value::from("abcdef"), ".3"), "abc");
        assert_eq!(fmt(Value::from("x"), "-^5"), "--x--");
    }

    #[test]
    fn test_str_format() {
        let args = vec![Value::Int(1), Value::from("two")];
        let kwargs = vec![("name".to_string(), Value::Float(2.5))];
        assert_eq!(
            str_format("{} and {} and {name:.2f}", &args, &kwargs).unwrap(),
            "1 and two and 2.50"
        );
        assert_eq!(str_format("{1}{0}{{}}", &args, &[]).unwrap(), "two1{}");
        assert_eq!(str_format("{!r}", &args[1..], &[]).unwrap(), "'two'");
        assert!(str_format("{0.__class__}", &args, &[]).is_err());
        assert!(str_format("{5}", &args, &[]).is_err());
    }

    #[test]
    fn test_str_format_item_lookups() {
        let args = vec![Value::list(vec![Value::Int(5), Value::from("six")])];
        assert_eq!(str_format("{0[0]}", &args, &[]).unwrap(), "5");
        assert_eq!(str_format("{[1]!r:>7}", &args, &[]).unwrap(), "  'six'");

        let mut entries = DictEntries::new();
        let key = Value::from("k");
        entries.insert(key.hash_key().unwrap(), (key, Value::tuple(vec![Value::Int(7)])));
        let kwargs = vec![("d".to_string(), Value::dict(entries))];
        assert_eq!(str_format("{d[k][0]}", &[], &kwargs).unwrap(), "7");

        assert!(str_format("{0[5]}", &args, &[]).is_err());
        assert!(str_format("{0[0].real}", &args, &[]).is_err());
        assert!(str_format("{0[0]x}", &args, &[]).is_err());
        assert!(str_format("{0[]}", &args, &[]).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::from("x"), Value::Int(42), Value::Float(3.14159)]);
        assert_eq!(
            percent_format("%s=%d (%.2f)", &args).unwrap(),
            "x=42 (3.14)"
        );
        assert_eq!(percent_format("%5s|%-5s|", &Value::tuple(vec![Value::from("a"), Value::from("b")])).unwrap(), "    a|b    |");
        assert_eq!(percent_format("%03d%%", &Value::Int(7)).unwrap(), "007%");
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }
}
