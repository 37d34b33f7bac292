//! Native methods of the builtin types.

use std::rc::Rc;

use super::builtins::{collect_pairs, int_arg, set_entries, str_arg};
use super::fault::{raise, ExcType, Exception, RuntimeResult, Unwind};
use super::format;
use super::interpreter::Interpreter;
use super::ops::check_len;
use super::value::{Args, Dict, List, Set, SetEntries, StreamKind, Value};

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalnum",
    "isalpha", "isdecimal", "isdigit", "islower", "isnumeric", "isspace", "isupper", "join",
    "ljust", "lower", "lstrip", "partition", "removeprefix", "removesuffix", "replace",
    "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip", "split", "splitlines",
    "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "isdisjoint", "issubset",
    "issuperset", "pop", "remove", "symmetric_difference", "union", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];
const INT_METHODS: &[&str] = &["bit_length"];
const FLOAT_METHODS: &[&str] = &["is_integer"];
const STREAM_METHODS: &[&str] = &["flush", "write"];

/// Resolves `receiver.name` to a native method name, if the type has one.
pub fn lookup(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Int(_) | Value::Bool(_) | Value::BigInt(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Stream(_) => STREAM_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|m| *m == name)
}

pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> RuntimeResult<Value> {
    interp.tick()?;
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(list) => list_method(interp, list, name, args),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        Value::Set(set) => set_method(interp, set, name, args),
        Value::Tuple(items) => sequence_query(name, "tuple", items, args),
        Value::BigInt(big) => {
            args.expect(name, 0, 0)?;
            Ok(Value::Int(big.bits() as i64))
        }
        Value::Int(_) | Value::Bool(_) => {
            args.expect(name, 0, 0)?;
            let i = receiver.as_int().unwrap_or_default();
            Ok(Value::Int((64 - i.unsigned_abs().leading_zeros()) as i64))
        }
        Value::Float(f) => {
            args.expect(name, 0, 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Stream(kind) => stream_method(interp, *kind, name, args),
        other => raise(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        ),
    }
}

// ----------------------------------------------------------------------
// str
// ----------------------------------------------------------------------

fn optional_str<'a>(value: Option<&'a Value>, function: &str) -> RuntimeResult<Option<&'a str>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => str_arg(v, function).map(Some),
    }
}

/// Byte bounds and char offset of `s[start:end]` in character indices, or
/// `None` when the window starts past the end.
fn char_window(s: &str, start: Option<&Value>, end: Option<&Value>) -> RuntimeResult<Option<(usize, usize, usize)>> {
    let n = s.chars().count() as i64;
    let clamp = |value: Option<&Value>, default: i64| -> RuntimeResult<i64> {
        match value {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let mut i = int_arg(v, "")?;
                if i < 0 {
                    i = (i + n).max(0);
                }
                Ok(i)
            }
        }
    };
    let (start, end) = (clamp(start, 0)?, clamp(end, n)?.min(n));
    if start > n || start > end {
        return Ok(None);
    }
    let byte = |k: i64| s.char_indices().nth(k as usize).map(|(b, _)| b).unwrap_or(s.len());
    Ok(Some((byte(start), byte(end), start as usize)))
}

fn find_in(s: &str, args: &[Value], function: &str, reverse: bool) -> RuntimeResult<Option<usize>> {
    let needle = str_arg(&args[0], function)?;
    let Some((lo, hi, offset)) = char_window(s, args.get(1), args.get(2))? else {
        return Ok(None);
    };
    let hay = &s[lo..hi];
    let found = if reverse { hay.rfind(needle) } else { hay.find(needle) };
    Ok(found.map(|b| offset + hay[..b].chars().count()))
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                out.push(Value::from(&rest[..i]));
                rest = rest[i..].trim_start();
            }
            None => {
                out.push(Value::from(rest));
                break;
            }
        }
    }
    out
}

fn rsplit_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::from(rest));
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let width = rest[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push(Value::from(&rest[i + width..]));
                rest = rest[..i].trim_end();
            }
            None => {
                out.push(Value::from(rest));
                break;
            }
        }
    }
    out.reverse();
    out
}

fn split_lines(s: &str, keepends: bool) -> Vec<Value> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\n' || c == '\r' {
            let mut end = i + 1;
            if c == '\r' && matches!(chars.peek(), Some((_, '\n'))) {
                chars.next();
                end += 1;
            }
            out.push(Value::from(&s[start..if keepends { end } else { i }]));
            start = end;
        }
    }
    if start < s.len() {
        out.push(Value::from(&s[start..]));
    }
    out
}

fn pad(s: &str, width: i64, fill: char, left_share: impl Fn(usize) -> usize, max: usize) -> RuntimeResult<Value> {
    let len = s.chars().count();
    let width = width.max(0) as usize;
    if width <= len {
        return Ok(Value::from(s));
    }
    check_len(width, max)?;
    let total = width - len;
    let left = left_share(total);
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(s);
    out.extend(std::iter::repeat(fill).take(total - left));
    Ok(Value::from(out))
}

fn fill_char(value: Option<&Value>, function: &str) -> RuntimeResult<char> {
    match value {
        None => Ok(' '),
        Some(v) => {
            let text = str_arg(v, function)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => raise(
                    ExcType::TypeError,
                    "The fill character must be exactly one character long",
                ),
            }
        }
    }
}

fn affix_match(s: &str, affix: &Value, function: &str, suffix: bool) -> RuntimeResult<bool> {
    let test = |candidate: &str| if suffix { s.ends_with(candidate) } else { s.starts_with(candidate) };
    match affix {
        Value::Str(candidate) => Ok(test(candidate)),
        Value::Tuple(candidates) => {
            for candidate in candidates.iter() {
                if test(str_arg(candidate, function)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => raise(
            ExcType::TypeError,
            format!(
                "{} first arg must be str or a tuple of str, not {}",
                function,
                other.type_name()
            ),
        ),
    }
}

fn str_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, mut args: Args) -> RuntimeResult<Value> {
    let max = interp.max_sequence_len();
    match name {
        "upper" | "lower" | "capitalize" | "title" | "swapcase" => {
            args.expect(name, 0, 0)?;
            Ok(Value::from(match name {
                "upper" => s.to_uppercase(),
                "lower" => s.to_lowercase(),
                "capitalize" => {
                    let mut chars = s.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                        None => String::new(),
                    }
                }
                "title" => {
                    let mut out = String::with_capacity(s.len());
                    let mut previous_cased = false;
                    for c in s.chars() {
                        if c.is_alphabetic() {
                            if previous_cased {
                                out.extend(c.to_lowercase());
                            } else {
                                out.extend(c.to_uppercase());
                            }
                            previous_cased = true;
                        } else {
                            out.push(c);
                            previous_cased = false;
                        }
                    }
                    out
                }
                _ => s
                    .chars()
                    .flat_map(|c| {
                        let swapped: Vec<char> = if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        };
                        swapped
                    })
                    .collect(),
            }))
        }
        "strip" | "lstrip" | "rstrip" => {
            let args = args.expect(name, 0, 1)?;
            let chars = optional_str(args.first(), name)?;
            let matcher = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Ok(Value::from(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            }))
        }
        "split" | "rsplit" => {
            let keyword_sep = args.take_keyword("sep");
            let keyword_max = args.take_keyword("maxsplit");
            let mut positional = args.expect(name, 0, 2)?.into_iter();
            let sep = keyword_sep.or_else(|| positional.next());
            let maxsplit = match keyword_max.or_else(|| positional.next()) {
                Some(m) => int_arg(&m, "")?,
                None => -1,
            };
            let parts = match optional_str(sep.as_ref(), name)? {
                None if name == "split" => split_whitespace(s, maxsplit),
                None => rsplit_whitespace(s, maxsplit),
                Some("") => return raise(ExcType::ValueError, "empty separator"),
                Some(sep) => {
                    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
                    if name == "split" {
                        s.splitn(limit, sep).map(Value::from).collect()
                    } else {
                        let mut parts: Vec<Value> = s.rsplitn(limit, sep).map(Value::from).collect();
                        parts.reverse();
                        parts
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            let keyword = args.take_keyword("keepends");
            let args = args.expect(name, 0, 1)?;
            let keepends = keyword.or_else(|| args.first().cloned()).map(|v| v.is_truthy()).unwrap_or(false);
            Ok(Value::list(split_lines(s, keepends)))
        }
        "join" => {
            let args = args.expect(name, 1, 1)?;
            let mut out = String::new();
            let mut iter = interp.iterate(&args[0])?;
            let mut index = 0;
            while let Some(item) = iter.next_item(interp)? {
                interp.tick()?;
                let Value::Str(part) = &item else {
                    return raise(
                        ExcType::TypeError,
                        format!(
                            "sequence item {}: expected str instance, {} found",
                            index,
                            item.type_name()
                        ),
                    );
                };
                if index > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
                check_len(out.len(), max)?;
                index += 1;
            }
            Ok(Value::from(out))
        }
        "replace" => {
            let args = args.expect(name, 2, 3)?;
            let old = str_arg(&args[0], name)?;
            let new = str_arg(&args[1], name)?;
            let count = match args.get(2) {
                Some(c) => int_arg(c, "")?,
                None => -1,
            };
            let available = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old).count() };
            let replaced = if count < 0 { available } else { available.min(count as usize) };
            let grown = s.len() + replaced.saturating_mul(new.len());
            check_len(grown.saturating_sub(replaced * old.len()), max)?;
            Ok(Value::from(s.replacen(old, new, replaced)))
        }
        "find" | "rfind" => {
            let args = args.expect(name, 1, 3)?;
            let found = find_in(s, &args, name, name == "rfind")?;
            Ok(Value::Int(found.map(|i| i as i64).unwrap_or(-1)))
        }
        "index" | "rindex" => {
            let args = args.expect(name, 1, 3)?;
            match find_in(s, &args, name, name == "rindex")? {
                Some(i) => Ok(Value::Int(i as i64)),
                None => raise(ExcType::ValueError, "substring not found"),
            }
        }
        "count" => {
            let args = args.expect(name, 1, 3)?;
            let needle = str_arg(&args[0], name)?;
            let Some((lo, hi, _)) = char_window(s, args.get(1), args.get(2))? else {
                return Ok(Value::Int(0));
            };
            let hay = &s[lo..hi];
            let count = if needle.is_empty() { hay.chars().count() + 1 } else { hay.matches(needle).count() };
            Ok(Value::Int(count as i64))
        }
        "startswith" | "endswith" => {
            let args = args.expect(name, 1, 3)?;
            let Some((lo, hi, _)) = char_window(s, args.get(1), args.get(2))? else {
                return Ok(Value::Bool(false));
            };
            affix_match(&s[lo..hi], &args[0], name, name == "endswith").map(Value::Bool)
        }
        "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
            args.expect(name, 0, 0)?;
            let predicate: fn(char) -> bool = match name {
                "isdigit" | "isdecimal" => |c| c.is_ascii_digit(),
                "isnumeric" => char::is_numeric,
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(predicate)))
        }
        "isupper" | "islower" => {
            args.expect(name, 0, 0)?;
            let (wanted, unwanted): (fn(char) -> bool, fn(char) -> bool) = if name == "isupper" {
                (char::is_uppercase, char::is_lowercase)
            } else {
                (char::is_lowercase, char::is_uppercase)
            };
            Ok(Value::Bool(s.chars().any(wanted) && !s.chars().any(unwanted)))
        }
        "center" | "ljust" | "rjust" => {
            let args = args.expect(name, 1, 2)?;
            let width = int_arg(&args[0], "")?;
            let fill = fill_char(args.get(1), name)?;
            match name {
                "center" => pad(s, width, fill, |total| total / 2 + (total & width as usize & 1), max),
                "ljust" => pad(s, width, fill, |_| 0, max),
                _ => pad(s, width, fill, |total| total, max),
            }
        }
        "zfill" => {
            let args = args.expect(name, 1, 1)?;
            let width = int_arg(&args[0], "")?.max(0) as usize;
            let len = s.chars().count();
            if width <= len {
                return Ok(Value::Str(s.clone()));
            }
            check_len(width, max)?;
            let (sign, digits) = match s.as_bytes().first() {
                Some(b'+') | Some(b'-') => s.split_at(1),
                _ => ("", &s[..]),
            };
            Ok(Value::from(format!("{}{}{}", sign, "0".repeat(width - len), digits)))
        }
        "format" => {
            let Args { positional, keywords } = args;
            Ok(Value::from(format::str_format(s, &positional, &keywords)?))
        }
        "partition" | "rpartition" => {
            let args = args.expect(name, 1, 1)?;
            let sep = str_arg(&args[0], name)?;
            if sep.is_empty() {
                return raise(ExcType::ValueError, "empty separator");
            }
            let found = if name == "partition" { s.find(sep) } else { s.rfind(sep) };
            let parts = match found {
                Some(i) => [&s[..i], sep, &s[i + sep.len()..]],
                None if name == "partition" => [&s[..], "", ""],
                None => ["", "", &s[..]],
            };
            Ok(Value::tuple(parts.into_iter().map(Value::from).collect()))
        }
        "removeprefix" | "removesuffix" => {
            let args = args.expect(name, 1, 1)?;
            let affix = str_arg(&args[0], name)?;
            let stripped = if name == "removeprefix" { s.strip_prefix(affix) } else { s.strip_suffix(affix) };
            Ok(match stripped {
                Some(rest) => Value::from(rest),
                None => Value::Str(s.clone()),
            })
        }
        _ => no_attribute("str", name),
    }
}

fn no_attribute<T>(type_name: &str, name: &str) -> RuntimeResult<T> {
    raise(
        ExcType::AttributeError,
        format!("'{}' object has no attribute '{}'", type_name, name),
    )
}

// ----------------------------------------------------------------------
// list and tuple
// ----------------------------------------------------------------------

fn position(items: &[Value], needle: &Value, start: Option<&Value>, end: Option<&Value>) -> RuntimeResult<Option<usize>> {
    let n = items.len() as i64;
    let bound = |value: Option<&Value>, default: i64| -> RuntimeResult<usize> {
        match value {
            None => Ok(default as usize),
            Some(v) => {
                let i = int_arg(v, "")?;
                Ok(if i < 0 { (i + n).max(0) } else { i.min(n) } as usize)
            }
        }
    };
    let (start, end) = (bound(start, 0)?, bound(end, n)?);
    if start >= end {
        return Ok(None);
    }
    Ok(items[start..end]
        .iter()
        .position(|v| v.is(needle) || v.py_eq(needle))
        .map(|i| i + start))
}

/// `count` and `index`, shared by lists and tuples.
fn sequence_query(name: &str, type_name: &str, items: &[Value], args: Args) -> RuntimeResult<Value> {
    match name {
        "count" => {
            let args = args.expect(name, 1, 1)?;
            let needle = &args[0];
            Ok(Value::Int(
                items.iter().filter(|v| v.is(needle) || v.py_eq(needle)).count() as i64,
            ))
        }
        "index" => {
            let args = args.expect(name, 1, 3)?;
            match position(items, &args[0], args.get(1), args.get(2))? {
                Some(i) => Ok(Value::Int(i as i64)),
                None => raise(
                    ExcType::ValueError,
                    format!("{} is not in {}", args[0].repr(), type_name),
                ),
            }
        }
        _ => no_attribute(type_name, name),
    }
}

fn list_method(interp: &mut Interpreter, list: &Rc<List>, name: &str, mut args: Args) -> RuntimeResult<Value> {
    let max = interp.max_sequence_len();
    match name {
        "append" => {
            let mut args = args.expect(name, 1, 1)?;
            let mut items = list.borrow_mut();
            check_len(items.len() + 1, max)?;
            items.append(&mut args);
            Ok(Value::None)
        }
        "extend" => {
            let args = args.expect(name, 1, 1)?;
            let mut extra = interp.collect(&args[0])?;
            let mut items = list.borrow_mut();
            check_len(items.len() + extra.len(), max)?;
            items.append(&mut extra);
            Ok(Value::None)
        }
        "insert" => {
            let mut args = args.expect(name, 2, 2)?;
            let index = int_arg(&args[0], "")?;
            let value = args.pop().unwrap_or(Value::None);
            let mut items = list.borrow_mut();
            check_len(items.len() + 1, max)?;
            let n = items.len() as i64;
            let at = if index < 0 { (index + n).max(0) } else { index.min(n) };
            items.insert(at as usize, value);
            Ok(Value::None)
        }
        "remove" => {
            let args = args.expect(name, 1, 1)?;
            let snapshot = list.borrow().clone();
            match position(&snapshot, &args[0], None, None)? {
                Some(i) => {
                    let removed = list.borrow_mut().remove(i);
                    drop(removed);
                    Ok(Value::None)
                }
                None => raise(ExcType::ValueError, "list.remove(x): x not in list"),
            }
        }
        "pop" => {
            let args = args.expect(name, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return raise(ExcType::IndexError, "pop from empty list");
            }
            let n = items.len() as i64;
            let index = match args.first() {
                Some(i) => int_arg(i, "")?,
                None => -1,
            };
            let at = if index < 0 { index + n } else { index };
            if !(0..n).contains(&at) {
                return raise(ExcType::IndexError, "pop index out of range");
            }
            Ok(items.remove(at as usize))
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            let old = std::mem::take(&mut *list.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "reverse" => {
            args.expect(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.take_keyword("reverse").map(|v| v.is_truthy()).unwrap_or(false);
            args.expect(name, 0, 0)?;
            let mut items = std::mem::take(&mut *list.borrow_mut());
            let sorted = interp.sort(&mut items, key.as_ref(), reverse);
            let mut slot = list.borrow_mut();
            let modified = !slot.is_empty();
            let displaced = std::mem::replace(&mut *slot, items);
            drop(slot);
            drop(displaced);
            sorted?;
            if modified {
                return raise(ExcType::ValueError, "list modified during sort");
            }
            Ok(Value::None)
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            sequence_query(name, "list", &items, args)
        }
        _ => no_attribute("list", name),
    }
}

// ----------------------------------------------------------------------
// dict
// ----------------------------------------------------------------------

fn key_error(key: &Value) -> Unwind {
    Unwind::Raise(Rc::new(Exception::with_args(ExcType::KeyError, vec![key.clone()])))
}

fn dict_method(interp: &mut Interpreter, dict: &Rc<Dict>, name: &str, mut args: Args) -> RuntimeResult<Value> {
    match name {
        "keys" | "values" | "items" => {
            args.expect(name, 0, 0)?;
            let entries = dict.borrow();
            Ok(Value::list(match name {
                "keys" => entries.values().map(|(k, _)| k.clone()).collect(),
                "values" => entries.values().map(|(_, v)| v.clone()).collect(),
                _ => entries
                    .values()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            }))
        }
        "get" => {
            let mut args = args.expect(name, 1, 2)?;
            let default = if args.len() == 2 { args.pop().unwrap_or(Value::None) } else { Value::None };
            let hash = args[0].hash_key()?;
            Ok(dict.borrow().get(&hash).map(|(_, v)| v.clone()).unwrap_or(default))
        }
        "pop" => {
            let mut args = args.expect(name, 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let hash = args[0].hash_key()?;
            let removed = dict.borrow_mut().shift_remove(&hash);
            match (removed, default) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(key_error(&args[0])),
            }
        }
        "popitem" => {
            args.expect(name, 0, 0)?;
            let popped = dict.borrow_mut().pop();
            match popped {
                Some((_, (key, value))) => Ok(Value::tuple(vec![key, value])),
                None => raise(ExcType::KeyError, "popitem(): dictionary is empty"),
            }
        }
        "setdefault" => {
            let mut args = args.expect(name, 1, 2)?;
            let default = if args.len() == 2 { args.pop().unwrap_or(Value::None) } else { Value::None };
            let key = args.pop().unwrap_or(Value::None);
            let hash = key.hash_key()?;
            let mut entries = dict.borrow_mut();
            if let Some((_, existing)) = entries.get(&hash) {
                return Ok(existing.clone());
            }
            check_len(entries.len() + 1, interp.max_sequence_len())?;
            entries.insert(hash, (key, default.clone()));
            Ok(default)
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            let positional = args.expect(name, 0, 1)?;
            let mut pairs = match positional.first() {
                Some(source) => collect_pairs(interp, source)?,
                None => Vec::new(),
            };
            pairs.extend(keywords.into_iter().map(|(k, v)| (Value::from(k), v)));
            let max = interp.max_sequence_len();
            for (key, value) in pairs {
                let hash = key.hash_key()?;
                let mut entries = dict.borrow_mut();
                match entries.get_mut(&hash) {
                    Some(slot) => slot.1 = value,
                    None => {
                        check_len(entries.len() + 1, max)?;
                        entries.insert(hash, (key, value));
                    }
                }
            }
            Ok(Value::None)
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            let old = std::mem::take(&mut *dict.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => no_attribute("dict", name),
    }
}

// ----------------------------------------------------------------------
// set
// ----------------------------------------------------------------------

fn set_method(interp: &mut Interpreter, set: &Rc<Set>, name: &str, args: Args) -> RuntimeResult<Value> {
    match name {
        "add" => {
            let mut args = args.expect(name, 1, 1)?;
            let item = args.pop().unwrap_or(Value::None);
            let hash = item.hash_key()?;
            let mut entries = set.borrow_mut();
            if !entries.contains_key(&hash) {
                check_len(entries.len() + 1, interp.max_sequence_len())?;
                entries.insert(hash, item);
            }
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let args = args.expect(name, 1, 1)?;
            let removed = set.borrow_mut().shift_remove(&args[0].hash_key()?);
            match removed {
                None if name == "remove" => Err(key_error(&args[0])),
                _ => Ok(Value::None),
            }
        }
        "pop" => {
            args.expect(name, 0, 0)?;
            let popped = set.borrow_mut().shift_remove_index(0);
            match popped {
                Some((_, item)) => Ok(item),
                None => raise(ExcType::KeyError, "pop from an empty set"),
            }
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            let old = std::mem::take(&mut *set.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "update" => {
            args.no_keywords(name)?;
            let max = interp.max_sequence_len();
            for source in &args.positional {
                let extra = set_entries(interp, source)?;
                let mut entries = set.borrow_mut();
                for (hash, item) in extra {
                    entries.entry(hash).or_insert(item);
                }
                check_len(entries.len(), max)?;
            }
            Ok(Value::None)
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            args.no_keywords(name)?;
            if name == "symmetric_difference" && args.positional.len() != 1 {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "symmetric_difference() takes exactly one argument ({} given)",
                        args.positional.len()
                    ),
                );
            }
            let mut result = set.borrow().clone();
            for source in &args.positional {
                let other = set_entries(interp, source)?;
                result = combine(name, result, other);
            }
            check_len(result.len(), interp.max_sequence_len())?;
            Ok(Value::set(result))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let args = args.expect(name, 1, 1)?;
            let other = set_entries(interp, &args[0])?;
            let mine = set.borrow();
            Ok(Value::Bool(match name {
                "issubset" => mine.keys().all(|k| other.contains_key(k)),
                "issuperset" => other.keys().all(|k| mine.contains_key(k)),
                _ => !mine.keys().any(|k| other.contains_key(k)),
            }))
        }
        _ => no_attribute("set", name),
    }
}

fn combine(name: &str, mut left: SetEntries, right: SetEntries) -> SetEntries {
    match name {
        "union" => {
            for (hash, item) in right {
                left.entry(hash).or_insert(item);
            }
            left
        }
        "intersection" => {
            left.retain(|hash, _| right.contains_key(hash));
            left
        }
        "difference" => {
            left.retain(|hash, _| !right.contains_key(hash));
            left
        }
        _ => {
            let mut out: SetEntries = left
                .iter()
                .filter(|(hash, _)| !right.contains_key(*hash))
                .map(|(h, v)| (h.clone(), v.clone()))
                .collect();
            for (hash, item) in right {
                if !left.contains_key(&hash) {
                    out.insert(hash, item);
                }
            }
            out
        }
    }
}

// ----------------------------------------------------------------------
// streams
// ----------------------------------------------------------------------

fn stream_method(interp: &mut Interpreter, kind: StreamKind, name: &str, args: Args) -> RuntimeResult<Value> {
    match name {
        "write" => {
            let args = args.expect(name, 1, 1)?;
            let Value::Str(text) = &args[0] else {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "write() argument must be str, not {}",
                        args[0].type_name()
                    ),
                );
            };
            interp.write(kind, text);
            Ok(Value::Int(text.chars().count() as i64))
        }
        "flush" => {
            args.expect(name, 0, 0)?;
            Ok(Value::None)
        }
        _ => no_attribute("TextIOWrapper", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: Vec<Value>) -> Vec<String> {
        values.iter().map(Value::to_str).collect()
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(&Value::from("x"), "upper"), Some("upper"));
        assert_eq!(lookup(&Value::list(vec![]), "append"), Some("append"));
        assert_eq!(lookup(&Value::Int(1), "upper"), None);
        assert_eq!(lookup(&Value::None, "anything"), None);
    }

    #[test]
    fn test_whitespace_split() {
        assert_eq!(texts(split_whitespace("  a b\t c ", -1)), ["a", "b", "c"]);
        assert_eq!(texts(split_whitespace("a b  c  ", 1)), ["a", "b  c  "]);
        assert_eq!(texts(rsplit_whitespace("a b c", 1)), ["a b", "c"]);
        assert!(split_whitespace("   ", -1).is_empty());
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(texts(split_lines("a\nb\r\nc", false)), ["a", "b", "c"]);
        assert_eq!(texts(split_lines("a\nb\n", true)), ["a\n", "b\n"]);
    }

    #[test]
    fn test_char_window_uses_character_indices() {
        let s = "héllo";
        let (lo, hi, offset) = char_window(s, Some(&Value::Int(1)), Some(&Value::Int(3))).unwrap().unwrap();
        assert_eq!(&s[lo..hi], "él");
        assert_eq!(offset, 1);
        assert!(char_window(s, Some(&Value::Int(9)), None).unwrap().is_none());
    }

    #[test]
    fn test_combine() {
        let entries = |items: &[i64]| -> SetEntries {
            items
                .iter()
                .map(|i| (Value::Int(*i).hash_key().unwrap(), Value::Int(*i)))
                .collect()
        };
        assert_eq!(combine("union", entries(&[1, 2]), entries(&[2, 3])).len(), 3);
        assert_eq!(combine("intersection", entries(&[1, 2]), entries(&[2, 3])).len(), 1);
        assert_eq!(combine("difference", entries(&[1, 2]), entries(&[2, 3])).len(), 1);
        assert_eq!(combine("symmetric_difference", entries(&[1, 2]), entries(&[2, 3])).len(), 2);
    }
}
