//! The safe builtin functions and the builtin type constructors.
//!
//! [`FUNCTIONS`] is the single table the capability environment is built
//! from. Anything missing here is unreachable from sandboxed code.

use std::rc::Rc;

use num_traits::{Signed, Zero};

use crate::compiler::ast::BinOp;

use super::fault::{raise, ExcType, Exception, RuntimeResult};
use super::format;
use super::integer;
use super::interpreter::Interpreter;
use super::iterators::{self, IterKind, IterState, ValueIter};
use super::modules::float_to_int;
use super::ops;
use super::value::{Args, BuiltinFunction, DictEntries, Range, SetEntries, StreamKind, TypeKind, Value};

macro_rules! builtins {
    ($($name:literal => $call:ident),* $(,)?) => {
        /// Builtin functions, by name.
        pub static FUNCTIONS: &[BuiltinFunction] = &[
            $(BuiltinFunction { name: $name, call: $call }),*
        ];
    };
}

builtins! {
    "abs" => builtin_abs,
    "all" => builtin_all,
    "any" => builtin_any,
    "bin" => builtin_bin,
    "chr" => builtin_chr,
    "divmod" => builtin_divmod,
    "enumerate" => builtin_enumerate,
    "filter" => builtin_filter,
    "format" => builtin_format,
    "hex" => builtin_hex,
    "isinstance" => builtin_isinstance,
    "len" => builtin_len,
    "map" => builtin_map,
    "max" => builtin_max,
    "min" => builtin_min,
    "oct" => builtin_oct,
    "ord" => builtin_ord,
    "pow" => builtin_pow,
    "print" => builtin_print,
    "repr" => builtin_repr,
    "reversed" => builtin_reversed,
    "round" => builtin_round,
    "sorted" => builtin_sorted,
    "sum" => builtin_sum,
    "zip" => builtin_zip,
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

/// A number as `f64`, or `TypeError`.
pub(crate) fn float_arg(value: &Value, function: &str) -> RuntimeResult<f64> {
    if let Value::BigInt(big) = value {
        return integer::to_f64(big);
    }
    match value.as_float() {
        Some(f) => Ok(f),
        None => raise(
            ExcType::TypeError,
            format!(
                "{}() argument must be a real number, not '{}'",
                function,
                value.type_name()
            ),
        ),
    }
}

/// An `int` (or `bool`), or `TypeError`. Integers past `i64` are an
/// `OverflowError`.
pub(crate) fn int_arg(value: &Value, function: &str) -> RuntimeResult<i64> {
    match value.as_int() {
        Some(i) => Ok(i),
        None if matches!(value, Value::BigInt(_)) => raise(
            ExcType::OverflowError,
            "Python int too large to convert to C ssize_t",
        ),
        None if function.is_empty() => raise(
            ExcType::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ),
        ),
        None => raise(
            ExcType::TypeError,
            format!(
                "{}(): '{}' object cannot be interpreted as an integer",
                function,
                value.type_name()
            ),
        ),
    }
}

/// A `str` argument, or `TypeError`.
pub(crate) fn str_arg<'a>(value: &'a Value, function: &str) -> RuntimeResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => raise(
            ExcType::TypeError,
            format!(
                "{}() argument must be str, not {}",
                function,
                other.type_name()
            ),
        ),
    }
}

/// Key/value pairs from a mapping or an iterable of pairs, as accepted by
/// `dict()` and `dict.update()`.
pub(crate) fn collect_pairs(interp: &mut Interpreter, source: &Value) -> RuntimeResult<Vec<(Value, Value)>> {
    if let Value::Dict(dict) = source {
        return Ok(dict.borrow().values().cloned().collect());
    }
    let mut pairs = Vec::new();
    let mut iter = interp.iterate(source)?;
    let mut index = 0;
    while let Some(item) = iter.next_item(interp)? {
        interp.tick()?;
        let parts = match &item {
            Value::Tuple(t) => t.to_vec(),
            Value::List(l) => l.borrow().clone(),
            Value::Str(_) => interp.collect(&item)?,
            _ => {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "cannot convert dictionary update sequence element #{} to a sequence",
                        index
                    ),
                )
            }
        };
        let [key, value]: [Value; 2] = match parts.try_into() {
            Ok(pair) => pair,
            Err(parts) => {
                return raise(
                    ExcType::ValueError,
                    format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        index,
                        parts.len()
                    ),
                );
            }
        };
        pairs.push((key, value));
        index += 1;
    }
    Ok(pairs)
}

fn entries_from_pairs(pairs: Vec<(Value, Value)>) -> RuntimeResult<DictEntries> {
    let mut entries = DictEntries::with_capacity(pairs.len());
    for (key, value) in pairs {
        let hash = key.hash_key()?;
        match entries.get_mut(&hash) {
            Some(slot) => slot.1 = value,
            None => {
                entries.insert(hash, (key, value));
            }
        }
    }
    Ok(entries)
}

/// Set entries from any iterable.
pub(crate) fn set_entries(interp: &mut Interpreter, source: &Value) -> RuntimeResult<SetEntries> {
    let mut entries = SetEntries::new();
    let mut iter = interp.iterate(source)?;
    while let Some(item) = iter.next_item(interp)? {
        interp.tick()?;
        entries.entry(item.hash_key()?).or_insert(item);
    }
    Ok(entries)
}

// ----------------------------------------------------------------------
// Type constructors
// ----------------------------------------------------------------------

/// Calls a type object: `int("3")`, `list(range(3))`, `ValueError("x")`.
pub fn construct(interp: &mut Interpreter, kind: TypeKind, args: Args) -> RuntimeResult<Value> {
    match kind {
        TypeKind::Bool => {
            let args = args.expect("bool", 0, 1)?;
            Ok(Value::Bool(args.first().map(Value::is_truthy).unwrap_or(false)))
        }
        TypeKind::Int => construct_int(args),
        TypeKind::Float => {
            let args = args.expect("float", 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(Value::BigInt(big)) => integer::to_f64(big).map(Value::Float),
                Some(other) => match other.as_float() {
                    Some(f) => Ok(Value::Float(f)),
                    None => raise(
                        ExcType::TypeError,
                        format!(
                            "float() argument must be a string or a real number, not '{}'",
                            other.type_name()
                        ),
                    ),
                },
            }
        }
        TypeKind::Str => {
            let args = args.expect("str", 0, 1)?;
            Ok(match args.first() {
                None => Value::from(""),
                Some(Value::Str(s)) => Value::Str(s.clone()),
                Some(other) => Value::from(other.to_str()),
            })
        }
        TypeKind::List => {
            let args = args.expect("list", 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(source) => Ok(Value::list(interp.collect(source)?)),
            }
        }
        TypeKind::Tuple => {
            let args = args.expect("tuple", 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(t)) => Ok(Value::Tuple(t.clone())),
                Some(source) => Ok(Value::tuple(interp.collect(source)?)),
            }
        }
        TypeKind::Dict => {
            let Args { positional, keywords } = args;
            let positional = Args::new(positional).expect("dict", 0, 1)?;
            let mut pairs = match positional.first() {
                None => Vec::new(),
                Some(source) => collect_pairs(interp, source)?,
            };
            pairs.extend(keywords.into_iter().map(|(k, v)| (Value::from(k), v)));
            Ok(Value::dict(entries_from_pairs(pairs)?))
        }
        TypeKind::Set => {
            let args = args.expect("set", 0, 1)?;
            match args.first() {
                None => Ok(Value::set(SetEntries::new())),
                Some(source) => Ok(Value::set(set_entries(interp, source)?)),
            }
        }
        TypeKind::Range => {
            let args = args.expect("range", 1, 3)?;
            let ints = args
                .iter()
                .map(|v| int_arg(v, ""))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step, ..] => (*start, *stop, *step),
                [] => (0, 0, 1),
            };
            if step == 0 {
                return raise(ExcType::ValueError, "range() arg 3 must not be zero");
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        TypeKind::Type => {
            let args = args.expect("type", 1, 1)?;
            Ok(Value::Type(args[0].type_of()))
        }
        TypeKind::Exception(kind) => {
            if !args.keywords.is_empty() {
                return raise(
                    ExcType::TypeError,
                    format!("{}() takes no keyword arguments", kind.name()),
                );
            }
            Ok(Value::Exception(Rc::new(Exception::with_args(
                kind,
                args.positional,
            ))))
        }
        other => raise(
            ExcType::TypeError,
            format!("cannot create '{}' instances", other.name()),
        ),
    }
}

fn construct_int(mut args: Args) -> RuntimeResult<Value> {
    let keyword_base = args.take_keyword("base");
    let mut args = args.expect("int", 0, 2)?;
    if let Some(base) = keyword_base {
        args.push(base);
    }
    match args.as_slice() {
        [] => Ok(Value::Int(0)),
        [Value::Str(s)] => parse_int(s, 10),
        [value] => match value {
            Value::Float(f) => float_to_int(f.trunc()),
            Value::BigInt(big) => Ok(Value::BigInt(big.clone())),
            other => match other.as_int() {
                Some(i) => Ok(Value::Int(i)),
                None => raise(
                    ExcType::TypeError,
                    format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        other.type_name()
                    ),
                ),
            },
        },
        [Value::Str(s), base] => {
            let base = int_arg(base, "")?;
            if base != 0 && !(2..=36).contains(&base) {
                return raise(ExcType::ValueError, "int() base must be >= 2 and <= 36, or 0");
            }
            parse_int(s, base as u32)
        }
        [_, _] => raise(
            ExcType::TypeError,
            "int() can't convert non-string with explicit base",
        ),
        _ => raise(ExcType::TypeError, "int() takes at most 2 arguments"),
    }
}

/// `int(text, base)`, accepting surrounding whitespace, a sign, digit
/// separators and the base prefix.
pub(crate) fn parse_int(text: &str, base: u32) -> RuntimeResult<Value> {
    let invalid = || {
        raise(
            ExcType::ValueError,
            format!(
                "invalid literal for int() with base {}: {}",
                base,
                super::value::str_repr(text)
            ),
        )
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |prefix: &str, radix: u32| {
        lower
            .strip_prefix(prefix)
            .filter(|_| base == radix || base == 0)
            .map(|rest| (rest.to_string(), radix))
    };
    let (digits, radix) = prefixed("0x", 16)
        .or_else(|| prefixed("0o", 8))
        .or_else(|| prefixed("0b", 2))
        .unwrap_or_else(|| (lower.clone(), if base == 0 { 10 } else { base }));
    if digits.is_empty()
        || digits.starts_with(['_', '+', '-'])
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return invalid();
    }
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if base == 0 && radix == 10 && digits.len() > 1 && digits.starts_with('0') && digits.chars().any(|c| c != '0') {
        return invalid();
    }
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return invalid();
    }
    if let Ok(magnitude) = u64::from_str_radix(&digits, radix) {
        let value = if negative {
            0i64.checked_sub_unsigned(magnitude)
        } else {
            i64::try_from(magnitude).ok()
        };
        if let Some(v) = value {
            return Ok(Value::Int(v));
        }
    }
    match integer::parse_digits(&digits, radix)? {
        Some(magnitude) => Ok(integer::normalize(if negative { -magnitude } else { magnitude })),
        None => invalid(),
    }
}

fn parse_float(text: &str) -> RuntimeResult<f64> {
    let trimmed = text.trim();
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let valid_separators = !trimmed.starts_with('_') && !trimmed.ends_with('_') && !trimmed.contains("__");
    match cleaned.parse::<f64>() {
        Ok(f) if valid_separators && !cleaned.is_empty() => Ok(f),
        _ => raise(
            ExcType::ValueError,
            format!(
                "could not convert string to float: {}",
                super::value::str_repr(text)
            ),
        ),
    }
}

// ----------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------

fn builtin_abs(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("abs", 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::BigInt(big) => Ok(integer::normalize(big.abs())),
        other => match other.as_int() {
            Some(i) => Ok(match i.checked_abs() {
                Some(a) => Value::Int(a),
                None => integer::normalize(num_bigint::BigInt::from(i).abs()),
            }),
            None => raise(
                ExcType::TypeError,
                format!("bad operand type for abs(): '{}'", other.type_name()),
            ),
        },
    }
}

fn truth_scan(interp: &mut Interpreter, args: Args, name: &str, wanted: bool) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    let mut iter = interp.iterate(&args[0])?;
    while let Some(item) = iter.next_item(interp)? {
        interp.tick()?;
        if item.is_truthy() == wanted {
            return Ok(Value::Bool(wanted));
        }
    }
    Ok(Value::Bool(!wanted))
}

fn builtin_all(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    truth_scan(interp, args, "all", false)
}

fn builtin_any(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    truth_scan(interp, args, "any", true)
}

fn radix_text(args: Args, name: &str, prefix: &str, radix: u32) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    let value = &args[0];
    if integer::to_big(value).is_none() {
        return raise(
            ExcType::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ),
        );
    }
    let sign = if integer::is_negative(value) { "-" } else { "" };
    Ok(Value::from(format!(
        "{}{}{}",
        sign,
        prefix,
        integer::magnitude_digits(value, radix)
    )))
}

fn builtin_bin(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    radix_text(args, "bin", "0b", 2)
}

fn builtin_oct(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    radix_text(args, "oct", "0o", 8)
}

fn builtin_hex(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    radix_text(args, "hex", "0x", 16)
}

fn builtin_chr(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("chr", 1, 1)?;
    let code = int_arg(&args[0], "")?;
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => Ok(Value::from(c.to_string())),
        None => raise(ExcType::ValueError, "chr() arg not in range(0x110000)"),
    }
}

fn builtin_ord(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("ord", 1, 1)?;
    let Value::Str(s) = &args[0] else {
        return raise(
            ExcType::TypeError,
            format!(
                "ord() expected string of length 1, but {} found",
                args[0].type_name()
            ),
        );
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => raise(
            ExcType::TypeError,
            format!(
                "ord() expected a character, but string of length {} found",
                s.chars().count()
            ),
        ),
    }
}

fn builtin_divmod(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("divmod", 2, 2)?;
    let max = interp.max_sequence_len();
    let quotient = ops::binary_op(BinOp::FloorDiv, &args[0], &args[1], max)?;
    let remainder = ops::binary_op(BinOp::Mod, &args[0], &args[1], max)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn builtin_enumerate(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let keyword_start = args.take_keyword("start");
    let args = args.expect("enumerate", 1, 2)?;
    let counter = match keyword_start.as_ref().or(args.get(1)) {
        Some(Value::BigInt(big)) => Value::BigInt(big.clone()),
        Some(start) => Value::Int(int_arg(start, "")?),
        None => Value::Int(0),
    };
    let inner = interp.iterate(&args[0])?;
    Ok(iterators::lazy(IterKind::Enumerate, IterState::Enumerate { inner, counter }))
}

fn builtin_filter(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let mut args = args.expect("filter", 2, 2)?;
    let inner = interp.iterate(&args[1])?;
    let predicate = args.swap_remove(0);
    Ok(iterators::lazy(IterKind::Filter, IterState::Filter { predicate, inner }))
}

fn builtin_map(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let mut args = args.expect("map", 2, usize::MAX)?;
    let function = args.remove(0);
    let inners = args
        .iter()
        .map(|source| interp.iterate(source))
        .collect::<RuntimeResult<Vec<_>>>()?;
    Ok(iterators::lazy(IterKind::Map, IterState::Map { function, inners }))
}

fn builtin_zip(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    args.no_keywords("zip")?;
    let inners = args
        .positional
        .iter()
        .map(|source| interp.iterate(source))
        .collect::<RuntimeResult<Vec<_>>>()?;
    Ok(iterators::lazy(IterKind::Zip, IterState::Zip { inners }))
}

fn builtin_format(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("format", 1, 2)?;
    let spec = match args.get(1) {
        Some(spec) => str_arg(spec, "format")?,
        None => "",
    };
    Ok(Value::from(format::format_value(&args[0], spec)?))
}

fn builtin_isinstance(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("isinstance", 2, 2)?;
    let actual = args[0].type_of();
    let check = |candidate: &Value| match candidate {
        Value::Type(kind) => Ok(actual.is_subtype_of(*kind)),
        _ => raise(
            ExcType::TypeError,
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        ),
    };
    match &args[1] {
        Value::Tuple(kinds) => {
            for kind in kinds.iter() {
                if check(kind)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        single => check(single).map(Value::Bool),
    }
}

/// `len(value)`.
pub(crate) fn length(value: &Value) -> RuntimeResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Set(s) => s.borrow().len(),
        Value::Range(r) => r.len(),
        other => {
            return raise(
                ExcType::TypeError,
                format!("object of type '{}' has no len()", other.type_name()),
            )
        }
    })
}

fn builtin_len(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("len", 1, 1)?;
    Ok(Value::Int(length(&args[0])? as i64))
}

fn extreme(interp: &mut Interpreter, mut args: Args, name: &str, wanted: std::cmp::Ordering) -> RuntimeResult<Value> {
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let default = args.take_keyword("default");
    args.no_keywords(name)?;
    let candidates = match args.positional.len() {
        0 => {
            return raise(
                ExcType::TypeError,
                format!("{} expected at least 1 argument, got 0", name),
            )
        }
        1 => interp.collect(&args.positional[0])?,
        _ => {
            if default.is_some() {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "Cannot specify a default for {}() with multiple positional arguments",
                        name
                    ),
                );
            }
            args.positional
        }
    };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        interp.tick()?;
        let rank = match &key {
            Some(key) => interp.call_value(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => ops::order(&rank, best_rank, if wanted == std::cmp::Ordering::Greater { ">" } else { "<" })? == Some(wanted),
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => raise(
            ExcType::ValueError,
            format!("{}() arg is an empty sequence", name),
        ),
    }
}

fn builtin_max(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    extreme(interp, args, "max", std::cmp::Ordering::Greater)
}

fn builtin_min(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    extreme(interp, args, "min", std::cmp::Ordering::Less)
}

fn builtin_pow(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("pow", 2, 3)?;
    if let Some(modulus) = args.get(2).filter(|m| !matches!(m, Value::None)) {
        let (Some(base), Some(exp), Some(modulus)) = (
            integer::to_big(&args[0]),
            integer::to_big(&args[1]),
            integer::to_big(modulus),
        ) else {
            return raise(
                ExcType::TypeError,
                "pow() 3rd argument not allowed unless all arguments are integers",
            );
        };
        if modulus.is_zero() {
            return raise(ExcType::ValueError, "pow() 3rd argument cannot be 0");
        }
        if exp.is_negative() {
            return raise(ExcType::ValueError, "pow() negative exponent not supported");
        }
        // Reduce into [0, |m|), then shift toward the modulus sign.
        let reduced = base.modpow(&exp, &modulus.abs());
        let result = if modulus.is_negative() && !reduced.is_zero() {
            reduced + modulus
        } else {
            reduced
        };
        return Ok(integer::normalize(result));
    }
    ops::binary_op(BinOp::Pow, &args[0], &args[1], interp.max_sequence_len())
}

fn text_option(value: Option<Value>, default: &str, name: &str) -> RuntimeResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => raise(
            ExcType::TypeError,
            format!(
                "{} must be None or a string, not {}",
                name,
                other.type_name()
            ),
        ),
    }
}

fn builtin_print(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let sep = text_option(args.take_keyword("sep"), " ", "sep")?;
    let end = text_option(args.take_keyword("end"), "\n", "end")?;
    let stream = match args.take_keyword("file") {
        None | Some(Value::None) => StreamKind::Stdout,
        Some(Value::Stream(kind)) => kind,
        Some(other) => {
            return raise(
                ExcType::AttributeError,
                format!("'{}' object has no attribute 'write'", other.type_name()),
            )
        }
    };
    args.take_keyword("flush");
    args.no_keywords("print")?;
    let mut text = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            text.push_str(&sep);
        }
        text.push_str(&value.to_str());
    }
    text.push_str(&end);
    interp.write(stream, &text);
    Ok(Value::None)
}

fn builtin_repr(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("repr", 1, 1)?;
    Ok(Value::from(args[0].repr()))
}

fn builtin_reversed(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("reversed", 1, 1)?;
    let walk = match &args[0] {
        Value::List(list) => ValueIter::ListReversed {
            list: list.clone(),
            remaining: list.borrow().len(),
        },
        Value::Range(range) => ValueIter::RangeReversed {
            range: *range,
            remaining: range.len(),
        },
        source @ (Value::Tuple(_) | Value::Str(_) | Value::Dict(_)) => {
            let mut items = interp.collect(source)?;
            items.reverse();
            ValueIter::Items(items.into_iter())
        }
        other => {
            return raise(
                ExcType::TypeError,
                format!("'{}' object is not reversible", other.type_name()),
            )
        }
    };
    Ok(iterators::lazy(IterKind::Reversed, IterState::Walk(walk)))
}

fn builtin_round(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("round", 1, 2)?;
    let digits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(d) => Some(int_arg(d, "")?),
    };
    match (&args[0], digits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()),
        (Value::Float(f), Some(d)) => round_float(*f, d).map(Value::Float),
        (Value::BigInt(big), digits) => match digits {
            Some(d) if d < 0 => {
                let places = d.unsigned_abs();
                if places > big.bits() {
                    return Ok(Value::Int(0));
                }
                let factor = num_bigint::BigInt::from(10u32).pow(places as u32);
                let (quotient, remainder) = integer::floor_divmod(big, &factor);
                let twice = &remainder * 2u32;
                let rounded = if twice > factor || (twice == factor && quotient.bit(0)) {
                    quotient + 1u32
                } else {
                    quotient
                };
                Ok(integer::normalize(rounded * factor))
            }
            _ => Ok(Value::BigInt(big.clone())),
        },
        (other, digits) => match other.as_int() {
            Some(i) => Ok(match digits {
                Some(d) if d < 0 => round_int(i, d),
                _ => Value::Int(i),
            }),
            None => raise(
                ExcType::TypeError,
                format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ),
            ),
        },
    }
}

fn round_float(f: f64, digits: i64) -> RuntimeResult<f64> {
    if !f.is_finite() {
        return Ok(f);
    }
    if digits >= 0 {
        let digits = digits.min(320) as usize;
        return Ok(format!("{:.*}", digits, f).parse().unwrap_or(f));
    }
    // No finite float has a nonzero digit at 10**309 or above.
    if digits < -308 {
        return Ok(0.0f64.copysign(f));
    }
    let factor = 10f64.powi(-digits as i32);
    let rounded = (f / factor).round_ties_even() * factor;
    if rounded.is_infinite() {
        return raise(ExcType::OverflowError, "rounded value too large to represent");
    }
    Ok(rounded)
}

fn round_int(i: i64, digits: i64) -> Value {
    if digits <= -20 {
        return Value::Int(0);
    }
    let factor = 10i128.pow((-digits) as u32);
    let value = i as i128;
    let quotient = value.div_euclid(factor);
    let remainder = value.rem_euclid(factor);
    let doubled = remainder * 2;
    let rounded = if doubled > factor || (doubled == factor && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    integer::normalize(num_bigint::BigInt::from(rounded * factor))
}

fn builtin_sorted(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let reverse = args
        .take_keyword("reverse")
        .map(|v| v.is_truthy())
        .unwrap_or(false);
    let args = args.expect("sorted", 1, 1)?;
    let mut items = interp.collect(&args[0])?;
    interp.sort(&mut items, key.as_ref(), reverse)?;
    Ok(Value::list(items))
}

fn builtin_sum(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let keyword_start = args.take_keyword("start");
    let args = args.expect("sum", 1, 2)?;
    let mut total = keyword_start
        .or_else(|| args.get(1).cloned())
        .unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return raise(
            ExcType::TypeError,
            "sum() can't sum strings [use ''.join(seq) instead]",
        );
    }
    let max = interp.max_sequence_len();
    let mut iter = interp.iterate(&args[0])?;
    while let Some(item) = iter.next_item(interp)? {
        interp.tick()?;
        total = match (&total, &item) {
            (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
                Some(s) => Value::Int(s),
                None => ops::binary_op(BinOp::Add, &total, &item, max)?,
            },
            _ => ops::binary_op(BinOp::Add, &total, &item, max)?,
        };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_unique() {
        let mut names: Vec<&str> = FUNCTIONS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
        assert!(names.contains(&"print"));
        assert!(!names.contains(&"eval"));
    }

    #[test]
    fn test_parse_int() {
        assert!(matches!(parse_int(" 42 ", 10), Ok(Value::Int(42))));
        assert!(matches!(parse_int("-1_000", 10), Ok(Value::Int(-1000))));
        assert!(matches!(parse_int("ff", 16), Ok(Value::Int(255))));
        assert!(matches!(parse_int("0x1F", 0), Ok(Value::Int(31))));
        assert!(matches!(parse_int("0b101", 2), Ok(Value::Int(5))));
        assert!(matches!(parse_int("-9223372036854775808", 10), Ok(Value::Int(i64::MIN))));
        assert!(parse_int("12a", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert_eq!(parse_int("99999999999999999999", 10).unwrap().repr(), "99999999999999999999");
        assert_eq!(parse_int("-0x10000000000000000", 0).unwrap().repr(), "-18446744073709551616");
        assert!(parse_int("9".repeat(400_000).as_str(), 10).is_err());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(" 2.5 ").unwrap(), 2.5);
        assert_eq!(parse_float("1e3").unwrap(), 1000.0);
        assert!(parse_float("inf").unwrap().is_infinite());
        assert!(parse_float("abc").is_err());
    }

    #[test]
    fn test_rounding_ties_to_even() {
        assert_eq!(round_float(2.675, 2).unwrap(), 2.67);
        assert_eq!(round_float(1234.5, -2).unwrap(), 1200.0);
        assert_eq!(round_int(1250, -2).repr(), "1200");
        assert_eq!(round_int(1350, -2).repr(), "1400");
        assert_eq!(round_int(-1251, -2).repr(), "-1300");
        assert_eq!(round_int(5, -20).repr(), "0");
        assert_eq!(round_int(i64::MAX, -18).repr(), "9000000000000000000");
        assert_eq!(round_int(i64::MAX, -19).repr(), "10000000000000000000");
    }

    #[test]
    fn test_round_far_left_of_the_point() {
        let zero = round_float(1e308, -400).unwrap();
        assert_eq!(zero, 0.0);
        assert!(zero.is_sign_positive());
        assert!(round_float(-1e308, -309).unwrap().is_sign_negative());
        assert!(round_float(1.7e308, -308).is_err());
    }

    #[test]
    fn test_length() {
        assert_eq!(length(&Value::from("héllo")).unwrap(), 5);
        assert_eq!(length(&Value::Range(Range { start: 0, stop: 10, step: 2 })).unwrap(), 5);
        assert!(length(&Value::Int(3)).is_err());
    }
}
