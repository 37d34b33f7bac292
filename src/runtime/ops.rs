//! Operator semantics: arithmetic, comparison and membership.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::Signed;

use crate::compiler::ast::{BinOp, CmpOp, UnaryOp};

use super::fault::{raise, ExcType, RuntimeResult};
use super::format;
use super::integer;
use super::value::{SetEntries, Value};

#[derive(Clone, Copy)]
enum Num<'a> {
    Int(i64),
    Big(&'a BigInt),
    Float(f64),
}

impl Num<'_> {
    fn to_big(self) -> BigInt {
        match self {
            Num::Int(i) => BigInt::from(i),
            Num::Big(big) => big.clone(),
            Num::Float(_) => BigInt::default(),
        }
    }

    fn to_f64(self) -> RuntimeResult<f64> {
        match self {
            Num::Int(i) => Ok(i as f64),
            Num::Big(big) => integer::to_f64(big),
            Num::Float(f) => Ok(f),
        }
    }
}

fn num(value: &Value) -> Option<Num<'_>> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::BigInt(big) => Some(Num::Big(big)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

/// An integer clamped to `i64`, for repeat counts and slice bounds. A huge
/// positive count still fails the length check.
pub(crate) fn saturating_int(value: &Value) -> Option<i64> {
    match value {
        Value::BigInt(big) => Some(if big.is_negative() { i64::MIN } else { i64::MAX }),
        other => other.as_int(),
    }
}

fn unsupported<T>(op: BinOp, left: &Value, right: &Value) -> RuntimeResult<T> {
    raise(
        ExcType::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

/// Fails with `MemoryError` when a result would exceed `max_len` items.
pub fn check_len(len: usize, max_len: usize) -> RuntimeResult<()> {
    if len > max_len {
        return raise(
            ExcType::MemoryError,
            format!("result of {} items exceeds the limit of {}", len, max_len),
        );
    }
    Ok(())
}

fn repeat_count(times: i64, unit: usize, max_len: usize) -> RuntimeResult<usize> {
    if times <= 0 || unit == 0 {
        return Ok(0);
    }
    let total = unit.checked_mul(times as usize).unwrap_or(usize::MAX);
    check_len(total, max_len)?;
    Ok(times as usize)
}

pub fn binary_op(op: BinOp, left: &Value, right: &Value, max_len: usize) -> RuntimeResult<Value> {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        if let (Value::Bool(x), Value::Bool(y), BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) =
            (left, right, op)
        {
            return Ok(Value::Bool(match op {
                BinOp::BitAnd => x & y,
                BinOp::BitOr => x | y,
                _ => x ^ y,
            }));
        }
        return numeric_op(op, a, b, left, right);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), max_len)?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (BinOp::Add, Value::Str(_), other) => raise(
            ExcType::TypeError,
            format!(
                "can only concatenate str (not \"{}\") to str",
                other.type_name()
            ),
        ),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            check_len(a.len() + b.len(), max_len)?;
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Add, Value::List(_), other) => raise(
            ExcType::TypeError,
            format!(
                "can only concatenate list (not \"{}\") to list",
                other.type_name()
            ),
        ),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.len() + b.len(), max_len)?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if saturating_int(n).is_some() => {
            let times = repeat_count(saturating_int(n).unwrap_or(0), s.len(), max_len)?;
            Ok(Value::from(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if saturating_int(n).is_some() => {
            let items = l.borrow();
            let times = repeat_count(saturating_int(n).unwrap_or(0), items.len(), max_len)?;
            Ok(Value::list(repeat_items(&items, times)))
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if saturating_int(n).is_some() => {
            let times = repeat_count(saturating_int(n).unwrap_or(0), t.len(), max_len)?;
            Ok(Value::tuple(repeat_items(t, times)))
        }
        (BinOp::Mod, Value::Str(template), args) => {
            Ok(Value::from(format::percent_format(template, args)?))
        }
        (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            let entries: SetEntries = match op {
                BinOp::BitOr => a.iter().chain(b.iter()).map(|(k, v)| (k.clone(), v.clone())).collect(),
                BinOp::BitAnd => a
                    .iter()
                    .filter(|(k, _)| b.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                BinOp::Sub => a
                    .iter()
                    .filter(|(k, _)| !b.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                _ => a
                    .iter()
                    .filter(|(k, _)| !b.contains_key(*k))
                    .chain(b.iter().filter(|(k, _)| !a.contains_key(*k)))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            };
            Ok(Value::set(entries))
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = a.borrow().clone();
            for (key, entry) in b.borrow().iter() {
                merged.insert(key.clone(), entry.clone());
            }
            Ok(Value::dict(merged))
        }
        _ => unsupported(op, left, right),
    }
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn numeric_op(op: BinOp, a: Num, b: Num, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
        (Num::Float(_), _) | (_, Num::Float(_)) => match op {
            BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                unsupported(op, left, right)
            }
            _ => float_op(op, a.to_f64()?, b.to_f64()?, left, right),
        },
        (a, b) => integer::big_op(op, &a.to_big(), &b.to_big()),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> RuntimeResult<Value> {
    let result = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return raise(ExcType::ZeroDivisionError, "division by zero");
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
            }
            floor_div(x, y)
        }
        BinOp::Mod => {
            if y == 0 {
                return raise(ExcType::ZeroDivisionError, "integer modulo by zero");
            }
            Some(floor_mod(x, y))
        }
        BinOp::Pow => return int_pow(x, y),
        BinOp::LShift => {
            if y < 0 {
                return raise(ExcType::ValueError, "negative shift count");
            }
            if x == 0 {
                Some(0)
            } else if y >= 63 {
                None
            } else {
                let shifted = x << y;
                (shifted >> y == x).then_some(shifted)
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return raise(ExcType::ValueError, "negative shift count");
            }
            Some(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })
        }
        BinOp::BitAnd => Some(x & y),
        BinOp::BitOr => Some(x | y),
        BinOp::BitXor => Some(x ^ y),
    };
    match result {
        Some(v) => Ok(Value::Int(v)),
        None => integer::big_op(op, &BigInt::from(x), &BigInt::from(y)),
    }
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

pub fn int_pow(base: i64, exp: i64) -> RuntimeResult<Value> {
    if exp < 0 {
        if base == 0 {
            return raise(
                ExcType::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            );
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let result = match base {
        0 | 1 => Some(if exp == 0 { 1 } else { base }),
        -1 => Some(if exp % 2 == 0 { 1 } else { -1 }),
        _ if exp > u32::MAX as i64 => None,
        _ => base.checked_pow(exp as u32),
    };
    match result {
        Some(v) => Ok(Value::Int(v)),
        None => integer::pow(&BigInt::from(base), &BigInt::from(exp)),
    }
}

fn float_op(op: BinOp, x: f64, y: f64, left: &Value, right: &Value) -> RuntimeResult<Value> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float division by zero");
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float floor division by zero");
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float modulo by zero");
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => return float_pow(x, y),
        _ => return unsupported(op, left, right),
    };
    Ok(Value::Float(value))
}

pub fn float_pow(x: f64, y: f64) -> RuntimeResult<Value> {
    if x == 0.0 && y < 0.0 {
        return raise(
            ExcType::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        );
    }
    if x < 0.0 && y.fract() != 0.0 {
        return raise(
            ExcType::ValueError,
            "negative number cannot be raised to a fractional power",
        );
    }
    let result = x.powf(y);
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return raise(ExcType::OverflowError, "numerical result out of range");
    }
    Ok(Value::Float(result))
}

pub fn unary_op(op: UnaryOp, operand: &Value) -> RuntimeResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::BigInt(big)) => Ok(integer::normalize(-BigInt::clone(big))),
        (UnaryOp::Neg, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or_default();
            Ok(match i.checked_neg() {
                Some(negated) => Value::Int(negated),
                None => integer::normalize(-BigInt::from(i)),
            })
        }
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, Value::BigInt(big)) => Ok(Value::BigInt(big.clone())),
        (UnaryOp::Invert, Value::BigInt(big)) => {
            Ok(integer::normalize(-BigInt::clone(big) - BigInt::from(1)))
        }
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or_default())),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or_default())),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            raise(
                ExcType::TypeError,
                format!("bad operand type for unary {}: '{}'", symbol, v.type_name()),
            )
        }
    }
}

/// Ordering used by `<`, `sorted`, `min` and `max`. `None` means the
/// operands are unordered (a NaN is involved).
pub fn order(left: &Value, right: &Value, symbol: &str) -> RuntimeResult<Option<Ordering>> {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
            (Num::Int(x), Num::Float(y)) => (x as f64).partial_cmp(&y),
            (Num::Float(x), Num::Int(y)) => x.partial_cmp(&(y as f64)),
            (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
            (Num::Big(x), Num::Float(y)) => integer::cmp_float(x, y),
            (Num::Float(x), Num::Big(y)) => integer::cmp_float(y, x).map(Ordering::reverse),
            (x, y) => Some(x.to_big().cmp(&y.to_big())),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            order_sequences(&a, &b, symbol)
        }
        (Value::Tuple(a), Value::Tuple(b)) => order_sequences(a, b, symbol),
        _ => raise(
            ExcType::TypeError,
            format!(
                "'{}' not supported between instances of '{}' and '{}'",
                symbol,
                left.type_name(),
                right.type_name()
            ),
        ),
    }
}

fn order_sequences(a: &[Value], b: &[Value], symbol: &str) -> RuntimeResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !(x.is(y) || x.py_eq(y)) {
            return order(x, y, symbol);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

fn set_compare(op: CmpOp, left: &Value, right: &Value) -> Option<bool> {
    let (Value::Set(a), Value::Set(b)) = (left, right) else {
        return None;
    };
    let (a, b) = (a.borrow(), b.borrow());
    let subset = a.keys().all(|k| b.contains_key(k));
    let superset = b.keys().all(|k| a.contains_key(k));
    Some(match op {
        CmpOp::Lt => subset && a.len() < b.len(),
        CmpOp::LtE => subset,
        CmpOp::Gt => superset && a.len() > b.len(),
        CmpOp::GtE => superset,
        _ => return None,
    })
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
    match op {
        CmpOp::Eq => Ok(left.py_eq(right)),
        CmpOp::NotEq => Ok(!left.py_eq(right)),
        CmpOp::Is => Ok(left.is(right)),
        CmpOp::IsNot => Ok(!left.is(right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => Ok(!contains(right, left)?),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            if let Some(result) = set_compare(op, left, right) {
                return Ok(result);
            }
            let Some(ordering) = order(left, right, op.symbol())? else {
                return Ok(false);
            };
            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtE => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> RuntimeResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => raise(
                ExcType::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            ),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.is(item) || v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.is(item) || v.py_eq(item))),
        Value::Dict(dict) => Ok(dict.borrow().contains_key(&item.hash_key()?)),
        Value::Set(set) => Ok(set.borrow().contains_key(&item.hash_key()?)),
        Value::Range(range) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => range.contains(*f as i64),
            other => other.as_int().map(|i| range.contains(i)).unwrap_or(false),
        }),
        other => raise(
            ExcType::TypeError,
            format!("argument of type '{}' is not iterable", other.type_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1_000;

    fn eval(op: BinOp, a: Value, b: Value) -> RuntimeResult<Value> {
        binary_op(op, &a, &b, MAX)
    }

    fn err_text(result: RuntimeResult<Value>) -> String {
        match result {
            Err(super::super::fault::Unwind::Raise(e)) => e.to_string(),
            other => panic!("expected exception, got {:?}", other.map(|v| v.repr())),
        }
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(eval(BinOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap().repr(), "-4");
        assert_eq!(eval(BinOp::Mod, Value::Int(-7), Value::Int(2)).unwrap().repr(), "1");
        assert_eq!(eval(BinOp::Mod, Value::Int(7), Value::Int(-2)).unwrap().repr(), "-1");
        assert_eq!(eval(BinOp::Mod, Value::Float(-1.0), Value::Int(3)).unwrap().repr(), "2.0");
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            err_text(eval(BinOp::Div, Value::Int(1), Value::Int(0))),
            "ZeroDivisionError: division by zero"
        );
        assert_eq!(
            err_text(eval(BinOp::Mod, Value::Float(1.0), Value::Float(0.0))),
            "ZeroDivisionError: float modulo by zero"
        );
    }

    #[test]
    fn test_integers_promote_past_64_bits() {
        let doubled = eval(BinOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap();
        assert_eq!(doubled.repr(), "18446744073709551614");
        assert_eq!(eval(BinOp::Pow, Value::Int(2), Value::Int(-1)).unwrap().repr(), "0.5");
        assert_eq!(
            eval(BinOp::Pow, Value::Int(2), Value::Int(100)).unwrap().repr(),
            "1267650600228229401496703205376"
        );
        assert_eq!(
            eval(BinOp::LShift, Value::Int(1), Value::Int(64)).unwrap().repr(),
            "18446744073709551616"
        );
        let back = eval(BinOp::Sub, doubled.clone(), Value::Int(i64::MAX)).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
        assert_eq!(unary_op(UnaryOp::Neg, &Value::Int(i64::MIN)).unwrap().repr(), "9223372036854775808");
        assert_eq!(eval(BinOp::Div, doubled.clone(), Value::Int(2)).unwrap().repr(), "9.223372036854776e+18");
        assert!(compare(CmpOp::Gt, &doubled, &Value::Int(i64::MAX)).unwrap());
        assert!(compare(CmpOp::Lt, &doubled, &Value::Float(1e20)).unwrap());
        assert!(err_text(eval(BinOp::Pow, Value::Int(10), Value::Int(10_000_000))).starts_with("MemoryError"));
        assert!(err_text(eval(BinOp::Mul, Value::from("ab"), doubled)).starts_with("MemoryError"));
    }

    #[test]
    fn test_sequence_ops() {
        assert_eq!(eval(BinOp::Mul, Value::from("ab"), Value::Int(3)).unwrap().repr(), "'ababab'");
        assert_eq!(
            eval(BinOp::Add, Value::list(vec![Value::Int(1)]), Value::list(vec![Value::Int(2)]))
                .unwrap()
                .repr(),
            "[1, 2]"
        );
        assert!(err_text(eval(BinOp::Mul, Value::from("ab"), Value::Int(10_000))).starts_with("MemoryError"));
        assert_eq!(
            err_text(eval(BinOp::Add, Value::from("a"), Value::Int(1))),
            "TypeError: can only concatenate str (not \"int\") to str"
        );
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::Lt, &Value::from("abc"), &Value::from("abd")).unwrap());
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert!(compare(CmpOp::Lt, &a, &b).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::from("x")).is_err());
    }

    #[test]
    fn test_membership() {
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&Value::list(vec![Value::Int(1)]), &Value::Float(1.0)).unwrap());
        assert!(contains(&Value::Int(3), &Value::Int(1)).is_err());
    }
}
