//! Integers wider than 64 bits.
//!
//! Every integer that fits in an `i64` is a [`Value::Int`]. Results that do
//! not fit are promoted to [`Value::BigInt`] and demoted again as soon as
//! they fit, so the two representations never overlap: a `BigInt` value is
//! always outside the `i64` range.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};

use crate::compiler::ast::BinOp;

use super::fault::{raise, ExcType, RuntimeResult};
use super::value::Value;

/// Largest integer magnitude, in bits, a program may build.
pub const MAX_INT_BITS: u64 = 1 << 20;

/// Wraps `big` in the narrowest representation.
pub fn normalize(big: BigInt) -> Value {
    match big.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::BigInt(Rc::new(big)),
    }
}

/// Exact value of an `int` or `bool`.
pub fn to_big(value: &Value) -> Option<BigInt> {
    match value {
        Value::Int(i) => Some(BigInt::from(*i)),
        Value::Bool(b) => Some(BigInt::from(*b as i64)),
        Value::BigInt(big) => Some(BigInt::clone(big)),
        _ => None,
    }
}

/// Fails with `MemoryError` when a result would need more than
/// [`MAX_INT_BITS`].
pub fn check_bits(bits: u64) -> RuntimeResult<()> {
    if bits > MAX_INT_BITS {
        return raise(
            ExcType::MemoryError,
            format!(
                "integer of {} bits exceeds the limit of {}",
                bits, MAX_INT_BITS
            ),
        );
    }
    Ok(())
}

/// `float(big)`, or `OverflowError` past the float range.
pub fn to_f64(big: &BigInt) -> RuntimeResult<f64> {
    match big.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => raise(ExcType::OverflowError, "int too large to convert to float"),
    }
}

/// The integer a finite, integral float stands for.
pub fn from_integral_f64(f: f64) -> Value {
    if f.abs() < 9.2e18 {
        return Value::Int(f as i64);
    }
    BigInt::from_f64(f).map_or(Value::Int(0), normalize)
}

/// Exact ordering of an integer against a float. `None` when `f` is NaN.
pub fn cmp_float(big: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let whole = BigInt::from_f64(f.trunc())?;
    Some(match big.cmp(&whole) {
        Ordering::Equal => 0.0f64.partial_cmp(&f.fract()).unwrap_or(Ordering::Equal),
        other => other,
    })
}

/// Python floor division and modulo: the remainder takes the divisor's sign.
pub fn floor_divmod(x: &BigInt, y: &BigInt) -> (BigInt, BigInt) {
    let quotient = x / y;
    let remainder = x % y;
    if !remainder.is_zero() && remainder.is_negative() != y.is_negative() {
        (quotient - BigInt::one(), remainder + y)
    } else {
        (quotient, remainder)
    }
}

/// Integer arithmetic at full precision.
pub fn big_op(op: BinOp, x: &BigInt, y: &BigInt) -> RuntimeResult<Value> {
    Ok(match op {
        BinOp::Add => normalize(x + y),
        BinOp::Sub => normalize(x - y),
        BinOp::Mul => {
            check_bits(x.bits() + y.bits())?;
            normalize(x * y)
        }
        BinOp::Div => {
            if y.is_zero() {
                return raise(ExcType::ZeroDivisionError, "division by zero");
            }
            Value::Float(true_divide(x, y)?)
        }
        BinOp::FloorDiv => {
            if y.is_zero() {
                return raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
            }
            normalize(floor_divmod(x, y).0)
        }
        BinOp::Mod => {
            if y.is_zero() {
                return raise(ExcType::ZeroDivisionError, "integer modulo by zero");
            }
            normalize(floor_divmod(x, y).1)
        }
        BinOp::Pow => return pow(x, y),
        BinOp::LShift => {
            if y.is_negative() {
                return raise(ExcType::ValueError, "negative shift count");
            }
            if x.is_zero() {
                return Ok(Value::Int(0));
            }
            let shift = match y.to_u64() {
                Some(shift) if shift <= MAX_INT_BITS => shift,
                _ => return check_bits(u64::MAX).map(|_| Value::Int(0)),
            };
            check_bits(x.bits() + shift)?;
            normalize(x << shift as usize)
        }
        BinOp::RShift => {
            if y.is_negative() {
                return raise(ExcType::ValueError, "negative shift count");
            }
            match y.to_u64().filter(|shift| *shift < x.bits()) {
                Some(shift) => normalize(x >> shift as usize),
                None => Value::Int(if x.is_negative() { -1 } else { 0 }),
            }
        }
        BinOp::BitAnd => normalize(x & y),
        BinOp::BitOr => normalize(x | y),
        BinOp::BitXor => normalize(x ^ y),
    })
}

fn true_divide(x: &BigInt, y: &BigInt) -> RuntimeResult<f64> {
    if let (Some(a), Some(b)) = (x.to_f64(), y.to_f64()) {
        if a.is_finite() && b.is_finite() {
            return Ok(a / b);
        }
    }
    if x.bits() > y.bits() + 64 {
        return match (x / y).to_f64() {
            Some(f) if f.is_finite() => Ok(f),
            _ => raise(
                ExcType::OverflowError,
                "integer division result too large for a float",
            ),
        };
    }
    // Both operands are huge and of similar size; scale them into range.
    let shift = (x.bits().max(y.bits()) - 1000) as usize;
    let a = (x >> shift).to_f64().unwrap_or(0.0);
    let b = (y >> shift).to_f64().unwrap_or(f64::INFINITY);
    Ok(a / b)
}

/// `base ** exp` for integers. Negative exponents give a float.
pub fn pow(base: &BigInt, exp: &BigInt) -> RuntimeResult<Value> {
    if exp.is_negative() {
        if base.is_zero() {
            return raise(
                ExcType::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            );
        }
        let b = base.to_f64().unwrap_or(f64::INFINITY);
        let e = exp.to_f64().unwrap_or(f64::NEG_INFINITY);
        return Ok(Value::Float(b.powf(e)));
    }
    if base.is_zero() || exp.is_zero() {
        return Ok(Value::Int(if exp.is_zero() { 1 } else { 0 }));
    }
    if base.magnitude().bits() == 1 {
        // 1 or -1
        let odd = exp.bit(0);
        return Ok(Value::Int(if base.is_negative() && odd { -1 } else { 1 }));
    }
    let exp = match exp.to_u32() {
        Some(e) if u64::from(e) <= MAX_INT_BITS => e,
        _ => return check_bits(u64::MAX).map(|_| Value::Int(0)),
    };
    check_bits((base.bits() - 1).saturating_mul(u64::from(exp)))?;
    Ok(normalize(base.pow(exp)))
}

/// Parses digits already stripped of sign, prefix and separators.
pub fn parse_digits(digits: &str, radix: u32) -> RuntimeResult<Option<BigInt>> {
    let bits_per_digit = f64::from(radix).log2();
    check_bits((digits.len() as f64 * bits_per_digit) as u64)?;
    Ok(BigInt::parse_bytes(digits.as_bytes(), radix))
}

/// Digits of `|value|` in `radix` (2, 8, 10 or 16, lowercase).
pub fn magnitude_digits(value: &Value, radix: u32) -> String {
    match value {
        Value::BigInt(big) => big.magnitude().to_str_radix(radix),
        other => {
            let m = other.as_int().unwrap_or_default().unsigned_abs();
            match radix {
                2 => format!("{:b}", m),
                8 => format!("{:o}", m),
                16 => format!("{:x}", m),
                _ => m.to_string(),
            }
        }
    }
}

/// Whether an integer value is below zero.
pub fn is_negative(value: &Value) -> bool {
    match value {
        Value::BigInt(big) => big.is_negative(),
        other => other.as_int().is_some_and(|i| i < 0),
    }
}

/// `math.gcd` at full precision.
pub fn gcd(mut a: BigInt, mut b: BigInt) -> BigInt {
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(text: &str) -> BigInt {
        text.parse().unwrap()
    }

    #[test]
    fn test_results_demote_when_they_fit() {
        let wide = big("9223372036854775808");
        assert!(matches!(normalize(wide.clone()), Value::BigInt(_)));
        assert!(matches!(normalize(wide - BigInt::one()), Value::Int(i64::MAX)));
    }

    #[test]
    fn test_floor_divmod_signs() {
        let (q, r) = floor_divmod(&big("-100000000000000000000"), &BigInt::from(7));
        assert_eq!(q, big("-14285714285714285715"));
        assert_eq!(r, BigInt::from(5));
    }

    #[test]
    fn test_pow() {
        let value = pow(&BigInt::from(2), &BigInt::from(100)).unwrap();
        assert_eq!(value.repr(), "1267650600228229401496703205376");
        assert!(matches!(pow(&BigInt::from(-1), &big("100000000000000000001")), Ok(Value::Int(-1))));
        assert!(pow(&BigInt::from(3), &BigInt::from(10_000_000)).is_err());
    }

    #[test]
    fn test_shifts() {
        let value = big_op(BinOp::LShift, &BigInt::from(1), &BigInt::from(64)).unwrap();
        assert_eq!(value.repr(), "18446744073709551616");
        let back = big_op(BinOp::RShift, &big("18446744073709551616"), &BigInt::from(60)).unwrap();
        assert!(matches!(back, Value::Int(16)));
        let sign = big_op(BinOp::RShift, &big("-18446744073709551616"), &BigInt::from(500)).unwrap();
        assert!(matches!(sign, Value::Int(-1)));
    }

    #[test]
    fn test_true_division_of_huge_operands() {
        let ten = BigInt::from(10);
        let a = ten.pow(400);
        let b = ten.pow(399);
        let ratio = true_divide(&a, &b).unwrap();
        assert!((ratio - 10.0).abs() < 1e-9);
        assert!(true_divide(&a, &BigInt::from(3)).is_err());
    }

    #[test]
    fn test_cmp_float() {
        let wide = big("100000000000000000000");
        assert_eq!(cmp_float(&wide, 1e20), Some(Ordering::Equal));
        assert_eq!(cmp_float(&wide, 1e19), Some(Ordering::Greater));
        assert_eq!(cmp_float(&wide, f64::INFINITY), Some(Ordering::Less));
        assert_eq!(cmp_float(&wide, f64::NAN), None);
    }
}
