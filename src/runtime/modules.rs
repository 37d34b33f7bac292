//! Static registry of importable modules.
//!
//! Modules are plain tables of native functions and constants. Nothing here
//! touches the host: `random` draws from the interpreter's own generator,
//! `json` works on strings only and `sys` exposes just the two capture
//! streams.

use std::fmt::Write as _;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use rand::seq::SliceRandom;
use rand::Rng;

use super::builtins::{float_arg, int_arg};
use super::fault::{raise, ExcType, RuntimeResult};
use super::integer;
use super::interpreter::Interpreter;
use super::value::{
    float_repr, Args, BuiltinFunction, DictEntries, StreamKind, Value, MAX_STRUCTURAL_DEPTH,
};

pub struct ModuleDef {
    pub name: &'static str,
    pub members: &'static [(&'static str, ModuleMember)],
}

pub enum ModuleMember {
    Function(BuiltinFunction),
    Float(f64),
    Int(i64),
    Str(&'static str),
    Stream(StreamKind),
}

impl ModuleDef {
    pub fn member(&'static self, name: &str) -> Option<Value> {
        let (_, member) = self.members.iter().find(|(n, _)| *n == name)?;
        Some(match member {
            ModuleMember::Function(f) => Value::Builtin(f),
            ModuleMember::Float(f) => Value::Float(*f),
            ModuleMember::Int(i) => Value::Int(*i),
            ModuleMember::Str(s) => Value::from(*s),
            ModuleMember::Stream(kind) => Value::Stream(*kind),
        })
    }
}

const fn function(name: &'static str, call: super::value::NativeFn) -> (&'static str, ModuleMember) {
    (name, ModuleMember::Function(BuiltinFunction { name, call }))
}

static REGISTRY: &[&ModuleDef] = &[&MATH, &RANDOM, &STRING, &JSON, &SYS];

/// Looks a module up by name.
pub fn resolve(name: &str) -> Option<&'static ModuleDef> {
    REGISTRY.iter().copied().find(|module| module.name == name)
}

/// Every module name the registry knows.
pub fn available() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|module| module.name)
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

static MATH: ModuleDef = ModuleDef {
    name: "math",
    members: &[
        ("pi", ModuleMember::Float(std::f64::consts::PI)),
        ("e", ModuleMember::Float(std::f64::consts::E)),
        ("tau", ModuleMember::Float(std::f64::consts::TAU)),
        ("inf", ModuleMember::Float(f64::INFINITY)),
        ("nan", ModuleMember::Float(f64::NAN)),
        function("sqrt", math_sqrt),
        function("pow", math_pow),
        function("exp", math_exp),
        function("log", math_log),
        function("log2", math_log2),
        function("log10", math_log10),
        function("floor", math_floor),
        function("ceil", math_ceil),
        function("trunc", math_trunc),
        function("fabs", math_fabs),
        function("sin", math_sin),
        function("cos", math_cos),
        function("tan", math_tan),
        function("asin", math_asin),
        function("acos", math_acos),
        function("atan", math_atan),
        function("atan2", math_atan2),
        function("hypot", math_hypot),
        function("degrees", math_degrees),
        function("radians", math_radians),
        function("copysign", math_copysign),
        function("factorial", math_factorial),
        function("gcd", math_gcd),
        function("isqrt", math_isqrt),
        function("isclose", math_isclose),
        function("isfinite", math_isfinite),
        function("isinf", math_isinf),
        function("isnan", math_isnan),
    ],
};

fn domain_error<T>() -> RuntimeResult<T> {
    raise(ExcType::ValueError, "math domain error")
}

/// Rejects infinite results of finite inputs the way CPython does.
fn checked_float(result: f64, inputs: &[f64]) -> RuntimeResult<Value> {
    if result.is_infinite() && inputs.iter().all(|x| x.is_finite()) {
        return raise(ExcType::OverflowError, "math range error");
    }
    if result.is_nan() && !inputs.iter().any(|x| x.is_nan()) {
        return domain_error();
    }
    Ok(Value::Float(result))
}

fn unary_math(name: &str, args: Args, f: fn(f64) -> f64) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    let x = float_arg(&args[0], name)?;
    checked_float(f(x), &[x])
}

/// Converts an integral float to `int`, as `floor`, `ceil` and `round` do.
pub(crate) fn float_to_int(f: f64) -> RuntimeResult<Value> {
    if f.is_nan() {
        return raise(ExcType::ValueError, "cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return raise(ExcType::OverflowError, "cannot convert float infinity to integer");
    }
    Ok(integer::from_integral_f64(f.trunc()))
}

fn int_or_float(name: &str, args: Args, round: fn(f64) -> f64) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    if let Some(i) = args[0].as_int() {
        return Ok(Value::Int(i));
    }
    if let Value::BigInt(big) = &args[0] {
        return Ok(Value::BigInt(big.clone()));
    }
    float_to_int(round(float_arg(&args[0], name)?))
}

fn math_sqrt(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("sqrt", 1, 1)?;
    let x = float_arg(&args[0], "sqrt")?;
    if x < 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_pow(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("pow", 2, 2)?;
    let (x, y) = (float_arg(&args[0], "pow")?, float_arg(&args[1], "pow")?);
    if x == 0.0 && y < 0.0 {
        return domain_error();
    }
    checked_float(x.powf(y), &[x, y])
}

fn math_exp(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("exp", args, f64::exp)
}

fn math_log(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("log", 1, 2)?;
    let x = float_arg(&args[0], "log")?;
    if x <= 0.0 {
        return domain_error();
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = float_arg(base, "log")?;
            if base <= 0.0 {
                return domain_error();
            }
            if base == 1.0 {
                return raise(ExcType::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn positive_log(name: &str, args: Args, f: fn(f64) -> f64) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    let x = float_arg(&args[0], name)?;
    if x <= 0.0 {
        return domain_error();
    }
    Ok(Value::Float(f(x)))
}

fn math_log2(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    positive_log("log2", args, f64::log2)
}

fn math_log10(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    positive_log("log10", args, f64::log10)
}

fn math_floor(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    int_or_float("floor", args, f64::floor)
}

fn math_ceil(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    int_or_float("ceil", args, f64::ceil)
}

fn math_trunc(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    int_or_float("trunc", args, f64::trunc)
}

fn math_fabs(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("fabs", args, f64::abs)
}

fn math_sin(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("sin", args, f64::sin)
}

fn math_cos(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("cos", args, f64::cos)
}

fn math_tan(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("tan", args, f64::tan)
}

fn math_asin(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("asin", args, f64::asin)
}

fn math_acos(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("acos", args, f64::acos)
}

fn math_atan(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("atan", args, f64::atan)
}

fn math_atan2(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("atan2", 2, 2)?;
    let (y, x) = (float_arg(&args[0], "atan2")?, float_arg(&args[1], "atan2")?);
    Ok(Value::Float(y.atan2(x)))
}

fn math_hypot(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    args.no_keywords("hypot")?;
    let mut total = 0.0f64;
    for arg in &args.positional {
        let x = float_arg(arg, "hypot")?;
        total = total.hypot(x);
    }
    Ok(Value::Float(total))
}

fn math_degrees(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("degrees", args, f64::to_degrees)
}

fn math_radians(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    unary_math("radians", args, f64::to_radians)
}

fn math_copysign(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("copysign", 2, 2)?;
    let (x, y) = (float_arg(&args[0], "copysign")?, float_arg(&args[1], "copysign")?);
    Ok(Value::Float(x.copysign(y)))
}

fn math_factorial(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("factorial", 1, 1)?;
    let n = int_arg(&args[0], "factorial")?;
    if n < 0 {
        return raise(ExcType::ValueError, "factorial() not defined for negative values");
    }
    let mut result = BigInt::one();
    for k in 2..=n {
        interp.tick()?;
        result *= k;
        integer::check_bits(result.bits())?;
    }
    Ok(integer::normalize(result))
}

fn big_int_arg(value: &Value, function: &str) -> RuntimeResult<BigInt> {
    match integer::to_big(value) {
        Some(big) => Ok(big),
        None => int_arg(value, function).map(BigInt::from),
    }
}

fn math_gcd(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    args.no_keywords("gcd")?;
    let mut result = BigInt::zero();
    for arg in &args.positional {
        result = integer::gcd(result, big_int_arg(arg, "gcd")?);
    }
    Ok(integer::normalize(result))
}

fn math_isqrt(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("isqrt", 1, 1)?;
    let n = big_int_arg(&args[0], "isqrt")?;
    if n.is_negative() {
        return raise(ExcType::ValueError, "isqrt() argument must be nonnegative");
    }
    Ok(integer::normalize(n.sqrt()))
}

fn math_isclose(_: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let rel_tol = match args.take_keyword("rel_tol") {
        Some(v) => float_arg(&v, "isclose")?,
        None => 1e-9,
    };
    let abs_tol = match args.take_keyword("abs_tol") {
        Some(v) => float_arg(&v, "isclose")?,
        None => 0.0,
    };
    let args = args.expect("isclose", 2, 2)?;
    let (a, b) = (float_arg(&args[0], "isclose")?, float_arg(&args[1], "isclose")?);
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return raise(ExcType::ValueError, "tolerances must be non-negative");
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol,
    ))
}

fn float_predicate(name: &str, args: Args, f: fn(f64) -> bool) -> RuntimeResult<Value> {
    let args = args.expect(name, 1, 1)?;
    Ok(Value::Bool(f(float_arg(&args[0], name)?)))
}

fn math_isfinite(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    float_predicate("isfinite", args, f64::is_finite)
}

fn math_isinf(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    float_predicate("isinf", args, f64::is_infinite)
}

fn math_isnan(_: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    float_predicate("isnan", args, f64::is_nan)
}

// ----------------------------------------------------------------------
// random
// ----------------------------------------------------------------------

static RANDOM: ModuleDef = ModuleDef {
    name: "random",
    members: &[
        function("seed", random_seed),
        function("random", random_random),
        function("uniform", random_uniform),
        function("randint", random_randint),
        function("randrange", random_randrange),
        function("choice", random_choice),
        function("shuffle", random_shuffle),
        function("sample", random_sample),
    ],
};

fn random_seed(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("seed", 0, 1)?;
    let seed = match args.first() {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(
            s.bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3)),
        ),
        Some(Value::Float(f)) => Some(f.to_bits()),
        Some(other) => match other.as_int() {
            Some(i) => Some(i as u64),
            None => {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "The only supported seed types are: None, int, float, str. Got {}",
                        other.type_name()
                    ),
                )
            }
        },
    };
    interp.reseed(seed);
    Ok(Value::None)
}

fn random_random(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    args.expect("random", 0, 0)?;
    Ok(Value::Float(interp.rng().gen::<f64>()))
}

fn random_uniform(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("uniform", 2, 2)?;
    let (a, b) = (float_arg(&args[0], "uniform")?, float_arg(&args[1], "uniform")?);
    let r: f64 = interp.rng().gen();
    Ok(Value::Float(a + (b - a) * r))
}

fn random_randint(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("randint", 2, 2)?;
    let (a, b) = (int_arg(&args[0], "randint")?, int_arg(&args[1], "randint")?);
    if a > b {
        return raise(
            ExcType::ValueError,
            format!("empty range in randint({}, {})", a, b),
        );
    }
    Ok(Value::Int(interp.rng().gen_range(a..=b)))
}

fn random_randrange(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("randrange", 1, 3)?;
    let ints = args
        .iter()
        .map(|v| int_arg(v, "randrange"))
        .collect::<RuntimeResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return raise(ExcType::TypeError, "randrange expected at most 3 arguments"),
    };
    if step == 0 {
        return raise(ExcType::ValueError, "zero step for randrange()");
    }
    let range = super::value::Range { start, stop, step };
    if range.is_empty() {
        return raise(
            ExcType::ValueError,
            format!("empty range in randrange({}, {}, {})", start, stop, step),
        );
    }
    let index = interp.rng().gen_range(0..range.len());
    Ok(Value::Int(range.get(index)))
}

fn random_choice(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("choice", 1, 1)?;
    if let Value::Range(range) = &args[0] {
        if range.is_empty() {
            return raise(ExcType::IndexError, "Cannot choose from an empty sequence");
        }
        let index = interp.rng().gen_range(0..range.len());
        return Ok(Value::Int(range.get(index)));
    }
    let items = interp.collect(&args[0])?;
    match items.choose(interp.rng()) {
        Some(item) => Ok(item.clone()),
        None => raise(ExcType::IndexError, "Cannot choose from an empty sequence"),
    }
}

fn random_shuffle(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("shuffle", 1, 1)?;
    let Value::List(list) = &args[0] else {
        return raise(
            ExcType::TypeError,
            format!("'{}' object does not support item assignment", args[0].type_name()),
        );
    };
    let mut items = std::mem::take(&mut *list.borrow_mut());
    items.shuffle(interp.rng());
    *list.borrow_mut() = items;
    Ok(Value::None)
}

fn random_sample(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let keyword_k = args.take_keyword("k");
    let mut args = args.expect("sample", 1, 2)?;
    let k = match keyword_k {
        Some(k) if args.len() == 1 => int_arg(&k, "sample")?,
        None if args.len() == 2 => int_arg(&args.remove(1), "sample")?,
        _ => return raise(ExcType::TypeError, "sample() missing 1 required argument: 'k'"),
    };
    let population = interp.collect(&args[0])?;
    if k < 0 || k as usize > population.len() {
        return raise(ExcType::ValueError, "Sample larger than population or is negative");
    }
    let picked = rand::seq::index::sample(interp.rng(), population.len(), k as usize);
    Ok(Value::list(
        picked.into_iter().map(|i| population[i].clone()).collect(),
    ))
}

// ----------------------------------------------------------------------
// string
// ----------------------------------------------------------------------

static STRING: ModuleDef = ModuleDef {
    name: "string",
    members: &[
        ("ascii_letters", ModuleMember::Str("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ")),
        ("ascii_lowercase", ModuleMember::Str("abcdefghijklmnopqrstuvwxyz")),
        ("ascii_uppercase", ModuleMember::Str("ABCDEFGHIJKLMNOPQRSTUVWXYZ")),
        ("digits", ModuleMember::Str("0123456789")),
        ("hexdigits", ModuleMember::Str("0123456789abcdefABCDEF")),
        ("octdigits", ModuleMember::Str("01234567")),
        ("punctuation", ModuleMember::Str("!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~")),
        ("whitespace", ModuleMember::Str(" \t\n\r\x0b\x0c")),
        (
            "printable",
            ModuleMember::Str(
                "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c",
            ),
        ),
    ],
};

// ----------------------------------------------------------------------
// json
// ----------------------------------------------------------------------

static JSON: ModuleDef = ModuleDef {
    name: "json",
    members: &[function("dumps", json_dumps), function("loads", json_loads)],
};

fn json_dumps(interp: &mut Interpreter, mut args: Args) -> RuntimeResult<Value> {
    let indent = match args.take_keyword("indent") {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(s.to_string()),
        Some(other) => Some(" ".repeat(int_arg(&other, "dumps")?.max(0) as usize)),
    };
    let sort_keys = args
        .take_keyword("sort_keys")
        .map(|v| v.is_truthy())
        .unwrap_or(false);
    let args = args.expect("dumps", 1, 1)?;
    let mut writer = JsonWriter {
        out: String::new(),
        indent,
        sort_keys,
        seen: Vec::new(),
        max_len: interp.max_sequence_len(),
    };
    writer.write(&args[0], 0)?;
    Ok(Value::from(writer.out))
}

struct JsonWriter {
    out: String,
    indent: Option<String>,
    sort_keys: bool,
    seen: Vec<usize>,
    max_len: usize,
}

impl JsonWriter {
    fn newline(&mut self, level: usize) {
        if let Some(indent) = &self.indent {
            self.out.push('\n');
            for _ in 0..level {
                self.out.push_str(indent);
            }
        }
    }

    fn separator(&mut self, level: usize) {
        self.out.push(',');
        if self.indent.is_some() {
            self.newline(level);
        } else {
            self.out.push(' ');
        }
    }

    fn enter(&mut self, id: usize) -> RuntimeResult<()> {
        if self.seen.contains(&id) {
            return raise(ExcType::ValueError, "Circular reference detected");
        }
        if self.seen.len() > MAX_STRUCTURAL_DEPTH {
            return raise(ExcType::RecursionError, "maximum recursion depth exceeded while encoding a JSON object");
        }
        self.seen.push(id);
        Ok(())
    }

    fn write_array(&mut self, id: usize, items: &[Value], level: usize) -> RuntimeResult<()> {
        if items.is_empty() {
            self.out.push_str("[]");
            return Ok(());
        }
        self.enter(id)?;
        self.out.push('[');
        self.newline(level + 1);
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.separator(level + 1);
            }
            self.write(item, level + 1)?;
        }
        self.newline(level);
        self.out.push(']');
        self.seen.pop();
        Ok(())
    }

    fn write(&mut self, value: &Value, level: usize) -> RuntimeResult<()> {
        super::ops::check_len(self.out.len(), self.max_len)?;
        match value {
            Value::None => self.out.push_str("null"),
            Value::Bool(true) => self.out.push_str("true"),
            Value::Bool(false) => self.out.push_str("false"),
            Value::Int(i) => {
                let _ = write!(self.out, "{}", i);
            }
            Value::BigInt(big) => {
                let _ = write!(self.out, "{}", big);
            }
            Value::Float(f) => self.out.push_str(&json_float(*f)),
            Value::Str(s) => json_string(&mut self.out, s),
            Value::List(list) => {
                let items = list.borrow().clone();
                self.write_array(Rc::as_ptr(list) as *const () as usize, &items, level)?;
            }
            Value::Tuple(tuple) => {
                self.write_array(Rc::as_ptr(tuple) as *const () as usize, tuple, level)?;
            }
            Value::Dict(dict) => {
                let mut entries: Vec<(String, Value)> = Vec::new();
                for (key, item) in dict.borrow().values() {
                    entries.push((json_key(key)?, item.clone()));
                }
                if entries.is_empty() {
                    self.out.push_str("{}");
                    return Ok(());
                }
                if self.sort_keys {
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                }
                self.enter(Rc::as_ptr(dict) as *const () as usize)?;
                self.out.push('{');
                self.newline(level + 1);
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.separator(level + 1);
                    }
                    json_string(&mut self.out, key);
                    self.out.push_str(": ");
                    self.write(item, level + 1)?;
                }
                self.newline(level);
                self.out.push('}');
                self.seen.pop();
            }
            other => {
                return raise(
                    ExcType::TypeError,
                    format!("Object of type {} is not JSON serializable", other.type_name()),
                )
            }
        }
        Ok(())
    }
}

fn json_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        float_repr(f)
    }
}

fn json_key(key: &Value) -> RuntimeResult<String> {
    Ok(match key {
        Value::Str(s) => s.to_string(),
        Value::None => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(big) => big.to_string(),
        Value::Float(f) => json_float(*f),
        other => {
            return raise(
                ExcType::TypeError,
                format!(
                    "keys must be str, int, float, bool or None, not {}",
                    other.type_name()
                ),
            )
        }
    })
}

/// ASCII-only JSON string literal.
fn json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}

fn json_loads(interp: &mut Interpreter, args: Args) -> RuntimeResult<Value> {
    let args = args.expect("loads", 1, 1)?;
    let Value::Str(text) = &args[0] else {
        return raise(
            ExcType::TypeError,
            format!(
                "the JSON object must be str, not {}",
                args[0].type_name()
            ),
        );
    };
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => return raise(ExcType::ValueError, err.to_string()),
    };
    from_json(interp, parsed)
}

/// Numbers outside `i64`: integers stay exact, anything else is a float.
fn json_number(text: &str) -> RuntimeResult<Value> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(magnitude) = integer::parse_digits(digits, 10)? {
            return Ok(integer::normalize(if negative { -magnitude } else { magnitude }));
        }
    }
    Ok(Value::Float(text.parse::<f64>().unwrap_or(f64::NAN)))
}

fn from_json(interp: &mut Interpreter, value: serde_json::Value) -> RuntimeResult<Value> {
    interp.tick()?;
    Ok(match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => json_number(&n.to_string())?,
        },
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => Value::list(
            items
                .into_iter()
                .map(|item| from_json(interp, item))
                .collect::<RuntimeResult<_>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut entries = DictEntries::with_capacity(map.len());
            for (key, item) in map {
                let key = Value::from(key);
                entries.insert(key.hash_key()?, (key, from_json(interp, item)?));
            }
            Value::dict(entries)
        }
    })
}

// ----------------------------------------------------------------------
// sys
// ----------------------------------------------------------------------

static SYS: ModuleDef = ModuleDef {
    name: "sys",
    members: &[
        ("stdout", ModuleMember::Stream(StreamKind::Stdout)),
        ("stderr", ModuleMember::Stream(StreamKind::Stderr)),
        ("maxsize", ModuleMember::Int(i64::MAX)),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("math").map(|m| m.name), Some("math"));
        assert!(resolve("os").is_none());
        assert_eq!(available().count(), 5);
    }

    #[test]
    fn test_members() {
        let math = resolve("math").unwrap();
        assert!(matches!(math.member("pi"), Some(Value::Float(f)) if f == std::f64::consts::PI));
        assert!(matches!(math.member("sqrt"), Some(Value::Builtin(b)) if b.name == "sqrt"));
        assert!(math.member("system").is_none());

        let sys = resolve("sys").unwrap();
        assert!(matches!(sys.member("stderr"), Some(Value::Stream(StreamKind::Stderr))));
    }

    #[test]
    fn test_json_string_escapes() {
        let mut out = String::new();
        json_string(&mut out, "a\"b\n\u{e9}\u{1f600}");
        assert_eq!(out, "\"a\\\"b\\n\\u00e9\\ud83d\\ude00\"");
    }

    #[test]
    fn test_json_numbers_outside_i64() {
        assert_eq!(json_number("123456789012345678901234567890").unwrap().repr(), "123456789012345678901234567890");
        assert_eq!(json_number("-18446744073709551616").unwrap().repr(), "-18446744073709551616");
        assert!(matches!(json_number("1.5e300"), Ok(Value::Float(f)) if f == 1.5e300));
    }

    #[test]
    fn test_float_to_int() {
        assert!(matches!(float_to_int(3.0), Ok(Value::Int(3))));
        assert!(float_to_int(f64::NAN).is_err());
        assert!(float_to_int(f64::INFINITY).is_err());
        assert_eq!(float_to_int(1e19).unwrap().repr(), "10000000000000000000");
        assert_eq!(float_to_int(-2.5e20).unwrap().repr(), "-250000000000000000000");
    }
}
