//! Runtime values.
//!
//! Values live on the worker thread only, so containers use `Rc` and
//! `RefCell`. Container drops are iterative, so a deeply nested list built
//! by a loop cannot overflow the stack when it is freed.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use super::fault::{raise, ExcType, Exception, RuntimeResult};
use super::integer;
use super::interpreter::Interpreter;
use super::iterators::{IterKind, LazyIter};
use super::modules::ModuleDef;
use crate::compiler::ast::FunctionDecl;

/// Deepest nesting that `repr`, hashing and structural equality descend.
pub const MAX_STRUCTURAL_DEPTH: usize = 256;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range.
    BigInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<List>),
    Tuple(Rc<Tuple>),
    Dict(Rc<Dict>),
    Set(Rc<Set>),
    Range(Range),
    Function(Rc<Function>),
    Builtin(&'static BuiltinFunction),
    Method(Rc<BoundMethod>),
    Type(TypeKind),
    Module(&'static ModuleDef),
    Exception(Rc<Exception>),
    Stream(StreamKind),
    /// A generator or one of the lazy builtin iterators.
    Iterator(Rc<LazyIter>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<BigInt> for Value {
    fn from(big: BigInt) -> Self {
        integer::normalize(big)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

// ----------------------------------------------------------------------
// Containers
// ----------------------------------------------------------------------

pub struct List(RefCell<Vec<Value>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        List(RefCell::new(items))
    }
}

impl Deref for List {
    type Target = RefCell<Vec<Value>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for List {
    fn drop(&mut self) {
        drop_values(std::mem::take(self.0.get_mut()));
    }
}

pub struct Tuple(Vec<Value>);

impl Tuple {
    pub fn new(items: Vec<Value>) -> Self {
        Tuple(items)
    }
}

impl Deref for Tuple {
    type Target = [Value];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Tuple {
    fn drop(&mut self) {
        drop_values(std::mem::take(&mut self.0));
    }
}

pub type DictEntries = IndexMap<HashKey, (Value, Value)>;

/// Insertion-ordered mapping. Each entry keeps the original key object
/// next to its normalized hash key.
pub struct Dict(RefCell<DictEntries>);

impl Dict {
    pub fn new(entries: DictEntries) -> Self {
        Dict(RefCell::new(entries))
    }
}

impl Deref for Dict {
    type Target = RefCell<DictEntries>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let entries = std::mem::take(self.0.get_mut());
        drop_values(entries.into_values().flat_map(|(k, v)| [k, v]).collect());
    }
}

pub type SetEntries = IndexMap<HashKey, Value>;

pub struct Set(RefCell<SetEntries>);

impl Set {
    pub fn new(entries: SetEntries) -> Self {
        Set(RefCell::new(entries))
    }
}

impl Deref for Set {
    type Target = RefCell<SetEntries>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        let entries = std::mem::take(self.0.get_mut());
        drop_values(entries.into_values().collect());
    }
}

/// Frees values without recursing: containers whose last reference is
/// being dropped are emptied onto a work stack first.
pub(crate) fn drop_values(mut stack: Vec<Value>) {
    while let Some(value) = stack.pop() {
        match value {
            Value::List(rc) => {
                if let Ok(list) = Rc::try_unwrap(rc) {
                    stack.append(&mut list.0.borrow_mut());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    stack.append(&mut tuple.0);
                }
            }
            Value::Dict(rc) => {
                if let Ok(dict) = Rc::try_unwrap(rc) {
                    let entries = std::mem::take(&mut *dict.0.borrow_mut());
                    stack.extend(entries.into_values().flat_map(|(k, v)| [k, v]));
                }
            }
            Value::Set(rc) => {
                if let Ok(set) = Rc::try_unwrap(rc) {
                    let entries = std::mem::take(&mut *set.0.borrow_mut());
                    stack.extend(entries.into_values());
                }
            }
            Value::Iterator(rc) => {
                if let Ok(mut iter) = Rc::try_unwrap(rc) {
                    stack.append(&mut iter.take_values());
                }
            }
            other => drop(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        n as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> i64 {
        (self.start as i128 + index as i128 * self.step as i128) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (v, start, step) = (value as i128, self.start as i128, self.step as i128);
        let in_bounds = if step > 0 {
            v >= start && v < self.stop as i128
        } else {
            v <= start && v > self.stop as i128
        };
        in_bounds && (v - start) % step == 0
    }
}

// ----------------------------------------------------------------------
// Callables
// ----------------------------------------------------------------------

/// A variable scope of a running (or captured) function call.
pub struct Scope {
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
    /// Set once a closure has captured this scope.
    pub captured: Cell<bool>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent,
            captured: Cell::new(false),
        }
    }
}

/// A user-defined function or lambda.
pub struct Function {
    pub decl: Arc<FunctionDecl>,
    /// Defaults for the trailing positional parameters that declare one.
    pub defaults: Vec<Value>,
    pub kw_defaults: Vec<Option<Value>>,
    pub closure: Option<Rc<Scope>>,
}

pub type NativeFn = fn(&mut Interpreter, Args) -> RuntimeResult<Value>;

pub struct BuiltinFunction {
    pub name: &'static str,
    pub call: NativeFn,
}

/// `receiver.name` for a native method, resolved when called.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Call arguments after `*` and `**` expansion.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Fails if any keyword argument was not consumed.
    pub fn no_keywords(&self, function: &str) -> RuntimeResult<()> {
        match self.keywords.first() {
            None => Ok(()),
            Some((name, _)) => raise(
                ExcType::TypeError,
                format!("{}() got an unexpected keyword argument '{}'", function, name),
            ),
        }
    }

    /// Checks the positional count and that no keywords remain, then hands
    /// back the positional arguments.
    pub fn expect(self, function: &str, min: usize, max: usize) -> RuntimeResult<Vec<Value>> {
        self.no_keywords(function)?;
        let given = self.positional.len();
        if given < min || given > max {
            let (qualifier, count) = if min == max {
                ("exactly", min)
            } else if given < min {
                ("at least", min)
            } else {
                ("at most", max)
            };
            let noun = if count == 1 { "argument" } else { "arguments" };
            return raise(
                ExcType::TypeError,
                format!(
                    "{}() takes {} {} {} ({} given)",
                    function, qualifier, count, noun, given
                ),
            );
        }
        Ok(self.positional)
    }
}

// ----------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Function,
    BuiltinFunction,
    Method,
    Type,
    Module,
    Stream,
    Iterator(IterKind),
    Exception(ExcType),
}

impl TypeKind {
    /// Types reachable as builtin names.
    pub const BUILTIN: &'static [TypeKind] = &[
        TypeKind::Bool,
        TypeKind::Int,
        TypeKind::Float,
        TypeKind::Str,
        TypeKind::List,
        TypeKind::Tuple,
        TypeKind::Dict,
        TypeKind::Set,
        TypeKind::Range,
        TypeKind::Type,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "builtin_method",
            TypeKind::Type => "type",
            TypeKind::Module => "module",
            TypeKind::Stream => "TextIOWrapper",
            TypeKind::Iterator(kind) => kind.name(),
            TypeKind::Exception(kind) => kind.name(),
        }
    }

    /// `issubclass(self, other)` for the builtin hierarchy.
    pub fn is_subtype_of(self, other: TypeKind) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (TypeKind::Bool, TypeKind::Int) => true,
            (TypeKind::Exception(a), TypeKind::Exception(b)) => a.is_subclass_of(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

// ----------------------------------------------------------------------
// Hashing
// ----------------------------------------------------------------------

/// Normalized dictionary/set key. Numbers that compare equal (`1`, `1.0`,
/// `True`) map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    BigInt(Rc<BigInt>),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Type(TypeKind),
    Identity(usize),
}

impl Value {
    pub fn hash_key(&self) -> RuntimeResult<HashKey> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> RuntimeResult<HashKey> {
        if depth > MAX_STRUCTURAL_DEPTH {
            return raise(ExcType::RecursionError, "maximum recursion depth exceeded while hashing");
        }
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::BigInt(big) => HashKey::BigInt(big.clone()),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 {
                    match integer::from_integral_f64(*f) {
                        Value::BigInt(big) => HashKey::BigInt(big),
                        other => HashKey::Int(other.as_int().unwrap_or_default()),
                    }
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(|v| v.hash_key_at(depth + 1))
                    .collect::<RuntimeResult<_>>()?,
            ),
            Value::Type(kind) => HashKey::Type(*kind),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as *const () as usize),
            Value::Builtin(b) => HashKey::Identity(*b as *const BuiltinFunction as usize),
            Value::Module(m) => HashKey::Identity(*m as *const ModuleDef as usize),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as *const () as usize),
            Value::Iterator(i) => HashKey::Identity(Rc::as_ptr(i) as *const () as usize),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Range(_) | Value::Method(_) | Value::Stream(_) => {
                return raise(
                    ExcType::TypeError,
                    format!("unhashable type: '{}'", self.type_name()),
                )
            }
        })
    }
}

// ----------------------------------------------------------------------
// Basic protocol
// ----------------------------------------------------------------------

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(List::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Tuple::new(items)))
    }

    pub fn dict(entries: DictEntries) -> Value {
        Value::Dict(Rc::new(Dict::new(entries)))
    }

    pub fn set(entries: SetEntries) -> Value {
        Value::Set(Rc::new(Set::new(entries)))
    }

    pub fn type_of(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) | Value::BigInt(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Function(_) => TypeKind::Function,
            Value::Builtin(_) => TypeKind::BuiltinFunction,
            Value::Method(_) => TypeKind::Method,
            Value::Type(_) => TypeKind::Type,
            Value::Module(_) => TypeKind::Module,
            Value::Stream(_) => TypeKind::Stream,
            Value::Iterator(i) => TypeKind::Iterator(i.kind()),
            Value::Exception(e) => TypeKind::Exception(e.kind),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Integer value of an `int` or `bool` that fits in an `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric value of an `int`, `bool` or `float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            // Past the float range this is an infinity; callers that must
            // refuse that use `integer::to_f64`.
            Value::BigInt(big) => Some(big.to_f64().unwrap_or(if big.is_negative() {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            })),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// `a is b`.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => std::ptr::eq(*a, *b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => a == b,
            _ => false,
        }
    }

    /// `a == b`. Nesting deeper than [`MAX_STRUCTURAL_DEPTH`] falls back to
    /// identity.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> bool {
        if depth > MAX_STRUCTURAL_DEPTH {
            return self.is(other);
        }
        let seq_eq = |a: &[Value], b: &[Value]| {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|(x, y)| x.is(y) || x.eq_at(y, depth + 1))
        };
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(key, (_, va))| {
                        b.get(key)
                            .map(|(_, vb)| va.is(vb) || va.eq_at(vb, depth + 1))
                            .unwrap_or(false)
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            (Value::Range(a), Value::Range(b)) => {
                let (la, lb) = (a.len(), b.len());
                la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step)))
            }
            (Value::Exception(_), _) | (_, Value::Exception(_)) => self.is(other),
            _ => match (self.as_float(), other.as_float()) {
                (Some(_), Some(_)) => numbers_equal(self, other),
                _ => self.is(other),
            },
        }
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Float(f), Value::BigInt(big)) | (Value::BigInt(big), Value::Float(f)) => {
            integer::cmp_float(big, *f) == Some(std::cmp::Ordering::Equal)
        }
        (Value::Float(f), other) | (other, Value::Float(f)) => {
            let i = other.as_int().unwrap_or_default();
            f.fract() == 0.0 && f.abs() < 9.3e18 && *f as i64 == i
        }
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::BigInt(_), _) | (_, Value::BigInt(_)) => false,
        _ => a.as_int() == b.as_int(),
    }
}

// ----------------------------------------------------------------------
// Text conversion
// ----------------------------------------------------------------------

impl Value {
    /// `repr(value)`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out, &mut Vec::new());
        out
    }

    /// `str(value)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message(),
            _ => self.repr(),
        }
    }

    fn repr_into(&self, out: &mut String, seen: &mut Vec<usize>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::BigInt(big) => out.push_str(&big.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&str_repr(s)),
            Value::List(list) => {
                let id = Rc::as_ptr(list) as *const () as usize;
                if seen.contains(&id) || seen.len() > MAX_STRUCTURAL_DEPTH {
                    out.push_str("[...]");
                    return;
                }
                seen.push(id);
                out.push('[');
                let items = list.borrow().clone();
                join_repr(out, &items, seen);
                out.push(']');
                seen.pop();
            }
            Value::Tuple(items) => {
                if seen.len() > MAX_STRUCTURAL_DEPTH {
                    out.push_str("(...)");
                    return;
                }
                seen.push(0);
                out.push('(');
                join_repr(out, items, seen);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                seen.pop();
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const () as usize;
                if seen.contains(&id) || seen.len() > MAX_STRUCTURAL_DEPTH {
                    out.push_str("{...}");
                    return;
                }
                seen.push(id);
                out.push('{');
                let entries: Vec<(Value, Value)> = dict.borrow().values().cloned().collect();
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out, seen);
                    out.push_str(": ");
                    value.repr_into(out, seen);
                }
                out.push('}');
                seen.pop();
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.borrow().values().cloned().collect();
                if items.is_empty() {
                    out.push_str("set()");
                    return;
                }
                out.push('{');
                join_repr(out, &items, seen);
                out.push('}');
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.decl.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Type(kind) => out.push_str(&format!("<class '{}'>", kind.name())),
            Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Value::Exception(e) => {
                out.push_str(e.kind.name());
                out.push('(');
                join_repr(out, &e.args, seen);
                out.push(')');
            }
            Value::Stream(StreamKind::Stdout) => out.push_str("<stdout>"),
            Value::Stream(StreamKind::Stderr) => out.push_str("<stderr>"),
            Value::Iterator(i) => match i.kind() {
                IterKind::Generator => out.push_str("<generator object <genexpr>>"),
                kind => out.push_str(&format!("<{} object>", kind.name())),
            },
        }
    }
}

fn join_repr(out: &mut String, items: &[Value], seen: &mut Vec<usize>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.repr_into(out, seen);
    }
}

/// Shortest round-trip float text, using exponent notation outside
/// `[1e-4, 1e16)` like Python.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let abs = f.abs();
    if !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        text + ".0"
    }
}

/// Python-style string literal: single quotes unless the text contains a
/// single quote and no double quote.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_str_repr_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(str_repr("both ' and \""), "'both \\' and \"'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::list(vec![Value::Int(1), Value::from("x"), Value::None]);
        assert_eq!(list.repr(), "[1, 'x', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(SetEntries::new()).repr(), "set()");
    }

    #[test]
    fn test_self_referencing_list_repr() {
        let list = Rc::new(List::new(vec![Value::Int(1)]));
        list.borrow_mut().push(Value::List(list.clone()));
        assert_eq!(Value::List(list.clone()).repr(), "[1, [...]]");
        list.borrow_mut().clear();
    }

    #[test]
    fn test_numeric_keys_normalize() {
        let one = Value::Int(1).hash_key().unwrap();
        assert_eq!(Value::Float(1.0).hash_key().unwrap(), one);
        assert_eq!(Value::Bool(true).hash_key().unwrap(), one);
        assert!(Value::list(vec![]).hash_key().is_err());

        let wide = Value::from("100000000000000000000".parse::<BigInt>().unwrap());
        assert_eq!(wide.hash_key().unwrap(), Value::Float(1e20).hash_key().unwrap());
        assert!(wide.py_eq(&Value::Float(1e20)));
        assert!(!wide.py_eq(&Value::Int(i64::MAX)));
    }

    #[test]
    fn test_equality() {
        assert!(Value::Int(2).py_eq(&Value::Float(2.0)));
        assert!(!Value::Float(f64::NAN).py_eq(&Value::Float(f64::NAN)));
        assert!(Value::list(vec![Value::Int(1)]).py_eq(&Value::list(vec![Value::Bool(true)])));
        assert!(!Value::Int(1).py_eq(&Value::from("1")));
    }

    #[test]
    fn test_range_len() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let back = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(back.len(), 3);
        assert_eq!(back.get(2), 1);
    }

    #[test]
    fn test_deep_nesting_drops_without_overflow() {
        let mut value = Value::list(Vec::new());
        for _ in 0..200_000 {
            value = Value::list(vec![value]);
        }
        drop(value);
    }
}
