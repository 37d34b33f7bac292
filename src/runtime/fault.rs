//! Exceptions raised inside the interpreter and the fault tags reported to
//! callers.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use super::value::Value;

/// Built-in exception classes. User code cannot define its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcType {
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    StopIteration,
    ImportError,
    MemoryError,
}

impl ExcType {
    pub const ALL: &'static [ExcType] = &[
        ExcType::Exception,
        ExcType::ArithmeticError,
        ExcType::ZeroDivisionError,
        ExcType::OverflowError,
        ExcType::LookupError,
        ExcType::IndexError,
        ExcType::KeyError,
        ExcType::ValueError,
        ExcType::TypeError,
        ExcType::NameError,
        ExcType::UnboundLocalError,
        ExcType::AttributeError,
        ExcType::RuntimeError,
        ExcType::RecursionError,
        ExcType::NotImplementedError,
        ExcType::AssertionError,
        ExcType::StopIteration,
        ExcType::ImportError,
        ExcType::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcType::Exception => "Exception",
            ExcType::ArithmeticError => "ArithmeticError",
            ExcType::ZeroDivisionError => "ZeroDivisionError",
            ExcType::OverflowError => "OverflowError",
            ExcType::LookupError => "LookupError",
            ExcType::IndexError => "IndexError",
            ExcType::KeyError => "KeyError",
            ExcType::ValueError => "ValueError",
            ExcType::TypeError => "TypeError",
            ExcType::NameError => "NameError",
            ExcType::UnboundLocalError => "UnboundLocalError",
            ExcType::AttributeError => "AttributeError",
            ExcType::RuntimeError => "RuntimeError",
            ExcType::RecursionError => "RecursionError",
            ExcType::NotImplementedError => "NotImplementedError",
            ExcType::AssertionError => "AssertionError",
            ExcType::StopIteration => "StopIteration",
            ExcType::ImportError => "ImportError",
            ExcType::MemoryError => "MemoryError",
        }
    }

    pub fn parent(self) -> Option<ExcType> {
        match self {
            ExcType::Exception => None,
            ExcType::ZeroDivisionError | ExcType::OverflowError => Some(ExcType::ArithmeticError),
            ExcType::IndexError | ExcType::KeyError => Some(ExcType::LookupError),
            ExcType::UnboundLocalError => Some(ExcType::NameError),
            ExcType::RecursionError | ExcType::NotImplementedError => Some(ExcType::RuntimeError),
            _ => Some(ExcType::Exception),
        }
    }

    /// `issubclass(self, other)`.
    pub fn is_subclass_of(self, other: ExcType) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

/// A raised (or constructed) exception instance.
#[derive(Debug)]
pub struct Exception {
    pub kind: ExcType,
    pub args: Vec<Value>,
}

impl Exception {
    pub fn new(kind: ExcType, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::from(message)]
        };
        Self { kind, args }
    }

    pub fn with_args(kind: ExcType, args: Vec<Value>) -> Self {
        Self { kind, args }
    }

    /// `str(exc)`: the single argument's `str`, the tuple repr for several
    /// arguments, and the key's repr for `KeyError`.
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] if self.kind == ExcType::KeyError => single.repr(),
            [single] => single.to_str(),
            many => Value::tuple(many.to_vec()).repr(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), message)
        }
    }
}

/// Non-local exits out of evaluation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A Python exception propagating up the stack.
    Raise(Rc<Exception>),
    /// The deadline passed or the run was cancelled. Not catchable and
    /// skips `finally` blocks.
    Interrupted,
}

impl Unwind {
    pub fn new(kind: ExcType, message: impl Into<String>) -> Self {
        Unwind::Raise(Rc::new(Exception::new(kind, message)))
    }
}

pub type RuntimeResult<T> = Result<T, Unwind>;

/// Shorthand for `Err(Unwind::new(kind, message))`.
pub fn raise<T>(kind: ExcType, message: impl Into<String>) -> RuntimeResult<T> {
    Err(Unwind::new(kind, message))
}

/// Why a call did not succeed, as reported in `ExecutionMetadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    /// Rejected by the restricted compiler.
    Violation,
    /// `NameError` or `UnboundLocalError` escaped the program.
    UndefinedName,
    /// Any other uncaught exception.
    Runtime,
    /// The wall-clock deadline passed.
    Timeout,
    /// The program finished but wrote to stderr.
    StderrNonEmpty,
    /// The worker could not be started or died.
    Internal,
}

impl FaultKind {
    /// Classifies an uncaught exception.
    pub fn of_exception(kind: ExcType) -> Self {
        if kind.is_subclass_of(ExcType::NameError) {
            FaultKind::UndefinedName
        } else {
            FaultKind::Runtime
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Violation => "violation",
            FaultKind::UndefinedName => "undefined name",
            FaultKind::Runtime => "runtime",
            FaultKind::Timeout => "timeout",
            FaultKind::StderrNonEmpty => "stderr not empty",
            FaultKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::RecursionError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::LookupError));
    }

    #[test]
    fn test_exception_display() {
        let exc = Exception::new(ExcType::ZeroDivisionError, "division by zero");
        assert_eq!(exc.to_string(), "ZeroDivisionError: division by zero");

        let key = Exception::with_args(ExcType::KeyError, vec![Value::from("missing")]);
        assert_eq!(key.to_string(), "KeyError: 'missing'");

        let bare = Exception::new(ExcType::ValueError, "");
        assert_eq!(bare.to_string(), "ValueError");
    }

    #[test]
    fn test_fault_classification() {
        assert_eq!(
            FaultKind::of_exception(ExcType::UnboundLocalError),
            FaultKind::UndefinedName
        );
        assert_eq!(FaultKind::of_exception(ExcType::TypeError), FaultKind::Runtime);
    }
}
