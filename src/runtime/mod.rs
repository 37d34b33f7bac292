//! The runtime half of the sandbox: values, the builtin library, the
//! allow-listed module registry and the evaluator that runs compiled units.
//!
//! Runtime values use `Rc` and never leave the worker thread. Only the
//! [`CapabilitySet`] is shared between threads.

pub mod builtins;
pub mod environment;
pub mod fault;
pub mod format;
pub mod integer;
pub mod interpreter;
pub mod iterators;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod value;

pub use environment::{build_environment, Capability, CapabilitySet};
pub use fault::{ExcType, FaultKind};
pub use interpreter::Interpreter;
