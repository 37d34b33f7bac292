//! Capability environments: everything a unit can reach by name.
//!
//! The set is built once per allowed-module list and shared between
//! executions behind an `Arc`. It holds only static references, so it is
//! `Send + Sync` and never carries per-run state.

use std::collections::BTreeMap;
use std::fmt;

use super::builtins::FUNCTIONS;
use super::fault::ExcType;
use super::modules::{self, ModuleDef};
use super::value::{BuiltinFunction, TypeKind, Value};

/// One name a program may reference without defining it.
#[derive(Clone, Copy)]
pub enum Capability {
    Function(&'static BuiltinFunction),
    Type(TypeKind),
    Module(&'static ModuleDef),
}

impl Capability {
    pub fn to_value(&self) -> Value {
        match *self {
            Capability::Function(f) => Value::Builtin(f),
            Capability::Type(kind) => Value::Type(kind),
            Capability::Module(m) => Value::Module(m),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Function(func) => write!(f, "Function({})", func.name),
            Capability::Type(kind) => write!(f, "Type({})", kind.name()),
            Capability::Module(module) => write!(f, "Module({})", module.name),
        }
    }
}

/// The allow-listed namespace visible to a unit.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    entries: BTreeMap<&'static str, Capability>,
    modules: BTreeMap<&'static str, &'static ModuleDef>,
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("names", &self.entries.len())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilitySet {
    /// Safe builtins and exception types, plus every allowed module the
    /// registry can resolve. Unknown modules are skipped with a warning.
    pub fn build<I, S>(allowed_modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for function in FUNCTIONS {
            set.entries.insert(function.name, Capability::Function(function));
        }
        for &kind in TypeKind::BUILTIN {
            set.entries.insert(kind.name(), Capability::Type(kind));
        }
        for &kind in ExcType::ALL {
            set.entries
                .insert(kind.name(), Capability::Type(TypeKind::Exception(kind)));
        }

        for name in allowed_modules {
            let name = name.as_ref();
            match modules::resolve(name) {
                Some(module) => {
                    set.entries.insert(module.name, Capability::Module(module));
                    set.modules.insert(module.name, module);
                }
                None => {
                    tracing::warn!(module = name, "allowed module could not be resolved; omitting it");
                }
            }
        }

        tracing::debug!(
            names = set.entries.len(),
            modules = set.modules.len(),
            "capability environment built"
        );
        set
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// A resolved module, for `import`.
    pub fn module(&self, name: &str) -> Option<&'static ModuleDef> {
        self.modules.get(name).copied()
    }

    /// Names of the modules that resolved.
    pub fn allowed_modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.keys().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shorthand for [`CapabilitySet::build`].
pub fn build_environment<I, S>(allowed_modules: I) -> CapabilitySet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    CapabilitySet::build(allowed_modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_and_exceptions_present() {
        let env = build_environment(Vec::<String>::new());
        for name in ["print", "len", "sorted", "int", "dict", "range", "ZeroDivisionError", "Exception"] {
            assert!(env.contains(name), "missing {}", name);
        }
        for name in ["eval", "exec", "open", "__import__", "getattr", "math"] {
            assert!(!env.contains(name), "unexpected {}", name);
        }
        assert_eq!(env.allowed_modules().count(), 0);
    }

    #[test]
    fn test_unknown_modules_are_omitted() {
        let env = CapabilitySet::build(["math", "os", "json"]);
        let modules: Vec<&str> = env.allowed_modules().collect();
        assert_eq!(modules, vec!["json", "math"]);
        assert!(env.module("os").is_none());
        assert!(matches!(env.get("math"), Some(Capability::Module(_))));
        assert!(matches!(env.get("math").map(Capability::to_value), Some(Value::Module(_))));
    }

    #[test]
    fn test_environment_is_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CapabilitySet>();
    }
}
