//! Restricted compiler: source text in, executable unit or violations out.
//!
//! Compilation is all-or-nothing. Syntax errors stop at the first problem;
//! forbidden constructs and policy breaches are all collected so the caller
//! sees every reason a submission was rejected.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod policy;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ast::Stmt;

/// A single reason a submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub line: u32,
    pub message: String,
}

impl Violation {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    /// A syntax error. Rendered as `Line N: SyntaxError: <detail>`.
    pub fn syntax(line: u32, detail: impl Into<String>) -> Self {
        Self::new(line, format!("SyntaxError: {}", detail.into()))
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// Every violation found in one submission, ordered by line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Violation> {
        self.0
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

/// A program that passed every compile-time check.
///
/// Immutable and `Send + Sync`; the executor moves a clone onto the worker
/// thread.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    body: Arc<Vec<Stmt>>,
}

impl CompiledUnit {
    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    /// Number of top-level statements.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Compiles source text under the reduced grammar and import policy.
#[derive(Debug, Clone)]
pub struct Compiler {
    allowed_modules: BTreeSet<String>,
    max_nesting_depth: usize,
}

impl Compiler {
    pub fn new<I, S>(allowed_modules: I, max_nesting_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_modules: allowed_modules
                .into_iter()
                .map(|m| m.as_ref().to_string())
                .collect(),
            max_nesting_depth,
        }
    }

    pub fn allowed_modules(&self) -> &BTreeSet<String> {
        &self.allowed_modules
    }

    pub fn compile(&self, source: &str) -> Result<CompiledUnit, Violations> {
        let (body, mut violations) = parser::parse_program(source, self.max_nesting_depth)
            .map_err(|syntax| Violations(vec![syntax]))?;

        violations.extend(policy::check(&body, &self.allowed_modules));
        if !violations.is_empty() {
            violations.sort_by_key(|v| v.line);
            tracing::debug!(count = violations.len(), "compilation rejected");
            return Err(Violations(violations));
        }

        tracing::debug!(statements = body.len(), "compilation succeeded");
        Ok(CompiledUnit {
            body: Arc::new(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> Compiler {
        Compiler::new(["math", "random", "string", "json", "sys"], 100)
    }

    #[test]
    fn test_compile_accepts_plain_program() {
        let unit = compiler()
            .compile("total = 0\nfor i in range(10):\n    total += i\nprint(total)\n")
            .unwrap();
        assert_eq!(unit.len(), 3);
    }

    #[test]
    fn test_empty_source_compiles() {
        assert!(compiler().compile("").unwrap().is_empty());
        assert!(compiler().compile("\n# just a comment\n").unwrap().is_empty());
    }

    #[test]
    fn test_violations_are_ordered_and_joined() {
        let err = compiler()
            .compile("import os\nx = 1\nclass A:\n    pass\ny = __import__('os')\n")
            .unwrap_err();
        let text = err.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Line 1:"));
        assert!(lines[0].contains("os"));
        assert!(lines[1].starts_with("Line 3:"));
        assert!(lines[2].starts_with("Line 5:"));
    }

    #[test]
    fn test_syntax_error_format() {
        let err = compiler().compile("def f(:\n    pass").unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.to_string().starts_with("Line 1: SyntaxError:"));
    }

    #[test]
    fn test_compiled_unit_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledUnit>();
    }
}
