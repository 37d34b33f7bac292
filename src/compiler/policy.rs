//! Name, attribute and import policy.
//!
//! Runs over the whole parsed program and reports every breach rather than
//! stopping at the first one.

use std::collections::BTreeSet;

use super::ast::*;
use super::Violation;

/// Dynamic-code and introspection primitives that may not be referenced at
/// all, even as a plain name.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "open",
    "input",
    "breakpoint",
    "help",
    "exit",
    "quit",
    "memoryview",
];

pub fn check(body: &[Stmt], allowed_modules: &BTreeSet<String>) -> Vec<Violation> {
    let mut checker = PolicyChecker {
        allowed_modules,
        violations: Vec::new(),
        loop_depth: 0,
        in_function: false,
    };
    checker.block(body);
    checker.violations
}

struct PolicyChecker<'a> {
    allowed_modules: &'a BTreeSet<String>,
    violations: Vec<Violation>,
    loop_depth: usize,
    in_function: bool,
}

impl PolicyChecker<'_> {
    fn report(&mut self, line: u32, message: String) {
        self.violations.push(Violation::new(line, message));
    }

    fn name(&mut self, line: u32, name: &str) {
        if name.starts_with('_') && name != "_" {
            self.report(
                line,
                format!(
                    "\"{}\" is an invalid variable name because it starts with \"_\"",
                    name
                ),
            );
        } else if FORBIDDEN_NAMES.contains(&name) {
            self.report(line, format!("\"{}\" is a forbidden name", name));
        }
    }

    fn attribute(&mut self, line: u32, attr: &str) {
        if attr.starts_with('_') {
            self.report(
                line,
                format!(
                    "\"{}\" is an invalid attribute name because it starts with \"_\"",
                    attr
                ),
            );
        }
    }

    fn module(&mut self, line: u32, module: &str) {
        if !self.allowed_modules.contains(module) {
            self.report(line, format!("import of module \"{}\" is not allowed", module));
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target, "assignment to attributes is not allowed");
                }
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, "assignment to attributes is not allowed");
                self.expr(value);
            }
            StmtKind::AnnotationOnly | StmtKind::Pass => {}
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.violations.push(Violation::syntax(line, "'break' outside loop"));
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.violations
                        .push(Violation::syntax(line, "'continue' not properly in loop"));
                }
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    self.violations.push(Violation::syntax(line, "'return' outside function"));
                }
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.expr(test);
                self.loop_body(body);
                self.block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.target(target, "assignment to attributes is not allowed");
                self.expr(iter);
                self.loop_body(body);
                self.block(orelse);
            }
            StmtKind::FunctionDef(decl) => {
                self.name(line, &decl.name);
                self.function(decl);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.block(body);
                for handler in handlers {
                    if let Some(kind) = &handler.kind {
                        self.expr(kind);
                    }
                    if let Some(name) = &handler.name {
                        self.name(handler.line, name);
                    }
                    self.block(&handler.body);
                }
                self.block(orelse);
                self.block(finalbody);
            }
            StmtKind::Raise { exc, cause } => {
                for e in [exc, cause].into_iter().flatten() {
                    self.expr(e);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.target(target, "deleting attributes is not allowed");
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    self.name(line, name);
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.module(line, &alias.name);
                    for segment in alias.name.split('.') {
                        self.name(line, segment);
                    }
                    if let Some(asname) = &alias.asname {
                        self.name(line, asname);
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                self.module(line, module);
                for alias in names {
                    self.name(line, &alias.name);
                    if let Some(asname) = &alias.asname {
                        self.name(line, asname);
                    }
                }
            }
        }
    }

    fn loop_body(&mut self, body: &[Stmt]) {
        self.loop_depth += 1;
        self.block(body);
        self.loop_depth -= 1;
    }

    fn function(&mut self, decl: &FunctionDecl) {
        for name in decl.params.names() {
            self.name(decl.line, name);
        }
        for param in decl.params.positional.iter().chain(&decl.params.kwonly) {
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
        let outer = (self.loop_depth, self.in_function);
        self.loop_depth = 0;
        self.in_function = true;
        self.block(&decl.body);
        (self.loop_depth, self.in_function) = outer;
    }

    /// Checks a store or delete target. Attribute targets are rejected
    /// outright; everything else is checked like a load.
    fn target(&mut self, target: &Expr, attribute_message: &str) {
        match &target.kind {
            ExprKind::Attribute { value, attr } => {
                self.report(target.line, attribute_message.to_string());
                self.attribute(target.line, attr);
                self.expr(value);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.target(item, attribute_message);
                }
            }
            ExprKind::Starred(inner) => self.target(inner, attribute_message),
            _ => self.expr(target),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let line = expr.line;
        match &expr.kind {
            ExprKind::None
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_) => {}
            ExprKind::FString(parts) => self.fstring(parts),
            ExprKind::Name(name) => self.name(line, name),
            ExprKind::Attribute { value, attr } => {
                self.attribute(line, attr);
                self.expr(value);
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            ExprKind::Call { func, args } => {
                self.expr(func);
                for arg in args {
                    match arg {
                        Argument::Positional(e) | Argument::Star(e) | Argument::DoubleStar(e) => {
                            self.expr(e)
                        }
                        Argument::Keyword(name, e) => {
                            if name.starts_with('_') {
                                self.report(
                                    line,
                                    format!(
                                        "\"{}\" is an invalid keyword argument because it starts with \"_\"",
                                        name
                                    ),
                                );
                            }
                            self.expr(e);
                        }
                    }
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. }
            | ExprKind::And(left, right)
            | ExprKind::Or(left, right) => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Compare { left, ops } => {
                self.expr(left);
                for (_, operand) in ops {
                    self.expr(operand);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::Lambda(decl) => self.function(decl),
            ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            self.expr(key);
                            self.expr(value);
                        }
                        DictItem::Unpack(e) => self.expr(e),
                    }
                }
            }
            ExprKind::Starred(inner) => self.expr(inner),
            ExprKind::Comprehension {
                element,
                value,
                generators,
                ..
            } => {
                self.generators(generators);
                self.expr(element);
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            ExprKind::GeneratorExp(body) => {
                self.generators(&body.generators);
                self.expr(&body.element);
            }
        }
    }

    fn generators(&mut self, generators: &[Generator]) {
        for generator in generators {
            self.target(&generator.target, "assignment to attributes is not allowed");
            self.expr(&generator.iter);
            for condition in &generator.conditions {
                self.expr(condition);
            }
        }
    }

    fn fstring(&mut self, parts: &[FStringPart]) {
        for part in parts {
            if let FStringPart::Field { expr, spec, .. } = part {
                self.expr(expr);
                self.fstring(spec);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_program;

    fn violations(source: &str) -> Vec<String> {
        let allowed: BTreeSet<String> = ["math", "json"].iter().map(|s| s.to_string()).collect();
        let (body, _) = parse_program(source, 100).unwrap();
        check(&body, &allowed)
            .into_iter()
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn test_underscore_names_rejected() {
        let found = violations("x = ().__class__\n__builtins__\n_ = 1\n");
        assert_eq!(found.len(), 2);
        assert!(found[0].contains("__class__"));
        assert!(found[1].contains("__builtins__"));
    }

    #[test]
    fn test_forbidden_names_rejected() {
        let found = violations("eval('1')\nf = open\nx = getattr\n");
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("Line 1:"));
        assert!(found[2].contains("getattr"));
    }

    #[test]
    fn test_imports_checked_against_allow_list() {
        assert!(violations("import math\nfrom json import dumps\n").is_empty());
        let found = violations("import os\nfrom subprocess import run\nimport os.path\n");
        assert_eq!(found.len(), 3);
        assert!(found[0].contains("\"os\""));
        assert!(found[1].contains("\"subprocess\""));
    }

    #[test]
    fn test_attribute_assignment_rejected() {
        let found = violations("a.b = 1\ndel a.b\nx, y.z = 1, 2\na.b += 1\n");
        assert_eq!(found.len(), 4);
        assert!(found[1].contains("deleting"));
    }

    #[test]
    fn test_control_flow_context() {
        assert!(violations("for i in range(3):\n    if i:\n        break\n    continue\n").is_empty());
        let found = violations("break\ndef f():\n    while True:\n        def g():\n            continue\n    return 1\nreturn 2\n");
        assert_eq!(found.len(), 3);
        assert!(found[0].contains("'break' outside loop"));
        assert!(found[1].contains("'continue' not properly in loop"));
        assert!(found[2].contains("'return' outside function"));
    }

    #[test]
    fn test_nested_scopes_are_checked() {
        let found = violations(
            "def f(_secret=1):\n    return [x.__dict__ for x in range(3)]\ng = lambda: f'{_hidden}'\n",
        );
        assert_eq!(found.len(), 3);
    }
}
