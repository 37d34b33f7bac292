//! Recursive-descent parser for the restricted grammar.
//!
//! Syntax errors abort parsing. Constructs that parse cleanly but are not
//! part of the reduced language (classes, `with`, `yield`, decorators, ...)
//! are recorded as violations and parsing continues, so one submission
//! reports every forbidden construct at once.

use std::collections::HashSet;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::ast::*;
use super::lexer::{tokenize, Tok, Token};
use super::Violation;

type PResult<T> = Result<T, Violation>;

/// Operator chains (`a + b + c`, `x.y.z`, `elif` ladders) build trees as deep
/// as they are long, so they are budgeted too, at this many links per
/// nesting level.
const CHAIN_LINKS_PER_LEVEL: usize = 20;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    /// Nesting levels plus chain links currently open.
    weight: usize,
    violations: Vec<Violation>,
}

/// Parses a whole program. Returns the statements plus any forbidden
/// constructs found along the way.
pub fn parse_program(source: &str, max_depth: usize) -> PResult<(Vec<Stmt>, Vec<Violation>)> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, max_depth);
    let body = parser.parse_module()?;
    Ok((body, parser.violations))
}

impl Parser {
    pub fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
            weight: 0,
            violations: Vec::new(),
        }
    }

    fn parse_module(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_n(&self, n: usize) -> &Tok {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, detail: impl Into<String>) -> Violation {
        Violation::syntax(self.line(), detail)
    }

    fn unexpected(&self) -> Violation {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Keyword(k) => format!("'{}'", k),
            Tok::Int(i) => format!("'{}'", i),
            Tok::BigInt(i) => format!("'{}'", i),
            Tok::Float(f) => format!("'{}'", f),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(o) => format!("'{}'", o),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => return self.error("unexpected indent"),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax at {}", found))
    }

    fn forbid(&mut self, line: u32, message: impl Into<String>) {
        self.violations.push(Violation::new(line, message));
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        self.weight += 1;
        if self.depth > self.max_depth {
            return Err(self.error("too many nested blocks or expressions"));
        }
        self.check_weight()
    }

    fn leave(&mut self) {
        self.depth -= 1;
        self.weight -= 1;
    }

    fn link(&mut self, links: &mut usize) -> PResult<()> {
        self.weight += 1;
        *links += 1;
        self.check_weight()
    }

    fn unlink(&mut self, links: usize) {
        self.weight -= links;
    }

    fn check_weight(&self) -> PResult<()> {
        if self.weight > self.max_depth.saturating_mul(CHAIN_LINKS_PER_LEVEL) {
            return Err(self.error("expression is too long or too deeply nested"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let stmt = match self.peek() {
            Tok::Keyword("if") => self.parse_if()?,
            Tok::Keyword("while") => self.parse_while()?,
            Tok::Keyword("for") => self.parse_for()?,
            Tok::Keyword("def") => self.parse_def()?,
            Tok::Keyword("try") => self.parse_try()?,
            Tok::Keyword("class") => {
                self.forbid(line, "class definitions are not allowed");
                self.skip_class()?;
                return Ok(Vec::new());
            }
            Tok::Keyword("with") => {
                self.forbid(line, "with statements are not allowed");
                self.skip_with()?;
                return Ok(Vec::new());
            }
            Tok::Keyword("async") => {
                self.forbid(line, "async constructs are not allowed");
                self.advance();
                self.parse_statement()?;
                return Ok(Vec::new());
            }
            Tok::Op("@") => {
                self.forbid(line, "decorators are not allowed");
                self.advance();
                self.parse_test()?;
                self.expect_newline()?;
                self.parse_statement()?;
                return Ok(Vec::new());
            }
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => return self.parse_simple_line(),
        };
        Ok(vec![stmt])
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.parse_simple_line();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        self.enter()?;
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            if matches!(self.peek(), Tok::Newline) {
                self.advance();
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        if matches!(self.peek(), Tok::Dedent) {
            self.advance();
        }
        self.leave();
        Ok(body)
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            if let Some(stmt) = self.parse_simple()? {
                stmts.push(stmt);
            }
            if self.eat_op(";") {
                if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> PResult<Option<Stmt>> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Keyword("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword("break") => {
                self.advance();
                StmtKind::Break
            }
            Tok::Keyword("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Keyword("return") => {
                self.advance();
                if self.starts_expression() {
                    StmtKind::Return(Some(self.parse_testlist_star()?))
                } else {
                    StmtKind::Return(None)
                }
            }
            Tok::Keyword("raise") => {
                self.advance();
                if self.starts_expression() {
                    let exc = self.parse_test()?;
                    let cause = if self.eat_kw("from") {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                } else {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                }
            }
            Tok::Keyword("global") => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            Tok::Keyword("nonlocal") => {
                self.forbid(line, "nonlocal statements are not allowed");
                self.advance();
                self.parse_name_list()?;
                return Ok(None);
            }
            Tok::Keyword("del") => {
                self.advance();
                let targets = self.parse_target_list()?;
                let targets = match targets.kind {
                    ExprKind::Tuple(items) => items,
                    _ => vec![targets],
                };
                for target in &targets {
                    if matches!(target.kind, ExprKind::Starred(_)) {
                        return Err(Violation::syntax(target.line, "cannot delete starred"));
                    }
                }
                StmtKind::Delete(targets)
            }
            Tok::Keyword("assert") => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(",") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Tok::Keyword("import") => {
                self.advance();
                let mut aliases = Vec::new();
                loop {
                    let name = self.parse_dotted_name()?;
                    let asname = if self.eat_kw("as") {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    aliases.push(Alias { name, asname });
                    if !self.eat_op(",") {
                        break;
                    }
                }
                StmtKind::Import(aliases)
            }
            Tok::Keyword("from") => return self.parse_from_import(line),
            Tok::Keyword("yield") => {
                self.forbid(line, "yield is not allowed");
                self.advance();
                if self.starts_expression() {
                    self.parse_testlist_star()?;
                }
                return Ok(None);
            }
            _ => return self.parse_expression_statement().map(Some),
        };
        Ok(Some(Stmt { line, kind }))
    }

    fn parse_from_import(&mut self, line: u32) -> PResult<Option<Stmt>> {
        self.advance();
        let mut dots = 0;
        while self.at_op(".") || self.at_op("...") {
            dots += if self.at_op("...") { 3 } else { 1 };
            self.advance();
        }
        let module = if matches!(self.peek(), Tok::Name(_)) {
            self.parse_dotted_name()?
        } else {
            String::new()
        };
        self.expect_kw("import")?;
        if dots > 0 || module.is_empty() {
            self.forbid(line, "relative imports are not allowed");
        }
        if self.eat_op("*") {
            self.forbid(line, format!("star imports from \"{}\" are not allowed", module));
            return Ok(None);
        }
        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            if parenthesized && self.at_op(")") {
                break;
            }
            let name = self.expect_name()?;
            let asname = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        if names.is_empty() {
            return Err(self.error("expected names to import"));
        }
        if dots > 0 || module.is_empty() {
            return Ok(None);
        }
        Ok(Some(Stmt {
            line,
            kind: StmtKind::ImportFrom { module, names },
        }))
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let first = self.parse_testlist_star()?;

        if self.at_op(":") {
            check_target(&first)?;
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(Violation::syntax(line, "only single target can be annotated"));
            }
            self.advance();
            self.parse_test()?;
            if self.eat_op("=") {
                let value = self.parse_testlist_star()?;
                return Ok(Stmt {
                    line,
                    kind: StmtKind::Assign {
                        targets: vec![first],
                        value,
                    },
                });
            }
            return Ok(Stmt {
                line,
                kind: StmtKind::AnnotationOnly,
            });
        }

        if let Some(op) = self.augmented_operator() {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(Violation::syntax(
                    line,
                    "illegal expression for augmented assignment",
                ));
            }
            let value = self.parse_testlist_star()?;
            return Ok(Stmt {
                line,
                kind: StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
            });
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.advance();
                if self.at_kw("yield") {
                    let yline = self.line();
                    self.forbid(yline, "yield is not allowed");
                    self.advance();
                }
                value = self.parse_testlist_star()?;
                if self.at_op("=") {
                    targets.push(value);
                    continue;
                }
                break;
            }
            for target in &targets {
                check_target(target)?;
            }
            return Ok(Stmt {
                line,
                kind: StmtKind::Assign { targets, value },
            });
        }

        Ok(Stmt {
            line,
            kind: StmtKind::Expr(first),
        })
    }

    fn augmented_operator(&self) -> Option<BinOp> {
        let Tok::Op(op) = self.peek() else {
            return None;
        };
        Some(match *op {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            "**=" => BinOp::Pow,
            "<<=" => BinOp::LShift,
            ">>=" => BinOp::RShift,
            "&=" => BinOp::BitAnd,
            "|=" => BinOp::BitOr,
            "^=" => BinOp::BitXor,
            _ => return None,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let mut branches = Vec::new();
        let mut links = 0;
        loop {
            let line = self.line();
            self.advance();
            let test = self.parse_test()?;
            let body = self.parse_block()?;
            branches.push((line, test, body));
            if !self.at_kw("elif") {
                break;
            }
            self.link(&mut links)?;
        }
        self.unlink(links);
        let mut orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let mut stmt: Option<Stmt> = None;
        for (line, test, body) in branches.into_iter().rev() {
            let orelse = match stmt.take() {
                Some(inner) => vec![inner],
                None => std::mem::take(&mut orelse),
            };
            stmt = Some(Stmt {
                line,
                kind: StmtKind::If { test, body, orelse },
            });
        }
        stmt.ok_or_else(|| self.unexpected())
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect_kw("in")?;
        let iter = self.parse_testlist_star()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn parse_def(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parse_params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_test()?;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Arc::new(FunctionDecl::new(name, line, params, body))),
        })
    }

    fn parse_params(&mut self, closing: &str, annotations: bool) -> PResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen = HashSet::new();
        let mut seen_star = false;
        let mut seen_default = false;

        while !self.at_op(closing) {
            if self.eat_op("**") {
                let name = self.expect_name()?;
                self.skip_annotation(annotations)?;
                self.register_param(&mut seen, &name)?;
                params.kwarg = Some(name);
                self.eat_op(",");
                if !self.at_op(closing) {
                    return Err(self.error("arguments cannot follow var-keyword argument"));
                }
                break;
            } else if self.eat_op("*") {
                if seen_star {
                    return Err(self.error("* argument may appear only once"));
                }
                seen_star = true;
                if let Tok::Name(_) = self.peek() {
                    let name = self.expect_name()?;
                    self.skip_annotation(annotations)?;
                    self.register_param(&mut seen, &name)?;
                    params.vararg = Some(name);
                }
            } else if self.eat_op("/") {
                // Positional-only marker: every parameter is positional here.
            } else {
                let name = self.expect_name()?;
                self.skip_annotation(annotations)?;
                self.register_param(&mut seen, &name)?;
                let default = if self.eat_op("=") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if seen_star {
                    params.kwonly.push(Param { name, default });
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                    params.positional.push(Param { name, default });
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn skip_annotation(&mut self, annotations: bool) -> PResult<()> {
        if annotations && self.eat_op(":") {
            self.parse_test()?;
        }
        Ok(())
    }

    fn register_param(&self, seen: &mut HashSet<String>, name: &str) -> PResult<()> {
        if !seen.insert(name.to_string()) {
            return Err(self.error(format!(
                "duplicate argument '{}' in function definition",
                name
            )));
        }
        Ok(())
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.at_kw("except") {
            let hline = self.line();
            self.advance();
            if self.at_op("*") {
                return Err(self.error("except* is not supported"));
            }
            let (kind, name) = if self.at_op(":") {
                (None, None)
            } else {
                let kind = self.parse_test()?;
                let name = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let hbody = self.parse_block()?;
            handlers.push(Handler {
                line: hline,
                kind,
                name,
                body: hbody,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn skip_class(&mut self) -> PResult<()> {
        self.advance();
        self.expect_name()?;
        if self.eat_op("(") {
            self.parse_call_args()?;
        }
        self.parse_block()?;
        Ok(())
    }

    fn skip_with(&mut self) -> PResult<()> {
        self.advance();
        loop {
            self.parse_test()?;
            if self.eat_kw("as") {
                let target = self.parse_target_list()?;
                check_target(&target)?;
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.parse_block()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(_) | Tok::Int(_) | Tok::BigInt(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => {
                true
            }
            Tok::Keyword(k) => matches!(
                *k,
                "None" | "True" | "False" | "not" | "lambda" | "await" | "yield"
            ),
            Tok::Op(o) => matches!(*o, "(" | "[" | "{" | "-" | "+" | "~" | "*" | "..."),
            _ => false,
        }
    }

    /// Comma-separated expressions (with optional starred items); more than
    /// one item or a trailing comma makes a tuple.
    fn parse_testlist_star(&mut self) -> PResult<Expr> {
        let line = self.line();
        let first = self.parse_test_or_star()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        Ok(Expr::new(line, ExprKind::Tuple(items)))
    }

    fn parse_test_or_star(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.eat_op("*") {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(line, ExprKind::Starred(Box::new(inner))));
        }
        self.parse_test()
    }

    /// Assignment targets of `for`, comprehensions and `del`.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let line = self.line();
        let first = self.parse_target_item()?;
        if !self.at_op(",") {
            check_target(&first)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_kw("in") || !self.starts_expression() {
                break;
            }
            items.push(self.parse_target_item()?);
        }
        let target = Expr::new(line, ExprKind::Tuple(items));
        check_target(&target)?;
        Ok(target)
    }

    fn parse_target_item(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.eat_op("*") {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(line, ExprKind::Starred(Box::new(inner))));
        }
        self.parse_bitor()
    }

    pub fn parse_test(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_test_inner();
        self.leave();
        result
    }

    fn parse_test_inner(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.at_kw("lambda") {
            return self.parse_lambda();
        }
        let expr = self.parse_or()?;
        if self.eat_kw("if") {
            let test = self.parse_or()?;
            self.expect_kw("else")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                line,
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(expr),
                    orelse: Box::new(orelse),
                },
            ));
        }
        if self.at_op(":=") {
            self.forbid(line, "assignment expressions (:=) are not allowed");
            self.advance();
            self.parse_test()?;
        }
        Ok(expr)
    }

    fn parse_test_nocond(&mut self) -> PResult<Expr> {
        if self.at_kw("lambda") {
            return self.parse_lambda();
        }
        self.parse_or()
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.advance();
        let params = self.parse_params(":", false)?;
        self.expect_op(":")?;
        let body = self.parse_test()?;
        let body_line = body.line;
        let decl = FunctionDecl::new(
            "<lambda>".to_string(),
            line,
            params,
            vec![Stmt {
                line: body_line,
                kind: StmtKind::Return(Some(body)),
            }],
        );
        Ok(Expr::new(line, ExprKind::Lambda(Arc::new(decl))))
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.at_kw("or") {
            let line = self.line();
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_and()?;
            left = Expr::new(line, ExprKind::Or(Box::new(left), Box::new(right)));
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.at_kw("and") {
            let line = self.line();
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_not()?;
            left = Expr::new(line, ExprKind::And(Box::new(left), Box::new(right)));
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::new(
                line,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand?),
                },
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let line = self.line();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_n(1), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_n(1), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::new(
                line,
                ExprKind::Compare {
                    left: Box::new(left),
                    ops,
                },
            ))
        }
    }

    fn parse_binary_level(
        &mut self,
        table: &[(&str, BinOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        let mut links = 0;
        loop {
            let line = self.line();
            let Some(op) = table
                .iter()
                .find(|(sym, _)| self.at_op(sym))
                .map(|(_, op)| *op)
            else {
                break;
            };
            self.advance();
            self.link(&mut links)?;
            let right = next(self)?;
            left = Expr::new(
                line,
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(&[("|", BinOp::BitOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(&[("^", BinOp::BitXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary_level(&[("&", BinOp::BitAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::parse_arith,
        )
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_term)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_factor();
        self.leave();
        let operand = operand?;
        // Fold negative literals so `-9223372036854775808` style values and
        // `-1` stay constants.
        if op == UnaryOp::Neg {
            match operand.kind {
                ExprKind::Int(i) => return Ok(Expr::new(line, int_literal(-BigInt::from(i)))),
                ExprKind::BigInt(ref big) => return Ok(Expr::new(line, int_literal(-big))),
                ExprKind::Float(f) => return Ok(Expr::new(line, ExprKind::Float(-f))),
                _ => {}
            }
        }
        Ok(Expr::new(
            line,
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.at_kw("await") {
            self.forbid(line, "await is not allowed");
            self.advance();
        }
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.parse_factor();
            self.leave();
            return Ok(Expr::new(
                line,
                ExprKind::Binary {
                    op: BinOp::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent?),
                },
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        let mut links = 0;
        loop {
            let line = self.line();
            if matches!(self.peek(), Tok::Op("(" | "[" | ".")) {
                self.link(&mut links)?;
            }
            if self.eat_op("(") {
                let args = self.parse_call_args()?;
                expr = Expr::new(
                    line,
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                );
            } else if self.eat_op("[") {
                let index = self.parse_subscript()?;
                expr = Expr::new(
                    line,
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    line,
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                );
            } else {
                break;
            }
        }
        self.unlink(links);
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Argument>> {
        let mut args = Vec::new();
        while !self.at_op(")") {
            if self.eat_op("**") {
                args.push(Argument::DoubleStar(self.parse_test()?));
            } else if self.eat_op("*") {
                args.push(Argument::Star(self.parse_test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_n(1), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.advance();
                args.push(Argument::Keyword(name, self.parse_test()?));
            } else {
                let line = self.line();
                let value = self.parse_test()?;
                if self.at_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Argument::Positional(Expr::new(
                        line,
                        ExprKind::GeneratorExp(Arc::new(GeneratorExp {
                            element: value,
                            generators,
                        })),
                    )));
                } else {
                    args.push(Argument::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut items = Vec::new();
        let mut trailing_comma;
        loop {
            items.push(self.parse_slice_item()?);
            if !self.eat_op(",") {
                trailing_comma = false;
                break;
            }
            trailing_comma = true;
            if self.at_op("]") {
                break;
            }
        }
        self.expect_op("]")?;
        if items.len() == 1 && !trailing_comma {
            Ok(items.remove(0))
        } else {
            Ok(Expr::new(line, ExprKind::Tuple(items)))
        }
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let line = self.line();
        let lower = if self.at_op(":") {
            None
        } else {
            Some(self.parse_test()?)
        };
        if !self.at_op(":") {
            return lower.ok_or_else(|| self.unexpected());
        }
        self.advance();
        let ends = |p: &Self| p.at_op(":") || p.at_op("]") || p.at_op(",");
        let upper = if ends(self) { None } else { Some(self.parse_test()?) };
        let step = if self.eat_op(":") {
            if self.at_op("]") || self.at_op(",") {
                None
            } else {
                Some(self.parse_test()?)
            }
        } else {
            None
        };
        Ok(Expr::new(
            line,
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
        ))
    }

    fn parse_comprehension_clauses(&mut self) -> PResult<Vec<Generator>> {
        let mut generators = Vec::new();
        loop {
            if self.at_kw("async") {
                let line = self.line();
                self.forbid(line, "async constructs are not allowed");
                self.advance();
            }
            if !self.eat_kw("for") {
                break;
            }
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.parse_test_nocond()?);
            }
            generators.push(Generator {
                target,
                iter,
                conditions,
            });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Tok::Int(i) => {
                self.advance();
                ExprKind::Int(i)
            }
            Tok::BigInt(i) => {
                self.advance();
                ExprKind::BigInt(i)
            }
            Tok::Float(f) => {
                self.advance();
                ExprKind::Float(f)
            }
            Tok::Str(_) | Tok::FStr(_) => return self.parse_strings(),
            Tok::Keyword("None") => {
                self.advance();
                ExprKind::None
            }
            Tok::Keyword("True") => {
                self.advance();
                ExprKind::Bool(true)
            }
            Tok::Keyword("False") => {
                self.advance();
                ExprKind::Bool(false)
            }
            Tok::Keyword("yield") => {
                self.forbid(line, "yield is not allowed");
                self.advance();
                if self.starts_expression() {
                    return self.parse_testlist_star();
                }
                ExprKind::None
            }
            Tok::Op("(") => {
                self.advance();
                return self.parse_paren(line);
            }
            Tok::Op("[") => {
                self.advance();
                return self.parse_list_display(line);
            }
            Tok::Op("{") => {
                self.advance();
                return self.parse_brace_display(line);
            }
            Tok::Op("...") => return Err(self.error("Ellipsis is not supported")),
            _ => return Err(self.unexpected()),
        };
        Ok(Expr::new(line, kind))
    }

    fn parse_paren(&mut self, line: u32) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_paren_inner(line);
        self.leave();
        result
    }

    fn parse_paren_inner(&mut self, line: u32) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::new(line, ExprKind::Tuple(Vec::new())));
        }
        let first = self.parse_test_or_star()?;
        if self.at_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::new(
                line,
                ExprKind::GeneratorExp(Arc::new(GeneratorExp {
                    element: first,
                    generators,
                })),
            ));
        }
        if self.eat_op(")") {
            if matches!(first.kind, ExprKind::Starred(_)) {
                return Err(Violation::syntax(line, "cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect_op(")")?;
        Ok(Expr::new(line, ExprKind::Tuple(items)))
    }

    fn parse_list_display(&mut self, line: u32) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_list_inner(line);
        self.leave();
        result
    }

    fn parse_list_inner(&mut self, line: u32) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::new(line, ExprKind::List(Vec::new())));
        }
        let first = self.parse_test_or_star()?;
        if self.at_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::new(
                line,
                ExprKind::Comprehension {
                    kind: ComprehensionKind::List,
                    element: Box::new(first),
                    value: None,
                    generators,
                },
            ));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect_op("]")?;
        Ok(Expr::new(line, ExprKind::List(items)))
    }

    fn parse_brace_display(&mut self, line: u32) -> PResult<Expr> {
        self.enter()?;
        let result = self.parse_brace_inner(line);
        self.leave();
        result
    }

    fn parse_brace_inner(&mut self, line: u32) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::new(line, ExprKind::Dict(Vec::new())));
        }

        let first_item = if self.eat_op("**") {
            DictItem::Unpack(self.parse_bitor()?)
        } else {
            let first = self.parse_test_or_star()?;
            if !self.eat_op(":") {
                return self.parse_set_rest(line, first);
            }
            let value = self.parse_test()?;
            if self.at_kw("for") {
                let generators = self.parse_comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::new(
                    line,
                    ExprKind::Comprehension {
                        kind: ComprehensionKind::Dict,
                        element: Box::new(first),
                        value: Some(Box::new(value)),
                        generators,
                    },
                ));
            }
            DictItem::Pair(first, value)
        };

        let mut items = vec![first_item];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            if self.eat_op("**") {
                items.push(DictItem::Unpack(self.parse_bitor()?));
            } else {
                let key = self.parse_test()?;
                self.expect_op(":")?;
                items.push(DictItem::Pair(key, self.parse_test()?));
            }
        }
        self.expect_op("}")?;
        Ok(Expr::new(line, ExprKind::Dict(items)))
    }

    fn parse_set_rest(&mut self, line: u32, first: Expr) -> PResult<Expr> {
        if self.at_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::new(
                line,
                ExprKind::Comprehension {
                    kind: ComprehensionKind::Set,
                    element: Box::new(first),
                    value: None,
                    generators,
                },
            ));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect_op("}")?;
        Ok(Expr::new(line, ExprKind::Set(items)))
    }

    /// Adjacent string literals concatenate; any f-string among them turns
    /// the whole run into an f-string.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    push_literal(&mut parts, &s);
                }
                Tok::FStr(s) => {
                    self.advance();
                    formatted = true;
                    let fparts = self.parse_fstring(&s, line)?;
                    for part in fparts {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::new(line, ExprKind::FString(parts)));
        }
        let text = parts
            .into_iter()
            .map(|p| match p {
                FStringPart::Literal(s) => s,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(Expr::new(line, ExprKind::Str(text)))
    }

    fn parse_fstring(&mut self, text: &str, line: u32) -> PResult<Vec<FStringPart>> {
        let chars: Vec<char> = text.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '{' {
                if chars.get(i + 1) == Some(&'{') {
                    literal.push('{');
                    i += 2;
                    continue;
                }
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                i = self.parse_fstring_field(&chars, i + 1, line, &mut parts)?;
            } else if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(Violation::syntax(line, "f-string: single '}' is not allowed"));
            } else {
                literal.push(c);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    /// Parses one replacement field starting just after `{`. Returns the
    /// index just past the closing `}`.
    fn parse_fstring_field(
        &mut self,
        chars: &[char],
        start: usize,
        line: u32,
        parts: &mut Vec<FStringPart>,
    ) -> PResult<usize> {
        let mut i = start;
        let mut nesting = 0usize;
        let mut quote: Option<char> = None;
        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '\'' | '"' => quote = Some(c),
                    '(' | '[' | '{' => nesting += 1,
                    ')' | ']' => nesting = nesting.saturating_sub(1),
                    '}' if nesting > 0 => nesting -= 1,
                    '}' | ':' if nesting == 0 => break,
                    '!' if nesting == 0 && chars.get(i + 1) != Some(&'=') => break,
                    _ => {}
                }
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(Violation::syntax(line, "f-string: expecting '}'"));
        }

        let mut expr_text: String = chars[start..i].iter().collect();
        let mut conversion = None;
        let trimmed = expr_text.trim_end();
        let self_documenting = trimmed.ends_with('=')
            && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op));
        if self_documenting {
            parts.push(FStringPart::Literal(expr_text.clone()));
            let cut = trimmed.len() - 1;
            expr_text.truncate(cut);
            conversion = Some('r');
        }
        if expr_text.trim().is_empty() {
            return Err(Violation::syntax(line, "f-string: empty expression not allowed"));
        }
        let expr = self.parse_embedded_expression(&expr_text, line)?;

        if chars[i] == '!' {
            match chars.get(i + 1) {
                Some(c @ ('r' | 's' | 'a')) => conversion = Some(*c),
                _ => {
                    return Err(Violation::syntax(
                        line,
                        "f-string: invalid conversion character",
                    ))
                }
            }
            i += 2;
        }

        let mut spec = Vec::new();
        if chars.get(i) == Some(&':') {
            let spec_start = i + 1;
            let mut depth = 0usize;
            i = spec_start;
            while i < chars.len() {
                match chars[i] {
                    '{' => depth += 1,
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    _ => {}
                }
                i += 1;
            }
            let spec_text: String = chars[spec_start..i.min(chars.len())].iter().collect();
            spec = self.parse_fstring(&spec_text, line)?;
        }
        if chars.get(i) != Some(&'}') {
            return Err(Violation::syntax(line, "f-string: expecting '}'"));
        }
        parts.push(FStringPart::Field {
            expr,
            conversion,
            spec,
        });
        Ok(i + 1)
    }

    fn parse_embedded_expression(&mut self, text: &str, line: u32) -> PResult<Expr> {
        let mut tokens = tokenize(&format!("({})", text.trim())).map_err(|v| Violation::new(line, v.message))?;
        for token in &mut tokens {
            token.line = line;
        }
        let mut sub = Parser::new(tokens, self.max_depth);
        sub.depth = self.depth;
        sub.weight = self.weight;
        let expr = sub.parse_testlist_star()?;
        if !matches!(sub.peek(), Tok::Newline | Tok::Eof) {
            return Err(Violation::syntax(line, "f-string: invalid syntax"));
        }
        self.violations.append(&mut sub.violations);
        Ok(expr)
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Validates that an expression can appear on the left of `=`.
fn check_target(target: &Expr) -> PResult<()> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            let mut starred = 0;
            for item in items {
                if let ExprKind::Starred(inner) = &item.kind {
                    starred += 1;
                    check_target(inner)?;
                } else {
                    check_target(item)?;
                }
            }
            if starred > 1 {
                return Err(Violation::syntax(
                    target.line,
                    "multiple starred expressions in assignment",
                ));
            }
            Ok(())
        }
        ExprKind::Starred(_) => Err(Violation::syntax(
            target.line,
            "starred assignment target must be in a list or tuple",
        )),
        other => Err(Violation::syntax(
            target.line,
            format!("cannot assign to {}", describe(other)),
        )),
    }
}

/// An integer constant in the narrowest form that holds it.
fn int_literal(value: BigInt) -> ExprKind {
    match value.to_i64() {
        Some(i) => ExprKind::Int(i),
        None => ExprKind::BigInt(value),
    }
}

fn describe(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::None
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::BigInt(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_) => "literal",
        ExprKind::FString(_) => "f-string expression",
        ExprKind::Call { .. } => "function call",
        ExprKind::Lambda(_) => "lambda",
        ExprKind::Comprehension { .. } => "comprehension",
        ExprKind::GeneratorExp(_) => "generator expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::Dict(_) | ExprKind::Set(_) => "display",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        let (body, violations) = parse_program(source, 100).unwrap();
        assert!(violations.is_empty(), "unexpected violations: {:?}", violations);
        body
    }

    fn parse_expr(source: &str) -> ExprKind {
        match parse(source).remove(0).kind {
            StmtKind::Expr(e) => e.kind,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let ExprKind::Binary { op, right, .. } = parse_expr("1 + 2 * 3") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let ExprKind::Unary { op, operand } = parse_expr("-2 ** 2") else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(operand.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn test_chained_comparison() {
        let ExprKind::Compare { ops, .. } = parse_expr("1 < x <= 3 not in y") else {
            panic!("expected compare");
        };
        let kinds: Vec<CmpOp> = ops.iter().map(|(op, _)| *op).collect();
        assert_eq!(kinds, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotIn]);
    }

    #[test]
    fn test_semicolons_split_statements() {
        let body = parse("a = 1; b = 2; print(a + b)");
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn test_function_definition_and_scope() {
        let body = parse("def f(a, b=2, *rest, key=None, **extra):\n    c = a + b\n    return c\n");
        let StmtKind::FunctionDef(decl) = &body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(decl.params.positional.len(), 2);
        assert_eq!(decl.params.vararg.as_deref(), Some("rest"));
        assert_eq!(decl.params.kwonly.len(), 1);
        assert_eq!(decl.params.kwarg.as_deref(), Some("extra"));
        assert!(decl.locals.contains("c"));
        assert!(decl.locals.contains("extra"));
    }

    #[test]
    fn test_comprehensions_and_slices() {
        assert!(matches!(
            parse_expr("[x * 2 for x in range(10) if x % 2]"),
            ExprKind::Comprehension {
                kind: ComprehensionKind::List,
                ..
            }
        ));
        assert!(matches!(
            parse_expr("{k: v for k, v in pairs}"),
            ExprKind::Comprehension {
                kind: ComprehensionKind::Dict,
                ..
            }
        ));
        let ExprKind::Call { args, .. } = parse_expr("sum(x for x in y if x)") else {
            panic!("expected call");
        };
        assert!(matches!(
            &args[0],
            Argument::Positional(Expr { kind: ExprKind::GeneratorExp(body), .. })
                if body.generators[0].conditions.len() == 1
        ));
        assert!(matches!(parse_expr("(x for x in y)"), ExprKind::GeneratorExp(_)));
        let ExprKind::Subscript { index, .. } = parse_expr("a[1:-1:2]") else {
            panic!("expected subscript");
        };
        assert!(matches!(index.kind, ExprKind::Slice { .. }));
    }

    #[test]
    fn test_subscript_commas_build_tuples() {
        let index_of = |source: &str| match parse_expr(source) {
            ExprKind::Subscript { index, .. } => index.kind,
            other => panic!("expected subscript, got {:?}", other),
        };
        assert!(matches!(index_of("d[1]"), ExprKind::Int(1)));
        assert!(matches!(index_of("d[1,]"), ExprKind::Tuple(items) if items.len() == 1));
        assert!(matches!(index_of("d[1, 2]"), ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn test_fstring_fields() {
        let ExprKind::FString(parts) = parse_expr("f'total: {n:,.2f} ({name!r})'") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[1], FStringPart::Field { spec, .. } if !spec.is_empty()));
        assert!(matches!(&parts[3], FStringPart::Field { conversion: Some('r'), .. }));
    }

    #[test]
    fn test_if_elif_else_nests() {
        let body = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_forbidden_constructs_are_collected() {
        let source = "class A:\n    pass\nwith x as y:\n    pass\ndef g():\n    yield 1\n";
        let (_, violations) = parse_program(source, 100).unwrap();
        let lines: Vec<u32> = violations.iter().map(|v| v.line).collect();
        assert_eq!(lines, vec![1, 3, 6]);
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_program("x = = 1", 100).unwrap_err();
        assert!(err.message.starts_with("SyntaxError"));
        assert!(parse_program("1 = x", 100).is_err());
        assert!(parse_program("def f(a=1, b):\n    pass", 100).is_err());
        assert!(parse_program("if x:\npass", 100).is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(150), ")".repeat(150));
        let err = parse_program(&deep, 100).unwrap_err();
        assert!(err.message.contains("nested"));

        let long_sum = format!("x = {}", vec!["1"; 5000].join(" + "));
        assert!(parse_program(&long_sum, 100).is_err());
        let short_sum = format!("x = {}", vec!["1"; 500].join(" + "));
        assert!(parse_program(&short_sum, 100).is_ok());
    }

    #[test]
    fn test_elif_ladder() {
        let mut source = String::from("if x == 0:\n    y = 0\n");
        for i in 1..50 {
            source.push_str(&format!("elif x == {}:\n    y = {}\n", i, i));
        }
        source.push_str("else:\n    y = -1\n");
        let body = parse(&source);
        assert_eq!(body.len(), 1);
    }
}
