//! Syntax tree for the restricted Python subset.
//!
//! Function bodies are held behind `Arc` so a compiled unit can be moved to
//! the worker thread and shared by every function value created from it.

use std::collections::HashSet;
use std::sync::Arc;

use num_bigint::BigInt;

/// A statement together with the source line it starts on.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    /// `x: int` without a value. Evaluates nothing.
    AnnotationOnly,
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef(Arc<FunctionDecl>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Expr>),
    Global(Vec<String>),
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
}

/// `name [as asname]` in an import statement.
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name bound in the importing scope.
    pub fn binding(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

/// One `except` clause.
#[derive(Debug, Clone)]
pub struct Handler {
    pub line: u32,
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub positional: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
}

impl Parameters {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positional
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwonly.iter().map(|p| p.name.as_str()))
            .chain(self.kwarg.as_deref())
    }
}

/// A `def` or `lambda`. `locals` is filled in by scope analysis once the
/// body has been parsed.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub line: u32,
    pub params: Parameters,
    pub body: Vec<Stmt>,
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
}

impl FunctionDecl {
    pub fn new(name: String, line: u32, params: Parameters, body: Vec<Stmt>) -> Self {
        let mut locals: HashSet<String> = params.names().map(str::to_string).collect();
        let mut globals = HashSet::new();
        collect_bindings(&body, &mut locals, &mut globals);
        for name in &globals {
            locals.remove(name);
        }
        Self {
            name,
            line,
            params,
            body,
            locals,
            globals,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub line: u32,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(line: u32, kind: ExprKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    None,
    Bool(bool),
    Int(i64),
    /// Integer literal outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    Str(String),
    FString(Vec<FStringPart>),
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Arc<FunctionDecl>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expr>,
        /// Value expression of a dict comprehension.
        value: Option<Box<Expr>>,
        generators: Vec<Generator>,
    },
    /// `(element for ...)`. Shared with every generator it creates.
    GeneratorExp(Arc<GeneratorExp>),
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Expr,
        conversion: Option<char>,
        spec: Vec<FStringPart>,
    },
}

#[derive(Debug, Clone)]
pub enum Argument {
    Positional(Expr),
    Keyword(String, Expr),
    Star(Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
}

#[derive(Debug)]
pub struct GeneratorExp {
    pub element: Expr,
    pub generators: Vec<Generator>,
}

#[derive(Debug, Clone)]
pub struct Generator {
    pub target: Expr,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

/// Collects every name a block binds, without descending into nested
/// function bodies (whose own name still counts) or comprehensions.
pub fn collect_bindings(body: &[Stmt], locals: &mut HashSet<String>, globals: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    collect_target_names(target, locals);
                }
            }
            StmtKind::AugAssign { target, .. } => collect_target_names(target, locals),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                collect_target_names(target, locals);
                collect_bindings(body, locals, globals);
                collect_bindings(orelse, locals, globals);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, locals, globals);
                collect_bindings(orelse, locals, globals);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, locals, globals);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        locals.insert(name.clone());
                    }
                    collect_bindings(&handler.body, locals, globals);
                }
                collect_bindings(orelse, locals, globals);
                collect_bindings(finalbody, locals, globals);
            }
            StmtKind::FunctionDef(decl) => {
                locals.insert(decl.name.clone());
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    collect_target_names(target, locals);
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
                for alias in aliases {
                    locals.insert(alias.binding().to_string());
                }
            }
            _ => {}
        }
    }
}

fn collect_target_names(target: &Expr, names: &mut HashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                collect_target_names(item, names);
            }
        }
        ExprKind::Starred(inner) => collect_target_names(inner, names),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Expr {
        Expr::new(1, ExprKind::Name(n.to_string()))
    }

    #[test]
    fn test_scope_analysis_excludes_globals() {
        let body = vec![
            Stmt {
                line: 1,
                kind: StmtKind::Global(vec!["counter".to_string()]),
            },
            Stmt {
                line: 2,
                kind: StmtKind::Assign {
                    targets: vec![name("counter")],
                    value: Expr::new(2, ExprKind::Int(1)),
                },
            },
            Stmt {
                line: 3,
                kind: StmtKind::Assign {
                    targets: vec![Expr::new(
                        3,
                        ExprKind::Tuple(vec![name("a"), name("b")]),
                    )],
                    value: name("pair"),
                },
            },
        ];
        let decl = FunctionDecl::new("f".into(), 1, Parameters::default(), body);

        assert!(decl.locals.contains("a"));
        assert!(decl.locals.contains("b"));
        assert!(!decl.locals.contains("counter"));
        assert!(decl.globals.contains("counter"));
    }

    #[test]
    fn test_alias_binding() {
        let plain = Alias {
            name: "math".into(),
            asname: None,
        };
        let aliased = Alias {
            name: "math".into(),
            asname: Some("m".into()),
        };
        assert_eq!(plain.binding(), "math");
        assert_eq!(aliased.binding(), "m");
    }
}
