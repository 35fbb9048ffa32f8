//! Expression AST.

use crate::Span;

/// A parsed expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Numeric literal (`true`/`false` lex to 1 and 0).
    Number(f64),
    /// Named input.
    Input(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    Less,
    Eq,
    GreaterEq,
    LessEq,
    And,
    Or,
}

impl BinOp {
    /// Whether the operator yields a boolean.
    pub fn is_boolean(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }
}

impl Expr {
    /// Whether evaluation yields a boolean (comparison or logic at the root).
    pub fn is_boolean(&self) -> bool {
        match &self.kind {
            ExprKind::Binary { op, .. } => op.is_boolean(),
            ExprKind::Unary { op, .. } => *op == UnaryOp::Not,
            _ => false,
        }
    }

    /// Names of every input referenced, in first-use order.
    pub fn inputs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_inputs(&mut names);
        names
    }

    fn collect_inputs<'a>(&'a self, names: &mut Vec<&'a str>) {
        match &self.kind {
            ExprKind::Number(_) => {}
            ExprKind::Input(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            ExprKind::Unary { operand, .. } => operand.collect_inputs(names),
            ExprKind::Binary { left, right, .. } => {
                left.collect_inputs(names);
                right.collect_inputs(names);
            }
        }
    }
}
