//! Syntax tree for query scripts.

use std::fmt;

use crate::error::Position;

/// A parsed script: assignments followed by one `RETURN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub assignments: Vec<Assignment>,
    pub result: Expr,
}

impl Script {
    /// Every function call in source order, with the call's position.
    pub fn calls(&self) -> Vec<(&str, Position)> {
        let mut calls = Vec::new();
        for assignment in &self.assignments {
            assignment.value.collect_calls(&mut calls);
        }
        self.result.collect_calls(&mut calls);
        calls
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Expr,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Var(String),
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, Position)>) {
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::Var(_) => {}
            ExprKind::List(items) => {
                for item in items {
                    item.collect_calls(out);
                }
            }
            ExprKind::Object(fields) => {
                for (_, value) in fields {
                    value.collect_calls(out);
                }
            }
            ExprKind::Call { name, args } => {
                out.push((name, self.position));
                for arg in args {
                    arg.collect_calls(out);
                }
            }
            ExprKind::Unary { operand, .. } => operand.collect_calls(out),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        })
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Neg => "-",
            Self::Not => "not",
        })
    }
}
