//! Symbolic counting-function equations assembled from rules.
//!
//! The engine's obligation ends at producing syntactically well-formed
//! equations relating parent and child counting functions; solving them is
//! left to an external computer-algebra step.

use crate::class_db::Label;

/// A counting-function expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// The counting function of a class, applied to named variables.
    Func { label: Label, args: Vec<String> },
    /// A constant.
    Const(u64),
    /// Sum of expressions.
    Sum(Vec<Expr>),
    /// Product of expressions.
    Prod(Vec<Expr>),
    /// Difference of two expressions.
    Sub(Box<Expr>, Box<Expr>),
    /// Quotient of two expressions.
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// The counting function of `label` in the standard variables: `x` plus
    /// one catalytic variable `k_i` per extra parameter.
    pub fn func(label: Label, num_params: usize) -> Expr {
        let mut args = vec!["x".to_string()];
        args.extend((0..num_params).map(|i| format!("k_{}", i)));
        Expr::Func { label, args }
    }

    /// The counting function of `label` applied to explicit variables.
    pub fn func_with_args(label: Label, args: Vec<String>) -> Expr {
        Expr::Func { label, args }
    }

    fn needs_parens_in_product(&self) -> bool {
        matches!(self, Expr::Sum(_) | Expr::Sub(_, _))
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Func { label, args } => {
                write!(f, "F_{}({})", label, args.join(", "))
            }
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Sum(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(" + "))
            }
            Expr::Prod(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| {
                        if p.needs_parens_in_product() {
                            format!("({})", p)
                        } else {
                            p.to_string()
                        }
                    })
                    .collect();
                write!(f, "{}", rendered.join("*"))
            }
            Expr::Sub(a, b) => {
                if b.needs_parens_in_product() {
                    write!(f, "{} - ({})", a, b)
                } else {
                    write!(f, "{} - {}", a, b)
                }
            }
            Expr::Div(a, b) => write!(f, "({})/({})", a, b),
        }
    }
}

/// An equality between two counting-function expressions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}
