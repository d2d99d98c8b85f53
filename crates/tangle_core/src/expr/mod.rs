//! Matrix-valued symbolic expressions.
//!
//! An [`Expr`] is a shared handle to an immutable [`Node`]. Nodes only ever
//! reference nodes that already exist, so every graph built through this API
//! is acyclic. Common subexpressions are shared by cloning the handle.

mod concat;
mod elementwise;
mod inner_prod;
pub mod node;
pub mod parse;
mod permute;
mod split;

pub use node::{BinaryOp, Broadcast, Node, Operation, UnaryOp};

use crate::error::GraphError;
use crate::sparsity::Sparsity;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

#[derive(Clone)]
pub struct Expr(Rc<Node>);

impl Expr {
    pub(crate) fn from_node(node: Node) -> Self {
        Self(Rc::new(node))
    }

    /// Free symbolic variable with the given pattern.
    pub fn sym(name: &str, sparsity: Sparsity) -> Self {
        Self::from_node(Node::new(
            Operation::Symbol {
                name: name.to_string(),
            },
            Vec::new(),
            vec![sparsity],
        ))
    }

    /// Dense symbolic column vector of length `n`.
    pub fn sym_vector(name: &str, n: usize) -> Self {
        Self::sym(name, Sparsity::column(n))
    }

    pub fn sym_scalar(name: &str) -> Self {
        Self::sym(name, Sparsity::scalar())
    }

    /// Constant with explicit nonzeros on `sparsity`.
    pub fn constant(nz: Vec<f64>, sparsity: Sparsity) -> Result<Self, GraphError> {
        if nz.len() != sparsity.nnz() {
            return Err(GraphError::NonzeroCount {
                index: 0,
                expected: sparsity.nnz(),
                got: nz.len(),
            });
        }
        Ok(Self::constant_unchecked(nz, sparsity))
    }

    pub(crate) fn constant_unchecked(nz: Vec<f64>, sparsity: Sparsity) -> Self {
        Self::from_node(Node::new(
            Operation::Constant { nz },
            Vec::new(),
            vec![sparsity],
        ))
    }

    pub fn scalar(value: f64) -> Self {
        Self::constant_unchecked(vec![value], Sparsity::scalar())
    }

    /// Dense column vector constant.
    pub fn vector(values: &[f64]) -> Self {
        Self::constant_unchecked(values.to_vec(), Sparsity::column(values.len()))
    }

    /// Structurally zero matrix (no nonzeros at all).
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::constant_unchecked(Vec::new(), Sparsity::empty(nrows, ncols))
    }

    /// Constant one on every position of `sparsity`.
    pub fn ones(sparsity: &Sparsity) -> Self {
        Self::constant_unchecked(vec![1.0; sparsity.nnz()], sparsity.clone())
    }

    /// Reference to output `index` of a multiple-output node.
    pub(crate) fn output(producer: &Expr, index: usize) -> Self {
        let sparsity = producer.node().sparsity(index).clone();
        Self::from_node(Node::new(
            Operation::Output { index },
            vec![producer.clone()],
            vec![sparsity],
        ))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn op(&self) -> &Operation {
        self.0.op()
    }

    pub fn deps(&self) -> &[Expr] {
        self.0.deps()
    }

    pub fn sparsity(&self) -> &Sparsity {
        self.0.sparsity(0)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.sparsity().shape()
    }

    pub fn nnz(&self) -> usize {
        self.sparsity().nnz()
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.op(), Operation::Symbol { .. })
    }

    /// Name of a symbolic variable.
    pub fn name(&self) -> Option<&str> {
        match self.op() {
            Operation::Symbol { name } => Some(name),
            _ => None,
        }
    }

    /// Nonzeros of a constant expression.
    pub fn constant_nz(&self) -> Option<&[f64]> {
        match self.op() {
            Operation::Constant { nz } => Some(nz),
            _ => None,
        }
    }

    pub(crate) fn is_zero_constant(&self) -> bool {
        self.constant_nz()
            .is_some_and(|nz| nz.iter().all(|&v| v == 0.0))
    }

    pub(crate) fn is_one_constant(&self) -> bool {
        self.constant_nz()
            .is_some_and(|nz| !nz.is_empty() && nz.iter().all(|&v| v == 1.0))
    }

    /// True if both handles point at the same node.
    pub fn is_same(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn key(&self) -> *const Node {
        Rc::as_ptr(&self.0)
    }

    pub fn try_add(&self, other: &Expr) -> Result<Expr, GraphError> {
        self.try_binary(BinaryOp::Add, other)
    }

    pub fn try_sub(&self, other: &Expr) -> Result<Expr, GraphError> {
        self.try_binary(BinaryOp::Sub, other)
    }

    pub fn try_mul(&self, other: &Expr) -> Result<Expr, GraphError> {
        self.try_binary(BinaryOp::Mul, other)
    }

    pub fn try_div(&self, other: &Expr) -> Result<Expr, GraphError> {
        self.try_binary(BinaryOp::Div, other)
    }

    /// Sum of all nonzeros.
    pub fn sum(&self) -> Expr {
        let ones = Expr::ones(self.sparsity());
        // Same pattern on both sides, cannot fail.
        match self.dot(&ones) {
            Ok(e) => e,
            Err(err) => panic!("sum: {err}"),
        }
    }
}

/// Adds `contribution` into an optional accumulator after aligning it with
/// `target`.
pub(crate) fn accumulate(
    slot: &mut Option<Expr>,
    contribution: Expr,
    target: &Sparsity,
) -> Result<(), GraphError> {
    let contribution = contribution.project(target)?;
    *slot = Some(match slot.take() {
        Some(acc) => acc.try_add(&contribution)?.project(target)?,
        None => contribution,
    });
    Ok(())
}

fn binary_or_panic(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Expr {
    match lhs.try_binary(op, rhs) {
        Ok(e) => e,
        Err(err) => panic!("{err}"),
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                binary_or_panic($op, self, rhs)
            }
        }
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                binary_or_panic($op, &self, &rhs)
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                binary_or_panic($op, &self, rhs)
            }
        }
        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                binary_or_panic($op, self, &Expr::scalar(rhs))
            }
        }
        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                binary_or_panic($op, &Expr::scalar(self), rhs)
            }
        }
    };
}

// Shape mismatches panic, as with nalgebra's operators. The `try_*`
// methods report them as errors instead.
impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.unary(UnaryOp::Neg)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.unary(UnaryOp::Neg)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.deps().iter().map(|d| d.to_string()).collect();
        f.write_str(&self.node().print(&args))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({}, {})", self, self.sparsity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_checks_nonzero_count() {
        let err = Expr::constant(vec![1.0], Sparsity::column(2)).expect_err("nnz mismatch");
        assert_eq!(
            err,
            GraphError::NonzeroCount {
                index: 0,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn printing_follows_graph_structure() {
        let x = Expr::sym_vector("x", 2);
        let y = Expr::sym_scalar("y");
        let e = (&x * &y).sin() + &x;
        assert_eq!(e.to_string(), "(sin((x*y))+x)");
    }

    #[test]
    fn shared_subexpressions_are_the_same_node() {
        let x = Expr::sym_scalar("x");
        let s = x.sin();
        let e = &s + &s;
        assert!(e.deps()[0].is_same(&e.deps()[1]));
    }

    #[test]
    fn operators_reject_incompatible_shapes() {
        let a = Expr::sym_vector("a", 2);
        let b = Expr::sym_vector("b", 3);
        let err = a.try_add(&b).expect_err("shape mismatch");
        assert!(matches!(err, GraphError::ShapeMismatch { op: "add", .. }));
    }
}
