//! Scalar expression graphs.
//!
//! [`SxElem`] is the element type used when a matrix graph is expanded into
//! scalar operations. Construction folds constants and drops trivial
//! operations (`x + 0`, `x * 1`, ...), which keeps expanded graphs small.

mod function;
pub mod vm;

pub use function::SxFunction;

use crate::expr::{BinaryOp, UnaryOp};
use crate::traits::Element;
use num_traits::{One, Zero};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

#[derive(Debug)]
pub enum SxNode {
    Constant(f64),
    Symbol { name: String },
    Unary { op: UnaryOp, arg: SxElem },
    Binary { op: BinaryOp, lhs: SxElem, rhs: SxElem },
}

#[derive(Clone)]
pub struct SxElem(Rc<SxNode>);

impl SxElem {
    pub fn sym(name: &str) -> Self {
        Self(Rc::new(SxNode::Symbol {
            name: name.to_string(),
        }))
    }

    pub fn constant(value: f64) -> Self {
        Self(Rc::new(SxNode::Constant(value)))
    }

    pub fn node(&self) -> &SxNode {
        &self.0
    }

    pub fn value(&self) -> Option<f64> {
        match *self.0 {
            SxNode::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(*self.0, SxNode::Symbol { .. })
    }

    pub fn is_same(&self, other: &SxElem) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn key(&self) -> *const SxNode {
        Rc::as_ptr(&self.0)
    }

    fn is_value(&self, v: f64) -> bool {
        self.value() == Some(v)
    }

    fn unary(op: UnaryOp, arg: SxElem) -> Self {
        if let Some(v) = arg.value() {
            return Self::constant(op.apply(&v));
        }
        if op == UnaryOp::Neg {
            if let SxNode::Unary {
                op: UnaryOp::Neg,
                arg: inner,
            } = &*arg.0
            {
                return inner.clone();
            }
        }
        Self(Rc::new(SxNode::Unary { op, arg }))
    }

    fn binary(op: BinaryOp, lhs: SxElem, rhs: SxElem) -> Self {
        if let (Some(a), Some(b)) = (lhs.value(), rhs.value()) {
            return Self::constant(op.apply(a, b));
        }
        match op {
            BinaryOp::Add if lhs.is_value(0.0) => return rhs,
            BinaryOp::Add | BinaryOp::Sub if rhs.is_value(0.0) => return lhs,
            BinaryOp::Sub if lhs.is_value(0.0) => return Self::unary(UnaryOp::Neg, rhs),
            BinaryOp::Mul if lhs.is_value(0.0) || rhs.is_value(0.0) => {
                return Self::constant(0.0)
            }
            BinaryOp::Mul if lhs.is_value(1.0) => return rhs,
            BinaryOp::Mul | BinaryOp::Div if rhs.is_value(1.0) => return lhs,
            _ => {}
        }
        Self(Rc::new(SxNode::Binary { op, lhs, rhs }))
    }
}

impl Add for SxElem {
    type Output = SxElem;
    fn add(self, rhs: SxElem) -> SxElem {
        SxElem::binary(BinaryOp::Add, self, rhs)
    }
}

impl Sub for SxElem {
    type Output = SxElem;
    fn sub(self, rhs: SxElem) -> SxElem {
        SxElem::binary(BinaryOp::Sub, self, rhs)
    }
}

impl Mul for SxElem {
    type Output = SxElem;
    fn mul(self, rhs: SxElem) -> SxElem {
        SxElem::binary(BinaryOp::Mul, self, rhs)
    }
}

impl Div for SxElem {
    type Output = SxElem;
    fn div(self, rhs: SxElem) -> SxElem {
        SxElem::binary(BinaryOp::Div, self, rhs)
    }
}

impl Neg for SxElem {
    type Output = SxElem;
    fn neg(self) -> SxElem {
        SxElem::unary(UnaryOp::Neg, self)
    }
}

impl Zero for SxElem {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.is_value(0.0)
    }
}

impl One for SxElem {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Element for SxElem {
    fn from_f64(value: f64) -> Self {
        Self::constant(value)
    }
    fn sin(&self) -> Self {
        Self::unary(UnaryOp::Sin, self.clone())
    }
    fn cos(&self) -> Self {
        Self::unary(UnaryOp::Cos, self.clone())
    }
    fn exp(&self) -> Self {
        Self::unary(UnaryOp::Exp, self.clone())
    }
    fn ln(&self) -> Self {
        Self::unary(UnaryOp::Log, self.clone())
    }
}

impl fmt::Display for SxElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            SxNode::Constant(v) => write!(f, "{v}"),
            SxNode::Symbol { name } => f.write_str(name),
            SxNode::Unary {
                op: UnaryOp::Neg,
                arg,
            } => write!(f, "(-{arg})"),
            SxNode::Unary { op, arg } => write!(f, "{}({arg})", op.name()),
            SxNode::Binary { op, lhs, rhs } => write!(f, "({lhs}{}{rhs})", op.symbol()),
        }
    }
}

impl fmt::Debug for SxElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SxElem({self})")
    }
}
