use super::node::{Node, Operation};
use super::{accumulate, Expr};
use crate::error::GraphError;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;

impl Expr {
    /// Inner product of two operands of equal shape: the sum of their
    /// elementwise products, as a dense 1x1 result.
    pub fn dot(&self, other: &Expr) -> Result<Expr, GraphError> {
        if self.shape() != other.shape() {
            return Err(GraphError::ShapeMismatch {
                op: "inner_prod",
                details: format!("{:?} vs {:?}", self.shape(), other.shape()),
            });
        }
        let union = self.sparsity().union(other.sparsity())?;
        let (a, b) = (self.project(&union)?, other.project(&union)?);
        if a.is_zero_constant() || b.is_zero_constant() {
            return Ok(Expr::scalar(0.0));
        }
        if let (Some(x), Some(y)) = (a.constant_nz(), b.constant_nz()) {
            return Ok(Expr::scalar(x.iter().zip(y).map(|(p, q)| p * q).sum()));
        }
        Ok(Expr::from_node(Node::new(
            Operation::InnerProd,
            vec![a, b],
            vec![Sparsity::scalar()],
        )))
    }
}

pub(super) fn eval<T: Element>(a: &[T], b: &[T], out: &mut [T]) {
    out[0] = a
        .iter()
        .zip(b)
        .fold(T::zero(), |acc, (x, y)| acc + x.clone() * y.clone());
}

pub(super) fn propagate(args: &mut [&mut [Bvec]], out: &mut [Bvec], fwd: bool) {
    let (a, b) = match args {
        [a, b, ..] => (a, b),
        _ => return,
    };
    if fwd {
        out[0] = a.iter().chain(b.iter()).fold(0, |acc, bits| acc | bits);
    } else {
        let bits = out[0];
        a.iter_mut().chain(b.iter_mut()).for_each(|x| *x |= bits);
        out[0] = 0;
    }
}

pub(super) fn fwd(deps: &[Expr], seeds: &[Expr]) -> Result<Expr, GraphError> {
    seeds[0].dot(&deps[1])?.try_add(&deps[0].dot(&seeds[1])?)
}

pub(super) fn adj(deps: &[Expr], seed: &Expr, sens: &mut [Option<Expr>]) -> Result<(), GraphError> {
    accumulate(&mut sens[0], seed.try_mul(&deps[1])?, deps[0].sparsity())?;
    accumulate(&mut sens[1], seed.try_mul(&deps[0])?, deps[1].sparsity())
}

pub(super) fn generate(node: &Node, arg: &[String], res: &[String], code: &mut String) {
    let n = node.deps()[0].nnz();
    let r = &res[0];
    code.push_str(&format!(
        "  {r}[0] = 0;\n  for (i=0; i<{n}; ++i) {r}[0] += {}[i]*{}[i];\n",
        arg[0], arg[1]
    ));
}
