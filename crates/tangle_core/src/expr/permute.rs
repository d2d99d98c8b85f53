use super::node::{Node, Operation};
use super::Expr;
use crate::error::GraphError;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;

impl Expr {
    pub fn transpose(&self) -> Expr {
        if let Operation::Transpose { .. } = self.op() {
            return self.deps()[0].clone();
        }
        let (sparsity, mapping) = self.sparsity().transpose();
        if let Some(nz) = self.constant_nz() {
            let permuted = mapping.iter().map(|&k| nz[k]).collect();
            return Expr::constant_unchecked(permuted, sparsity);
        }
        Expr::from_node(Node::new(
            Operation::Transpose { mapping },
            vec![self.clone()],
            vec![sparsity],
        ))
    }

    /// Re-expresses the value on another pattern of the same shape. Entries
    /// missing from `target` are dropped; entries missing from the current
    /// pattern become explicit zeros.
    pub fn project(&self, target: &Sparsity) -> Result<Expr, GraphError> {
        if self.shape() != target.shape() {
            return Err(GraphError::ShapeMismatch {
                op: "project",
                details: format!("{:?} onto {:?}", self.shape(), target.shape()),
            });
        }
        if self.sparsity() == target {
            return Ok(self.clone());
        }
        let mapping = self.sparsity().project_mapping(target);
        if let Some(nz) = self.constant_nz() {
            let projected = mapping.iter().map(|k| k.map_or(0.0, |k| nz[k])).collect();
            return Ok(Expr::constant_unchecked(projected, target.clone()));
        }
        Ok(Expr::from_node(Node::new(
            Operation::Project { mapping },
            vec![self.clone()],
            vec![target.clone()],
        )))
    }

    pub fn densify(&self) -> Expr {
        let (nrows, ncols) = self.shape();
        match self.project(&Sparsity::dense(nrows, ncols)) {
            Ok(e) => e,
            Err(err) => panic!("densify: {err}"),
        }
    }
}

pub(super) fn eval_transpose<T: Element>(mapping: &[usize], x: &[T], out: &mut [T]) {
    for (o, &k) in out.iter_mut().zip(mapping) {
        *o = x[k].clone();
    }
}

pub(super) fn eval_project<T: Element>(mapping: &[Option<usize>], x: &[T], out: &mut [T]) {
    for (o, k) in out.iter_mut().zip(mapping) {
        *o = match k {
            Some(k) => x[*k].clone(),
            None => T::zero(),
        };
    }
}

pub(super) fn propagate(
    mapping: &[Option<usize>],
    args: &mut [&mut [Bvec]],
    out: &mut [Bvec],
    fwd: bool,
) {
    let x = &mut *args[0];
    for (o, k) in out.iter_mut().zip(mapping) {
        if fwd {
            *o = k.map_or(0, |k| x[k]);
        } else {
            if let Some(k) = k {
                x[*k] |= *o;
            }
            *o = 0;
        }
    }
}
