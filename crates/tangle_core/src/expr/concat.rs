//! Horizontal, vertical and block-diagonal concatenation, the structural
//! inverses of the split family. In compressed-column storage all three
//! concatenate the nonzero buffers of their arguments in order.

use super::node::{Node, Operation};
use super::{accumulate, Expr};
use crate::error::GraphError;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;

impl Expr {
    pub fn horzcat(parts: &[Expr]) -> Result<Expr, GraphError> {
        if let Some(x) = try_fuse(parts, |op| matches!(op, Operation::Horzsplit { .. })) {
            return Ok(x);
        }
        let patterns: Vec<Sparsity> = parts.iter().map(|p| p.sparsity().clone()).collect();
        let sparsity = Sparsity::horzcat(&patterns)?;
        Ok(concat_node(Operation::Horzcat, parts, sparsity))
    }

    /// Vertical concatenation. Column vectors become a vertical
    /// concatenation node; other matrices go through their transposes.
    pub fn vertcat(parts: &[Expr]) -> Result<Expr, GraphError> {
        if let Some(x) = try_fuse(parts, |op| matches!(op, Operation::Vertsplit { .. })) {
            return Ok(x);
        }
        if !parts.iter().all(|p| p.sparsity().is_column()) {
            let transposed: Vec<Expr> = parts.iter().map(Expr::transpose).collect();
            return Ok(Expr::horzcat(&transposed)?.transpose());
        }
        let patterns: Vec<Sparsity> = parts.iter().map(|p| p.sparsity().clone()).collect();
        let sparsity = Sparsity::vertcat(&patterns)?;
        Ok(concat_node(Operation::Vertcat, parts, sparsity))
    }

    pub fn diagcat(parts: &[Expr]) -> Expr {
        if let Some(x) = try_fuse(parts, |op| matches!(op, Operation::Diagsplit { .. })) {
            return x;
        }
        let patterns: Vec<Sparsity> = parts.iter().map(|p| p.sparsity().clone()).collect();
        let sparsity = Sparsity::diagcat(&patterns);
        concat_node(Operation::Diagcat, parts, sparsity)
    }
}

fn concat_node(op: Operation, parts: &[Expr], sparsity: Sparsity) -> Expr {
    match parts {
        [] => return Expr::zeros(sparsity.nrows(), sparsity.ncols()),
        [single] => return single.clone(),
        _ => {}
    }
    if parts.iter().all(|p| p.constant_nz().is_some()) {
        let nz = parts
            .iter()
            .flat_map(|p| p.constant_nz().unwrap_or_default().iter().copied())
            .collect();
        return Expr::constant_unchecked(nz, sparsity);
    }
    Expr::from_node(Node::new(op, parts.to_vec(), vec![sparsity]))
}

/// Recognizes `parts` as the complete, in-order outputs of one split node of
/// the matching kind and returns that split's input. Any mismatch in output
/// index, producing node or count leaves the concatenation to be built
/// normally.
pub(super) fn try_fuse(parts: &[Expr], is_kind: impl Fn(&Operation) -> bool) -> Option<Expr> {
    let first = parts.first()?;
    let Operation::Output { .. } = first.op() else {
        return None;
    };
    let producer = &first.deps()[0];
    if !is_kind(producer.op()) || producer.node().n_out() != parts.len() {
        return None;
    }
    let all_match = parts.iter().enumerate().all(|(i, p)| match p.op() {
        Operation::Output { index } => *index == i && p.deps()[0].is_same(producer),
        _ => false,
    });
    all_match.then(|| producer.deps()[0].clone())
}

pub(super) fn eval<T: Element>(args: &[&[T]], out: &mut [T]) {
    let mut k = 0;
    for arg in args {
        out[k..k + arg.len()].clone_from_slice(arg);
        k += arg.len();
    }
}

pub(super) fn propagate(args: &mut [&mut [Bvec]], out: &mut [Bvec], fwd: bool) {
    let mut k = 0;
    for arg in args.iter_mut() {
        let n = arg.len();
        let range = &mut out[k..k + n];
        if fwd {
            range.copy_from_slice(arg);
        } else {
            for (a, o) in arg.iter_mut().zip(range.iter_mut()) {
                *a |= *o;
                *o = 0;
            }
        }
        k += n;
    }
}

/// Adjoint of a concatenation: split the seed in the same geometry.
pub(super) fn adj(node: &Node, seed: &Expr, sens: &mut [Option<Expr>]) -> Result<(), GraphError> {
    let mut rows = vec![0];
    let mut cols = vec![0];
    for dep in node.deps() {
        rows.push(rows[rows.len() - 1] + dep.shape().0);
        cols.push(cols[cols.len() - 1] + dep.shape().1);
    }
    let pieces = match node.op() {
        Operation::Horzcat => seed.horzsplit(&cols)?,
        Operation::Vertcat => seed.vertsplit(&rows)?,
        Operation::Diagcat => seed.diagsplit(&rows, &cols)?,
        other => unreachable!("not a concatenation: {other:?}"),
    };
    for ((slot, piece), dep) in sens.iter_mut().zip(pieces).zip(node.deps()) {
        accumulate(slot, piece, dep.sparsity())?;
    }
    Ok(())
}

pub(super) fn generate(node: &Node, arg: &[String], res: &[String], code: &mut String) {
    let mut offset = 0;
    for (a, dep) in arg.iter().zip(node.deps()) {
        let n = dep.nnz();
        code.push_str(&format!(
            "  for (i=0; i<{n}; ++i) {}[{offset}+i] = {a}[i];\n",
            res[0]
        ));
        offset += n;
    }
}
