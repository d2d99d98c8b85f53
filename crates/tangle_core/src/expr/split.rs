//! Horizontal, vertical and block-diagonal splits.
//!
//! A split node has one input and several outputs. Its offset table is kept
//! in nonzero units so evaluation is a plain copy of contiguous ranges of the
//! input buffer, whatever the partition geometry.

use super::node::{Node, Operation};
use super::{accumulate, Expr};
use crate::error::GraphError;
use crate::sparsity::{Bvec, Sparsity};
use crate::traits::Element;

impl Expr {
    /// Splits the columns at `col_offsets` (structural column indices).
    pub fn horzsplit(&self, col_offsets: &[usize]) -> Result<Vec<Expr>, GraphError> {
        let parts = self.sparsity().horzsplit(col_offsets)?;
        Ok(split_node(self, parts, |offset| Operation::Horzsplit { offset }))
    }

    /// Splits the rows at `row_offsets`. Column vectors become a vertical
    /// split node; other matrices are split through their transpose.
    pub fn vertsplit(&self, row_offsets: &[usize]) -> Result<Vec<Expr>, GraphError> {
        if !self.sparsity().is_column() {
            let parts = self.transpose().horzsplit(row_offsets)?;
            return Ok(parts.iter().map(Expr::transpose).collect());
        }
        let parts = self.sparsity().vertsplit(row_offsets)?;
        Ok(split_node(self, parts, |offset| Operation::Vertsplit { offset }))
    }

    /// Splits into diagonal blocks. Every nonzero must lie inside one of the
    /// blocks; nonzeros outside of them are a construction error.
    pub fn diagsplit(
        &self,
        row_offsets: &[usize],
        col_offsets: &[usize],
    ) -> Result<Vec<Expr>, GraphError> {
        let parts = self.sparsity().diagsplit(row_offsets, col_offsets)?;
        let covered: usize = parts.iter().map(Sparsity::nnz).sum();
        if covered != self.nnz() {
            return Err(GraphError::DiagsplitCoverage {
                covered,
                total: self.nnz(),
            });
        }
        Ok(split_node(self, parts, |offset| Operation::Diagsplit { offset }))
    }
}

fn split_node(
    x: &Expr,
    parts: Vec<Sparsity>,
    op: impl FnOnce(Vec<usize>) -> Operation,
) -> Vec<Expr> {
    match parts.len() {
        0 => return Vec::new(),
        1 => return vec![x.clone()],
        _ => {}
    }
    let mut offset = Vec::with_capacity(parts.len() + 1);
    offset.push(0);
    for part in &parts {
        offset.push(offset[offset.len() - 1] + part.nnz());
    }
    let n = parts.len();
    let node = Expr::from_node(Node::new(op(offset), vec![x.clone()], parts));
    (0..n).map(|i| Expr::output(&node, i)).collect()
}

/// Structural (row, column) offsets recovered from the output patterns.
fn structure(node: &Node) -> (Vec<usize>, Vec<usize>) {
    let mut rows = vec![0];
    let mut cols = vec![0];
    for sp in node.output_sparsity() {
        rows.push(rows[rows.len() - 1] + sp.nrows());
        cols.push(cols[cols.len() - 1] + sp.ncols());
    }
    (rows, cols)
}

/// Applies the same partition to another expression with the input's
/// pattern.
pub(super) fn rebuild(node: &Node, x: &Expr) -> Result<Vec<Expr>, GraphError> {
    let (rows, cols) = structure(node);
    match node.op() {
        Operation::Horzsplit { .. } => x.horzsplit(&cols),
        Operation::Vertsplit { .. } => x.vertsplit(&rows),
        Operation::Diagsplit { .. } => x.diagsplit(&rows, &cols),
        other => unreachable!("not a split: {other:?}"),
    }
}

pub(super) fn eval<T: Element>(offset: &[usize], x: &[T], res: &mut [Option<&mut [T]>]) {
    for (i, r) in res.iter_mut().enumerate() {
        if let Some(out) = r.as_deref_mut() {
            out.clone_from_slice(&x[offset[i]..offset[i + 1]]);
        }
    }
}

pub(super) fn propagate(
    offset: &[usize],
    args: &mut [&mut [Bvec]],
    res: &mut [Option<&mut [Bvec]>],
    fwd: bool,
) {
    let x = &mut *args[0];
    for (i, r) in res.iter_mut().enumerate() {
        let Some(out) = r.as_deref_mut() else {
            continue;
        };
        let range = &mut x[offset[i]..offset[i + 1]];
        if fwd {
            out.copy_from_slice(range);
        } else {
            for (xi, oi) in range.iter_mut().zip(out.iter_mut()) {
                *xi |= *oi;
                *oi = 0;
            }
        }
    }
}

/// Adjoint of a split: the output seeds are concatenated back in the split's
/// geometry, absent seeds standing for zero blocks, and added to the input's
/// adjoint. Consumed seeds are cleared.
pub(super) fn adj(
    node: &Node,
    seeds: &mut [Option<Expr>],
    sens: &mut [Option<Expr>],
) -> Result<(), GraphError> {
    if seeds.iter().all(Option::is_none) {
        return Ok(());
    }
    let mut parts = Vec::with_capacity(seeds.len());
    for (seed, sp) in seeds.iter_mut().zip(node.output_sparsity()) {
        parts.push(match seed.take() {
            Some(s) => s.project(sp)?,
            None => Expr::zeros(sp.nrows(), sp.ncols()),
        });
    }
    let joined = match node.op() {
        Operation::Horzsplit { .. } => Expr::horzcat(&parts)?,
        Operation::Vertsplit { .. } => Expr::vertcat(&parts)?,
        Operation::Diagsplit { .. } => Expr::diagcat(&parts),
        other => unreachable!("not a split: {other:?}"),
    };
    accumulate(&mut sens[0], joined, node.deps()[0].sparsity())
}

pub(super) fn generate(offset: &[usize], arg: &[String], res: &[String], code: &mut String) {
    for (i, r) in res.iter().enumerate() {
        if r == "0" {
            continue;
        }
        let n = offset[i + 1] - offset[i];
        code.push_str(&format!(
            "  for (i=0; i<{n}; ++i) {r}[i] = {}[{}+i];\n",
            arg[0], offset[i]
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal(n: usize) -> Sparsity {
        let mut entries = Vec::new();
        for i in 0..n {
            entries.push((i, i));
            if i > 0 {
                entries.push((i - 1, i));
                entries.push((i, i - 1));
            }
        }
        Sparsity::from_triplets(n, n, &entries).expect("pattern")
    }

    fn producer(parts: &[Expr]) -> Expr {
        parts[0].deps()[0].clone()
    }

    #[test]
    fn offsets_are_rewritten_in_nonzero_units() {
        let x = Expr::sym("x", tridiagonal(4));
        let parts = x.horzsplit(&[0, 1, 4]).expect("split");
        let node = producer(&parts);
        assert_eq!(
            node.op(),
            &Operation::Horzsplit {
                offset: vec![0, 2, 10]
            }
        );
        assert_eq!(parts[0].shape(), (4, 1));
        assert_eq!(parts[1].shape(), (4, 3));
    }

    #[test]
    fn nonzero_counts_add_up_for_every_split_kind() {
        let x = Expr::sym("x", tridiagonal(5));
        let total = x.nnz();

        let h = x.horzsplit(&[0, 2, 2, 5]).expect("horzsplit");
        assert_eq!(h.iter().map(Expr::nnz).sum::<usize>(), total);

        let v = x.vertsplit(&[0, 3, 5]).expect("vertsplit");
        assert_eq!(v.iter().map(Expr::nnz).sum::<usize>(), total);

        let col = Expr::sym_vector("c", 6);
        let vc = col.vertsplit(&[0, 1, 6]).expect("column vertsplit");
        assert!(matches!(producer(&vc).op(), Operation::Vertsplit { .. }));
        assert_eq!(vc.iter().map(Expr::nnz).sum::<usize>(), 6);

        let blocks = Sparsity::diagcat(&[Sparsity::dense(2, 2), tridiagonal(3)]);
        let d = Expr::sym("d", blocks.clone())
            .diagsplit(&[0, 2, 5], &[0, 2, 5])
            .expect("diagsplit");
        assert_eq!(d.iter().map(Expr::nnz).sum::<usize>(), blocks.nnz());
    }

    #[test]
    fn diagsplit_rejects_off_block_nonzeros() {
        let x = Expr::sym("x", tridiagonal(4));
        let err = x.diagsplit(&[0, 2, 4], &[0, 2, 4]).expect_err("uncovered");
        assert_eq!(
            err,
            GraphError::DiagsplitCoverage {
                covered: 8,
                total: 10
            }
        );
        assert!(err.to_string().contains("nonzeros outside the diagonal blocks"));
    }

    #[test]
    fn single_block_split_is_the_identity() {
        let x = Expr::sym_vector("x", 3);
        let parts = x.vertsplit(&[0, 3]).expect("split");
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_same(&x));
    }

    #[test]
    fn evaluation_copies_ranges_and_skips_unrequested_outputs() {
        let x = Expr::sym("x", Sparsity::dense(2, 3));
        let parts = x.horzsplit(&[0, 1, 3]).expect("split");
        let node = producer(&parts);
        let input: Vec<f64> = (1..=6).map(f64::from).collect();
        let mut second = vec![0.0; 4];
        {
            let mut res = vec![None, Some(second.as_mut_slice())];
            node.node().eval_nz(&[input.as_slice()], &mut res);
        }
        assert_eq!(second, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn reverse_taint_reunites_forward_taint() {
        let x = Expr::sym("x", tridiagonal(4));
        let parts = x.horzsplit(&[0, 1, 3, 4]).expect("split");
        let node = producer(&parts);
        let seeds: Vec<Bvec> = (0..x.nnz()).map(|k| 1 << k).collect();

        let mut outs: Vec<Vec<Bvec>> = parts.iter().map(|p| vec![0; p.nnz()]).collect();
        {
            let mut input = seeds.clone();
            let mut args = vec![input.as_mut_slice()];
            let mut res: Vec<Option<&mut [Bvec]>> =
                outs.iter_mut().map(|o| Some(o.as_mut_slice())).collect();
            node.node().propagate_sparsity(&mut args, &mut res, true);
        }
        assert_eq!(outs.concat(), seeds);

        let mut back = vec![0; x.nnz()];
        {
            let mut args = vec![back.as_mut_slice()];
            let mut res: Vec<Option<&mut [Bvec]>> =
                outs.iter_mut().map(|o| Some(o.as_mut_slice())).collect();
            node.node().propagate_sparsity(&mut args, &mut res, false);
        }
        assert_eq!(back, seeds);
        assert!(outs.iter().flatten().all(|&b| b == 0));
    }

    #[test]
    fn forward_seeds_are_split_like_the_primal() {
        let x = Expr::sym_vector("x", 4);
        let parts = x.vertsplit(&[0, 1, 4]).expect("split");
        let node = producer(&parts);
        let seeds: Vec<Vec<Expr>> = (0..3)
            .map(|d| vec![Expr::sym_vector(&format!("dx{d}"), 4)])
            .collect();
        let fsens = node.node().eval_fwd(&parts, &seeds).expect("fwd");
        assert_eq!(fsens.len(), 3);
        for (d, sens) in fsens.iter().enumerate() {
            assert_eq!(sens.len(), 2);
            assert_eq!(sens[0].to_string(), format!("vertsplit(dx{d}){{0}}"));
            assert_eq!(sens[1].shape(), (3, 1));
        }
    }

    #[test]
    fn adjoint_concatenates_seeds_and_consumes_them() {
        let x = Expr::sym_vector("x", 3);
        let parts = x.vertsplit(&[0, 1, 3]).expect("split");
        let node = producer(&parts);
        let mut aseed = vec![vec![Some(Expr::sym_scalar("a")), None]];
        let mut asens = vec![vec![None]];
        node.node()
            .eval_adj(&parts, &mut aseed, &mut asens)
            .expect("adj");
        assert!(aseed[0].iter().all(Option::is_none));
        let sens = asens[0][0].as_ref().expect("sensitivity");
        assert_eq!(sens.shape(), (3, 1));
        assert!(sens.sparsity().is_dense());
        assert_eq!(sens.to_string(), "project(vertcat(a, zeros(2x1)))");
    }

    #[test]
    fn emits_one_copy_loop_per_required_output() {
        let x = Expr::sym_vector("x", 5);
        let parts = x.vertsplit(&[0, 2, 3, 5]).expect("split");
        let node = producer(&parts);
        let mut code = String::new();
        node.node().generate(
            &["w0".to_string()],
            &["w1".to_string(), "0".to_string(), "w3".to_string()],
            &mut code,
        );
        assert_eq!(
            code,
            "  for (i=0; i<2; ++i) w1[i] = w0[0+i];\n  for (i=0; i<2; ++i) w3[i] = w0[3+i];\n"
        );
    }
}
