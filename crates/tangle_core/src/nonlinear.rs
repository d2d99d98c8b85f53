//! The narrow view a solver has of a system of equations: evaluate, forward
//! derivatives, dependency masks and Jacobians.

use crate::autodiff::Dual;
use crate::sparsity::{Bvec, Sparsity};
use anyhow::{anyhow, Result};
use nalgebra_sparse::CscMatrix;

const BVEC_BITS: usize = Bvec::BITS as usize;

/// A function mapping nonzero buffers to nonzero buffers.
///
/// Implemented by graph functions and their expanded scalar form.
pub trait NonlinearFunction {
    fn name(&self) -> &str;
    fn n_in(&self) -> usize;
    fn n_out(&self) -> usize;
    fn input_sparsity(&self, i: usize) -> &Sparsity;
    fn output_sparsity(&self, i: usize) -> &Sparsity;

    fn eval(&self, args: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;

    /// Evaluation on dual numbers: one forward direction per call.
    fn eval_dual(&self, args: &[Vec<Dual>]) -> Result<Vec<Vec<Dual>>>;

    /// Forward dependency sweep: bit `b` of an output nonzero is set when it
    /// may depend on an input nonzero whose seed has bit `b` set.
    fn sparsity_forward(&self, seeds: &[Vec<Bvec>]) -> Result<Vec<Vec<Bvec>>>;

    /// Structural Jacobian of output `oind` with respect to input `iind`,
    /// with rows indexing output nonzeros and columns input nonzeros.
    fn jac_sparsity(&self, iind: usize, oind: usize) -> Result<Sparsity> {
        let n = self.input_sparsity(iind).nnz();
        let m = self.output_sparsity(oind).nnz();
        let mut entries = Vec::new();
        for start in (0..n).step_by(BVEC_BITS) {
            let end = (start + BVEC_BITS).min(n);
            let seeds: Vec<Vec<Bvec>> = (0..self.n_in())
                .map(|i| {
                    let mut s = vec![0; self.input_sparsity(i).nnz()];
                    if i == iind {
                        for (bit, col) in (start..end).enumerate() {
                            s[col] = 1 << bit;
                        }
                    }
                    s
                })
                .collect();
            let out = self.sparsity_forward(&seeds)?;
            for (r, &mask) in out[oind].iter().enumerate() {
                for bit in 0..(end - start) {
                    if mask & (1 << bit) != 0 {
                        entries.push((r, start + bit));
                    }
                }
            }
        }
        Ok(Sparsity::from_triplets(m, n, &entries)?)
    }

    /// Numeric Jacobian of output `oind` with respect to input `iind`.
    ///
    /// Structurally orthogonal columns share one dual-number sweep, so the
    /// number of evaluations equals the number of colors, not the number of
    /// input nonzeros.
    fn jacobian(&self, iind: usize, oind: usize, args: &[Vec<f64>]) -> Result<CscMatrix<f64>> {
        let pattern = self.jac_sparsity(iind, oind)?;
        let colors = greedy_column_coloring(&pattern);
        let n_colors = colors.iter().max().map_or(0, |c| c + 1);
        let mut values = vec![0.0; pattern.nnz()];

        for color in 0..n_colors {
            let duals: Vec<Vec<Dual>> = args
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    a.iter()
                        .enumerate()
                        .map(|(k, &v)| {
                            let seeded = i == iind && colors[k] == color;
                            Dual::new(v, if seeded { 1.0 } else { 0.0 })
                        })
                        .collect()
                })
                .collect();
            let out = self.eval_dual(&duals)?;
            let derivatives = out
                .get(oind)
                .ok_or_else(|| anyhow!("{}: missing output {}", self.name(), oind))?;
            for col in (0..pattern.ncols()).filter(|&c| colors[c] == color) {
                let start = pattern.colind()[col];
                for (k, &r) in pattern.column_rows(col).iter().enumerate() {
                    values[start + k] = derivatives[r].eps;
                }
            }
        }
        log::debug!(
            "{}: jacobian {} evaluated with {} sweeps",
            self.name(),
            pattern,
            n_colors
        );

        CscMatrix::try_from_pattern_and_values(pattern.pattern().clone(), values)
            .map_err(|err| anyhow!("Failed to assemble jacobian of {}: {}", self.name(), err))
    }
}

/// Greedy distance-1 coloring of the column intersection graph: two columns
/// get different colors when they have a nonzero in a common row.
pub fn greedy_column_coloring(sparsity: &Sparsity) -> Vec<usize> {
    let ncols = sparsity.ncols();
    let mut columns_of_row = vec![Vec::new(); sparsity.nrows()];
    for col in 0..ncols {
        for &r in sparsity.column_rows(col) {
            columns_of_row[r].push(col);
        }
    }

    let mut colors = vec![usize::MAX; ncols];
    let mut forbidden = vec![usize::MAX; ncols];
    for col in 0..ncols {
        for &r in sparsity.column_rows(col) {
            for &neighbor in &columns_of_row[r] {
                if colors[neighbor] != usize::MAX {
                    forbidden[colors[neighbor]] = col;
                }
            }
        }
        colors[col] = (0..ncols).find(|&c| forbidden[c] != col).unwrap_or(0);
    }
    colors
}
