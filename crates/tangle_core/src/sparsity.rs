//! Compressed-column sparsity patterns.
//!
//! A [`Sparsity`] fixes the shape and the structurally nonzero positions of a
//! matrix-valued expression. Every node sizes its nonzero buffers from its
//! output patterns, so the nonzero count of a pattern never changes after
//! construction.

use crate::error::GraphError;
use nalgebra_sparse::pattern::SparsityPattern;
use std::fmt;

/// Dependency-taint bits. Each bit is one independent seed direction, so a
/// single sweep propagates 64 "may depend on" facts at once.
pub type Bvec = u64;

/// Immutable sparsity pattern in compressed-column form.
///
/// Backed by a `SparsityPattern` whose major dimension is the column index
/// and whose minor dimension is the row index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sparsity {
    pattern: SparsityPattern,
}

impl Sparsity {
    /// Builds a pattern from column offsets and row indices, validating that
    /// the offsets are monotone and the rows in each column strictly sorted.
    pub fn new(
        nrows: usize,
        ncols: usize,
        colind: Vec<usize>,
        row: Vec<usize>,
    ) -> Result<Self, GraphError> {
        SparsityPattern::try_from_offsets_and_indices(ncols, nrows, colind, row)
            .map(|pattern| Self { pattern })
            .map_err(|err| GraphError::InvalidSparsity(format!("{err:?}")))
    }

    // Internal constructor for patterns that are valid by construction.
    fn from_parts(nrows: usize, ncols: usize, colind: Vec<usize>, row: Vec<usize>) -> Self {
        match Self::new(nrows, ncols, colind, row) {
            Ok(sp) => sp,
            Err(err) => panic!("structural operation produced an invalid pattern: {err}"),
        }
    }

    pub fn dense(nrows: usize, ncols: usize) -> Self {
        let colind = (0..=ncols).map(|c| c * nrows).collect();
        let row = (0..ncols).flat_map(|_| 0..nrows).collect();
        Self::from_parts(nrows, ncols, colind, row)
    }

    pub fn scalar() -> Self {
        Self::dense(1, 1)
    }

    /// Dense column vector of length `n`.
    pub fn column(n: usize) -> Self {
        Self::dense(n, 1)
    }

    /// Structurally zero pattern of the given shape.
    pub fn empty(nrows: usize, ncols: usize) -> Self {
        Self::from_parts(nrows, ncols, vec![0; ncols + 1], Vec::new())
    }

    pub fn diagonal(n: usize) -> Self {
        Self::from_parts(n, n, (0..=n).collect(), (0..n).collect())
    }

    /// Builds a pattern from (row, col) pairs in any order; duplicates merge.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize)],
    ) -> Result<Self, GraphError> {
        let mut columns = vec![Vec::new(); ncols];
        for &(r, c) in entries {
            if r >= nrows || c >= ncols {
                return Err(GraphError::InvalidSparsity(format!(
                    "entry ({r}, {c}) outside of a {nrows}x{ncols} pattern"
                )));
            }
            columns[c].push(r);
        }
        let mut colind = Vec::with_capacity(ncols + 1);
        let mut row = Vec::with_capacity(entries.len());
        colind.push(0);
        for mut rows in columns {
            rows.sort_unstable();
            rows.dedup();
            row.extend(rows);
            colind.push(row.len());
        }
        Self::new(nrows, ncols, colind, row)
    }

    pub fn nrows(&self) -> usize {
        self.pattern.minor_dim()
    }

    pub fn ncols(&self) -> usize {
        self.pattern.major_dim()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn numel(&self) -> usize {
        self.nrows() * self.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.pattern.nnz()
    }

    pub fn colind(&self) -> &[usize] {
        self.pattern.major_offsets()
    }

    pub fn row(&self) -> &[usize] {
        self.pattern.minor_indices()
    }

    /// Row indices of the nonzeros in column `col`.
    pub fn column_rows(&self, col: usize) -> &[usize] {
        self.pattern.lane(col)
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == (1, 1)
    }

    pub fn is_column(&self) -> bool {
        self.ncols() == 1
    }

    pub fn is_dense(&self) -> bool {
        self.nnz() == self.numel()
    }

    /// True if the pattern has no structural nonzeros.
    pub fn is_structurally_zero(&self) -> bool {
        self.nnz() == 0
    }

    /// Position of entry (row, col) in the nonzero buffer, if present.
    pub fn nz_index(&self, row: usize, col: usize) -> Option<usize> {
        if col >= self.ncols() {
            return None;
        }
        let start = self.colind()[col];
        self.column_rows(col)
            .binary_search(&row)
            .ok()
            .map(|pos| start + pos)
    }

    /// (row, col) of every nonzero, in nonzero-buffer order.
    pub fn triplets(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.nnz());
        for c in 0..self.ncols() {
            for &r in self.column_rows(c) {
                out.push((r, c));
            }
        }
        out
    }

    /// Splits the columns at `col_offsets`.
    pub fn horzsplit(&self, col_offsets: &[usize]) -> Result<Vec<Sparsity>, GraphError> {
        check_offsets(col_offsets, self.ncols(), "column")?;
        let colind = self.colind();
        let row = self.row();
        let parts = col_offsets
            .windows(2)
            .map(|w| {
                let (c0, c1) = (w[0], w[1]);
                let base = colind[c0];
                let block_colind = colind[c0..=c1].iter().map(|&k| k - base).collect();
                let block_row = row[base..colind[c1]].to_vec();
                Self::from_parts(self.nrows(), c1 - c0, block_colind, block_row)
            })
            .collect();
        Ok(parts)
    }

    /// Splits the rows at `row_offsets`.
    pub fn vertsplit(&self, row_offsets: &[usize]) -> Result<Vec<Sparsity>, GraphError> {
        check_offsets(row_offsets, self.nrows(), "row")?;
        let parts = row_offsets
            .windows(2)
            .map(|w| self.sub_block(w[0], w[1], 0, self.ncols()))
            .collect();
        Ok(parts)
    }

    /// Extracts the diagonal blocks delimited by `row_offsets` and
    /// `col_offsets`. Nonzeros outside every block are dropped; callers that
    /// require full coverage compare the nonzero counts.
    pub fn diagsplit(
        &self,
        row_offsets: &[usize],
        col_offsets: &[usize],
    ) -> Result<Vec<Sparsity>, GraphError> {
        check_offsets(row_offsets, self.nrows(), "row")?;
        check_offsets(col_offsets, self.ncols(), "column")?;
        if row_offsets.len() != col_offsets.len() {
            return Err(GraphError::InvalidOffsets(format!(
                "diagonal split needs as many row blocks as column blocks ({} vs {})",
                row_offsets.len() - 1,
                col_offsets.len() - 1
            )));
        }
        let parts = row_offsets
            .windows(2)
            .zip(col_offsets.windows(2))
            .map(|(r, c)| self.sub_block(r[0], r[1], c[0], c[1]))
            .collect();
        Ok(parts)
    }

    fn sub_block(&self, r0: usize, r1: usize, c0: usize, c1: usize) -> Sparsity {
        let mut colind = Vec::with_capacity(c1 - c0 + 1);
        let mut row = Vec::new();
        colind.push(0);
        for c in c0..c1 {
            row.extend(
                self.column_rows(c)
                    .iter()
                    .filter(|&&r| r >= r0 && r < r1)
                    .map(|&r| r - r0),
            );
            colind.push(row.len());
        }
        Self::from_parts(r1 - r0, c1 - c0, colind, row)
    }

    pub fn horzcat(parts: &[Sparsity]) -> Result<Sparsity, GraphError> {
        let Some(first) = parts.first() else {
            return Ok(Self::empty(0, 0));
        };
        let nrows = first.nrows();
        if let Some(bad) = parts.iter().find(|p| p.nrows() != nrows) {
            return Err(GraphError::ShapeMismatch {
                op: "horzcat",
                details: format!("row counts differ ({} vs {})", nrows, bad.nrows()),
            });
        }
        let mut colind = vec![0];
        let mut row = Vec::new();
        for part in parts {
            let base = row.len();
            colind.extend(part.colind()[1..].iter().map(|&k| base + k));
            row.extend_from_slice(part.row());
        }
        let ncols = parts.iter().map(|p| p.ncols()).sum();
        Ok(Self::from_parts(nrows, ncols, colind, row))
    }

    pub fn vertcat(parts: &[Sparsity]) -> Result<Sparsity, GraphError> {
        let Some(first) = parts.first() else {
            return Ok(Self::empty(0, 0));
        };
        let ncols = first.ncols();
        if let Some(bad) = parts.iter().find(|p| p.ncols() != ncols) {
            return Err(GraphError::ShapeMismatch {
                op: "vertcat",
                details: format!("column counts differ ({} vs {})", ncols, bad.ncols()),
            });
        }
        let mut colind = vec![0];
        let mut row = Vec::new();
        for c in 0..ncols {
            let mut offset = 0;
            for part in parts {
                row.extend(part.column_rows(c).iter().map(|&r| r + offset));
                offset += part.nrows();
            }
            colind.push(row.len());
        }
        let nrows = parts.iter().map(|p| p.nrows()).sum();
        Ok(Self::from_parts(nrows, ncols, colind, row))
    }

    pub fn diagcat(parts: &[Sparsity]) -> Sparsity {
        let mut colind = vec![0];
        let mut row = Vec::new();
        let mut row_offset = 0;
        for part in parts {
            for c in 0..part.ncols() {
                row.extend(part.column_rows(c).iter().map(|&r| r + row_offset));
                colind.push(row.len());
            }
            row_offset += part.nrows();
        }
        let ncols = parts.iter().map(|p| p.ncols()).sum();
        Self::from_parts(row_offset, ncols, colind, row)
    }

    /// Transposed pattern together with the nonzero permutation: entry `k`
    /// of the transpose's buffer is entry `mapping[k]` of this buffer.
    pub fn transpose(&self) -> (Sparsity, Vec<usize>) {
        let (nrows, ncols) = self.shape();
        let mut counts = vec![0usize; nrows + 1];
        for &r in self.row() {
            counts[r + 1] += 1;
        }
        for r in 0..nrows {
            counts[r + 1] += counts[r];
        }
        let colind_t = counts.clone();
        let mut next = counts;
        let mut row_t = vec![0; self.nnz()];
        let mut mapping = vec![0; self.nnz()];
        for c in 0..ncols {
            let start = self.colind()[c];
            for (pos, &r) in self.column_rows(c).iter().enumerate() {
                let dest = next[r];
                next[r] += 1;
                row_t[dest] = c;
                mapping[dest] = start + pos;
            }
        }
        (Self::from_parts(ncols, nrows, colind_t, row_t), mapping)
    }

    /// Union of two patterns of identical shape.
    pub fn union(&self, other: &Sparsity) -> Result<Sparsity, GraphError> {
        if self.shape() != other.shape() {
            return Err(GraphError::ShapeMismatch {
                op: "union",
                details: format!("{:?} vs {:?}", self.shape(), other.shape()),
            });
        }
        if self == other {
            return Ok(self.clone());
        }
        let mut colind = vec![0];
        let mut row = Vec::with_capacity(self.nnz().max(other.nnz()));
        for c in 0..self.ncols() {
            let (a, b) = (self.column_rows(c), other.column_rows(c));
            let (mut i, mut j) = (0, 0);
            while i < a.len() || j < b.len() {
                let next = match (a.get(i), b.get(j)) {
                    (Some(&x), Some(&y)) if x == y => {
                        i += 1;
                        j += 1;
                        x
                    }
                    (Some(&x), Some(&y)) if x < y => {
                        i += 1;
                        x
                    }
                    (Some(_), Some(&y)) => {
                        j += 1;
                        y
                    }
                    (Some(&x), None) => {
                        i += 1;
                        x
                    }
                    (None, Some(&y)) => {
                        j += 1;
                        y
                    }
                    (None, None) => break,
                };
                row.push(next);
            }
            colind.push(row.len());
        }
        Ok(Self::from_parts(self.nrows(), self.ncols(), colind, row))
    }

    /// For every nonzero of `target`, the index of the same entry in this
    /// pattern (or `None` when it is a structural zero here).
    pub fn project_mapping(&self, target: &Sparsity) -> Vec<Option<usize>> {
        target
            .triplets()
            .into_iter()
            .map(|(r, c)| self.nz_index(r, c))
            .collect()
    }
}

impl fmt::Display for Sparsity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{},{}nz", self.nrows(), self.ncols(), self.nnz())
    }
}

/// Validates an offset table partitioning `total` items: it starts at zero,
/// never decreases and ends at `total`.
pub fn check_offsets(offsets: &[usize], total: usize, what: &str) -> Result<(), GraphError> {
    match (offsets.first(), offsets.last()) {
        (Some(&0), Some(&last)) if last == total => {}
        (None, _) => {
            return Err(GraphError::InvalidOffsets(format!(
                "{what} offsets must contain at least one entry"
            )))
        }
        _ => {
            return Err(GraphError::InvalidOffsets(format!(
                "{what} offsets must start at 0 and end at {total}, got {offsets:?}"
            )))
        }
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(GraphError::InvalidOffsets(format!(
            "{what} offsets must be non-decreasing, got {offsets:?}"
        )));
    }
    Ok(())
}
