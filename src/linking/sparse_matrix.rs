//! Compressed sparse-row cost matrix used to assemble the augmented LAP.

use ndarray::Array2;

use crate::error::{Result, TrackingError};

/// Sparse cost matrix in compressed-row form.
///
/// Row `i` owns the entries `start[i]..start[i] + number[i]` of `cc`
/// (costs) and `kk` (column indices). Column indices are strictly
/// increasing within a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseCostMatrix {
    cc: Vec<f64>,
    kk: Vec<usize>,
    number: Vec<usize>,
    start: Vec<usize>,
    n_cols: usize,
}

impl SparseCostMatrix {
    /// Creates a matrix from its compressed-row arrays.
    ///
    /// Fails if the arrays disagree in length, if a column index is out of
    /// range or not strictly increasing within its row, or if a cost is not
    /// finite.
    pub fn new(cc: Vec<f64>, kk: Vec<usize>, number: Vec<usize>, n_cols: usize) -> Result<Self> {
        if cc.len() != kk.len() {
            return Err(TrackingError::Matrix(format!(
                "cost and column arrays differ in length: {} vs {}",
                cc.len(),
                kk.len()
            )));
        }
        let total: usize = number.iter().sum();
        if total != cc.len() {
            return Err(TrackingError::Matrix(format!(
                "row counts sum to {} but {} entries are stored",
                total,
                cc.len()
            )));
        }

        let mut start = Vec::with_capacity(number.len());
        let mut offset = 0;
        for (row, &n) in number.iter().enumerate() {
            start.push(offset);
            let cols = &kk[offset..offset + n];
            for (k, &col) in cols.iter().enumerate() {
                if col >= n_cols {
                    return Err(TrackingError::Matrix(format!(
                        "row {} references column {} but the matrix has {} columns",
                        row, col, n_cols
                    )));
                }
                if k > 0 && cols[k - 1] >= col {
                    return Err(TrackingError::Matrix(format!(
                        "row {} has unsorted or duplicate column {}",
                        row, col
                    )));
                }
            }
            if let Some(c) = cc[offset..offset + n].iter().find(|c| !c.is_finite()) {
                return Err(TrackingError::Matrix(format!(
                    "row {} holds a non-finite cost {}",
                    row, c
                )));
            }
            offset += n;
        }

        Ok(Self {
            cc,
            kk,
            number,
            start,
            n_cols,
        })
    }

    /// Builds a matrix from `(row, col, cost)` triplets. Triplets may come
    /// in any order but must not repeat a cell.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self> {
        if let Some(&(row, _, _)) = triplets.iter().find(|t| t.0 >= n_rows) {
            return Err(TrackingError::Matrix(format!(
                "triplet references row {} but the matrix has {} rows",
                row, n_rows
            )));
        }
        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut number = vec![0; n_rows];
        let mut kk = Vec::with_capacity(triplets.len());
        let mut cc = Vec::with_capacity(triplets.len());
        for (row, col, cost) in triplets {
            number[row] += 1;
            kk.push(col);
            cc.push(cost);
        }
        Self::new(cc, kk, number, n_cols)
    }

    /// Square matrix holding `values[i]` at `(i, i)` and nothing else.
    pub fn diagonal(values: &[f64]) -> Result<Self> {
        let n = values.len();
        Self::new(values.to_vec(), (0..n).collect(), vec![1; n], n)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.number.len()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries.
    #[inline]
    pub fn cardinality(&self) -> usize {
        self.cc.len()
    }

    /// Stored entries of row `i` as `(column, cost)` pairs.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.start[i]..self.start[i] + self.number[i];
        self.kk[range.clone()]
            .iter()
            .copied()
            .zip(self.cc[range].iter().copied())
    }

    /// Returns the cost stored at `(i, j)`, or `default` if the cell is empty.
    pub fn get(&self, i: usize, j: usize, default: f64) -> f64 {
        if i >= self.n_rows() {
            return default;
        }
        let range = self.start[i]..self.start[i] + self.number[i];
        match self.kk[range.clone()].binary_search(&j) {
            Ok(k) => self.cc[range.start + k],
            Err(_) => default,
        }
    }

    /// Returns a new matrix with rows and columns swapped.
    pub fn transpose(&self) -> Self {
        let n_rows = self.n_rows();
        let mut number = vec![0; self.n_cols];
        for &j in &self.kk {
            number[j] += 1;
        }

        let mut start = Vec::with_capacity(self.n_cols);
        let mut offset = 0;
        for &n in &number {
            start.push(offset);
            offset += n;
        }

        // Visiting source rows in order keeps each target row sorted.
        let mut cursor = start.clone();
        let mut kk = vec![0; self.cc.len()];
        let mut cc = vec![0.0; self.cc.len()];
        for i in 0..n_rows {
            for (j, cost) in self.row(i) {
                kk[cursor[j]] = i;
                cc[cursor[j]] = cost;
                cursor[j] += 1;
            }
        }

        Self {
            cc,
            kk,
            number,
            start,
            n_cols: n_rows,
        }
    }

    /// Horizontal concatenation `[self, other]`.
    pub fn hcat(&self, other: &Self) -> Result<Self> {
        if self.n_rows() != other.n_rows() {
            return Err(TrackingError::Matrix(format!(
                "cannot concatenate horizontally a {}x{} matrix with a {}x{} matrix",
                self.n_rows(),
                self.n_cols,
                other.n_rows(),
                other.n_cols
            )));
        }

        let len = self.cc.len() + other.cc.len();
        let mut cc = try_with_capacity(len, "concatenating costs")?;
        let mut kk = try_with_capacity(len, "concatenating columns")?;
        let mut number = Vec::with_capacity(self.n_rows());
        for i in 0..self.n_rows() {
            for (j, cost) in self.row(i) {
                kk.push(j);
                cc.push(cost);
            }
            for (j, cost) in other.row(i) {
                kk.push(self.n_cols + j);
                cc.push(cost);
            }
            number.push(self.number[i] + other.number[i]);
        }
        Self::new(cc, kk, number, self.n_cols + other.n_cols)
    }

    /// Vertical concatenation `[self; other]`.
    pub fn vcat(&self, other: &Self) -> Result<Self> {
        if self.n_cols != other.n_cols {
            return Err(TrackingError::Matrix(format!(
                "cannot concatenate vertically a {}x{} matrix with a {}x{} matrix",
                self.n_rows(),
                self.n_cols,
                other.n_rows(),
                other.n_cols
            )));
        }

        let len = self.cc.len() + other.cc.len();
        let mut cc = try_with_capacity(len, "concatenating costs")?;
        cc.extend_from_slice(&self.cc);
        cc.extend_from_slice(&other.cc);
        let mut kk = try_with_capacity(len, "concatenating columns")?;
        kk.extend_from_slice(&self.kk);
        kk.extend_from_slice(&other.kk);
        let mut number = self.number.clone();
        number.extend_from_slice(&other.number);
        Self::new(cc, kk, number, self.n_cols)
    }

    /// Sets every cell of the matrix, stored or not, to `value`.
    ///
    /// The matrix becomes dense. Allocation is fallible so that very large
    /// blocks report [`TrackingError::NotEnoughMemory`] instead of aborting.
    pub fn fill_with(&mut self, value: f64) -> Result<()> {
        let n_rows = self.n_rows();
        let n_cols = self.n_cols;
        let size = n_rows.checked_mul(n_cols).ok_or_else(|| {
            TrackingError::NotEnoughMemory(format!("a {}x{} block overflows", n_rows, n_cols))
        })?;

        let what = format!("filling a {}x{} block", n_rows, n_cols);
        let mut cc = try_with_capacity(size, &what)?;
        let mut kk = try_with_capacity(size, &what)?;

        for _ in 0..n_rows {
            kk.extend(0..n_cols);
        }
        cc.resize(size, value);

        self.cc = cc;
        self.kk = kk;
        self.number = vec![n_cols; n_rows];
        self.start = (0..n_rows).map(|i| i * n_cols).collect();
        Ok(())
    }

    /// Dense copy of the matrix, empty cells set to `default`.
    pub fn to_dense(&self, default: f64) -> Array2<f64> {
        let mut dense = Array2::from_elem((self.n_rows(), self.n_cols), default);
        for i in 0..self.n_rows() {
            for (j, cost) in self.row(i) {
                dense[[i, j]] = cost;
            }
        }
        dense
    }

    /// Sum of the costs picked by a row-to-column assignment.
    pub fn total_assignment_cost(&self, row_to_col: &[usize]) -> f64 {
        row_to_col
            .iter()
            .enumerate()
            .map(|(i, &j)| self.get(i, j, f64::NAN))
            .sum()
    }
}

/// Allocation that reports [`TrackingError::NotEnoughMemory`] instead of
/// aborting. Every buffer holding a dense block goes through here.
fn try_with_capacity<T>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| TrackingError::NotEnoughMemory(format!("{}: {}", what, e)))?;
    Ok(buf)
}
