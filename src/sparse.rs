//! Minimal complex sparse-matrix types used throughout the crate.
//!
//! Assembly goes through a [`Coo`] triplet accumulator; the finished
//! generator lives in a [`Csc`] compressed-column matrix. Compression sums
//! duplicate positions and keeps the summed entry regardless of its value,
//! while block emission during assembly is expected to skip exact zeros;
//! together these reproduce the storage behavior of the usual
//! build-by-triplets workflow. Indices are `usize` throughout since hierarchy
//! sizes grow combinatorially.

use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use num_traits::Zero;

/// Triplet (coordinate-form) accumulator for sparse assembly.
///
/// Duplicate `(row, col)` pairs are allowed and defined to be additive upon
/// [compression][Self::into_csc].
#[derive(Clone, Debug, Default)]
pub struct Coo {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<C64>,
}

impl Coo {
    /// Create a new, empty accumulator with fixed shape.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols, rows: Vec::new(), cols: Vec::new(),
            vals: Vec::new() }
    }

    /// Like [`Self::new`], but pre-allocating space for `cap` triplets.
    pub fn with_capacity(nrows: usize, ncols: usize, cap: usize) -> Self {
        Self {
            nrows,
            ncols,
            rows: Vec::with_capacity(cap),
            cols: Vec::with_capacity(cap),
            vals: Vec::with_capacity(cap),
        }
    }

    /// Return the number of rows.
    pub fn nrows(&self) -> usize { self.nrows }

    /// Return the number of columns.
    pub fn ncols(&self) -> usize { self.ncols }

    /// Return the current number of stored triplets.
    pub fn nnz(&self) -> usize { self.vals.len() }

    /// Record a single entry. Exact zeros are skipped.
    ///
    /// *Panics* if the position is out of bounds.
    pub fn push(&mut self, row: usize, col: usize, val: C64) {
        if row >= self.nrows || col >= self.ncols {
            panic!("Coo::push: entry ({}, {}) out of bounds", row, col);
        }
        if val.is_zero() { return; }
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
    }

    /// Record a single entry, keeping exact zeros.
    ///
    /// Used to build structural patterns whose values are refreshed later.
    ///
    /// *Panics* if the position is out of bounds.
    pub fn push_keep(&mut self, row: usize, col: usize, val: C64) {
        if row >= self.nrows || col >= self.ncols {
            panic!("Coo::push_keep: entry ({}, {}) out of bounds", row, col);
        }
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
    }

    /// Record every entry of a sparse block, offset by `(row_off, col_off)`.
    pub fn push_block(&mut self, block: &Csc, row_off: usize, col_off: usize) {
        self.push_block_scaled(block, C64::from(1.0), row_off, col_off);
    }

    /// Record every entry of a sparse block, offset by `(row_off, col_off)`,
    /// keeping exact zeros.
    pub fn push_block_keep(
        &mut self,
        block: &Csc,
        row_off: usize,
        col_off: usize,
    ) {
        for (r, c, v) in block.iter() {
            self.push_keep(row_off + r, col_off + c, v);
        }
    }

    /// Record every entry of a sparse block scaled by `scale`, offset by
    /// `(row_off, col_off)`. Entries that scale to exact zero are skipped.
    pub fn push_block_scaled(
        &mut self,
        block: &Csc,
        scale: C64,
        row_off: usize,
        col_off: usize,
    ) {
        if scale.is_zero() { return; }
        for (r, c, v) in block.iter() {
            self.push(row_off + r, col_off + c, scale * v);
        }
    }

    /// Concatenate another accumulator's triplets onto `self`.
    ///
    /// *Panics* if the shapes disagree.
    pub fn append(&mut self, other: Coo) {
        if self.nrows != other.nrows || self.ncols != other.ncols {
            panic!("Coo::append: shape mismatch");
        }
        let Coo { rows, cols, vals, .. } = other;
        self.rows.extend(rows);
        self.cols.extend(cols);
        self.vals.extend(vals);
    }

    /// Compress to column-major form, summing duplicate positions.
    ///
    /// Summed entries are kept even when the sum is zero; the triplet storage
    /// is consumed.
    pub fn into_csc(self) -> Csc {
        let Coo { nrows, ncols, rows, cols, vals } = self;
        let mut order: Vec<usize> = (0..vals.len()).collect();
        order.sort_unstable_by(|&a, &b| {
            cols[a].cmp(&cols[b]).then(rows[a].cmp(&rows[b]))
        });
        let mut colptr: Vec<usize> = Vec::with_capacity(ncols + 1);
        let mut rowind: Vec<usize> = Vec::with_capacity(vals.len());
        let mut out: Vec<C64> = Vec::with_capacity(vals.len());
        colptr.push(0);
        let mut cur_col: usize = 0;
        let mut last: Option<(usize, usize)> = None;
        for &k in &order {
            let (r, c, v) = (rows[k], cols[k], vals[k]);
            if last == Some((r, c)) {
                *out.last_mut().unwrap() += v;
                continue;
            }
            while cur_col < c {
                colptr.push(rowind.len());
                cur_col += 1;
            }
            rowind.push(r);
            out.push(v);
            last = Some((r, c));
        }
        while cur_col < ncols {
            colptr.push(rowind.len());
            cur_col += 1;
        }
        Csc { nrows, ncols, colptr, rowind, vals: out }
    }
}

/// Complex sparse matrix in compressed-column (CSC) form.
///
/// Row indices within each column are strictly increasing; stored values may
/// be zero (see [`Coo::into_csc`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Csc {
    nrows: usize,
    ncols: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    vals: Vec<C64>,
}

impl Csc {
    /// Create an all-zero (empty-pattern) matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            colptr: vec![0; ncols + 1],
            rowind: Vec::new(),
            vals: Vec::new(),
        }
    }

    /// Create an identity matrix.
    pub fn eye(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            colptr: (0..=n).collect(),
            rowind: (0..n).collect(),
            vals: vec![C64::from(1.0); n],
        }
    }

    /// Build from a dense array, skipping exact zeros.
    pub fn from_dense(a: &nd::ArrayView2<C64>) -> Self {
        Self::from_dense_filtered(a, |v| !v.is_zero())
    }

    /// Build from a dense array, keeping every position regardless of value.
    ///
    /// Used for pattern buffers whose values are refreshed in place.
    pub fn from_dense_structural(a: &nd::ArrayView2<C64>) -> Self {
        Self::from_dense_filtered(a, |_| true)
    }

    fn from_dense_filtered<F>(a: &nd::ArrayView2<C64>, keep: F) -> Self
    where F: Fn(C64) -> bool
    {
        let (nrows, ncols) = a.dim();
        let mut colptr: Vec<usize> = Vec::with_capacity(ncols + 1);
        let mut rowind: Vec<usize> = Vec::new();
        let mut vals: Vec<C64> = Vec::new();
        colptr.push(0);
        for j in 0..ncols {
            for i in 0..nrows {
                let v = a[[i, j]];
                if keep(v) {
                    rowind.push(i);
                    vals.push(v);
                }
            }
            colptr.push(rowind.len());
        }
        Self { nrows, ncols, colptr, rowind, vals }
    }

    /// Return the number of rows.
    pub fn nrows(&self) -> usize { self.nrows }

    /// Return the number of columns.
    pub fn ncols(&self) -> usize { self.ncols }

    /// Return the shape as `(nrows, ncols)`.
    pub fn shape(&self) -> (usize, usize) { (self.nrows, self.ncols) }

    /// Return the number of stored entries.
    pub fn nnz(&self) -> usize { self.vals.len() }

    /// Look up a single entry, zero if not stored.
    pub fn get(&self, row: usize, col: usize) -> C64 {
        let lo = self.colptr[col];
        let hi = self.colptr[col + 1];
        match self.rowind[lo..hi].binary_search(&row) {
            Ok(p) => self.vals[lo + p],
            Err(_) => C64::zero(),
        }
    }

    /// Iterate over stored entries as `(row, col, value)` in column-major
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, C64)> + '_ {
        (0..self.ncols)
            .flat_map(move |j| {
                (self.colptr[j]..self.colptr[j + 1])
                    .map(move |p| (self.rowind[p], j, self.vals[p]))
            })
    }

    /// Call `f` on every stored entry with a mutable reference to its value.
    pub fn for_each_entry_mut<F>(&mut self, mut f: F)
    where F: FnMut(usize, usize, &mut C64)
    {
        for j in 0..self.ncols {
            for p in self.colptr[j]..self.colptr[j + 1] {
                f(self.rowind[p], j, &mut self.vals[p]);
            }
        }
    }

    /// Return the stored values.
    pub fn values(&self) -> &[C64] { &self.vals }

    /// Return the largest entry magnitude, zero for an empty pattern.
    pub fn max_abs(&self) -> f64 {
        self.vals.iter().map(|v| v.norm()).fold(0.0, f64::max)
    }

    /// Return a copy with every value scaled by `z`.
    pub fn scale(&self, z: C64) -> Self {
        let mut new = self.clone();
        new.scale_mut(z);
        new
    }

    /// Scale every value by `z` in place.
    pub fn scale_mut(&mut self, z: C64) {
        self.vals.iter_mut().for_each(|v| { *v *= z; });
    }

    /// Return the entrywise sum with another matrix.
    ///
    /// The result's pattern is the union of both patterns; coincident
    /// positions are summed and kept regardless of the summed value.
    ///
    /// *Panics* if the shapes disagree.
    pub fn add(&self, rhs: &Csc) -> Self {
        if self.shape() != rhs.shape() {
            panic!("Csc::add: shape mismatch");
        }
        let mut colptr: Vec<usize> = Vec::with_capacity(self.ncols + 1);
        let mut rowind: Vec<usize>
            = Vec::with_capacity(self.nnz() + rhs.nnz());
        let mut vals: Vec<C64> = Vec::with_capacity(self.nnz() + rhs.nnz());
        colptr.push(0);
        for j in 0..self.ncols {
            let mut pa = self.colptr[j];
            let mut pb = rhs.colptr[j];
            let enda = self.colptr[j + 1];
            let endb = rhs.colptr[j + 1];
            while pa < enda || pb < endb {
                let ra = self.rowind.get(pa).copied()
                    .filter(|_| pa < enda).unwrap_or(usize::MAX);
                let rb = rhs.rowind.get(pb).copied()
                    .filter(|_| pb < endb).unwrap_or(usize::MAX);
                if ra < rb {
                    rowind.push(ra);
                    vals.push(self.vals[pa]);
                    pa += 1;
                } else if rb < ra {
                    rowind.push(rb);
                    vals.push(rhs.vals[pb]);
                    pb += 1;
                } else {
                    rowind.push(ra);
                    vals.push(self.vals[pa] + rhs.vals[pb]);
                    pa += 1;
                    pb += 1;
                }
            }
            colptr.push(rowind.len());
        }
        Self { nrows: self.nrows, ncols: self.ncols, colptr, rowind, vals }
    }

    /// Return the entrywise difference with another matrix.
    pub fn sub(&self, rhs: &Csc) -> Self {
        self.add(&rhs.scale(C64::from(-1.0)))
    }

    /// Sparse-sparse matrix product with a drop tolerance.
    ///
    /// Result entries with magnitude at or below `drop_tol` are discarded;
    /// `drop_tol = 0` keeps everything except exact zeros.
    ///
    /// *Panics* if the inner dimensions disagree.
    pub fn matmul(&self, rhs: &Csc, drop_tol: f64) -> Self {
        if self.ncols != rhs.nrows {
            panic!("Csc::matmul: inner dimension mismatch");
        }
        let m = self.nrows;
        let n = rhs.ncols;
        let mut colptr: Vec<usize> = Vec::with_capacity(n + 1);
        let mut rowind: Vec<usize> = Vec::new();
        let mut vals: Vec<C64> = Vec::new();
        let mut acc: Vec<C64> = vec![C64::zero(); m];
        let mut mark: Vec<usize> = vec![usize::MAX; m];
        let mut touched: Vec<usize> = Vec::new();
        colptr.push(0);
        for j in 0..n {
            touched.clear();
            for p in rhs.colptr[j]..rhs.colptr[j + 1] {
                let k = rhs.rowind[p];
                let bv = rhs.vals[p];
                for q in self.colptr[k]..self.colptr[k + 1] {
                    let i = self.rowind[q];
                    let term = self.vals[q] * bv;
                    if mark[i] != j {
                        mark[i] = j;
                        acc[i] = term;
                        touched.push(i);
                    } else {
                        acc[i] += term;
                    }
                }
            }
            touched.sort_unstable();
            for &i in &touched {
                if acc[i].norm() > drop_tol {
                    rowind.push(i);
                    vals.push(acc[i]);
                }
            }
            colptr.push(rowind.len());
        }
        Self { nrows: m, ncols: n, colptr, rowind, vals }
    }

    /// Apply to a vector on the right.
    ///
    /// *Panics* if the length disagrees with the number of columns.
    pub fn mul_vec(&self, x: nd::ArrayView1<C64>) -> nd::Array1<C64> {
        let mut y: nd::Array1<C64> = nd::Array1::zeros(self.nrows);
        self.mul_vec_into(x, &mut y);
        y
    }

    /// Apply to a vector on the right, accumulating into a pre-allocated
    /// output (which is zeroed first).
    pub fn mul_vec_into(
        &self,
        x: nd::ArrayView1<C64>,
        y: &mut nd::Array1<C64>,
    ) {
        if x.len() != self.ncols || y.len() != self.nrows {
            panic!("Csc::mul_vec_into: dimension mismatch");
        }
        y.fill(C64::zero());
        for j in 0..self.ncols {
            let xj = x[j];
            if xj.is_zero() { continue; }
            for p in self.colptr[j]..self.colptr[j + 1] {
                y[self.rowind[p]] += self.vals[p] * xj;
            }
        }
    }

    /// Apply to a vector on the right, accumulating into `y` without
    /// zeroing it first.
    pub fn mul_vec_acc(
        &self,
        x: nd::ArrayView1<C64>,
        y: &mut nd::Array1<C64>,
    ) {
        if x.len() != self.ncols || y.len() != self.nrows {
            panic!("Csc::mul_vec_acc: dimension mismatch");
        }
        for j in 0..self.ncols {
            let xj = x[j];
            if xj.is_zero() { continue; }
            for p in self.colptr[j]..self.colptr[j + 1] {
                y[self.rowind[p]] += self.vals[p] * xj;
            }
        }
    }

    /// Convert to a dense array.
    pub fn to_dense(&self) -> nd::Array2<C64> {
        let mut a: nd::Array2<C64>
            = nd::Array2::zeros((self.nrows, self.ncols));
        for (i, j, v) in self.iter() { a[[i, j]] += v; }
        a
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn coo_compression_sums_duplicates() {
        let mut coo = Coo::new(3, 3);
        coo.push(0, 0, c(1.0, 0.0));
        coo.push(2, 1, c(0.5, 0.5));
        coo.push(0, 0, c(2.0, -1.0));
        coo.push(1, 2, c(0.0, 1.0));
        let m = coo.into_csc();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(0, 0), c(3.0, -1.0));
        assert_eq!(m.get(2, 1), c(0.5, 0.5));
        assert_eq!(m.get(1, 2), c(0.0, 1.0));
        assert_eq!(m.get(2, 2), C64::zero());
    }

    #[test]
    fn coo_compression_keeps_cancelled_sums() {
        let mut coo = Coo::new(2, 2);
        coo.push(1, 0, c(1.0, 0.0));
        coo.push(1, 0, c(-1.0, 0.0));
        let m = coo.into_csc();
        assert_eq!(m.nnz(), 1);
        assert_eq!(m.get(1, 0), C64::zero());
    }

    #[test]
    fn matmul_matches_dense() {
        let a = nd::array![
            [c(1.0, 0.0), c(0.0, 0.0), c(2.0, 1.0)],
            [c(0.0, -1.0), c(3.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(1.0, 1.0), c(0.0, 0.0)],
        ];
        let b = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)],
            [c(2.0, 0.0), c(0.0, 0.0), c(0.0, 2.0)],
            [c(0.0, 1.0), c(0.0, 0.0), c(1.0, 0.0)],
        ];
        let sa = Csc::from_dense(&a.view());
        let sb = Csc::from_dense(&b.view());
        let sc = sa.matmul(&sb, 0.0);
        let dense = a.dot(&b);
        let diff = (&sc.to_dense() - &dense)
            .iter()
            .map(|v| v.norm())
            .fold(0.0, f64::max);
        assert!(diff < 1e-15);
    }

    #[test]
    fn mul_vec_matches_dense() {
        let a = nd::array![
            [c(1.0, 0.0), c(0.0, 0.0), c(2.0, 1.0)],
            [c(0.0, -1.0), c(3.0, 0.0), c(0.0, 0.0)],
        ];
        let x = nd::array![c(1.0, 1.0), c(0.0, -2.0), c(0.5, 0.0)];
        let sa = Csc::from_dense(&a.view());
        let y = sa.mul_vec(x.view());
        let yd = a.dot(&x);
        assert!(
            y.iter().zip(yd.iter()).all(|(u, v)| (u - v).norm() < 1e-15)
        );
    }

    #[test]
    fn add_unions_patterns() {
        let mut ca = Coo::new(2, 2);
        ca.push(0, 0, c(1.0, 0.0));
        ca.push(1, 1, c(2.0, 0.0));
        let mut cb = Coo::new(2, 2);
        cb.push(0, 1, c(0.0, 1.0));
        cb.push(1, 1, c(-2.0, 0.0));
        let sum = ca.into_csc().add(&cb.into_csc());
        assert_eq!(sum.nnz(), 3);
        assert_eq!(sum.get(0, 0), c(1.0, 0.0));
        assert_eq!(sum.get(0, 1), c(0.0, 1.0));
        assert_eq!(sum.get(1, 1), C64::zero());
    }

    #[test]
    fn matmul_drop_tolerance() {
        let a = nd::array![
            [c(1e-20, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(1.0, 0.0)],
        ];
        let sa = Csc::from_dense(&a.view());
        let p = sa.matmul(&Csc::eye(2), 1e-14);
        assert_eq!(p.nnz(), 1);
        assert_eq!(p.get(1, 1), c(1.0, 0.0));
    }
}
