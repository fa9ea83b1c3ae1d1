//! Block-row distributed vectors and matrices.
//!
//! Rank `r` of a `p`-rank group owns the contiguous rows
//! `[r * len / p, (r + 1) * len / p)`. Vectors hold only their local slice;
//! matrices hold their local rows with all columns.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use crate::comm::{CommRef, ReduceOp};
use crate::linalg::sparse::{self, SparseCsc};

/// Rows owned by `rank` when `len` rows are split over `size` ranks.
pub fn block_range(len: usize, rank: usize, size: usize) -> Range<usize> {
    (len * rank / size)..(len * (rank + 1) / size)
}

/// `alpha * p + beta * y`; the old `y` is not read when `beta` is zero.
fn scaled_sum(alpha: f64, p: f64, beta: f64, y: f64) -> f64 {
    if beta == 0.0 {
        alpha * p
    } else {
        alpha * p + beta * y
    }
}

/// Whether a matrix is applied as itself or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    Transpose,
}

/// Column vector distributed by blocks of rows.
#[derive(Debug, Clone)]
pub struct DistVector {
    comm: CommRef,
    global_len: usize,
    first: usize,
    local: Vec<f64>,
}

impl DistVector {
    pub fn zeros(comm: &CommRef, global_len: usize) -> Self {
        let range = block_range(global_len, comm.rank(), comm.size());
        Self {
            comm: CommRef::clone(comm),
            global_len,
            first: range.start,
            local: vec![0.0; range.len()],
        }
    }

    /// Take this rank's slice of a replicated vector.
    pub fn from_global(comm: &CommRef, global: &[f64]) -> Self {
        let range = block_range(global.len(), comm.rank(), comm.size());
        Self {
            comm: CommRef::clone(comm),
            global_len: global.len(),
            first: range.start,
            local: global[range].to_vec(),
        }
    }

    pub fn comm(&self) -> &CommRef {
        &self.comm
    }

    /// Global length.
    pub fn len(&self) -> usize {
        self.global_len
    }

    pub fn is_empty(&self) -> bool {
        self.global_len == 0
    }

    pub fn local(&self) -> &[f64] {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.local
    }

    pub fn into_local(self) -> Vec<f64> {
        self.local
    }

    pub fn local_range(&self) -> Range<usize> {
        self.first..self.first + self.local.len()
    }

    /// Replicate the full vector on every rank (collective).
    pub fn gather(&self) -> Vec<f64> {
        let parts = self.comm.all_gather_f64(&self.local);
        let mut full = Vec::with_capacity(self.global_len);
        for part in parts {
            full.extend_from_slice(&part);
        }
        debug_assert_eq!(full.len(), self.global_len);
        full
    }

    /// Overwrite the local slice from a replicated vector.
    pub fn set_from_global(&mut self, global: &[f64]) {
        assert_eq!(global.len(), self.global_len);
        let range = self.local_range();
        self.local.copy_from_slice(&global[range]);
    }

    pub fn copy_from(&mut self, other: &DistVector) {
        self.assert_conforms(other);
        self.local.copy_from_slice(&other.local);
    }

    /// self += alpha * x
    pub fn axpy(&mut self, alpha: f64, x: &DistVector) {
        self.assert_conforms(x);
        for (s, &xi) in self.local.iter_mut().zip(&x.local) {
            *s += alpha * xi;
        }
    }

    /// Global inner product (collective).
    pub fn dot(&self, other: &DistVector) -> f64 {
        self.assert_conforms(other);
        let local: f64 = self.local.iter().zip(&other.local).map(|(a, b)| a * b).sum();
        self.comm.all_reduce_scalar(local, ReduceOp::Sum)
    }

    /// Euclidean norm (collective).
    pub fn nrm2(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Smallest entry, `+inf` for an empty vector (collective).
    pub fn min(&self) -> f64 {
        let local = self.local.iter().copied().fold(f64::INFINITY, f64::min);
        self.comm.all_reduce_scalar(local, ReduceOp::Min)
    }

    /// Number of entries that are not strictly positive (collective).
    ///
    /// NaN entries count as non-positive.
    pub fn num_non_positive(&self) -> usize {
        let local = self.local.iter().filter(|&&v| !(v > 0.0)).count();
        self.comm.all_reduce_count(local)
    }

    fn assert_conforms(&self, other: &DistVector) {
        assert_eq!(self.global_len, other.global_len, "distributed vector length mismatch");
        assert_eq!(self.first, other.first, "distributed vectors are not aligned");
    }
}

/// Exchange locally owned entries (in global coordinates) and assemble the
/// replicated matrix on every rank.
fn gather_triplets(
    comm: &CommRef,
    height: usize,
    width: usize,
    local: impl Iterator<Item = (usize, usize, f64)>,
) -> SparseCsc {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for (i, j, v) in local {
        rows.push(i);
        cols.push(j);
        vals.push(v);
    }
    let rows = comm.all_gather_usize(&rows);
    let cols = comm.all_gather_usize(&cols);
    let vals = comm.all_gather_f64(&vals);

    let triplets = rows
        .iter()
        .zip(&cols)
        .zip(&vals)
        .flat_map(|((r, c), v)| r.iter().zip(c).zip(v).map(|((&i, &j), &x)| (i, j, x)));
    sparse::from_triplets(height, width, triplets)
}

/// Dense matrix distributed by blocks of rows.
#[derive(Debug, Clone)]
pub struct DistMatrix {
    comm: CommRef,
    height: usize,
    width: usize,
    first: usize,
    local: DMatrix<f64>,
}

impl DistMatrix {
    /// Take this rank's rows of a replicated matrix.
    pub fn from_global(comm: &CommRef, a: &DMatrix<f64>) -> Self {
        let range = block_range(a.nrows(), comm.rank(), comm.size());
        Self {
            comm: CommRef::clone(comm),
            height: a.nrows(),
            width: a.ncols(),
            first: range.start,
            local: a.rows(range.start, range.len()).clone_owned(),
        }
    }

    pub fn comm(&self) -> &CommRef {
        &self.comm
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn local(&self) -> &DMatrix<f64> {
        &self.local
    }

    /// y := alpha * op(A) x + beta * y (collective).
    pub fn multiply(
        &self,
        orientation: Orientation,
        alpha: f64,
        x: &DistVector,
        beta: f64,
        y: &mut DistVector,
    ) {
        match orientation {
            Orientation::Normal => {
                assert_eq!(x.len(), self.width);
                assert_eq!(y.len(), self.height);
                let xv = DVector::from_vec(x.gather());
                let ax = &self.local * xv;
                for (yi, &axi) in y.local_mut().iter_mut().zip(ax.iter()) {
                    *yi = scaled_sum(alpha, axi, beta, *yi);
                }
            }
            Orientation::Transpose => {
                assert_eq!(x.len(), self.height);
                assert_eq!(y.len(), self.width);
                let xv = DVector::from_column_slice(x.local());
                let mut partial = self.local.tr_mul(&xv);
                self.comm.all_reduce(partial.as_mut_slice(), ReduceOp::Sum);
                let range = y.local_range();
                for (yi, &p) in y.local_mut().iter_mut().zip(&partial.as_slice()[range]) {
                    *yi = scaled_sum(alpha, p, beta, *yi);
                }
            }
        }
    }

    /// Replicated sparse copy of the whole matrix (collective).
    pub fn gather_entries(&self) -> SparseCsc {
        let first = self.first;
        let local = &self.local;
        let entries = (0..local.ncols()).flat_map(move |j| {
            (0..local.nrows()).filter_map(move |i| {
                let v = local[(i, j)];
                (v != 0.0).then_some((first + i, j, v))
            })
        });
        gather_triplets(&self.comm, self.height, self.width, entries)
    }
}

/// Sparse matrix distributed by blocks of rows.
#[derive(Debug, Clone)]
pub struct DistSparseMatrix {
    comm: CommRef,
    height: usize,
    width: usize,
    first: usize,
    /// Local rows, indexed from zero, in CSC format.
    local: SparseCsc,
}

impl DistSparseMatrix {
    /// Take this rank's rows of a replicated matrix.
    pub fn from_global(comm: &CommRef, a: &SparseCsc) -> Self {
        let range = block_range(a.rows(), comm.rank(), comm.size());
        let triplets = a
            .iter()
            .filter(|(_, (row, _))| range.contains(row))
            .map(|(&v, (row, col))| (row, col, v));
        Self::from_local_triplets(comm, a.rows(), a.cols(), triplets)
    }

    /// Build from entries of this rank's rows given in global coordinates.
    ///
    /// # Panics
    ///
    /// If an entry lies outside the locally owned rows.
    pub fn from_local_triplets<I>(comm: &CommRef, height: usize, width: usize, triplets: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let range = block_range(height, comm.rank(), comm.size());
        let first = range.start;
        let local = sparse::from_triplets(
            range.len(),
            width,
            triplets.into_iter().map(|(i, j, v)| {
                assert!(range.contains(&i), "row {} is not owned by rank {}", i, comm.rank());
                (i - first, j, v)
            }),
        );
        Self {
            comm: CommRef::clone(comm),
            height,
            width,
            first,
            local,
        }
    }

    pub fn comm(&self) -> &CommRef {
        &self.comm
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn local(&self) -> &SparseCsc {
        &self.local
    }

    /// y := alpha * op(A) x + beta * y (collective).
    pub fn multiply(
        &self,
        orientation: Orientation,
        alpha: f64,
        x: &DistVector,
        beta: f64,
        y: &mut DistVector,
    ) {
        match orientation {
            Orientation::Normal => {
                assert_eq!(x.len(), self.width);
                assert_eq!(y.len(), self.height);
                let xfull = x.gather();
                sparse::spmv(&self.local, &xfull, y.local_mut(), alpha, beta);
            }
            Orientation::Transpose => {
                assert_eq!(x.len(), self.height);
                assert_eq!(y.len(), self.width);
                let mut partial = vec![0.0; self.width];
                sparse::spmv_transpose(&self.local, x.local(), &mut partial, 1.0, 0.0);
                self.comm.all_reduce(&mut partial, ReduceOp::Sum);
                let range = y.local_range();
                for (yi, &p) in y.local_mut().iter_mut().zip(&partial[range]) {
                    *yi = scaled_sum(alpha, p, beta, *yi);
                }
            }
        }
    }

    /// Replicated copy of the whole matrix (collective).
    pub fn gather_entries(&self) -> SparseCsc {
        let first = self.first;
        let entries = self.local.iter().map(move |(&v, (i, j))| (first + i, j, v));
        gather_triplets(&self.comm, self.height, self.width, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SelfComm, ThreadComm};

    #[test]
    fn test_block_range_covers_all_rows() {
        for size in 1..5 {
            let mut next = 0;
            for rank in 0..size {
                let r = block_range(7, rank, size);
                assert_eq!(r.start, next);
                next = r.end;
            }
            assert_eq!(next, 7);
        }
    }

    #[test]
    fn test_vector_collectives_match_sequential() {
        let global = vec![1.0, -2.0, 0.0, 4.0, 5.0];
        let results = ThreadComm::run(3, |comm| {
            let v = DistVector::from_global(&comm, &global);
            (v.gather(), v.dot(&v), v.min(), v.num_non_positive())
        });
        for (full, dot, min, nonpos) in results {
            assert_eq!(full, global);
            assert_eq!(dot, 46.0);
            assert_eq!(min, -2.0);
            assert_eq!(nonpos, 2);
        }
    }

    #[test]
    fn test_nan_counts_as_non_positive() {
        let comm = SelfComm::shared();
        let v = DistVector::from_global(&comm, &[1.0, f64::NAN, 2.0]);
        assert_eq!(v.num_non_positive(), 1);
    }

    #[test]
    fn test_distributed_multiply_matches_replicated() {
        // A = [1 2 0; 0 3 1; 4 0 1; 1 1 1], 4 x 3
        let dense = DMatrix::from_row_slice(
            4,
            3,
            &[1.0, 2.0, 0.0, 0.0, 3.0, 1.0, 4.0, 0.0, 1.0, 1.0, 1.0, 1.0],
        );
        let csc = sparse::from_triplets(
            4,
            3,
            (0..4).flat_map(|i| (0..3).map(move |j| (i, j))).filter_map(|(i, j)| {
                let v = dense[(i, j)];
                (v != 0.0).then_some((i, j, v))
            }),
        );
        let x = vec![1.0, -1.0, 2.0];
        let w = vec![1.0, 0.0, -1.0, 2.0];
        let ax: Vec<f64> = (&dense * DVector::from_column_slice(&x)).iter().copied().collect();
        let atw: Vec<f64> = (dense.transpose() * DVector::from_column_slice(&w)).iter().copied().collect();

        let results = ThreadComm::run(3, |comm| {
            let a = DistMatrix::from_global(&comm, &dense);
            let s = DistSparseMatrix::from_global(&comm, &csc);
            let xv = DistVector::from_global(&comm, &x);
            let wv = DistVector::from_global(&comm, &w);

            let mut y1 = DistVector::zeros(&comm, 4);
            a.multiply(Orientation::Normal, 1.0, &xv, 0.0, &mut y1);
            let mut y2 = DistVector::zeros(&comm, 4);
            s.multiply(Orientation::Normal, 1.0, &xv, 0.0, &mut y2);
            let mut t1 = DistVector::zeros(&comm, 3);
            a.multiply(Orientation::Transpose, 1.0, &wv, 0.0, &mut t1);
            let mut t2 = DistVector::zeros(&comm, 3);
            s.multiply(Orientation::Transpose, 1.0, &wv, 0.0, &mut t2);

            let gathered = s.gather_entries();
            let gathered_dense = a.gather_entries();
            (y1.gather(), y2.gather(), t1.gather(), t2.gather(), gathered.nnz(), gathered_dense.nnz())
        });
        for (y1, y2, t1, t2, nnz, nnz_dense) in results {
            assert_eq!(y1, ax);
            assert_eq!(y2, ax);
            assert_eq!(t1, atw);
            assert_eq!(t2, atw);
            assert_eq!(nnz, csc.nnz());
            assert_eq!(nnz_dense, csc.nnz());
        }
    }

    #[test]
    fn test_zero_beta_overwrites_nan() {
        // A = [1 2; 0 1; -1 3]
        let dense = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, 1.0, -1.0, 3.0]);
        let csc = sparse::from_triplets(
            3,
            2,
            vec![(0, 0, 1.0), (0, 1, 2.0), (1, 1, 1.0), (2, 0, -1.0), (2, 1, 3.0)],
        );
        let results = ThreadComm::run(2, |comm| {
            let a = DistMatrix::from_global(&comm, &dense);
            let s = DistSparseMatrix::from_global(&comm, &csc);
            let x = DistVector::from_global(&comm, &[1.0, 1.0]);
            let w = DistVector::from_global(&comm, &[1.0, 1.0, 1.0]);
            let nan_m = DistVector::from_global(&comm, &[f64::NAN; 3]);
            let nan_n = DistVector::from_global(&comm, &[f64::NAN; 2]);

            let mut y1 = nan_m.clone();
            a.multiply(Orientation::Normal, 2.0, &x, 0.0, &mut y1);
            let mut y2 = nan_m.clone();
            s.multiply(Orientation::Normal, 2.0, &x, 0.0, &mut y2);
            let mut t1 = nan_n.clone();
            a.multiply(Orientation::Transpose, 1.0, &w, 0.0, &mut t1);
            let mut t2 = nan_n.clone();
            s.multiply(Orientation::Transpose, 1.0, &w, 0.0, &mut t2);
            (y1.gather(), y2.gather(), t1.gather(), t2.gather())
        });
        for (y1, y2, t1, t2) in results {
            assert_eq!(y1, vec![6.0, 2.0, 4.0]);
            assert_eq!(y2, vec![6.0, 2.0, 4.0]);
            assert_eq!(t1, vec![0.0, 6.0]);
            assert_eq!(t2, vec![0.0, 6.0]);
        }
    }
}
