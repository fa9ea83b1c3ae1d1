//! Sparse matrix types and kernels.
//!
//! Everything is stored in CSC (Compressed Sparse Column) format. Symmetric
//! matrices (KKT systems) keep only their upper triangle.

use num_traits::Float;
use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format (general, not necessarily symmetric).
pub type SparseCsc = CsMat<f64>;

/// Sparse symmetric matrix in CSC format (upper triangle only).
pub type SparseSymmetricCsc = CsMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// Duplicate entries are summed.
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Build a symmetric matrix from triplets of either triangle.
///
/// Entries below the diagonal are mirrored into the upper triangle, so
/// callers may hand over `(i, j, v)` in whichever orientation is convenient
/// as long as each off-diagonal pair is given once.
pub fn from_triplets_symmetric<I>(n: usize, triplets: I) -> SparseSymmetricCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((n, n));
    for (i, j, v) in triplets {
        let (r, c) = if i <= j { (i, j) } else { (j, i) };
        tri.add_triplet(r, c, v);
    }
    tri.to_csc()
}

fn scale_in_place<T: Float>(y: &mut [T], beta: T) {
    if beta == T::zero() {
        y.iter_mut().for_each(|yi| *yi = T::zero());
    } else if beta != T::one() {
        y.iter_mut().for_each(|yi| *yi = *yi * beta);
    }
}

/// Sparse matrix-vector product: y = alpha * A * x + beta * y
pub fn spmv<T: Float>(a: &CsMat<T>, x: &[T], y: &mut [T], alpha: T, beta: T) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    scale_in_place(y, beta);
    if alpha != T::zero() {
        for (&val, (row, col)) in a.iter() {
            y[row] = y[row] + alpha * val * x[col];
        }
    }
}

/// Transpose-vector product: y = alpha * A^T * x + beta * y
pub fn spmv_transpose<T: Float>(a: &CsMat<T>, x: &[T], y: &mut [T], alpha: T, beta: T) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());

    scale_in_place(y, beta);
    if alpha != T::zero() {
        for (&val, (row, col)) in a.iter() {
            y[col] = y[col] + alpha * val * x[row];
        }
    }
}

/// Symmetric product from upper-triangle storage: y = A * x
pub fn symm_matvec_upper<T: Float>(a: &CsMat<T>, x: &[T], y: &mut [T]) {
    assert_eq!(a.rows(), a.cols());
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());

    scale_in_place(y, T::zero());
    for (&val, (row, col)) in a.iter() {
        y[row] = y[row] + val * x[col];
        if row != col {
            y[col] = y[col] + val * x[row];
        }
    }
}

/// Largest absolute entry, zero for an empty matrix.
pub fn max_norm<T: Float>(a: &CsMat<T>) -> T {
    a.data()
        .iter()
        .fold(T::zero(), |acc, &v| if v.abs() > acc { v.abs() } else { acc })
}

/// Convert every stored value, keeping the pattern.
pub fn map_values<T, U, F>(a: &CsMat<T>, f: F) -> CsMat<U>
where
    T: Copy,
    U: Copy,
    F: Fn(T) -> U,
{
    assert!(a.is_csc(), "expected CSC storage");
    CsMat::new_csc(
        (a.rows(), a.cols()),
        a.indptr().raw_storage().to_vec(),
        a.indices().to_vec(),
        a.data().iter().map(|&v| f(v)).collect(),
    )
}

/// Scale a symmetric upper-triangle matrix on both sides: diag(d) A diag(d).
pub fn symmetric_diagonal_scale<T: Float>(a: &CsMat<T>, d: &[T]) -> CsMat<T> {
    assert_eq!(a.rows(), d.len());
    assert!(a.is_csc(), "expected CSC storage");
    let mut data = a.data().to_vec();
    let indptr = a.indptr().raw_storage().to_vec();
    let indices = a.indices().to_vec();
    for col in 0..a.cols() {
        for k in indptr[col]..indptr[col + 1] {
            data[k] = data[k] * d[indices[k]] * d[col];
        }
    }
    CsMat::new_csc((a.rows(), a.cols()), indptr, indices, data)
}
