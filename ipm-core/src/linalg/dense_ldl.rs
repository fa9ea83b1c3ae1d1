//! Dense symmetric-indefinite factorization.
//!
//! Bunch-Kaufman LBL^T with symmetric pivoting, used for the dense KKT
//! systems. Only the lower triangle of the input is read.

use faer::linalg::solvers::{Lblt, SolveCore};
use faer::{Conj, Mat, MatMut, Side};
use nalgebra::DMatrix;

use crate::linalg::backend::{FactorError, SymmetricFactor};

/// Pivoted LDL^T factorization of a dense symmetric matrix.
pub struct DenseLdl {
    n: usize,
    factor: Lblt<f64>,
}

impl DenseLdl {
    pub fn factor(a: &DMatrix<f64>) -> Result<Self, FactorError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(FactorError::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }
        if a.iter().any(|v| !v.is_finite()) {
            return Err(FactorError::Numeric("matrix has non-finite entries".to_string()));
        }
        let mat = Mat::<f64>::from_fn(n, n, |i, j| a[(i, j)]);
        let factor = Lblt::new(mat.as_ref(), Side::Lower);
        Ok(Self { n, factor })
    }

    /// Solve with the stored factorization, overwriting `rhs`.
    pub fn solve_after(&self, rhs: &mut [f64]) -> Result<(), FactorError> {
        if rhs.len() != self.n {
            return Err(FactorError::DimensionMismatch {
                expected: self.n,
                actual: rhs.len(),
            });
        }
        if self.n == 0 {
            return Ok(());
        }
        self.factor
            .solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(rhs, self.n, 1));
        if rhs.iter().any(|v| !v.is_finite()) {
            return Err(FactorError::Singular);
        }
        Ok(())
    }
}

impl SymmetricFactor for DenseLdl {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), FactorError> {
        self.solve_after(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indefinite_solve() {
        // Zero leading diagonal forces a symmetric pivot.
        let a = DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 2.0, 1.0, 0.0, 3.0, 2.0, 3.0, -1.0]);
        let ldl = DenseLdl::factor(&a).unwrap();
        let x_true = [1.0, -2.0, 0.5];
        let mut rhs: Vec<f64> = (0..3).map(|i| (0..3).map(|j| a[(i, j)] * x_true[j]).sum()).collect();
        ldl.solve_after(&mut rhs).unwrap();
        for i in 0..3 {
            assert!((rhs[i] - x_true[i]).abs() < 1e-12, "x[{}] = {}", i, rhs[i]);
        }
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, f64::NAN, 1.0]);
        assert!(matches!(DenseLdl::factor(&a), Err(FactorError::Numeric(_))));
    }

    #[test]
    fn test_rejects_non_square() {
        let a = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            DenseLdl::factor(&a),
            Err(FactorError::DimensionMismatch { .. })
        ));
    }
}
