//! Common interface for symmetric factorization backends.

use thiserror::Error;

/// Factorization failure.
#[derive(Debug, Error)]
pub enum FactorError {
    #[error("symbolic factorization failed: {0}")]
    Symbolic(String),

    #[error("numeric factorization failed: {0}")]
    Numeric(String),

    #[error("factorization is singular to working precision")]
    Singular,

    #[error("solve requested before a numeric factorization")]
    NotFactored,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A factored symmetric matrix that can be applied as an inverse.
pub trait SymmetricFactor {
    /// Order of the factored matrix.
    fn dim(&self) -> usize;

    /// Overwrite `rhs` with `F^{-1} rhs`.
    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), FactorError>;
}
