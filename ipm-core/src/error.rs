//! Error types for the LP driver.

use thiserror::Error;

use crate::linalg::FactorError;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse: invalid inputs or an unsupported configuration.
    Logic,
    /// The algorithm ran but did not produce an answer.
    Runtime,
}

/// Errors returned by the Mehrotra driver.
#[derive(Debug, Error)]
pub enum MehrotraError {
    #[error("{x_non_pos} entries of x were nonpositive and {z_non_pos} entries of z were nonpositive")]
    InfeasibleIterate { x_non_pos: usize, z_non_pos: usize },

    #[error("Maximum number of iterations ({0}) exceeded")]
    MaxIterations(usize),

    #[error("{0}")]
    Unsupported(String),

    #[error("{what} has length {actual}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("factorization error: {0}")]
    Factorization(#[from] FactorError),
}

impl MehrotraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MehrotraError::InfeasibleIterate { .. }
            | MehrotraError::Unsupported(_)
            | MehrotraError::DimensionMismatch { .. } => ErrorKind::Logic,
            MehrotraError::MaxIterations(_) | MehrotraError::Factorization(_) => ErrorKind::Runtime,
        }
    }
}

/// Result type for the LP driver.
pub type MehrotraResult<T> = Result<T, MehrotraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = MehrotraError::InfeasibleIterate {
            x_non_pos: 2,
            z_non_pos: 0,
        };
        assert_eq!(
            e.to_string(),
            "2 entries of x were nonpositive and 0 entries of z were nonpositive"
        );
        assert_eq!(e.kind(), ErrorKind::Logic);

        let e = MehrotraError::MaxIterations(5);
        assert_eq!(e.to_string(), "Maximum number of iterations (5) exceeded");
        assert_eq!(e.kind(), ErrorKind::Runtime);

        let e: MehrotraError = FactorError::Singular.into();
        assert_eq!(e.kind(), ErrorKind::Runtime);
    }
}
