//! Step lengths and centering.

use crate::comm::ReduceOp;
use crate::linalg::DistVector;

/// Largest `alpha` in `[0, bound]` keeping `x + alpha * dx >= 0` (collective).
///
/// Only entries with `dx_i < 0` restrict the step.
pub fn max_step_in_cone(x: &DistVector, dx: &DistVector, bound: f64) -> f64 {
    assert_eq!(x.len(), dx.len());
    let local = x
        .local()
        .iter()
        .zip(dx.local())
        .filter(|&(_, &d)| d < 0.0)
        .fold(bound, |alpha, (&xi, &d)| alpha.min(-xi / d));
    x.comm().all_reduce_scalar(local, ReduceOp::Min)
}

/// `min(1, ratio * max_step_in_cone(x, dx, 1 / ratio))`
pub fn fraction_to_boundary(x: &DistVector, dx: &DistVector, ratio: f64) -> f64 {
    (ratio * max_step_in_cone(x, dx, 1.0 / ratio)).min(1.0)
}

/// Mehrotra's centering parameter `(mu_aff / mu)^3`.
pub fn centrality(mu: f64, mu_aff: f64) -> f64 {
    (mu_aff / mu).powi(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SelfComm, ThreadComm};

    #[test]
    fn test_step_limited_by_blocking_entry() {
        let comm = SelfComm::shared();
        let x = DistVector::from_global(&comm, &[1.0, 2.0, 0.5]);
        let dx = DistVector::from_global(&comm, &[-0.5, 1.0, -2.0]);
        assert_eq!(max_step_in_cone(&x, &dx, 1.0), 0.25);
        assert!((fraction_to_boundary(&x, &dx, 0.99) - 0.99 * 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_unblocked_step_returns_bound() {
        let comm = SelfComm::shared();
        let x = DistVector::from_global(&comm, &[1.0, 2.0]);
        let dx = DistVector::from_global(&comm, &[0.0, 3.0]);
        assert_eq!(max_step_in_cone(&x, &dx, 1.0), 1.0);
        assert!((fraction_to_boundary(&x, &dx, 0.99) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_step_reduced_across_ranks() {
        let x = vec![1.0, 1.0, 1.0, 1.0, 1.0];
        let dx = vec![0.0, 0.0, 0.0, 0.0, -10.0];
        let steps = ThreadComm::run(3, |comm| {
            let xv = DistVector::from_global(&comm, &x);
            let dxv = DistVector::from_global(&comm, &dx);
            max_step_in_cone(&xv, &dxv, 1.0)
        });
        assert!(steps.iter().all(|&s| s == 0.1));
    }

    #[test]
    fn test_centrality() {
        assert_eq!(centrality(2.0, 1.0), 0.125);
    }
}
