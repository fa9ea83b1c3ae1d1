//! Starting point for the predictor-corrector iteration.

use crate::error::MehrotraResult;
use crate::ipm::backend::{track_solve, KktSolver};
use crate::ipm::kkt::{AugmentedKkt, KktFormulation};
use crate::linalg::{DistVector, SparseCsc};

/// Compute a strictly positive (x, z) and a matching y.
///
/// Factors `[I A^T; A 0]` once and solves
///
/// 1. `min ||x||` s.t. `A x = b`, from the right-hand side `[0; b]`,
/// 2. `min ||z||` s.t. `A^T y - z + c = 0`, from the right-hand side `[c; 0]`,
///
/// then shifts x (and z) by `1 - min(x)` whenever `min(x) <= 0`.
///
/// Returns the number of under-converged solves.
pub fn initialize(
    a: &SparseCsc,
    b: &DistVector,
    c: &DistVector,
    x: &mut DistVector,
    y: &mut DistVector,
    z: &mut DistVector,
    solver: &mut dyn KktSolver,
) -> MehrotraResult<usize> {
    let (m, n) = (a.rows(), a.cols());
    let comm = b.comm();
    let mut under_converged = 0;

    let j = AugmentedKkt::build_with_diagonal(a, &vec![1.0; n]);
    solver.factor(&j, &AugmentedKkt.regularization_candidates(m, n), &[])?;

    // Minimum-norm primal solution.
    let mut rhs = vec![0.0; n];
    rhs.extend(b.gather());
    let info = solver.solve(&mut rhs)?;
    track_solve(&info, "initial primal", comm, &mut under_converged);
    x.set_from_global(&rhs[..n]);

    // Minimum-norm dual slack.
    let mut rhs = c.gather();
    rhs.resize(n + m, 0.0);
    let info = solver.solve(&mut rhs)?;
    track_solve(&info, "initial dual", comm, &mut under_converged);
    z.set_from_global(&rhs[..n]);
    let neg_y: Vec<f64> = rhs[n..].iter().map(|v| -v).collect();
    y.set_from_global(&neg_y);

    for v in [x, z] {
        let alpha = -v.min();
        if alpha >= 0.0 {
            for vi in v.local_mut() {
                *vi += alpha + 1.0;
            }
        }
    }
    Ok(under_converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;
    use crate::ipm::backend::DenseKktSolver;
    use crate::linalg::sparse;

    #[test]
    fn test_starting_point_is_interior_and_dual_feasible() {
        let comm = SelfComm::shared();
        let a = sparse::from_triplets(2, 3, vec![(0, 0, 1.0), (0, 1, 1.0), (1, 1, 1.0), (1, 2, 1.0)]);
        let b = DistVector::from_global(&comm, &[2.0, -1.0]);
        let c = DistVector::from_global(&comm, &[1.0, 1.0, 4.0]);
        let mut x = DistVector::zeros(&comm, 3);
        let mut y = DistVector::zeros(&comm, 2);
        let mut z = DistVector::zeros(&comm, 3);
        let mut solver = DenseKktSolver::new();

        let under = initialize(&a, &b, &c, &mut x, &mut y, &mut z, &mut solver).unwrap();
        assert_eq!(under, 0);
        assert!(x.local().iter().all(|&v| v >= 1.0 - 1e-12));
        assert!(z.local().iter().all(|&v| v > 0.0));

        // Before the shift z = A^T y + c; the shift is uniform across entries.
        let mut aty = vec![0.0; 3];
        sparse::spmv_transpose(&a, y.local(), &mut aty, 1.0, 0.0);
        let shifts: Vec<f64> = (0..3).map(|j| z.local()[j] - (aty[j] + c.local()[j])).collect();
        for s in &shifts {
            assert!((s - shifts[0]).abs() < 1e-12);
        }
    }
}
