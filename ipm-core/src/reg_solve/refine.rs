//! Iterative refinement around an approximate inverse.
//!
//! Starting from `x = M^{-1} b`, repeatedly corrects `x += M^{-1} (b - A x)`.
//! A candidate is accepted only if it shrinks the residual; refinement stops
//! when the relative residual meets the tolerance, when the residual stops
//! shrinking by at least `min_reduction_factor`, when a correction is not
//! finite, or after `max_refine_its` corrections. The best iterate is always
//! the one returned.

use crate::linalg::FactorError;
use crate::reg_solve::promote::{axpy, nrm2, Promote, Real};
use crate::reg_solve::RegSolveInfo;

fn residual<W: Real, A>(apply_a: &A, b: &[W], x: &[W], r: &mut [W])
where
    A: Fn(&[W], &mut [W]),
{
    apply_a(x, r);
    for (ri, &bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
}

fn refine_in<W, A, M>(
    apply_a: A,
    apply_inv: M,
    b: &[W],
    rel_tol: f64,
    max_refine_its: usize,
    min_reduction_factor: f64,
    progress: bool,
) -> Result<(Vec<W>, RegSolveInfo), FactorError>
where
    W: Real,
    A: Fn(&[W], &mut [W]),
    M: Fn(&mut [W]) -> Result<(), FactorError>,
{
    let n = b.len();
    let b_norm = nrm2(b);
    if b_norm == W::zero() {
        return Ok((
            vec![W::zero(); n],
            RegSolveInfo {
                num_its: 0,
                rel_tol: 0.0,
                met_requested_tol: true,
            },
        ));
    }

    let mut x = b.to_vec();
    apply_inv(&mut x)?;
    let mut r = vec![W::zero(); n];
    residual(&apply_a, b, &x, &mut r);
    let mut r_norm = nrm2(&r);

    let tol = W::from_f64_lossy(rel_tol);
    let min_reduction = W::from_f64_lossy(min_reduction_factor);
    let mut x_cand = vec![W::zero(); n];
    let mut r_cand = vec![W::zero(); n];
    let mut num_its = 0;

    loop {
        if progress {
            log::debug!(
                "refinement it {}: relative residual {:e}",
                num_its,
                (r_norm / b_norm).to_f64_lossy()
            );
        }
        if r_norm / b_norm <= tol || num_its == max_refine_its {
            break;
        }

        x_cand.copy_from_slice(&r);
        match apply_inv(&mut x_cand) {
            Ok(()) => {}
            // Keep the last finite iterate.
            Err(FactorError::Singular) => break,
            Err(e) => return Err(e),
        }
        axpy(W::one(), &x, &mut x_cand);
        residual(&apply_a, b, &x_cand, &mut r_cand);
        let new_norm = nrm2(&r_cand);

        // NaN compares false and is rejected here too.
        if !(new_norm < r_norm) {
            if progress {
                log::debug!(
                    "refinement it {}: residual did not decrease ({:e} >= {:e})",
                    num_its,
                    new_norm.to_f64_lossy(),
                    r_norm.to_f64_lossy()
                );
            }
            break;
        }

        std::mem::swap(&mut x, &mut x_cand);
        std::mem::swap(&mut r, &mut r_cand);
        let reduction = r_norm / new_norm;
        r_norm = new_norm;
        num_its += 1;
        if reduction < min_reduction {
            break;
        }
    }

    let rel = (r_norm / b_norm).to_f64_lossy();
    Ok((
        x,
        RegSolveInfo {
            num_its,
            rel_tol: rel,
            met_requested_tol: rel <= rel_tol,
        },
    ))
}

/// Refinement carried out entirely in `T`. Overwrites `b` with the solution.
pub fn refined_solve<T, A, M>(
    apply_a: A,
    apply_inv: M,
    b: &mut [T],
    rel_tol: f64,
    max_refine_its: usize,
    min_reduction_factor: f64,
    progress: bool,
) -> Result<RegSolveInfo, FactorError>
where
    T: Real,
    A: Fn(&[T], &mut [T]),
    M: Fn(&mut [T]) -> Result<(), FactorError>,
{
    let (x, info) = refine_in(
        apply_a,
        apply_inv,
        b,
        rel_tol,
        max_refine_its,
        min_reduction_factor,
        progress,
    )?;
    b.copy_from_slice(&x);
    Ok(info)
}

/// Refinement whose residuals are formed in `T::Promoted`.
///
/// `apply_a` applies the true matrix in the promoted type; the surrogate
/// inverse `apply_inv` runs in `T`. For a type without promotion the two
/// coincide and this is [`refined_solve`].
pub fn promoted_refined_solve<T, A, M>(
    apply_a: A,
    apply_inv: M,
    b: &mut [T],
    rel_tol: f64,
    max_refine_its: usize,
    min_reduction_factor: f64,
    progress: bool,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    A: Fn(&[T::Promoted], &mut [T::Promoted]),
    M: Fn(&mut [T]) -> Result<(), FactorError>,
{
    let b_prom: Vec<T::Promoted> = b.iter().map(|&v| v.promote()).collect();
    let inv_prom = |w: &mut [T::Promoted]| -> Result<(), FactorError> {
        let mut t: Vec<T> = w.iter().map(|&v| T::demote(v)).collect();
        apply_inv(&mut t)?;
        for (wi, ti) in w.iter_mut().zip(t) {
            *wi = ti.promote();
        }
        Ok(())
    };
    let (x, info) = refine_in(
        apply_a,
        inv_prom,
        &b_prom,
        rel_tol,
        max_refine_its,
        min_reduction_factor,
        progress,
    )?;
    for (bi, xi) in b.iter_mut().zip(x) {
        *bi = T::demote(xi);
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    fn dense_apply(a: &DMatrix<f64>) -> impl Fn(&[f64], &mut [f64]) + '_ {
        move |x, y| {
            let ax = a * DVector::from_column_slice(x);
            y.copy_from_slice(ax.as_slice());
        }
    }

    #[test]
    fn test_refinement_recovers_perturbed_inverse() {
        // Surrogate = A + 1e-4 I; refinement must converge to A^{-1} b.
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let surrogate = (&a + DMatrix::identity(3, 3) * 1e-4).lu();
        let inv = |x: &mut [f64]| -> Result<(), FactorError> {
            let sol = surrogate
                .solve(&DVector::from_column_slice(x))
                .ok_or(FactorError::Singular)?;
            x.copy_from_slice(sol.as_slice());
            Ok(())
        };
        let x_true = [1.0, -1.0, 2.0];
        let mut b = (&a * DVector::from_column_slice(&x_true)).as_slice().to_vec();

        let info = refined_solve(dense_apply(&a), inv, &mut b, 1e-13, 20, 2.0, false).unwrap();
        assert!(info.met_requested_tol, "info = {:?}", info);
        assert!(info.num_its >= 1);
        for i in 0..3 {
            assert!((b[i] - x_true[i]).abs() < 1e-11, "x[{}] = {}", i, b[i]);
        }
    }

    #[test]
    fn test_refinement_reports_shortfall() {
        // A very poor surrogate (the identity) cannot reach a tight tolerance
        // in a single correction.
        let a = DMatrix::from_row_slice(2, 2, &[1.5, 0.0, 0.0, 0.6]);
        let inv = |_: &mut [f64]| -> Result<(), FactorError> { Ok(()) };
        let mut b = vec![1.0, 1.0];
        let info = refined_solve(dense_apply(&a), inv, &mut b, 1e-12, 1, 2.0, false).unwrap();
        assert!(!info.met_requested_tol);
        assert!(info.rel_tol > 1e-12);
        assert_eq!(info.num_its, 1);
    }

    #[test]
    fn test_zero_rhs_is_trivially_solved() {
        let a = DMatrix::<f64>::identity(2, 2);
        let mut b = vec![0.0, 0.0];
        let info = refined_solve(
            dense_apply(&a),
            |_: &mut [f64]| -> Result<(), FactorError> { Ok(()) },
            &mut b,
            1e-12,
            5,
            2.0,
            false,
        ).unwrap();
        assert!(info.met_requested_tol);
        assert_eq!(b, vec![0.0, 0.0]);
    }

    #[test]
    fn test_promoted_refinement_beats_native_precision() {
        // Factor in f32, residuals in f64.
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 1.0, 0.5, 1.0, 2.0]);
        let a32 = a.map(|v| v as f32).lu();
        let inv = |x: &mut [f32]| -> Result<(), FactorError> {
            let sol = a32
                .solve(&DVector::from_column_slice(x))
                .ok_or(FactorError::Singular)?;
            x.copy_from_slice(sol.as_slice());
            Ok(())
        };
        let x_true = [0.25f64, -1.0, 3.0];
        let b64 = &a * DVector::from_column_slice(&x_true);
        let mut b: Vec<f32> = b64.iter().map(|&v| v as f32).collect();

        let info = promoted_refined_solve(dense_apply(&a), inv, &mut b, 1e-7, 10, 2.0, false).unwrap();
        assert!(info.met_requested_tol, "info = {:?}", info);
        for i in 0..3 {
            assert!((b[i] as f64 - x_true[i]).abs() < 1e-5, "x[{}] = {}", i, b[i]);
        }
    }

    /// `M^{-1} = c * diag(a)^{-1}` shrinks the residual by `|1 - c|` per
    /// correction.
    fn scaled_inverse(diag: &[f64], c: f64) -> impl Fn(&mut [f64]) -> Result<(), FactorError> + '_ {
        move |x| {
            for (xi, &di) in x.iter_mut().zip(diag) {
                *xi *= c / di;
            }
            Ok(())
        }
    }

    #[test]
    fn test_slow_reduction_stops_refinement() {
        let diag = [2.0, 4.0];
        let a = DMatrix::from_diagonal(&DVector::from_column_slice(&diag));
        let mut b = vec![1.0, 1.0];
        // Each correction shrinks the residual by 0.6, short of the factor 2.
        let info = refined_solve(dense_apply(&a), scaled_inverse(&diag, 0.4), &mut b, 1e-12, 10, 2.0, false).unwrap();

        assert_eq!(info.num_its, 1);
        assert!(!info.met_requested_tol);
        assert!((info.rel_tol - 0.36).abs() < 1e-12, "{:?}", info);
        // x = (1 - 0.6^2) A^{-1} b after the single accepted correction.
        assert!((b[0] - 0.32).abs() < 1e-12 && (b[1] - 0.16).abs() < 1e-12, "{:?}", b);
    }

    #[test]
    fn test_growing_residual_keeps_best_iterate() {
        let diag = [2.0, 4.0];
        let a = DMatrix::from_diagonal(&DVector::from_column_slice(&diag));
        let mut b = vec![1.0, 1.0];
        // Residual factor -1.5: the first correction makes things worse.
        let info = refined_solve(dense_apply(&a), scaled_inverse(&diag, 2.5), &mut b, 1e-12, 10, 2.0, false).unwrap();

        assert_eq!(info.num_its, 0);
        assert!(!info.met_requested_tol);
        assert!((info.rel_tol - 1.5).abs() < 1e-12, "{:?}", info);
        assert!((b[0] - 1.25).abs() < 1e-12 && (b[1] - 0.625).abs() < 1e-12, "{:?}", b);
    }

    #[test]
    fn test_singular_correction_keeps_first_solve() {
        use std::cell::Cell;

        let diag = [2.0, 4.0];
        let a = DMatrix::from_diagonal(&DVector::from_column_slice(&diag));
        let calls = Cell::new(0);
        let inner = scaled_inverse(&diag, 0.9);
        let inv = |x: &mut [f64]| -> Result<(), FactorError> {
            calls.set(calls.get() + 1);
            if calls.get() > 1 {
                return Err(FactorError::Singular);
            }
            inner(x)
        };
        let mut b = vec![1.0, 1.0];
        let info = refined_solve(dense_apply(&a), inv, &mut b, 1e-12, 10, 2.0, false).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(info.num_its, 0);
        assert!((info.rel_tol - 0.1).abs() < 1e-12, "{:?}", info);
        assert!((b[0] - 0.45).abs() < 1e-12 && (b[1] - 0.225).abs() < 1e-12, "{:?}", b);
    }
}
