//! Flexible restarted Krylov solvers.
//!
//! Both solvers run cycles of flexible Arnoldi with right preconditioning and
//! keep the preconditioned directions, so the preconditioner may change from
//! one application to the next (it is itself an iterative refinement).
//! LGMRES additionally appends the corrections of the most recent cycles to
//! the search space of each new cycle, which damps the stalling typical of
//! short restarts.

use std::collections::VecDeque;

use crate::linalg::FactorError;
use crate::reg_solve::promote::{axpy, dot, nrm2, Real};
use crate::reg_solve::RegSolveInfo;

/// Parameters shared by the Krylov solvers.
#[derive(Debug, Clone, Copy)]
pub struct KrylovParams {
    pub rel_tol: f64,
    /// Total budget of operator applications across all cycles.
    pub max_its: usize,
    /// Arnoldi steps per cycle, not counting augmentation.
    pub restart: usize,
    /// Number of past corrections kept for augmentation (zero for FGMRES).
    pub augment: usize,
    pub progress: bool,
}

fn givens<T: Real>(a: T, b: T) -> (T, T) {
    if b == T::zero() {
        (T::one(), T::zero())
    } else {
        let r = a.hypot(b);
        (a / r, b / r)
    }
}

/// Solve `A x = b` from `x = 0`, overwriting `b` with `x`.
pub fn flexible_gmres<T, A, M>(
    apply_a: A,
    precond: M,
    b: &mut [T],
    params: &KrylovParams,
) -> Result<RegSolveInfo, FactorError>
where
    T: Real,
    A: Fn(&[T], &mut [T]),
    M: Fn(&mut [T]) -> Result<(), FactorError>,
{
    let n = b.len();
    let rhs = b.to_vec();
    let b_norm = nrm2(&rhs);
    let tol = T::from_f64_lossy(params.rel_tol);
    let restart = params.restart.max(1);

    let mut x = vec![T::zero(); n];
    let mut r = vec![T::zero(); n];
    let mut aug: VecDeque<Vec<T>> = VecDeque::with_capacity(params.augment);
    let mut num_its = 0;

    if b_norm == T::zero() {
        b.fill(T::zero());
        return Ok(RegSolveInfo {
            num_its: 0,
            rel_tol: 0.0,
            met_requested_tol: true,
        });
    }

    let mut rel;
    loop {
        // True residual at the start of every cycle.
        apply_a(&x, &mut r);
        for (ri, &bi) in r.iter_mut().zip(&rhs) {
            *ri = bi - *ri;
        }
        let beta = nrm2(&r);
        rel = beta / b_norm;
        if params.progress {
            log::debug!("krylov it {}: relative residual {:e}", num_its, rel.to_f64_lossy());
        }
        if rel <= tol || num_its >= params.max_its || !rel.is_finite() {
            break;
        }

        let steps = (restart + aug.len()).min(params.max_its - num_its);
        let mut v: Vec<Vec<T>> = Vec::with_capacity(steps + 1);
        let mut z: Vec<Vec<T>> = Vec::with_capacity(steps);
        // Column j of the Hessenberg matrix has j + 2 entries.
        let mut h: Vec<Vec<T>> = Vec::with_capacity(steps);
        let mut cs: Vec<(T, T)> = Vec::with_capacity(steps);
        let mut g = vec![T::zero(); steps + 1];
        g[0] = beta;
        v.push(r.iter().map(|&ri| ri / beta).collect());

        let mut dim = 0;
        for j in 0..steps {
            // Standard directions first, then the stored corrections.
            let zj = if j < restart || j - restart >= aug.len() {
                let mut w = v[j].clone();
                precond(&mut w)?;
                w
            } else {
                aug[j - restart].clone()
            };
            let mut w = vec![T::zero(); n];
            apply_a(&zj, &mut w);
            z.push(zj);
            num_its += 1;

            let mut hj = vec![T::zero(); j + 2];
            for (i, vi) in v.iter().enumerate() {
                hj[i] = dot(vi, &w);
                axpy(-hj[i], vi, &mut w);
            }
            let w_norm = nrm2(&w);
            hj[j + 1] = w_norm;

            for (i, &(c, s)) in cs.iter().enumerate() {
                let (a, bb) = (hj[i], hj[i + 1]);
                hj[i] = c * a + s * bb;
                hj[i + 1] = c * bb - s * a;
            }
            let (c, s) = givens(hj[j], hj[j + 1]);
            hj[j] = c * hj[j] + s * hj[j + 1];
            hj[j + 1] = T::zero();
            g[j + 1] = -s * g[j];
            g[j] = c * g[j];
            cs.push((c, s));
            h.push(hj);
            dim = j + 1;

            let est = g[j + 1].abs() / b_norm;
            if est <= tol || w_norm == T::zero() || !est.is_finite() {
                break;
            }
            v.push(w.iter().map(|&wi| wi / w_norm).collect());
        }

        // Back substitution on the triangularized Hessenberg matrix.
        let mut y = vec![T::zero(); dim];
        for i in (0..dim).rev() {
            let mut acc = g[i];
            for k in i + 1..dim {
                acc = acc - h[k][i] * y[k];
            }
            y[i] = if h[i][i] != T::zero() { acc / h[i][i] } else { T::zero() };
        }
        let mut dx = vec![T::zero(); n];
        for (yi, zi) in y.iter().zip(&z) {
            axpy(*yi, zi, &mut dx);
        }
        axpy(T::one(), &dx, &mut x);

        if params.augment > 0 {
            let norm = nrm2(&dx);
            if norm > T::zero() && norm.is_finite() {
                if aug.len() == params.augment {
                    aug.pop_back();
                }
                aug.push_front(dx.iter().map(|&d| d / norm).collect());
            }
        }
    }

    b.copy_from_slice(&x);
    let rel = rel.to_f64_lossy();
    Ok(RegSolveInfo {
        num_its,
        rel_tol: rel,
        met_requested_tol: rel <= params.rel_tol,
    })
}
