//! Solves with a regularized factorization.
//!
//! A regularized LDL^T factors a nearby *surrogate* of the true symmetric
//! system. The routines here recover the solution of the true system:
//!
//! - [`regularized_solve_after`]: iterative refinement with the surrogate as
//!   approximate inverse, forming residuals in higher precision when the
//!   scalar type has a promotion.
//! - [`fgmres_solve_after`] / [`lgmres_solve_after`]: flexible Krylov
//!   methods with the true operator, preconditioned by the refinement above.
//! - [`solve_after`]: dispatch on [`RegSolveCtrl::alg`].

pub mod krylov;
pub mod promote;
pub mod refine;

use sprs::CsMat;

use crate::linalg::sparse;
use crate::linalg::{FactorError, SymmetricFactor};

pub use krylov::KrylovParams;
pub use promote::{Promote, Real};
pub use refine::{promoted_refined_solve, refined_solve};

/// Krylov method used by [`solve_after`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegSolveAlg {
    #[default]
    Fgmres,
    Lgmres,
}

/// Controls for solves with a regularized factorization.
#[derive(Debug, Clone)]
pub struct RegSolveCtrl {
    pub alg: RegSolveAlg,

    /// Relative residual the Krylov solve must reach.
    pub rel_tol: f64,

    /// Relative residual targeted by the refinement used as preconditioner.
    pub rel_tol_refine: f64,

    /// Krylov iteration budget.
    pub max_its: usize,

    /// Refinement corrections per preconditioner application.
    pub max_refine_its: usize,

    /// Refinement stops once a correction shrinks the residual by less than
    /// this factor.
    pub min_reduction_factor: f64,

    /// Arnoldi steps per restart cycle.
    pub restart: usize,

    /// Past corrections kept by LGMRES.
    pub augment: usize,

    /// Log per-iteration residuals at debug level.
    pub progress: bool,
}

impl Default for RegSolveCtrl {
    fn default() -> Self {
        let eps = f64::EPSILON;
        Self {
            alg: RegSolveAlg::Fgmres,
            rel_tol: eps.powf(0.5),
            rel_tol_refine: eps.powf(0.8),
            max_its: 4,
            max_refine_its: 10,
            min_reduction_factor: 2.0,
            restart: 4,
            augment: 2,
            progress: false,
        }
    }
}

impl RegSolveCtrl {
    pub fn with_alg(mut self, alg: RegSolveAlg) -> Self {
        self.alg = alg;
        self
    }

    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    pub fn with_max_refine_its(mut self, max_refine_its: usize) -> Self {
        self.max_refine_its = max_refine_its;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Outcome of a solve with a regularized factorization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegSolveInfo {
    /// Refinement corrections or Krylov iterations performed.
    pub num_its: usize,
    /// Final relative residual `||b - A x|| / ||b||`.
    pub rel_tol: f64,
    pub met_requested_tol: bool,
}

/// Application of the factored surrogate's inverse.
pub trait SurrogateInverse<T> {
    fn apply_inverse(&self, x: &mut [T]) -> Result<(), FactorError>;
}

impl<F: SymmetricFactor> SurrogateInverse<f64> for F {
    fn apply_inverse(&self, x: &mut [f64]) -> Result<(), FactorError> {
        self.solve_in_place(x)
    }
}

/// The true symmetric system `J + diag(reg)`.
///
/// `matrix` holds the upper triangle of `J`. With a scaling `d`, the
/// surrogate is understood to approximate `D^{-1} J D^{-1}`.
#[derive(Debug, Clone)]
pub struct RegularizedSystem<T: Promote> {
    matrix: CsMat<T>,
    reg: Option<Vec<T>>,
    scaling: Option<Vec<T>>,
    promoted: Option<CsMat<T::Promoted>>,
}

impl<T: Promote> RegularizedSystem<T> {
    pub fn new(matrix: CsMat<T>) -> Self {
        assert_eq!(matrix.rows(), matrix.cols(), "regularized system must be square");
        let promoted = T::HAS_PROMOTION.then(|| sparse::map_values(&matrix, T::promote));
        Self {
            matrix,
            reg: None,
            scaling: None,
            promoted,
        }
    }

    /// A priori regularization, treated as part of the true system.
    pub fn with_reg(mut self, reg: Vec<T>) -> Self {
        assert_eq!(reg.len(), self.dim());
        self.reg = Some(reg);
        self
    }

    pub fn with_scaling(mut self, d: Vec<T>) -> Self {
        assert_eq!(d.len(), self.dim());
        self.scaling = Some(d);
        self
    }

    pub fn dim(&self) -> usize {
        self.matrix.rows()
    }

    pub fn matrix(&self) -> &CsMat<T> {
        &self.matrix
    }

    /// y = (J + diag(reg)) x
    pub fn apply(&self, x: &[T], y: &mut [T]) {
        sparse::symm_matvec_upper(&self.matrix, x, y);
        if let Some(reg) = &self.reg {
            for ((yi, &xi), &ri) in y.iter_mut().zip(x).zip(reg) {
                *yi = *yi + ri * xi;
            }
        }
    }

    /// Same product in the promoted type.
    pub fn apply_promoted(&self, x: &[T::Promoted], y: &mut [T::Promoted]) {
        match &self.promoted {
            Some(matrix) => sparse::symm_matvec_upper(matrix, x, y),
            None => {
                let xt: Vec<T> = x.iter().map(|&v| T::demote(v)).collect();
                let mut yt = vec![T::zero(); xt.len()];
                sparse::symm_matvec_upper(&self.matrix, &xt, &mut yt);
                for (yi, v) in y.iter_mut().zip(yt) {
                    *yi = v.promote();
                }
            }
        }
        if let Some(reg) = &self.reg {
            for ((yi, &xi), &ri) in y.iter_mut().zip(x).zip(reg) {
                *yi = *yi + ri.promote() * xi;
            }
        }
    }

    fn apply_inverse<S: SurrogateInverse<T>>(&self, surrogate: &S, x: &mut [T]) -> Result<(), FactorError> {
        match &self.scaling {
            Some(d) => {
                for (xi, &di) in x.iter_mut().zip(d) {
                    *xi = *xi / di;
                }
                surrogate.apply_inverse(x)?;
                for (xi, &di) in x.iter_mut().zip(d) {
                    *xi = *xi / di;
                }
                Ok(())
            }
            None => surrogate.apply_inverse(x),
        }
    }
}

/// Refine `b` towards the solution of the true system using the surrogate.
pub fn regularized_solve_after<T, S>(
    system: &RegularizedSystem<T>,
    surrogate: &S,
    b: &mut [T],
    rel_tol: f64,
    max_refine_its: usize,
    min_reduction_factor: f64,
    progress: bool,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    S: SurrogateInverse<T>,
{
    if b.len() != system.dim() {
        return Err(FactorError::DimensionMismatch {
            expected: system.dim(),
            actual: b.len(),
        });
    }
    let inv = |x: &mut [T]| system.apply_inverse(surrogate, x);
    if T::HAS_PROMOTION {
        promoted_refined_solve(
            |x: &[T::Promoted], y: &mut [T::Promoted]| system.apply_promoted(x, y),
            inv,
            b,
            rel_tol,
            max_refine_its,
            min_reduction_factor,
            progress,
        )
    } else {
        refined_solve(
            |x: &[T], y: &mut [T]| system.apply(x, y),
            inv,
            b,
            rel_tol,
            max_refine_its,
            min_reduction_factor,
            progress,
        )
    }
}

fn krylov_solve_after<T, S>(
    system: &RegularizedSystem<T>,
    surrogate: &S,
    b: &mut [T],
    ctrl: &RegSolveCtrl,
    augment: usize,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    S: SurrogateInverse<T>,
{
    if b.len() != system.dim() {
        return Err(FactorError::DimensionMismatch {
            expected: system.dim(),
            actual: b.len(),
        });
    }
    let precond = |x: &mut [T]| -> Result<(), FactorError> {
        regularized_solve_after(
            system,
            surrogate,
            x,
            ctrl.rel_tol_refine,
            ctrl.max_refine_its,
            ctrl.min_reduction_factor,
            ctrl.progress,
        )
        .map(|_| ())
    };
    let params = KrylovParams {
        rel_tol: ctrl.rel_tol,
        max_its: ctrl.max_its,
        restart: ctrl.restart,
        augment,
        progress: ctrl.progress,
    };
    krylov::flexible_gmres(|x: &[T], y: &mut [T]| system.apply(x, y), precond, b, &params)
}

/// Restarted FGMRES preconditioned by regularized refinement.
pub fn fgmres_solve_after<T, S>(
    system: &RegularizedSystem<T>,
    surrogate: &S,
    b: &mut [T],
    ctrl: &RegSolveCtrl,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    S: SurrogateInverse<T>,
{
    krylov_solve_after(system, surrogate, b, ctrl, 0)
}

/// LGMRES preconditioned by regularized refinement.
pub fn lgmres_solve_after<T, S>(
    system: &RegularizedSystem<T>,
    surrogate: &S,
    b: &mut [T],
    ctrl: &RegSolveCtrl,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    S: SurrogateInverse<T>,
{
    krylov_solve_after(system, surrogate, b, ctrl, ctrl.augment.max(1))
}

/// Solve with the Krylov method selected by `ctrl.alg`.
pub fn solve_after<T, S>(
    system: &RegularizedSystem<T>,
    surrogate: &S,
    b: &mut [T],
    ctrl: &RegSolveCtrl,
) -> Result<RegSolveInfo, FactorError>
where
    T: Promote,
    S: SurrogateInverse<T>,
{
    match ctrl.alg {
        RegSolveAlg::Fgmres => fgmres_solve_after(system, surrogate, b, ctrl),
        RegSolveAlg::Lgmres => lgmres_solve_after(system, surrogate, b, ctrl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::ordering::NestedDissection;
    use crate::linalg::sparse::from_triplets_symmetric;
    use crate::linalg::sparse_ldl::RegularizedLdl;
    use faer::Par;

    /// Saddle-point system [I A^T; A 0] with a 2 x 3 constraint block.
    fn saddle() -> sprs::CsMat<f64> {
        from_triplets_symmetric(
            5,
            vec![
                (0, 0, 1.0),
                (1, 1, 1.0),
                (2, 2, 1.0),
                (0, 3, 1.0),
                (1, 3, 2.0),
                (1, 4, -1.0),
                (2, 4, 1.0),
            ],
        )
    }

    fn factor(j: &sprs::CsMat<f64>, reg: f64) -> RegularizedLdl {
        let mut ldl = RegularizedLdl::symbolic(j, NestedDissection::identity(5), Par::Seq).unwrap();
        ldl.numeric(j, &[reg, reg, reg, -reg, -reg], 1e-300).unwrap();
        ldl
    }

    fn rel_residual(system: &RegularizedSystem<f64>, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        system.apply(x, &mut ax);
        let r: f64 = ax.iter().zip(b).map(|(l, r)| (l - r).powi(2)).sum::<f64>().sqrt();
        r / b.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn test_refinement_removes_regularization_error() {
        let j = saddle();
        let ldl = factor(&j, 1e-6);
        let system = RegularizedSystem::new(j);
        let b = vec![1.0, 0.0, -1.0, 2.0, 0.5];

        let mut raw = b.clone();
        ldl.solve_in_place(&mut raw).unwrap();
        let raw_res = rel_residual(&system, &raw, &b);

        let mut x = b.clone();
        let info = regularized_solve_after(&system, &ldl, &mut x, 1e-14, 10, 2.0, false).unwrap();
        assert!(info.met_requested_tol, "info = {:?}", info);
        let res = rel_residual(&system, &x, &b);
        assert!(res < 1e-13 && res < raw_res, "res = {}, raw = {}", res, raw_res);
    }

    #[test]
    fn test_krylov_variants_agree() {
        let j = saddle();
        let ldl = factor(&j, 1e-4);
        let system = RegularizedSystem::new(j);
        let b = vec![0.5, 1.0, -1.0, 0.0, 3.0];

        let ctrl = RegSolveCtrl {
            rel_tol: 1e-12,
            max_refine_its: 1,
            ..Default::default()
        };

        let mut xf = b.clone();
        let fi = solve_after(&system, &ldl, &mut xf, &ctrl).unwrap();
        let mut xl = b.clone();
        let li = solve_after(&system, &ldl, &mut xl, &ctrl.clone().with_alg(RegSolveAlg::Lgmres)).unwrap();

        assert!(fi.met_requested_tol, "fgmres: {:?}", fi);
        assert!(li.met_requested_tol, "lgmres: {:?}", li);
        for i in 0..5 {
            assert!((xf[i] - xl[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scaled_surrogate() {
        // Factor D^{-1} J D^{-1}; the scaled solve must still return J^{-1} b.
        let j = saddle();
        let d = vec![2.0, 0.5, 1.0, 4.0, 0.25];
        let inv_d: Vec<f64> = d.iter().map(|v| 1.0 / v).collect();
        let scaled = sparse::symmetric_diagonal_scale(&j, &inv_d);
        let ldl = factor(&scaled, 1e-10);
        let system = RegularizedSystem::new(j).with_scaling(d);

        let b = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut x = b.clone();
        let info = regularized_solve_after(&system, &ldl, &mut x, 1e-12, 10, 2.0, false).unwrap();
        assert!(info.met_requested_tol, "info = {:?}", info);
        assert!(rel_residual(&system, &x, &b) < 1e-12);
    }

    #[test]
    fn test_a_priori_regularization_is_part_of_true_system() {
        let j = from_triplets_symmetric(2, vec![(0, 0, 2.0), (1, 1, 3.0)]);
        let system = RegularizedSystem::new(j).with_reg(vec![1.0, -1.0]);
        let mut y = vec![0.0; 2];
        system.apply(&[1.0, 1.0], &mut y);
        assert_eq!(y, vec![3.0, 2.0]);
    }
}
