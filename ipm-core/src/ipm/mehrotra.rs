//! Mehrotra predictor-corrector driver.
//!
//! Solves the standard-form LP
//!
//! ```text
//! min c^T x   s.t.   A x = b,  x >= 0
//! ```
//!
//! together with its dual `max -b^T y  s.t.  A^T y - z + c = 0,  z >= 0`.
//! One generic driver serves every storage of `A`; see [`LpRepresentation`].

use nalgebra::DMatrix;

use crate::comm::{CommRef, SelfComm};
use crate::error::{MehrotraError, MehrotraResult};
use crate::ipm::backend::{track_solve, LpRepresentation};
use crate::ipm::diagnostics::DirectionResiduals;
use crate::ipm::initialize::initialize;
use crate::ipm::kkt::{self, Direction, KktResiduals};
use crate::ipm::settings::MehrotraCtrl;
use crate::ipm::step::{centrality, fraction_to_boundary, max_step_in_cone};
use crate::linalg::{DistMatrix, DistSparseMatrix, DistVector, Orientation, SparseCsc};

/// Summary of a successful solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MehrotraInfo {
    pub num_its: usize,
    /// c^T x at the returned iterate.
    pub primal_obj: f64,
    /// -b^T y at the returned iterate.
    pub dual_obj: f64,
    /// Inner sparse solves that missed their requested tolerance.
    pub under_converged_solves: usize,
}

fn check_len(what: &'static str, v: &DistVector, expected: usize) -> MehrotraResult<()> {
    if v.len() != expected {
        return Err(MehrotraError::DimensionMismatch {
            what,
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

fn log_direction(comm: &CommRef, ctrl: &MehrotraCtrl, label: &str, res: &DirectionResiduals) {
    if ctrl.print && comm.is_root() {
        log::info!(
            "{} direction residuals: primal {:.3e}, dual {:.3e}, complementarity {:.3e}",
            label,
            res.primal,
            res.dual,
            res.complementarity
        );
    }
}

fn mehrotra_driver<R>(
    a: &R,
    b: &DistVector,
    c: &DistVector,
    x: &mut DistVector,
    y: &mut DistVector,
    z: &mut DistVector,
    ctrl: &MehrotraCtrl,
) -> MehrotraResult<MehrotraInfo>
where
    R: LpRepresentation + ?Sized,
{
    let comm = CommRef::clone(a.comm());
    let (m, n) = (a.height(), a.width());
    check_len("b", b, m)?;
    check_len("c", c, n)?;
    if ctrl.initialized {
        check_len("x", x, n)?;
        check_len("y", y, m)?;
        check_len("z", z, n)?;
    } else {
        *x = DistVector::zeros(&comm, n);
        *y = DistVector::zeros(&comm, m);
        *z = DistVector::zeros(&comm, n);
    }
    let verbose = ctrl.print && comm.is_root();

    let a_full = a.gather_entries();
    let formulation = kkt::formulation(ctrl.system);
    let reg_cand = formulation.regularization_candidates(m, n);
    let pairs = formulation.elimination_pairs(m, n);
    let mut solver = a.kkt_solver(ctrl);
    let mut under_converged = 0;

    if !ctrl.initialized {
        under_converged += initialize(&a_full, b, c, x, y, z, solver.as_mut())?;
    }

    let b_norm = b.nrm2();
    let c_norm = c.nrm2();
    let mut rb = DistVector::zeros(&comm, m);
    let mut rc = DistVector::zeros(&comm, n);
    let zero_m = vec![0.0; m];
    let zero_n = vec![0.0; n];

    let mut num_its = 0;
    loop {
        // ===================================================================
        // Cone membership
        // ===================================================================
        let x_non_pos = x.num_non_positive();
        let z_non_pos = z.num_non_positive();
        if x_non_pos > 0 || z_non_pos > 0 {
            return Err(MehrotraError::InfeasibleIterate { x_non_pos, z_non_pos });
        }

        // ===================================================================
        // Residuals and convergence
        // ===================================================================
        let primal_obj = c.dot(x);
        let dual_obj = -b.dot(y);
        let obj_conv = (primal_obj - dual_obj).abs() / (1.0 + primal_obj.abs());

        // rb := A x - b
        rb.copy_from(b);
        a.multiply(Orientation::Normal, 1.0, x, -1.0, &mut rb);
        let rb_conv = rb.nrm2() / (1.0 + b_norm);

        // rc := A^T y - z + c
        rc.copy_from(c);
        a.multiply(Orientation::Transpose, 1.0, y, 1.0, &mut rc);
        rc.axpy(-1.0, z);
        let rc_conv = rc.nrm2() / (1.0 + c_norm);

        if verbose {
            log::info!(
                "iter {:4}: pobj {:+.6e}, dobj {:+.6e}, objConv {:.3e}, rbConv {:.3e}, rcConv {:.3e}",
                num_its,
                primal_obj,
                dual_obj,
                obj_conv,
                rb_conv,
                rc_conv
            );
        }

        if obj_conv <= ctrl.tol && rb_conv <= ctrl.tol && rc_conv <= ctrl.tol {
            return Ok(MehrotraInfo {
                num_its,
                primal_obj,
                dual_obj,
                under_converged_solves: under_converged,
            });
        }
        if num_its == ctrl.max_its {
            return Err(MehrotraError::MaxIterations(ctrl.max_its));
        }

        // ===================================================================
        // Affine (predictor) direction
        // ===================================================================
        let x_full = x.gather();
        let z_full = z.gather();
        let rb_full = rb.gather();
        let rc_full = rc.gather();
        let rmu_full: Vec<f64> = x_full.iter().zip(&z_full).map(|(xi, zi)| xi * zi).collect();
        let residuals = KktResiduals {
            rb: &rb_full,
            rc: &rc_full,
            rmu: &rmu_full,
        };

        let j = formulation.build(&a_full, &x_full, &z_full);
        solver.factor(&j, &reg_cand, &pairs)?;

        let mut rhs = formulation.build_rhs(&a_full, &x_full, &z_full, &residuals);
        let info = solver.solve(&mut rhs)?;
        track_solve(&info, "affine", &comm, &mut under_converged);
        let affine = formulation.expand(&a_full, &x_full, &z_full, &residuals, &rhs);

        if ctrl.check_residuals {
            let res = DirectionResiduals::compute(&a_full, &x_full, &z_full, &residuals, &affine);
            log_direction(&comm, ctrl, "affine", &res);
        }

        // ===================================================================
        // Affine step lengths and centering
        // ===================================================================
        let dx_aff = DistVector::from_global(&comm, &affine.dx);
        let dz_aff = DistVector::from_global(&comm, &affine.dz);
        let alpha_aff_pri = max_step_in_cone(x, &dx_aff, 1.0);
        let alpha_aff_dual = max_step_in_cone(z, &dz_aff, 1.0);

        let mu = x.dot(z) / n as f64;
        let mut x_aff = x.clone();
        x_aff.axpy(alpha_aff_pri, &dx_aff);
        let mut z_aff = z.clone();
        z_aff.axpy(alpha_aff_dual, &dz_aff);
        let mu_aff = x_aff.dot(&z_aff) / n as f64;
        let sigma = centrality(mu, mu_aff);

        if verbose {
            log::info!(
                "  alphaAffPri {:.3e}, alphaAffDual {:.3e}, mu {:.3e}, muAff {:.3e}, sigma {:.3e}",
                alpha_aff_pri,
                alpha_aff_dual,
                mu,
                mu_aff,
                sigma
            );
        }

        // ===================================================================
        // Corrector direction (reuses the factorization)
        // ===================================================================
        let rmu_corr: Vec<f64> = affine
            .dx
            .iter()
            .zip(&affine.dz)
            .map(|(dxi, dzi)| dxi * dzi - sigma * mu)
            .collect();
        let corr_residuals = KktResiduals {
            rb: &zero_m,
            rc: &zero_n,
            rmu: &rmu_corr,
        };
        let mut rhs = formulation.build_rhs(&a_full, &x_full, &z_full, &corr_residuals);
        let info = solver.solve(&mut rhs)?;
        track_solve(&info, "corrector", &comm, &mut under_converged);
        let corrector = formulation.expand(&a_full, &x_full, &z_full, &corr_residuals, &rhs);

        if ctrl.check_residuals {
            let res = DirectionResiduals::compute(&a_full, &x_full, &z_full, &corr_residuals, &corrector);
            log_direction(&comm, ctrl, "corrector", &res);
        }

        let mut direction: Direction = affine;
        direction.add(&corrector);

        // ===================================================================
        // Step
        // ===================================================================
        let dx = DistVector::from_global(&comm, &direction.dx);
        let dy = DistVector::from_global(&comm, &direction.dy);
        let dz = DistVector::from_global(&comm, &direction.dz);
        let alpha_pri = fraction_to_boundary(x, &dx, ctrl.max_step_ratio);
        let alpha_dual = fraction_to_boundary(z, &dz, ctrl.max_step_ratio);
        if verbose {
            log::info!("  alphaPri {:.3e}, alphaDual {:.3e}", alpha_pri, alpha_dual);
        }

        x.axpy(alpha_pri, &dx);
        y.axpy(alpha_dual, &dy);
        z.axpy(alpha_dual, &dz);

        num_its += 1;
    }
}

/// Sequential dense solve.
///
/// `x`, `y` and `z` are overwritten with the last iterate, also when an
/// error is returned.
pub fn mehrotra_dense(
    a: &DMatrix<f64>,
    b: &[f64],
    c: &[f64],
    x: &mut Vec<f64>,
    y: &mut Vec<f64>,
    z: &mut Vec<f64>,
    ctrl: &MehrotraCtrl,
) -> MehrotraResult<MehrotraInfo> {
    let comm = SelfComm::shared();
    let a = DistMatrix::from_global(&comm, a);
    let b = DistVector::from_global(&comm, b);
    let c = DistVector::from_global(&comm, c);
    let mut xv = DistVector::from_global(&comm, x);
    let mut yv = DistVector::from_global(&comm, y);
    let mut zv = DistVector::from_global(&comm, z);

    let result = mehrotra_driver(&a, &b, &c, &mut xv, &mut yv, &mut zv, ctrl);
    *x = xv.into_local();
    *y = yv.into_local();
    *z = zv.into_local();
    result
}

/// Distributed dense solve (collective).
pub fn mehrotra_dist_dense(
    a: &DistMatrix,
    b: &DistVector,
    c: &DistVector,
    x: &mut DistVector,
    y: &mut DistVector,
    z: &mut DistVector,
    ctrl: &MehrotraCtrl,
) -> MehrotraResult<MehrotraInfo> {
    mehrotra_driver(a, b, c, x, y, z, ctrl)
}

/// Sequential sparse solve. Not available: sparse-direct factorization is
/// only provided for the distributed representation.
pub fn mehrotra_sparse(
    _a: &SparseCsc,
    _b: &[f64],
    _c: &[f64],
    _x: &mut Vec<f64>,
    _y: &mut Vec<f64>,
    _z: &mut Vec<f64>,
    _ctrl: &MehrotraCtrl,
) -> MehrotraResult<MehrotraInfo> {
    Err(MehrotraError::Unsupported(
        "Sequential sparse-direct solvers not yet supported".to_string(),
    ))
}

/// Distributed sparse solve (collective).
pub fn mehrotra_dist_sparse(
    a: &DistSparseMatrix,
    b: &DistVector,
    c: &DistVector,
    x: &mut DistVector,
    y: &mut DistVector,
    z: &mut DistVector,
    ctrl: &MehrotraCtrl,
) -> MehrotraResult<MehrotraInfo> {
    mehrotra_driver(a, b, c, x, y, z, ctrl)
}
