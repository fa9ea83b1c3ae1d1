//! Factorization backends for the KKT systems and the data representations
//! the driver accepts.

use nalgebra::DMatrix;

use crate::comm::CommRef;
use crate::error::MehrotraResult;
use crate::ipm::kkt::to_dense_symmetric;
use crate::ipm::settings::MehrotraCtrl;
use crate::linalg::ordering::NestedDissection;
use crate::linalg::sparse::{self, SparseCsc, SparseSymmetricCsc};
use crate::linalg::sparse_ldl::{self, RegularizedLdl};
use crate::linalg::{DenseLdl, DistMatrix, DistSparseMatrix, DistVector, FactorError, Orientation};
use crate::reg_solve::{self, RegSolveCtrl, RegSolveInfo, RegularizedSystem};

/// Factor-once, solve-many access to a KKT matrix.
pub trait KktSolver {
    /// Factor the upper triangle `kkt`. Backends with a priori
    /// regularization use the signed magnitudes in `reg_cand`; orderings
    /// keep each of `pairs` adjacent, first row first.
    fn factor(
        &mut self,
        kkt: &SparseSymmetricCsc,
        reg_cand: &[f64],
        pairs: &[(usize, usize)],
    ) -> MehrotraResult<()>;

    /// Overwrite `rhs` with the solution of the last factored system.
    fn solve(&self, rhs: &mut [f64]) -> MehrotraResult<RegSolveInfo>;
}

fn relative_residual(upper: &SparseSymmetricCsc, x: &[f64], b: &[f64]) -> f64 {
    let mut ax = vec![0.0; b.len()];
    sparse::symm_matvec_upper(upper, x, &mut ax);
    let r: f64 = ax.iter().zip(b).map(|(l, r)| (l - r).powi(2)).sum::<f64>().sqrt();
    let b_norm: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if b_norm == 0.0 {
        r
    } else {
        r / b_norm
    }
}

/// Bunch-Kaufman factorization of the expanded dense KKT matrix.
#[derive(Default)]
pub struct DenseKktSolver {
    matrix: Option<SparseSymmetricCsc>,
    ldl: Option<DenseLdl>,
}

impl DenseKktSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KktSolver for DenseKktSolver {
    fn factor(
        &mut self,
        kkt: &SparseSymmetricCsc,
        _reg_cand: &[f64],
        _pairs: &[(usize, usize)],
    ) -> MehrotraResult<()> {
        self.ldl = None;
        let dense: DMatrix<f64> = to_dense_symmetric(kkt);
        self.ldl = Some(DenseLdl::factor(&dense)?);
        self.matrix = Some(kkt.clone());
        Ok(())
    }

    fn solve(&self, rhs: &mut [f64]) -> MehrotraResult<RegSolveInfo> {
        let (Some(ldl), Some(matrix)) = (&self.ldl, &self.matrix) else {
            return Err(FactorError::NotFactored.into());
        };
        let b = rhs.to_vec();
        ldl.solve_after(rhs)?;
        Ok(RegSolveInfo {
            num_its: 0,
            rel_tol: relative_residual(matrix, rhs, &b),
            met_requested_tol: true,
        })
    }
}

/// Regularized supernodal LDL^T under a nested-dissection ordering,
/// followed by refinement against the unregularized matrix.
///
/// The ordering and symbolic analysis are kept while successive matrices
/// share a pattern.
pub struct SparseKktSolver {
    ctrl: RegSolveCtrl,
    leaf_size: usize,
    threads: usize,
    ldl: Option<RegularizedLdl>,
    pairs: Vec<(usize, usize)>,
    system: Option<RegularizedSystem<f64>>,
    symbolic_count: usize,
}

impl SparseKktSolver {
    pub fn new(ctrl: RegSolveCtrl, leaf_size: usize, threads: usize) -> Self {
        Self {
            ctrl,
            leaf_size,
            threads,
            ldl: None,
            pairs: Vec::new(),
            system: None,
            symbolic_count: 0,
        }
    }

    /// Number of symbolic analyses performed so far.
    pub fn symbolic_count(&self) -> usize {
        self.symbolic_count
    }
}

impl KktSolver for SparseKktSolver {
    fn factor(
        &mut self,
        kkt: &SparseSymmetricCsc,
        reg_cand: &[f64],
        pairs: &[(usize, usize)],
    ) -> MehrotraResult<()> {
        let reuse = self.pairs == pairs && self.ldl.as_ref().is_some_and(|ldl| ldl.pattern_matches(kkt));
        if !reuse {
            self.ldl = None;
            let ordering = NestedDissection::compute_paired(kkt, self.leaf_size, pairs);
            self.ldl = Some(RegularizedLdl::symbolic(
                kkt,
                ordering,
                sparse_ldl::parallelism(self.threads),
            )?);
            self.pairs = pairs.to_vec();
            self.symbolic_count += 1;
        }
        let Some(ldl) = self.ldl.as_mut() else {
            return Err(FactorError::NotFactored.into());
        };
        let pivot_tol = sparse::max_norm(kkt) * f64::EPSILON;
        self.system = None;
        ldl.numeric(kkt, reg_cand, pivot_tol)?;
        self.system = Some(RegularizedSystem::new(kkt.clone()));
        Ok(())
    }

    fn solve(&self, rhs: &mut [f64]) -> MehrotraResult<RegSolveInfo> {
        let (Some(ldl), Some(system)) = (&self.ldl, &self.system) else {
            return Err(FactorError::NotFactored.into());
        };
        let ctrl = &self.ctrl;
        let b = rhs.to_vec();
        let refined = match reg_solve::regularized_solve_after(
            system,
            ldl,
            rhs,
            ctrl.rel_tol_refine,
            ctrl.max_refine_its,
            ctrl.min_reduction_factor,
            ctrl.progress,
        ) {
            Ok(info) => info,
            Err(FactorError::Singular) => return Ok(singular_surrogate(rhs)),
            Err(e) => return Err(e.into()),
        };
        if refined.rel_tol <= ctrl.rel_tol {
            return Ok(RegSolveInfo {
                met_requested_tol: true,
                ..refined
            });
        }

        let mut krylov = b;
        let info = match reg_solve::solve_after(system, ldl, &mut krylov, ctrl) {
            Ok(info) => info,
            Err(FactorError::Singular) => RegSolveInfo {
                num_its: 0,
                rel_tol: f64::INFINITY,
                met_requested_tol: false,
            },
            Err(e) => return Err(e.into()),
        };
        if info.rel_tol < refined.rel_tol {
            rhs.copy_from_slice(&krylov);
            Ok(info)
        } else {
            Ok(RegSolveInfo {
                met_requested_tol: false,
                ..refined
            })
        }
    }
}

/// The surrogate produced non-finite values: fall back to the zero
/// solution, whose relative residual is exactly one.
fn singular_surrogate(rhs: &mut [f64]) -> RegSolveInfo {
    rhs.fill(0.0);
    RegSolveInfo {
        num_its: 0,
        rel_tol: 1.0,
        met_requested_tol: false,
    }
}

/// Count and report an inner solve that missed its tolerance.
pub(crate) fn track_solve(info: &RegSolveInfo, what: &str, comm: &CommRef, under_converged: &mut usize) {
    if !info.met_requested_tol {
        *under_converged += 1;
        if comm.is_root() {
            log::warn!(
                "{} solve reached relative residual {:.3e} after {} iterations",
                what,
                info.rel_tol,
                info.num_its
            );
        }
    }
}

/// Constraint matrix storage accepted by the driver.
pub trait LpRepresentation {
    fn comm(&self) -> &CommRef;
    fn height(&self) -> usize;
    fn width(&self) -> usize;

    /// y := alpha * op(A) x + beta * y (collective).
    fn multiply(&self, orientation: Orientation, alpha: f64, x: &DistVector, beta: f64, y: &mut DistVector);

    /// Replicated copy of the whole matrix (collective).
    fn gather_entries(&self) -> SparseCsc;

    /// Backend that factors this representation's KKT systems.
    fn kkt_solver(&self, ctrl: &MehrotraCtrl) -> Box<dyn KktSolver>;
}

impl LpRepresentation for DistMatrix {
    fn comm(&self) -> &CommRef {
        DistMatrix::comm(self)
    }

    fn height(&self) -> usize {
        DistMatrix::height(self)
    }

    fn width(&self) -> usize {
        DistMatrix::width(self)
    }

    fn multiply(&self, orientation: Orientation, alpha: f64, x: &DistVector, beta: f64, y: &mut DistVector) {
        DistMatrix::multiply(self, orientation, alpha, x, beta, y)
    }

    fn gather_entries(&self) -> SparseCsc {
        DistMatrix::gather_entries(self)
    }

    fn kkt_solver(&self, _ctrl: &MehrotraCtrl) -> Box<dyn KktSolver> {
        Box::new(DenseKktSolver::new())
    }
}

impl LpRepresentation for DistSparseMatrix {
    fn comm(&self) -> &CommRef {
        DistSparseMatrix::comm(self)
    }

    fn height(&self) -> usize {
        DistSparseMatrix::height(self)
    }

    fn width(&self) -> usize {
        DistSparseMatrix::width(self)
    }

    fn multiply(&self, orientation: Orientation, alpha: f64, x: &DistVector, beta: f64, y: &mut DistVector) {
        DistSparseMatrix::multiply(self, orientation, alpha, x, beta, y)
    }

    fn gather_entries(&self) -> SparseCsc {
        DistSparseMatrix::gather_entries(self)
    }

    fn kkt_solver(&self, ctrl: &MehrotraCtrl) -> Box<dyn KktSolver> {
        Box::new(SparseKktSolver::new(
            ctrl.solve_ctrl.clone(),
            ctrl.ordering_leaf_size,
            ctrl.factor_threads,
        ))
    }
}
