//! Driver configuration.

use crate::reg_solve::RegSolveCtrl;

/// Which linear system is factored to compute each Newton direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KktSystem {
    /// All of (dx, dy, dz); dimension `2n + m`.
    Full,
    /// dz eliminated; dimension `n + m`.
    #[default]
    Augmented,
    /// dx and dz eliminated; dimension `m`, positive definite.
    Normal,
}

/// Settings for the Mehrotra predictor-corrector driver.
#[derive(Debug, Clone)]
pub struct MehrotraCtrl {
    /// Use the supplied (x, y, z) as the starting point instead of computing one.
    /// The supplied x and z must be strictly positive.
    pub initialized: bool,

    /// Convergence tolerance on the relative objective gap and both
    /// relative residual norms.
    pub tol: f64,

    /// Iteration cap.
    pub max_its: usize,

    /// Fraction of the distance to the cone boundary taken by the final step.
    pub max_step_ratio: f64,

    /// KKT formulation.
    pub system: KktSystem,

    /// Per-iteration progress logging (rank 0 only).
    pub print: bool,

    /// Recompute the residuals of every Newton direction and log them.
    pub check_residuals: bool,

    /// Inner solves on the sparse path.
    pub solve_ctrl: RegSolveCtrl,

    /// Threads used by the sparse factorization (`0` means all cores).
    pub factor_threads: usize,

    /// Leaf size of the nested-dissection ordering.
    pub ordering_leaf_size: usize,
}

impl Default for MehrotraCtrl {
    fn default() -> Self {
        Self {
            initialized: false,
            tol: 1e-8,
            max_its: 1000,
            max_step_ratio: 0.99,
            system: KktSystem::Augmented,
            print: false,
            check_residuals: cfg!(debug_assertions),
            solve_ctrl: RegSolveCtrl::default(),
            factor_threads: 1,
            ordering_leaf_size: crate::linalg::ordering::DEFAULT_LEAF_SIZE,
        }
    }
}

impl MehrotraCtrl {
    pub fn with_system(mut self, system: KktSystem) -> Self {
        self.system = system;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_its(mut self, max_its: usize) -> Self {
        self.max_its = max_its;
        self
    }

    pub fn with_initialized(mut self, initialized: bool) -> Self {
        self.initialized = initialized;
        self
    }

    /// Enable progress logging.
    pub fn verbose(mut self) -> Self {
        self.print = true;
        self
    }
}
