//! Interior-point LP solver.
//!
//! Mehrotra's predictor-corrector method on the standard-form LP, with the
//! Newton systems factored in one of three KKT formulations.

pub mod backend;
pub mod diagnostics;
pub mod initialize;
pub mod kkt;
pub mod mehrotra;
pub mod settings;
pub mod step;

pub use backend::{DenseKktSolver, KktSolver, LpRepresentation, SparseKktSolver};
pub use diagnostics::DirectionResiduals;
pub use kkt::{formulation, Direction, KktFormulation, KktResiduals};
pub use mehrotra::{
    mehrotra_dense, mehrotra_dist_dense, mehrotra_dist_sparse, mehrotra_sparse, MehrotraInfo,
};
pub use settings::{KktSystem, MehrotraCtrl};
