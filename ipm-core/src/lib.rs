//! Interior point solver for linear programs.
//!
//! Solves the standard-form LP
//!
//! ```text
//! minimize    c^T x
//! subject to  A x = b,  x >= 0
//! ```
//!
//! with Mehrotra's predictor-corrector method. `A` may be dense or sparse and
//! sequential or distributed over a process group by blocks of rows.
//!
//! # Components
//!
//! - [`ipm`]: the driver, its settings and the three KKT formulations
//!   (full, augmented, normal equations).
//! - [`reg_solve`]: solves with a regularized sparse LDL^T factorization,
//!   recovering the unregularized solution by iterative refinement and,
//!   when needed, flexible GMRES/LGMRES.
//! - [`linalg`]: sparse and distributed storage, nested-dissection ordering,
//!   dense Bunch-Kaufman and supernodal sparse LDL^T backends.
//! - [`comm`]: the collective operations used by the distributed paths.
//!
//! # Example
//!
//! ```ignore
//! use ipm_core::{mehrotra_dense, MehrotraCtrl};
//! use nalgebra::DMatrix;
//!
//! // min x1 + 2 x2 s.t. x1 + x2 = 1, x >= 0
//! let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
//! let (mut x, mut y, mut z) = (Vec::new(), Vec::new(), Vec::new());
//! let info = mehrotra_dense(&a, &[1.0], &[1.0, 2.0], &mut x, &mut y, &mut z, &MehrotraCtrl::default())?;
//! assert!((info.primal_obj - 1.0).abs() < 1e-6);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // LP drivers take (A, b, c, x, y, z, ctrl)

pub mod comm;
pub mod error;
pub mod ipm;
pub mod linalg;
pub mod reg_solve;

pub use comm::{CommRef, Communicator, ReduceOp, SelfComm, ThreadComm};
pub use error::{ErrorKind, MehrotraError, MehrotraResult};
pub use ipm::{
    mehrotra_dense, mehrotra_dist_dense, mehrotra_dist_sparse, mehrotra_sparse, KktSystem,
    MehrotraCtrl, MehrotraInfo,
};
pub use linalg::{DistMatrix, DistSparseMatrix, DistVector};
pub use reg_solve::{RegSolveAlg, RegSolveCtrl, RegSolveInfo};
