//! Linear algebra layer.
//!
//! Sparse and distributed storage, fill-reducing orderings and symmetric
//! factorization backends.

pub mod backend;
pub mod dense_ldl;
pub mod dist;
pub mod ordering;
pub mod sparse;
pub mod sparse_ldl;

pub use backend::{FactorError, SymmetricFactor};
pub use dense_ldl::DenseLdl;
pub use dist::{DistMatrix, DistSparseMatrix, DistVector, Orientation};
pub use ordering::NestedDissection;
pub use sparse::{SparseCsc, SparseSymmetricCsc};
pub use sparse_ldl::RegularizedLdl;
