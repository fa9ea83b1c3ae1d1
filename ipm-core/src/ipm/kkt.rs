//! KKT formulations of the Newton system.
//!
//! Every formulation computes the same direction (dx, dy, dz) solving
//!
//! ```text
//! A dx          = -rb
//! A^T dy - dz   = -rc
//! Z dx + X dz   = -rmu
//! ```
//!
//! and differs only in which variables are eliminated before factoring:
//!
//! ```text
//! Full:       [ 0   A^T  -I      ] [dx]   [ -rc    ]
//!             [ A   0     0      ] [dy] = [ -rb    ]
//!             [ -I  0    -X Z^-1 ] [dz]   [ rmu./z ]
//!
//! Augmented:  [ X^-1 Z  A^T ] [dx] = [ -rc - rmu./x ]
//!             [ A       0   ] [dy]   [ -rb          ]
//!
//! Normal:     A (X Z^-1) A^T dy = rb - A (x./z .* rc + rmu./z)
//! ```
//!
//! All operations work on replicated vectors; matrices are returned as
//! upper triangles in CSC format.

use sprs::TriMat;

use crate::ipm::settings::KktSystem;
use crate::linalg::sparse::{self, SparseCsc, SparseSymmetricCsc};

/// Right-hand side residuals of one Newton system.
#[derive(Debug, Clone, Copy)]
pub struct KktResiduals<'a> {
    pub rb: &'a [f64],
    pub rc: &'a [f64],
    pub rmu: &'a [f64],
}

/// A Newton direction on replicated vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Direction {
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    pub dz: Vec<f64>,
}

impl Direction {
    /// self += other
    pub fn add(&mut self, other: &Direction) {
        for (a, b) in [
            (&mut self.dx, &other.dx),
            (&mut self.dy, &other.dy),
            (&mut self.dz, &other.dz),
        ] {
            for (ai, bi) in a.iter_mut().zip(b) {
                *ai += bi;
            }
        }
    }
}

/// Strategy for one KKT formulation.
pub trait KktFormulation {
    fn system(&self) -> KktSystem;

    /// Order of the factored matrix.
    fn dim(&self, m: usize, n: usize) -> usize;

    /// Upper triangle of the KKT matrix at (x, z).
    fn build(&self, a: &SparseCsc, x: &[f64], z: &[f64]) -> SparseSymmetricCsc;

    fn build_rhs(&self, a: &SparseCsc, x: &[f64], z: &[f64], r: &KktResiduals<'_>) -> Vec<f64>;

    /// Recover (dx, dy, dz) from the solution of the factored system.
    fn expand(
        &self,
        a: &SparseCsc,
        x: &[f64],
        z: &[f64],
        r: &KktResiduals<'_>,
        sol: &[f64],
    ) -> Direction;

    /// Signed regularization magnitudes for each row of the factored matrix.
    fn regularization_candidates(&self, m: usize, n: usize) -> Vec<f64>;

    /// Rows `(first, second)` a sparse ordering must keep adjacent, with
    /// `first` eliminated before `second`.
    fn elimination_pairs(&self, _m: usize, _n: usize) -> Vec<(usize, usize)> {
        Vec::new()
    }
}

fn primal_reg() -> f64 {
    f64::EPSILON.powf(0.75)
}

fn lagrange_reg() -> f64 {
    f64::EPSILON.powf(0.5)
}

fn dual_reg() -> f64 {
    f64::EPSILON.powf(0.5)
}

/// Push A^T into the (col_offset + j, row_offset + i) positions of the upper triangle.
fn push_transpose(tri: &mut TriMat<f64>, a: &SparseCsc, row_offset: usize, col_offset: usize) {
    for (&v, (i, j)) in a.iter() {
        tri.add_triplet(row_offset + j, col_offset + i, v);
    }
}

/// dz = -(rmu + z .* dx) ./ x
fn eliminate_dz(x: &[f64], z: &[f64], rmu: &[f64], dx: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(z)
        .zip(rmu)
        .zip(dx)
        .map(|(((&xi, &zi), &ri), &dxi)| -(ri + zi * dxi) / xi)
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FullKkt;

impl KktFormulation for FullKkt {
    fn system(&self) -> KktSystem {
        KktSystem::Full
    }

    fn dim(&self, m: usize, n: usize) -> usize {
        2 * n + m
    }

    fn build(&self, a: &SparseCsc, x: &[f64], z: &[f64]) -> SparseSymmetricCsc {
        let (m, n) = (a.rows(), a.cols());
        let dim = self.dim(m, n);
        let mut tri = TriMat::with_capacity((dim, dim), a.nnz() + 2 * n);
        push_transpose(&mut tri, a, 0, n);
        for j in 0..n {
            tri.add_triplet(j, n + m + j, -1.0);
            tri.add_triplet(n + m + j, n + m + j, -x[j] / z[j]);
        }
        tri.to_csc()
    }

    fn build_rhs(&self, _a: &SparseCsc, _x: &[f64], z: &[f64], r: &KktResiduals<'_>) -> Vec<f64> {
        let mut rhs = Vec::with_capacity(r.rc.len() * 2 + r.rb.len());
        rhs.extend(r.rc.iter().map(|v| -v));
        rhs.extend(r.rb.iter().map(|v| -v));
        rhs.extend(r.rmu.iter().zip(z).map(|(rm, zi)| rm / zi));
        rhs
    }

    fn expand(
        &self,
        a: &SparseCsc,
        _x: &[f64],
        _z: &[f64],
        _r: &KktResiduals<'_>,
        sol: &[f64],
    ) -> Direction {
        let (m, n) = (a.rows(), a.cols());
        Direction {
            dx: sol[..n].to_vec(),
            dy: sol[n..n + m].to_vec(),
            dz: sol[n + m..].to_vec(),
        }
    }

    fn regularization_candidates(&self, m: usize, n: usize) -> Vec<f64> {
        let mut reg = vec![primal_reg(); n];
        reg.extend(std::iter::repeat(-lagrange_reg()).take(m));
        reg.extend(std::iter::repeat(-dual_reg()).take(n));
        reg
    }

    /// The primal block is structurally zero, so each primal row only gets
    /// a usable pivot once its dual row `-x_j / z_j` has been eliminated.
    fn elimination_pairs(&self, m: usize, n: usize) -> Vec<(usize, usize)> {
        (0..n).map(|j| (n + m + j, j)).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentedKkt;

impl AugmentedKkt {
    /// `[D A^T; A 0]` for an arbitrary positive diagonal `D`.
    pub fn build_with_diagonal(a: &SparseCsc, d: &[f64]) -> SparseSymmetricCsc {
        let (m, n) = (a.rows(), a.cols());
        let mut tri = TriMat::with_capacity((n + m, n + m), a.nnz() + n);
        for (j, &dj) in d.iter().enumerate() {
            tri.add_triplet(j, j, dj);
        }
        push_transpose(&mut tri, a, 0, n);
        tri.to_csc()
    }
}

impl KktFormulation for AugmentedKkt {
    fn system(&self) -> KktSystem {
        KktSystem::Augmented
    }

    fn dim(&self, m: usize, n: usize) -> usize {
        n + m
    }

    fn build(&self, a: &SparseCsc, x: &[f64], z: &[f64]) -> SparseSymmetricCsc {
        let d: Vec<f64> = x.iter().zip(z).map(|(xi, zi)| zi / xi).collect();
        Self::build_with_diagonal(a, &d)
    }

    fn build_rhs(&self, _a: &SparseCsc, x: &[f64], _z: &[f64], r: &KktResiduals<'_>) -> Vec<f64> {
        let mut rhs = Vec::with_capacity(r.rc.len() + r.rb.len());
        rhs.extend(
            r.rc.iter()
                .zip(r.rmu)
                .zip(x)
                .map(|((rc, rm), xi)| -rc - rm / xi),
        );
        rhs.extend(r.rb.iter().map(|v| -v));
        rhs
    }

    fn expand(
        &self,
        a: &SparseCsc,
        x: &[f64],
        z: &[f64],
        r: &KktResiduals<'_>,
        sol: &[f64],
    ) -> Direction {
        let n = a.cols();
        let dx = sol[..n].to_vec();
        let dy = sol[n..].to_vec();
        let dz = eliminate_dz(x, z, r.rmu, &dx);
        Direction { dx, dy, dz }
    }

    fn regularization_candidates(&self, m: usize, n: usize) -> Vec<f64> {
        let mut reg = vec![primal_reg(); n];
        reg.extend(std::iter::repeat(-lagrange_reg()).take(m));
        reg
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalKkt;

impl KktFormulation for NormalKkt {
    fn system(&self) -> KktSystem {
        KktSystem::Normal
    }

    fn dim(&self, m: usize, _n: usize) -> usize {
        m
    }

    fn build(&self, a: &SparseCsc, x: &[f64], z: &[f64]) -> SparseSymmetricCsc {
        let m = a.rows();
        let mut tri = TriMat::new((m, m));
        // Sum of outer products d_j a_j a_j^T over the columns of A.
        for j in 0..a.cols() {
            let Some(col) = a.outer_view(j) else { continue };
            let dj = x[j] / z[j];
            let entries: Vec<(usize, f64)> = col.iter().map(|(i, &v)| (i, v)).collect();
            for &(i, vi) in &entries {
                for &(k, vk) in &entries {
                    if i <= k {
                        tri.add_triplet(i, k, dj * vi * vk);
                    }
                }
            }
        }
        tri.to_csc()
    }

    fn build_rhs(&self, a: &SparseCsc, x: &[f64], z: &[f64], r: &KktResiduals<'_>) -> Vec<f64> {
        let t: Vec<f64> = x
            .iter()
            .zip(z)
            .zip(r.rc)
            .zip(r.rmu)
            .map(|(((xi, zi), rc), rm)| xi / zi * rc + rm / zi)
            .collect();
        let mut rhs = r.rb.to_vec();
        sparse::spmv(a, &t, &mut rhs, -1.0, 1.0);
        rhs
    }

    fn expand(
        &self,
        a: &SparseCsc,
        x: &[f64],
        z: &[f64],
        r: &KktResiduals<'_>,
        sol: &[f64],
    ) -> Direction {
        let dy = sol.to_vec();
        let mut aty = vec![0.0; a.cols()];
        sparse::spmv_transpose(a, &dy, &mut aty, 1.0, 0.0);
        let dx: Vec<f64> = (0..a.cols())
            .map(|j| -(x[j] / z[j] * (aty[j] + r.rc[j]) + r.rmu[j] / z[j]))
            .collect();
        let dz = eliminate_dz(x, z, r.rmu, &dx);
        Direction { dx, dy, dz }
    }

    fn regularization_candidates(&self, m: usize, _n: usize) -> Vec<f64> {
        vec![primal_reg(); m]
    }
}

/// Strategy object for `system`.
pub fn formulation(system: KktSystem) -> Box<dyn KktFormulation> {
    match system {
        KktSystem::Full => Box::new(FullKkt),
        KktSystem::Augmented => Box::new(AugmentedKkt),
        KktSystem::Normal => Box::new(NormalKkt),
    }
}

/// Expand an upper triangle into a dense symmetric matrix.
pub fn to_dense_symmetric(upper: &SparseSymmetricCsc) -> nalgebra::DMatrix<f64> {
    let n = upper.rows();
    let mut d = nalgebra::DMatrix::zeros(n, n);
    for (&v, (i, j)) in upper.iter() {
        d[(i, j)] += v;
        if i != j {
            d[(j, i)] += v;
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipm::diagnostics::DirectionResiduals;
    use crate::linalg::DenseLdl;

    fn problem() -> (SparseCsc, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        // A = [1 1 0 2; 0 1 -1 1]
        let a = sparse::from_triplets(
            2,
            4,
            vec![(0, 0, 1.0), (0, 1, 1.0), (0, 3, 2.0), (1, 1, 1.0), (1, 2, -1.0), (1, 3, 1.0)],
        );
        let x = vec![1.0, 0.5, 2.0, 0.25];
        let z = vec![0.3, 1.2, 0.7, 2.0];
        let rb = vec![0.1, -0.2];
        let rc = vec![0.5, -0.1, 0.2, 0.05];
        let rmu: Vec<f64> = x.iter().zip(&z).map(|(a, b)| a * b).collect();
        (a, x, z, rb, rc, rmu)
    }

    fn direct_solve(f: &dyn KktFormulation, a: &SparseCsc, x: &[f64], z: &[f64], r: &KktResiduals<'_>) -> Direction {
        let j = f.build(a, x, z);
        let ldl = DenseLdl::factor(&to_dense_symmetric(&j)).unwrap();
        let mut rhs = f.build_rhs(a, x, z, r);
        ldl.solve_after(&mut rhs).unwrap();
        f.expand(a, x, z, r, &rhs)
    }

    #[test]
    fn test_formulations_agree_and_satisfy_newton_system() {
        let (a, x, z, rb, rc, rmu) = problem();
        let r = KktResiduals {
            rb: &rb,
            rc: &rc,
            rmu: &rmu,
        };
        let full = direct_solve(&FullKkt, &a, &x, &z, &r);
        let aug = direct_solve(&AugmentedKkt, &a, &x, &z, &r);
        let normal = direct_solve(&NormalKkt, &a, &x, &z, &r);

        for d in [&full, &aug, &normal] {
            let res = DirectionResiduals::compute(&a, &x, &z, &r, d);
            assert!(res.max() < 1e-12, "residuals {:?}", res);
        }
        for (u, v) in full.dx.iter().zip(&aug.dx).chain(full.dx.iter().zip(&normal.dx)) {
            assert!((u - v).abs() < 1e-10);
        }
        for (u, v) in full.dz.iter().zip(&normal.dz) {
            assert!((u - v).abs() < 1e-10);
        }
        for (u, v) in aug.dy.iter().zip(&normal.dy) {
            assert!((u - v).abs() < 1e-10);
        }
    }

    #[test]
    fn test_dimensions_and_regularization_signs() {
        let (a, x, z, ..) = problem();
        let (m, n) = (2, 4);
        for f in [formulation(KktSystem::Full), formulation(KktSystem::Augmented), formulation(KktSystem::Normal)] {
            let j = f.build(&a, &x, &z);
            assert_eq!(j.rows(), f.dim(m, n));
            for (_, (row, col)) in j.iter() {
                assert!(row <= col, "{:?} stored a lower entry", f.system());
            }
            let reg = f.regularization_candidates(m, n);
            assert_eq!(reg.len(), f.dim(m, n));
        }
        let full = FullKkt.regularization_candidates(m, n);
        assert!(full[..n].iter().all(|&v| v > 0.0));
        assert!(full[n..].iter().all(|&v| v < 0.0));
        let aug = AugmentedKkt.regularization_candidates(m, n);
        assert!(aug[..n].iter().all(|&v| v > 0.0));
        assert!(aug[n..].iter().all(|&v| v < 0.0));

        // Every Full primal row is paired with the dual row coupled to it.
        let j = FullKkt.build(&a, &x, &z);
        let pairs = FullKkt.elimination_pairs(m, n);
        assert_eq!(pairs.len(), n);
        for &(dual, primal) in &pairs {
            assert!(dual >= n + m && primal < n);
            assert_eq!(j.get(primal, dual), Some(&-1.0));
        }
        assert!(AugmentedKkt.elimination_pairs(m, n).is_empty());
        assert!(NormalKkt.elimination_pairs(m, n).is_empty());
    }
}
