//! Regularized sparse LDL^T factorization.
//!
//! Wraps faer's supernodal LDL^T. The matrix is permuted up front by a
//! nested-dissection ordering and handed to faer with the identity ordering,
//! so the symbolic analysis can be reused for every matrix with the same
//! pattern.
//!
//! Regularization happens in two layers:
//!
//! 1. The signed candidates `reg_cand` are added to the diagonal before the
//!    numeric factorization. With the usual KKT signs this makes the surrogate
//!    quasi-definite.
//! 2. Any pivot whose signed value still falls at or below the pivot
//!    tolerance is replaced by the signed largest candidate magnitude.
//!
//! The factorization is therefore of a nearby matrix; callers recover the
//! solution of the true system with iterative refinement.

use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::linalg::cholesky::ldlt::factor::{LdltParams, LdltRegularization};
use faer::sparse::linalg::amd::Control as AmdControl;
use faer::sparse::linalg::cholesky::{
    factorize_symbolic_cholesky, CholeskySymbolicParams, LdltRef, SymbolicCholesky,
    SymmetricOrdering,
};
use faer::sparse::linalg::SupernodalThreshold;
use faer::sparse::{SparseColMatRef, SymbolicSparseColMatRef};
use faer::{Conj, MatMut, Par, Side, Spec};

use crate::linalg::backend::{FactorError, SymmetricFactor};
use crate::linalg::ordering::NestedDissection;
use crate::linalg::sparse::SparseSymmetricCsc;

/// Map a thread count to a faer parallelism setting (`0` means all cores).
pub fn parallelism(threads: usize) -> Par {
    match threads {
        1 => Par::Seq,
        0 => Par::rayon(0),
        t => Par::rayon(t),
    }
}

/// Upper-triangle pattern after the symmetric permutation, with every
/// diagonal slot present.
struct PermutedPattern {
    colptr: Vec<usize>,
    rowval: Vec<usize>,
    /// Index into the original values for each slot, `None` for an inserted
    /// diagonal.
    source: Vec<Option<usize>>,
    /// Slot of the diagonal entry of each permuted column.
    diag: Vec<usize>,
}

impl PermutedPattern {
    /// Permute `P A P^T` where `map[old] = new`.
    fn new(colptr: &[usize], rowval: &[usize], map: &[usize]) -> Self {
        let n = colptr.len() - 1;
        let mut columns: Vec<Vec<(usize, Option<usize>)>> = vec![Vec::new(); n];
        for col in 0..n {
            for k in colptr[col]..colptr[col + 1] {
                let (r, c) = (map[rowval[k]], map[col]);
                // Keep upper triangle
                let (nr, nc) = if r <= c { (r, c) } else { (c, r) };
                columns[nc].push((nr, Some(k)));
            }
        }

        let mut new_colptr = Vec::with_capacity(n + 1);
        let mut new_rowval = Vec::new();
        let mut source = Vec::new();
        let mut diag = vec![0; n];
        new_colptr.push(0);
        for (c, entries) in columns.iter_mut().enumerate() {
            if !entries.iter().any(|&(r, _)| r == c) {
                entries.push((c, None));
            }
            entries.sort_unstable_by_key(|&(r, _)| r);
            for &(r, src) in entries.iter() {
                if r == c {
                    diag[c] = new_rowval.len();
                }
                new_rowval.push(r);
                source.push(src);
            }
            new_colptr.push(new_rowval.len());
        }

        Self {
            colptr: new_colptr,
            rowval: new_rowval,
            source,
            diag,
        }
    }
}

/// Regularized supernodal LDL^T of a symmetric matrix.
pub struct RegularizedLdl {
    n: usize,
    ordering: NestedDissection,

    // Original pattern, for reuse checks
    colptr: Vec<usize>,
    rowval: Vec<usize>,

    pattern: PermutedPattern,
    perm_nzval: Vec<f64>,
    perm_signs: Vec<i8>,

    symbolic: SymbolicCholesky<usize>,
    ld_vals: Vec<f64>,
    work: MemBuffer,

    parallelism: Par,
    ldlt_params: Spec<LdltParams, f64>,

    /// Regularization added to the diagonal, in original order.
    reg: Vec<f64>,
    factored: bool,
}

impl RegularizedLdl {
    /// Symbolic analysis of an upper-triangular CSC pattern under `ordering`.
    pub fn symbolic(
        upper: &SparseSymmetricCsc,
        ordering: NestedDissection,
        parallelism: Par,
    ) -> Result<Self, FactorError> {
        let n = upper.cols();
        if upper.rows() != n || !upper.is_csc() {
            return Err(FactorError::Symbolic(format!(
                "expected square CSC matrix, got {}x{}",
                upper.rows(),
                upper.cols()
            )));
        }
        if ordering.len() != n {
            return Err(FactorError::DimensionMismatch {
                expected: n,
                actual: ordering.len(),
            });
        }

        let colptr = upper.indptr().raw_storage().to_vec();
        let rowval = upper.indices().to_vec();
        let pattern = PermutedPattern::new(&colptr, &rowval, &ordering.map);

        let symb_mat = SymbolicSparseColMatRef::new_checked(n, n, &pattern.colptr, None, &pattern.rowval);
        let cholesky_params = CholeskySymbolicParams {
            supernodal_flop_ratio_threshold: SupernodalThreshold::AUTO,
            amd_params: AmdControl::default(),
            ..Default::default()
        };
        let symbolic = factorize_symbolic_cholesky(
            symb_mat,
            Side::Upper,
            SymmetricOrdering::Identity, // already permuted
            cholesky_params,
        )
        .map_err(|e| FactorError::Symbolic(format!("{:?}", e)))?;

        let ldlt_params: Spec<LdltParams, f64> = Spec::default();
        let req_factor = symbolic.factorize_numeric_ldlt_scratch::<f64>(parallelism, ldlt_params);
        let req_solve = symbolic.solve_in_place_scratch::<f64>(1, parallelism);
        let work = MemBuffer::new(StackReq::any_of(&[req_factor, req_solve]));

        Ok(Self {
            n,
            ordering,
            colptr,
            rowval,
            perm_nzval: vec![0.0; pattern.rowval.len()],
            perm_signs: vec![0; n],
            pattern,
            ld_vals: vec![0.0; symbolic.len_val()],
            symbolic,
            work,
            parallelism,
            ldlt_params,
            reg: vec![0.0; n],
            factored: false,
        })
    }

    /// True if `upper` has exactly the pattern analysed by [`Self::symbolic`].
    pub fn pattern_matches(&self, upper: &SparseSymmetricCsc) -> bool {
        upper.is_csc()
            && upper.rows() == self.n
            && upper.cols() == self.n
            && upper.indptr().raw_storage() == self.colptr.as_slice()
            && upper.indices() == self.rowval.as_slice()
    }

    /// Regularization added to the diagonal by the last numeric factorization.
    pub fn reg(&self) -> &[f64] {
        &self.reg
    }

    /// Numeric factorization of `upper + diag(reg_cand)` with dynamic pivot
    /// regularization at `pivot_tol`.
    pub fn numeric(
        &mut self,
        upper: &SparseSymmetricCsc,
        reg_cand: &[f64],
        pivot_tol: f64,
    ) -> Result<(), FactorError> {
        if !self.pattern_matches(upper) {
            return Err(FactorError::Numeric("pattern differs from symbolic analysis".to_string()));
        }
        if reg_cand.len() != self.n {
            return Err(FactorError::DimensionMismatch {
                expected: self.n,
                actual: reg_cand.len(),
            });
        }
        self.factored = false;

        let nzval = upper.data();
        for (slot, src) in self.pattern.source.iter().enumerate() {
            self.perm_nzval[slot] = src.map_or(0.0, |k| nzval[k]);
        }
        for (old, &cand) in reg_cand.iter().enumerate() {
            let new = self.ordering.map[old];
            self.perm_nzval[self.pattern.diag[new]] += cand;
            self.perm_signs[new] = if cand > 0.0 {
                1
            } else if cand < 0.0 {
                -1
            } else {
                0
            };
        }
        self.reg.copy_from_slice(reg_cand);

        if self.perm_nzval.iter().any(|v| !v.is_finite()) {
            return Err(FactorError::Numeric("matrix has non-finite entries".to_string()));
        }

        let max_cand = reg_cand.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let delta = if max_cand > 0.0 { max_cand } else { f64::EPSILON.sqrt() };
        let regularizer = LdltRegularization {
            dynamic_regularization_signs: Some(&self.perm_signs),
            dynamic_regularization_delta: delta,
            dynamic_regularization_epsilon: pivot_tol,
        };

        let symb_mat = SymbolicSparseColMatRef::new_checked(
            self.n,
            self.n,
            &self.pattern.colptr,
            None,
            &self.pattern.rowval,
        );
        let mat = SparseColMatRef::new(symb_mat, &self.perm_nzval);

        self.symbolic
            .factorize_numeric_ldlt(
                &mut self.ld_vals,
                mat,
                Side::Upper,
                regularizer,
                self.parallelism,
                MemStack::new(&mut self.work),
                self.ldlt_params,
            )
            .map_err(|e| FactorError::Numeric(format!("{:?}", e)))?;

        self.factored = true;
        Ok(())
    }
}

impl SymmetricFactor for RegularizedLdl {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), FactorError> {
        if !self.factored {
            return Err(FactorError::NotFactored);
        }
        if rhs.len() != self.n {
            return Err(FactorError::DimensionMismatch {
                expected: self.n,
                actual: rhs.len(),
            });
        }
        if self.n == 0 {
            return Ok(());
        }

        // Permute RHS: bperm[new] = rhs[old]
        let mut bperm: Vec<f64> = self.ordering.inverse_map.iter().map(|&old| rhs[old]).collect();

        let ldlt = LdltRef::new(&self.symbolic, &self.ld_vals);
        let req_solve = self.symbolic.solve_in_place_scratch::<f64>(1, self.parallelism);
        let mut work = MemBuffer::new(req_solve);
        ldlt.solve_in_place_with_conj(
            Conj::No,
            MatMut::from_column_major_slice_mut(&mut bperm, self.n, 1),
            self.parallelism,
            MemStack::new(&mut work),
        );

        for (new, &old) in self.ordering.inverse_map.iter().enumerate() {
            rhs[old] = bperm[new];
        }
        if rhs.iter().any(|v| !v.is_finite()) {
            return Err(FactorError::Singular);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::{self, symm_matvec_upper};

    fn residual_norm(a: &SparseSymmetricCsc, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        symm_matvec_upper(a, x, &mut ax);
        ax.iter().zip(b).map(|(l, r)| (l - r).powi(2)).sum::<f64>().sqrt()
    }

    #[test]
    fn test_positive_definite_solve() {
        // K = [2, 1; 1, 2]
        let kkt = sparse::from_triplets_symmetric(2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 2.0)]);
        let mut ldl = RegularizedLdl::symbolic(&kkt, NestedDissection::identity(2), Par::Seq).unwrap();
        ldl.numeric(&kkt, &[0.0, 0.0], 1e-14).unwrap();

        let mut sol = vec![3.0, 4.0];
        ldl.solve_in_place(&mut sol).unwrap();
        let expected = [2.0 / 3.0, 5.0 / 3.0];
        for i in 0..2 {
            assert!((sol[i] - expected[i]).abs() < 1e-10, "sol[{}] = {}", i, sol[i]);
        }
    }

    #[test]
    fn test_quasi_definite_with_missing_diagonal() {
        // [1 0 1; 0 1 1; 1 1 0]: (2, 2) is structurally absent.
        let kkt = sparse::from_triplets_symmetric(
            3,
            vec![(0, 0, 1.0), (1, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0)],
        );
        let nd = NestedDissection::compute(&kkt, 1);
        let mut ldl = RegularizedLdl::symbolic(&kkt, nd, Par::Seq).unwrap();
        ldl.numeric(&kkt, &[1e-10, 1e-10, -1e-10], 1e-14).unwrap();
        assert_eq!(ldl.reg(), &[1e-10, 1e-10, -1e-10]);

        let b = vec![1.0, 2.0, 1.0];
        let mut x = b.clone();
        ldl.solve_in_place(&mut x).unwrap();
        // Surrogate differs by 1e-10; the true residual is of that order.
        assert!(residual_norm(&kkt, &x, &b) < 1e-8);
    }

    #[test]
    fn test_pattern_reuse_and_mismatch() {
        let a = sparse::from_triplets_symmetric(2, vec![(0, 0, 4.0), (1, 1, 5.0)]);
        let b = sparse::from_triplets_symmetric(2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 5.0)]);
        let mut ldl = RegularizedLdl::symbolic(&a, NestedDissection::identity(2), Par::Seq).unwrap();
        assert!(ldl.pattern_matches(&a));
        assert!(!ldl.pattern_matches(&b));
        assert!(ldl.numeric(&b, &[0.0, 0.0], 0.0).is_err());

        let mut rhs = vec![1.0, 1.0];
        assert!(matches!(ldl.solve_in_place(&mut rhs), Err(FactorError::NotFactored)));
    }
}
