//! Residuals of a computed Newton direction.

use crate::ipm::kkt::{Direction, KktResiduals};
use crate::linalg::sparse::{self, SparseCsc};

fn nrm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Relative errors `||lhs + r|| / (1 + ||r||)` of the three Newton equations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionResiduals {
    /// A dx + rb
    pub primal: f64,
    /// A^T dy - dz + rc
    pub dual: f64,
    /// z .* dx + x .* dz + rmu
    pub complementarity: f64,
}

impl DirectionResiduals {
    pub fn compute(a: &SparseCsc, x: &[f64], z: &[f64], r: &KktResiduals<'_>, d: &Direction) -> Self {
        let mut primal = r.rb.to_vec();
        sparse::spmv(a, &d.dx, &mut primal, 1.0, 1.0);

        let mut dual = r.rc.to_vec();
        sparse::spmv_transpose(a, &d.dy, &mut dual, 1.0, 1.0);
        for (di, dzi) in dual.iter_mut().zip(&d.dz) {
            *di -= dzi;
        }

        let compl: Vec<f64> = (0..x.len())
            .map(|j| z[j] * d.dx[j] + x[j] * d.dz[j] + r.rmu[j])
            .collect();

        Self {
            primal: nrm2(&primal) / (1.0 + nrm2(r.rb)),
            dual: nrm2(&dual) / (1.0 + nrm2(r.rc)),
            complementarity: nrm2(&compl) / (1.0 + nrm2(r.rmu)),
        }
    }

    pub fn max(&self) -> f64 {
        self.primal.max(self.dual).max(self.complementarity)
    }
}
