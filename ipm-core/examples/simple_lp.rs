//! Simple LP example.
//!
//! Solves:
//!   minimize    x1 + x2 + 3 x3
//!   subject to  x1 + x2 + x3 = 2
//!               x1 - x2      = 0
//!               x >= 0
//!
//! Optimal solution: x = (1, 1, 0), objective = 2.0

use ipm_core::linalg::sparse;
use ipm_core::{mehrotra_dense, mehrotra_dist_sparse, DistSparseMatrix, DistVector, KktSystem, MehrotraCtrl, ThreadComm};
use nalgebra::DMatrix;

fn main() {
    println!("Mehrotra predictor-corrector - simple LP");
    println!("========================================");

    let a = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 1.0, -1.0, 0.0]);
    let b = [2.0, 0.0];
    let c = [1.0, 1.0, 3.0];

    for system in [KktSystem::Full, KktSystem::Augmented, KktSystem::Normal] {
        let ctrl = MehrotraCtrl::default().with_system(system);
        let (mut x, mut y, mut z) = (Vec::new(), Vec::new(), Vec::new());
        match mehrotra_dense(&a, &b, &c, &mut x, &mut y, &mut z, &ctrl) {
            Ok(info) => {
                println!("{:?}: {} iterations, objective {:.8}", system, info.num_its, info.primal_obj);
                println!("  x = {:?}", x);
            }
            Err(e) => println!("{:?}: {}", system, e),
        }
    }

    // Same problem over two in-process ranks with the sparse-direct backend.
    let csc = sparse::from_triplets(2, 3, vec![(0, 0, 1.0), (0, 1, 1.0), (0, 2, 1.0), (1, 0, 1.0), (1, 1, -1.0)]);
    let results = ThreadComm::run(2, |comm| {
        let a = DistSparseMatrix::from_global(&comm, &csc);
        let b = DistVector::from_global(&comm, &b);
        let c = DistVector::from_global(&comm, &c);
        let mut x = DistVector::zeros(&comm, 3);
        let mut y = DistVector::zeros(&comm, 2);
        let mut z = DistVector::zeros(&comm, 3);
        let info = mehrotra_dist_sparse(&a, &b, &c, &mut x, &mut y, &mut z, &MehrotraCtrl::default());
        (info.map(|i| i.primal_obj), x.gather())
    });
    match &results[0] {
        (Ok(obj), x) => println!("distributed sparse: objective {:.8}, x = {:?}", obj, x),
        (Err(e), _) => println!("distributed sparse: {}", e),
    }
}
