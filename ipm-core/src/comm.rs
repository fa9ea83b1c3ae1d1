//! Collective communication for SPMD execution.
//!
//! Every distributed routine in this crate is written against the
//! [`Communicator`] trait. All ranks of a group must issue the same sequence
//! of collectives; each collective is a blocking rendezvous.
//!
//! Two groups are provided:
//!
//! - [`SelfComm`]: a group of size one, every collective is the identity.
//! - [`ThreadComm`]: ranks are threads of the current process sharing a slot
//!   table. Useful for running distributed solves in tests and on a single
//!   machine.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};

/// Reduction applied elementwise by [`Communicator::all_reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

impl ReduceOp {
    fn identity(self) -> f64 {
        match self {
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Sum => 0.0,
        }
    }

    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// A process group.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// Rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Elementwise reduction across all ranks; every rank receives the result.
    fn all_reduce(&self, values: &mut [f64], op: ReduceOp);

    /// Gather one buffer per rank, returned in rank order on every rank.
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>>;

    /// Gather one index buffer per rank, returned in rank order on every rank.
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>>;

    /// Block until every rank has arrived.
    fn barrier(&self);

    /// Reduce a single scalar.
    fn all_reduce_scalar(&self, value: f64, op: ReduceOp) -> f64 {
        let mut buf = [value];
        self.all_reduce(&mut buf, op);
        buf[0]
    }

    /// Sum a count across ranks.
    fn all_reduce_count(&self, count: usize) -> usize {
        self.all_gather_usize(&[count]).iter().map(|c| c[0]).sum()
    }

    /// True on the rank that owns console output.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Shared handle to a process group.
pub type CommRef = Arc<dyn Communicator>;

/// Group containing only the calling process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl SelfComm {
    pub fn shared() -> CommRef {
        Arc::new(SelfComm)
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(&self, _values: &mut [f64], _op: ReduceOp) {}

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }

    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        vec![local.to_vec()]
    }

    fn barrier(&self) {}
}

struct Shared {
    size: usize,
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
    barrier: Barrier,
}

/// Thread-backed process group.
///
/// Each rank is a separate `ThreadComm` value; all of them share the same
/// rendezvous state. Create a group with [`ThreadComm::group`] or run a
/// closure on every rank with [`ThreadComm::run`].
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A rank that panicked mid-collective poisons the table; the remaining
    // ranks still see consistent slots.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ThreadComm {
    /// One handle per rank of a new group of `size` ranks.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "process group must have at least one rank");
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        let shared = Arc::new(Shared {
            size,
            slots: Mutex::new(slots),
            barrier: Barrier::new(size),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` on `size` scoped threads, one per rank, and return the
    /// per-rank results in rank order.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(CommRef) -> R + Sync,
    {
        let comms = Self::group(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(Arc::new(comm) as CommRef))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    fn exchange<T: Clone + Send + 'static>(&self, value: T) -> Vec<T> {
        {
            let mut slots = lock(&self.shared.slots);
            slots[self.rank] = Some(Box::new(value));
        }
        self.shared.barrier.wait();
        let all: Vec<T> = {
            let slots = lock(&self.shared.slots);
            slots
                .iter()
                .enumerate()
                .map(|(rank, slot)| {
                    slot.as_ref()
                        .and_then(|b| b.downcast_ref::<T>())
                        .cloned()
                        .unwrap_or_else(|| {
                            panic!("mismatched collective: rank {} posted a different payload", rank)
                        })
                })
                .collect()
        };
        // Nobody may overwrite a slot before every rank has read the table.
        self.shared.barrier.wait();
        all
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_reduce(&self, values: &mut [f64], op: ReduceOp) {
        let contributions = self.exchange(values.to_vec());
        for (i, v) in values.iter_mut().enumerate() {
            let mut acc = op.identity();
            for c in &contributions {
                assert_eq!(c.len(), contributions[0].len(), "all_reduce length mismatch");
                acc = op.combine(acc, c[i]);
            }
            *v = acc;
        }
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.exchange(local.to_vec())
    }

    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        self.exchange(local.to_vec())
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
