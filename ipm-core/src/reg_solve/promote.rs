//! Scalar types for the refinement layer.

use std::fmt::Debug;

use num_traits::{Float, FromPrimitive, ToPrimitive};

/// Real floating-point scalar.
pub trait Real: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {
    /// Lossy conversion from an `f64` constant.
    fn from_f64_lossy(v: f64) -> Self {
        Self::from_f64(v).unwrap_or_else(Self::nan)
    }

    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T> Real for T where T: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {}

/// A scalar with an optional higher-precision companion.
///
/// When `HAS_PROMOTION` is false, `Promoted` is the type itself and the
/// conversions are the identity.
pub trait Promote: Real {
    type Promoted: Real;
    const HAS_PROMOTION: bool;

    fn promote(self) -> Self::Promoted;
    fn demote(value: Self::Promoted) -> Self;
}

impl Promote for f32 {
    type Promoted = f64;
    const HAS_PROMOTION: bool = true;

    fn promote(self) -> f64 {
        f64::from(self)
    }

    fn demote(value: f64) -> f32 {
        value as f32
    }
}

impl Promote for f64 {
    type Promoted = f64;
    const HAS_PROMOTION: bool = false;

    fn promote(self) -> f64 {
        self
    }

    fn demote(value: f64) -> f64 {
        value
    }
}

pub(crate) fn nrm2<T: Real>(x: &[T]) -> T {
    x.iter().fold(T::zero(), |acc, &v| acc + v * v).sqrt()
}

pub(crate) fn dot<T: Real>(x: &[T], y: &[T]) -> T {
    x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b)
}

/// y += alpha * x
pub(crate) fn axpy<T: Real>(alpha: T, x: &[T], y: &mut [T]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = *yi + alpha * xi;
    }
}
