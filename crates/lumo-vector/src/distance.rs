//! Distance metrics for the flat index.
//!
//! Two metrics are supported:
//! - **Squared Euclidean (L2²)**: lower is better; sqrt is skipped because
//!   only the relative ordering matters for nearest-neighbor search.
//! - **Inner Product**: higher is better, for normalized embeddings where
//!   the dot product equals cosine similarity.
//!
//! The kernels process chunks of 4 so the compiler can auto-vectorize them
//! in release builds.

use serde::{Deserialize, Serialize};

/// Distance metric enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared L2 distance: sum((a[i] - b[i])^2). Best-first = ascending.
    SquaredEuclidean,
    /// Inner product: sum(a[i] * b[i]). Best-first = descending.
    InnerProduct,
}

impl DistanceMetric {
    /// Compute the raw score between two vectors.
    #[inline]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::SquaredEuclidean => squared_euclidean(a, b),
            Self::InnerProduct => inner_product(a, b),
        }
    }

    /// Whether `a` is a better (more similar) score than `b` under this metric.
    #[inline]
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        match self {
            Self::SquaredEuclidean => a < b,
            Self::InnerProduct => a > b,
        }
    }

    /// The worst possible score under this metric, used to pad unfilled
    /// result slots.
    #[inline]
    pub fn worst(&self) -> f32 {
        match self {
            Self::SquaredEuclidean => f32::INFINITY,
            Self::InnerProduct => f32::NEG_INFINITY,
        }
    }
}

/// Compute squared Euclidean distance between two vectors.
///
/// # Example
///
/// ```
/// use lumo_vector::squared_euclidean;
///
/// let a = [0.0, 0.0];
/// let b = [3.0, 4.0];
/// assert!((squared_euclidean(&a, &b) - 25.0).abs() < 0.001);
/// ```
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}

/// Compute the inner product (dot product) of two vectors.
///
/// # Example
///
/// ```
/// use lumo_vector::inner_product;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 5.0, 6.0];
/// assert!((inner_product(&a, &b) - 32.0).abs() < 0.001);
/// ```
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }

    for i in (chunks * 4)..a.len() {
        sum += a[i] * b[i];
    }

    sum
}
