//! Distance functions shared by the optimizer and the index structures.
//!
//! Every distance carries two declarations the optimizer relies on:
//!
//! - [`DistanceFunction::is_metric`] — whether the triangle inequality holds,
//!   which gates the metric tree candidates;
//! - [`DistanceFunction::family`] — a subtype tag used for exact identity
//!   checks, most importantly to recognize squared Euclidean distance (which
//!   ranks identically to Euclidean because `sqrt` is monotonic) and Lp-norm
//!   family membership for the k-d tree.
//!
//! Distance functions are stateless and shared across queries as
//! [`DistanceRef`] trait objects.
//!
//! ## Important nuance
//!
//! If the input dimensions mismatch, all provided implementations return
//! `f32::INFINITY` so the pair is never selected as a nearest neighbor.

use std::sync::Arc;

use crate::dataset::DataTypeDescriptor;

/// Subtype tag for distance functions.
///
/// Used by the applicability predicates for exact identity checks; two
/// distances with the same family are ranking-compatible only when the tag
/// says so (`LpNorm` carries its exponent for that reason).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceFamily {
    /// Lp-norm family, parameterized by the exponent `p >= 1`.
    LpNorm(f32),
    /// Squared Euclidean: not a metric, but ranking-equivalent to `LpNorm(2)`.
    SquaredEuclidean,
    /// Anything else: no structural guarantees beyond `is_metric()`.
    Other,
}

/// Input types a distance function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRestriction {
    /// Fixed-dimensionality numeric vector fields only.
    NumericVectorField,
    /// Any record representation the dataset can hand out.
    Any,
}

impl InputRestriction {
    /// Does this restriction admit records of the given type?
    pub fn admits(&self, descriptor: DataTypeDescriptor) -> bool {
        match self {
            InputRestriction::NumericVectorField => {
                matches!(descriptor, DataTypeDescriptor::NumericVectorField { .. })
            }
            InputRestriction::Any => true,
        }
    }
}

/// A distance (or dissimilarity) function over pairs of records.
pub trait DistanceFunction: Send + Sync {
    /// Compute the distance between two records.
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32;

    /// Does the triangle inequality hold?
    fn is_metric(&self) -> bool;

    /// Subtype tag for identity checks.
    fn family(&self) -> DistanceFamily {
        DistanceFamily::Other
    }

    /// Input types this distance is defined over.
    fn input_restriction(&self) -> InputRestriction {
        InputRestriction::NumericVectorField
    }

    /// Stable identifier, used for cache matching and diagnostics.
    fn name(&self) -> &'static str;
}

/// Shared handle to a distance function.
pub type DistanceRef = Arc<dyn DistanceFunction>;

/// Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceFunction for Euclidean {
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        squared_l2(a, b).sqrt()
    }

    fn is_metric(&self) -> bool {
        true
    }

    fn family(&self) -> DistanceFamily {
        DistanceFamily::LpNorm(2.0)
    }

    fn name(&self) -> &'static str {
        "euclidean"
    }
}

/// Squared Euclidean distance.
///
/// Cheaper than [`Euclidean`] and ranking-equivalent to it, but the triangle
/// inequality does not hold. The optimizer substitutes the canonical
/// Euclidean instance where a metric is required but only the ranking
/// matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclidean;

impl DistanceFunction for SquaredEuclidean {
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        squared_l2(a, b)
    }

    fn is_metric(&self) -> bool {
        false
    }

    fn family(&self) -> DistanceFamily {
        DistanceFamily::SquaredEuclidean
    }

    fn name(&self) -> &'static str {
        "squared-euclidean"
    }
}

/// Manhattan (L1) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manhattan;

impl DistanceFunction for Manhattan {
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
    }

    fn is_metric(&self) -> bool {
        true
    }

    fn family(&self) -> DistanceFamily {
        DistanceFamily::LpNorm(1.0)
    }

    fn name(&self) -> &'static str {
        "manhattan"
    }
}

/// General Lp-norm distance with exponent `p >= 1`.
#[derive(Debug, Clone, Copy)]
pub struct LpNorm {
    p: f32,
}

impl LpNorm {
    /// Create an Lp-norm distance. `p` must be at least 1 for the triangle
    /// inequality to hold.
    pub fn new(p: f32) -> Self {
        debug_assert!(p >= 1.0, "Lp norms require p >= 1");
        Self { p }
    }

    /// The norm exponent.
    pub fn p(&self) -> f32 {
        self.p
    }
}

impl DistanceFunction for LpNorm {
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        let sum: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs().powf(self.p))
            .sum();
        sum.powf(1.0 / self.p)
    }

    fn is_metric(&self) -> bool {
        self.p >= 1.0
    }

    fn family(&self) -> DistanceFamily {
        DistanceFamily::LpNorm(self.p)
    }

    fn name(&self) -> &'static str {
        "lp-norm"
    }
}

/// Cosine distance $1 - \cos(a,b)$.
///
/// Computes norms when needed, so inputs do not have to be pre-normalized.
/// Not a metric: the triangle inequality does not hold for `1 - cos`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cosine;

impl DistanceFunction for Cosine {
    fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_distance(a, b)
    }

    fn is_metric(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "cosine"
    }
}

/// Squared L2 distance between two slices.
#[inline]
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// L2 (Euclidean) distance between two slices.
#[inline]
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_l2(a, b).sqrt()
}

/// Cosine distance $1 - \cos(a,b)$.
#[inline]
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
