//! Capability contracts for index structures, and the structures themselves.
//!
//! The optimizer never cares which concrete structure it picked; it hands
//! back trait objects for the capability the query shape needs:
//!
//! - [`KnnIndex`] — k-nearest-neighbor search, by object or by identifier;
//! - [`RangeIndex`] — radius search;
//! - [`PriorityIndex`] — incremental best-first retrieval in increasing
//!   distance order, without committing to a k or radius upfront;
//! - [`DistanceMatrixIndex`] — additionally, constant-time pairwise distance
//!   lookup (only the precomputed matrix offers this).
//!
//! Every index goes through the same mandatory lifecycle: construct (cheap,
//! validates arguments), [`ProximityIndex::initialize`] (the actual build),
//! [`ProximityIndex::log_statistics`]. The optimizer's builder runs all
//! three and converts any failure into "no index produced".
//!
//! Each concrete structure lives behind its own cargo feature so deployments
//! can compile out what they do not link; the capability registry reports
//! missing features as absent factories.

use tracing::debug;

use crate::dataset::RecordId;
use crate::error::BuildResult;

#[cfg(feature = "cover-tree")]
pub mod covertree;
#[cfg(feature = "kd-tree")]
pub mod kdtree;
#[cfg(feature = "distance-matrix")]
pub mod matrix;
#[cfg(feature = "knn-preprocessor")]
pub mod preprocessor;
#[cfg(feature = "vp-tree")]
pub mod vptree;

#[cfg(feature = "cover-tree")]
pub use covertree::CoverTree;
#[cfg(feature = "kd-tree")]
pub use kdtree::KdTree;
#[cfg(feature = "distance-matrix")]
pub use matrix::DistanceMatrix;
#[cfg(feature = "knn-preprocessor")]
pub use preprocessor::MaterializedKnn;
#[cfg(feature = "vp-tree")]
pub use vptree::VpTree;

/// The index structures the optimizer knows how to select among.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Precomputed all-pairs distance table, O(n²) memory.
    DistanceMatrix,
    /// Materialized per-record k-nearest-neighbor lists.
    KnnPreprocessor,
    /// Metric tree with routing objects and covering radii.
    CoverTree,
    /// Vantage-point tree.
    VpTree,
    /// k-d tree over numeric vector fields.
    KdTree,
}

impl IndexKind {
    /// Human-readable label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::DistanceMatrix => "distance matrix",
            IndexKind::KnnPreprocessor => "knn preprocessor",
            IndexKind::CoverTree => "cover tree",
            IndexKind::VpTree => "VP tree",
            IndexKind::KdTree => "k-d tree",
        }
    }
}

/// Statistics about a built index.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub num_records: usize,
    pub size_bytes: usize,
}

/// Base contract every index structure satisfies.
pub trait ProximityIndex: Send + Sync {
    /// Which structure this is.
    fn kind(&self) -> IndexKind;

    /// Build the index. Must be called exactly once before any search.
    fn initialize(&mut self) -> BuildResult<()>;

    /// Statistics about the built index.
    fn stats(&self) -> IndexStats;

    /// Report statistics to the diagnostic log.
    fn log_statistics(&self) {
        let s = self.stats();
        debug!(
            kind = s.kind.label(),
            records = s.num_records,
            bytes = s.size_bytes,
            "index statistics"
        );
    }
}

/// k-nearest-neighbor search.
///
/// Results are `(record id, distance)` pairs in increasing distance order;
/// a record is its own nearest neighbor at distance zero.
pub trait KnnIndex: ProximityIndex {
    fn knn_by_object(&self, query: &[f32], k: usize) -> Vec<(RecordId, f32)>;

    fn knn_by_id(&self, id: RecordId, k: usize) -> Vec<(RecordId, f32)>;
}

/// Radius search: all records within `radius` of the query, in increasing
/// distance order.
pub trait RangeIndex: ProximityIndex {
    fn range_by_object(&self, query: &[f32], radius: f32) -> Vec<(RecordId, f32)>;

    fn range_by_id(&self, id: RecordId, radius: f32) -> Vec<(RecordId, f32)>;
}

/// Incremental best-first retrieval in increasing distance order.
pub trait PriorityIndex: ProximityIndex {
    fn priority_by_object<'a>(
        &'a self,
        query: &'a [f32],
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a>;

    fn priority_by_id<'a>(&'a self, id: RecordId)
        -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a>;
}

/// The full capability bundle the tree indexes and the distance matrix
/// provide.
pub trait DistancePriorityIndex: KnnIndex + RangeIndex + PriorityIndex {}

/// A [`DistancePriorityIndex`] that can additionally answer pairwise
/// distance lookups between identifiers in constant time.
pub trait DistanceMatrixIndex: DistancePriorityIndex {
    fn pairwise(&self, a: RecordId, b: RecordId) -> f32;
}

/// Keep the `k` smallest entries, sorted by increasing distance.
#[allow(dead_code)] // unused when all index features are disabled
pub(crate) fn keep_k_smallest(
    mut neighbors: Vec<(RecordId, f32)>,
    k: usize,
) -> Vec<(RecordId, f32)> {
    if k < neighbors.len() {
        neighbors.select_nth_unstable_by(k, |a, b| a.1.total_cmp(&b.1));
        neighbors.truncate(k);
    }
    neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));
    neighbors
}

/// Keep entries within `radius`, sorted by increasing distance.
#[allow(dead_code)]
pub(crate) fn keep_in_range(
    mut neighbors: Vec<(RecordId, f32)>,
    radius: f32,
) -> Vec<(RecordId, f32)> {
    neighbors.retain(|&(_, d)| d <= radius);
    neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));
    neighbors
}
