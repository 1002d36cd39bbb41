//! # proxim
//!
//! Automatic index selection for similarity search.
//!
//! When a nearest-neighbor, radius or incremental-priority query is planned
//! over a dataset with no explicit index, the [`QueryOptimizer`] picks a
//! suitable index structure, builds it, caches it on the dataset for reuse,
//! and hands back a handle for exactly the capability the query needs — or
//! decides that no index is worth building and returns `None`, leaving the
//! caller to scan.
//!
//! Selection weighs the query shape, the distance function's declared
//! properties (metricity, Lp-family membership, accepted input types), the
//! dataset's cardinality, dimensionality and identifier-space stability,
//! the available memory, and caller hints ([`QueryFlags`]).
//!
//! ## Candidates
//!
//! Five index structures compete, each behind its own cargo feature:
//!
//! - a precomputed **distance matrix** (`distance-matrix`) — O(n²) memory,
//!   constant-time pairwise lookups; only for small, static datasets where
//!   the caller asked for precomputation;
//! - a materialized **kNN preprocessor** (`knn-preprocessor`) — per-record
//!   neighbor lists, any distance;
//! - a **cover tree** (`cover-tree`) — the generic metric fallback;
//! - a **VP tree** (`vp-tree`) — metric, usually faster to build;
//! - a **k-d tree** (`kd-tree`) — low-dimensional vector data under Lp
//!   norms.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use proxim::{Dataset, Euclidean, KnnIndex, QueryFlags, QueryOptimizer};
//!
//! let rows: Vec<Vec<f32>> = (0..100)
//!     .map(|i| vec![i as f32, (i % 7) as f32])
//!     .collect();
//! let dataset = Arc::new(Dataset::from_rows(&rows)?);
//! let distance: proxim::DistanceRef = Arc::new(Euclidean);
//!
//! let optimizer = QueryOptimizer::new();
//! if let Some(index) = optimizer.knn_by_object(&dataset, &distance, 10, QueryFlags::empty()) {
//!     let neighbors = index.knn_by_object(&[50.0, 3.0], 5);
//!     assert_eq!(neighbors.len(), 5);
//! }
//! # Ok::<(), proxim::BuildError>(())
//! ```

pub mod dataset;
pub mod distance;
pub mod error;
pub mod index;
pub mod optimizer;

pub use dataset::{DataTypeDescriptor, Dataset, IdSpace, RecordId};
pub use distance::{
    Cosine, DistanceFamily, DistanceFunction, DistanceRef, Euclidean, InputRestriction, LpNorm,
    Manhattan, SquaredEuclidean,
};
pub use error::{BuildError, BuildResult};
pub use index::{
    DistanceMatrixIndex, DistancePriorityIndex, IndexKind, IndexStats, KnnIndex, PriorityIndex,
    ProximityIndex, RangeIndex,
};
pub use optimizer::{
    CapabilityRegistry, MemoryBudget, PairwiseDistances, QueryFlags, QueryOptimizer, QueryShape,
};
