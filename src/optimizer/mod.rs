//! Automatic index selection.
//!
//! The [`QueryOptimizer`] is consulted when a query is planned over a dataset
//! that has no explicit index: given the dataset, the distance function, the
//! query shape and a set of [`QueryFlags`], it walks a fixed candidate order,
//! skips candidates that are inapplicable (wrong data type, non-metric
//! distance, too many records, over the memory budget, structure not
//! compiled in), builds the first applicable one, and hands back a trait
//! object for exactly the capability the query needs.
//!
//! Selection is best-effort by contract: every failure inside is logged and
//! converted into trying the next candidate, and exhausting all candidates
//! returns `None` — meaning "run the query without an index". No error ever
//! escapes an entry point.
//!
//! Built indexes are registered on the dataset as weak auxiliaries (unless
//! [`QueryFlags::NO_CACHE`] is set), so later queries with the same distance
//! reuse them for as long as some caller keeps the returned handle alive.
//! A per-dataset build lock is held across each entry point, so concurrent
//! callers never build the same index twice: the first builds and registers,
//! the rest find it in the cache.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::dataset::{AuxHandle, CachedIndex, DataTypeDescriptor, Dataset, IdSpace, RecordId};
use crate::distance::{DistanceFamily, DistanceRef, Euclidean};
use crate::index::{
    DistanceMatrixIndex, DistancePriorityIndex, IndexKind, KnnIndex, PriorityIndex, RangeIndex,
};

pub mod heuristics;
pub mod memory;
pub mod registry;

pub use heuristics::QueryShape;
pub use memory::MemoryBudget;
pub use registry::CapabilityRegistry;

use heuristics::{low_selectivity_leaf_size, tree_leaf_size};
use memory::{knn_preprocessor_cost, matrix_cost};
use registry::TreeFactory;

bitflags! {
    /// Hints passed along with a query that steer index selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        /// The caller will issue many queries; precomputation-heavy
        /// candidates (distance matrix, kNN preprocessor) are worth it.
        const PRECOMPUTE = 0b001;
        /// Do not register the built index on the dataset for reuse.
        const NO_CACHE = 0b010;
        /// Queries will touch large fractions of the dataset; trees are
        /// built with larger leaves.
        const LOW_SELECTIVITY = 0b100;
    }
}

/// Handle to a precomputed all-pairs distance table.
pub struct PairwiseDistances {
    matrix: Arc<dyn DistanceMatrixIndex>,
}

impl PairwiseDistances {
    fn new(matrix: Arc<dyn DistanceMatrixIndex>) -> Self {
        Self { matrix }
    }

    /// Constant-time distance between two records.
    pub fn distance(&self, a: RecordId, b: RecordId) -> f32 {
        self.matrix.pairwise(a, b)
    }

    /// The underlying index, which also answers kNN, range and priority
    /// queries by identifier from the table.
    pub fn index(&self) -> &Arc<dyn DistanceMatrixIndex> {
        &self.matrix
    }
}

/// The automatic index selection engine.
pub struct QueryOptimizer {
    registry: CapabilityRegistry,
    budget: MemoryBudget,
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self {
            registry: CapabilityRegistry::probe(),
            budget: MemoryBudget::System,
        }
    }
}

impl QueryOptimizer {
    /// An optimizer over the compiled-in index structures and the system
    /// memory budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the candidate registry.
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the memory budget.
    pub fn with_budget(mut self, budget: MemoryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Select an index for pairwise distance lookups between identifiers.
    ///
    /// Only the distance matrix can serve this, and only when the caller
    /// declared [`QueryFlags::PRECOMPUTE`].
    pub fn distance_query(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
    ) -> Option<PairwiseDistances> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        if !flags.contains(QueryFlags::PRECOMPUTE) {
            return None;
        }
        let _guard = dataset.build_guard();
        self.make_matrix_index(dataset, distance, flags)
            .map(PairwiseDistances::new)
    }

    /// Select an index for k-nearest-neighbor queries by object.
    pub fn knn_by_object(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_k: usize,
        flags: QueryFlags,
    ) -> Option<Arc<dyn KnnIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        let _guard = dataset.build_guard();
        self.knn_candidates(dataset, distance, max_k, flags, false)
    }

    /// Select an index for k-nearest-neighbor queries by identifier.
    pub fn knn_by_id(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_k: usize,
        flags: QueryFlags,
    ) -> Option<Arc<dyn KnnIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        let _guard = dataset.build_guard();
        self.knn_candidates(dataset, distance, max_k, flags, true)
    }

    /// Select an index for radius queries by object.
    pub fn range_by_object(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_range: f32,
        flags: QueryFlags,
    ) -> Option<Arc<dyn RangeIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        debug!(max_range, "selecting an index for range queries");
        let _guard = dataset.build_guard();
        self.range_candidates(dataset, distance, flags, false)
    }

    /// Select an index for radius queries by identifier.
    pub fn range_by_id(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_range: f32,
        flags: QueryFlags,
    ) -> Option<Arc<dyn RangeIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        debug!(max_range, "selecting an index for range queries");
        let _guard = dataset.build_guard();
        self.range_candidates(dataset, distance, flags, true)
    }

    /// Select an index for incremental priority search by object.
    ///
    /// Unlike range selection there is no radius parameter: the returned
    /// handle is an unbounded best-first iterator, and callers bound the
    /// search by how far they consume it.
    pub fn priority_by_object(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
    ) -> Option<Arc<dyn PriorityIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        let _guard = dataset.build_guard();
        self.priority_candidates(dataset, distance, flags, false)
    }

    /// Select an index for incremental priority search by identifier.
    ///
    /// See [`Self::priority_by_object`] on the absence of a radius
    /// parameter.
    pub fn priority_by_id(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
    ) -> Option<Arc<dyn PriorityIndex>> {
        if !self.admissible(dataset, distance) {
            return None;
        }
        let _guard = dataset.build_guard();
        self.priority_candidates(dataset, distance, flags, true)
    }

    /// The distance must accept the dataset's record type at all.
    fn admissible(&self, dataset: &Dataset, distance: &DistanceRef) -> bool {
        if !distance
            .input_restriction()
            .admits(dataset.descriptor())
        {
            debug!(
                distance = distance.name(),
                "no index: distance does not accept this data type"
            );
            return false;
        }
        true
    }

    fn knn_candidates(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_k: usize,
        flags: QueryFlags,
        by_id: bool,
    ) -> Option<Arc<dyn KnnIndex>> {
        if flags.contains(QueryFlags::PRECOMPUTE) {
            // The flag is consumed here so nested selection cannot recurse
            // into further precomputation.
            let inner = flags.difference(QueryFlags::PRECOMPUTE);
            if let Some(p) = self.make_knn_preprocessor(dataset, distance, max_k, inner) {
                return Some(p);
            }
        }
        let shape = QueryShape::Knn;
        if let Some(t) = self.make_kd_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_vp_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_cover_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if by_id && flags.contains(QueryFlags::PRECOMPUTE) {
            if let Some(m) = self.make_matrix_index(dataset, distance, flags) {
                return Some(m);
            }
        }
        None
    }

    fn range_candidates(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
        by_id: bool,
    ) -> Option<Arc<dyn RangeIndex>> {
        let shape = QueryShape::Range;
        if let Some(t) = self.make_kd_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_vp_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_cover_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if by_id && flags.contains(QueryFlags::PRECOMPUTE) {
            if let Some(m) = self.make_matrix_index(dataset, distance, flags) {
                return Some(m);
            }
        }
        None
    }

    fn priority_candidates(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
        by_id: bool,
    ) -> Option<Arc<dyn PriorityIndex>> {
        let shape = QueryShape::Priority;
        if let Some(t) = self.make_vp_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_cover_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if let Some(t) = self.make_kd_tree(dataset, distance, shape, flags) {
            return Some(t);
        }
        if by_id && flags.contains(QueryFlags::PRECOMPUTE) {
            if let Some(m) = self.make_matrix_index(dataset, distance, flags) {
                return Some(m);
            }
        }
        None
    }

    fn leaf_size(&self, kind: IndexKind, shape: QueryShape, n: usize, flags: QueryFlags) -> usize {
        if flags.contains(QueryFlags::LOW_SELECTIVITY) {
            low_selectivity_leaf_size(n)
        } else {
            tree_leaf_size(kind, shape)
        }
    }

    fn make_matrix_index(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        flags: QueryFlags,
    ) -> Option<Arc<dyn DistanceMatrixIndex>> {
        if let Some(CachedIndex::Matrix(m)) =
            dataset.find_auxiliary(IndexKind::DistanceMatrix, distance.name())
        {
            debug!("reusing cached distance matrix");
            return Some(m);
        }
        let factory = self.registry.matrix.as_ref()?;
        let n = dataset.size();
        // The cardinality cap comes first; the memory estimate for larger n
        // would overflow any sensible budget check anyway.
        if n > 65536 {
            debug!(n, "distance matrix skipped: dataset too large");
            return None;
        }
        if !self.budget.admit("distance matrix", matrix_cost(n)) {
            return None;
        }
        if dataset.id_space() != IdSpace::Static {
            warn!("distance matrix skipped: identifier space is not static");
            return None;
        }
        let mut index = match factory(dataset.clone(), distance.clone()) {
            Ok(i) => i,
            Err(e) => {
                warn!("automatic distance matrix creation failed: {e}");
                return None;
            }
        };
        if let Err(e) = index.initialize() {
            warn!("automatic distance matrix creation failed: {e}");
            return None;
        }
        index.log_statistics();
        let index: Arc<dyn DistanceMatrixIndex> = Arc::from(index);
        if !flags.contains(QueryFlags::NO_CACHE) {
            dataset.register_auxiliary(
                IndexKind::DistanceMatrix,
                distance.name(),
                AuxHandle::Matrix(Arc::downgrade(&index)),
            );
        }
        debug!("optimizer: automatically adding a distance matrix");
        Some(index)
    }

    fn make_knn_preprocessor(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        max_k: usize,
        flags: QueryFlags,
    ) -> Option<Arc<dyn KnnIndex>> {
        // Depth matters for correctness here: a table materialized for a
        // smaller k cannot serve this request and is not a cache hit.
        if let Some(p) = dataset.find_knn_auxiliary(distance.name(), max_k) {
            debug!("reusing cached knn preprocessor");
            return Some(p);
        }
        let factory = self.registry.knn_preprocessor.as_ref()?;
        if !self
            .budget
            .admit("knn preprocessor", knn_preprocessor_cost(max_k, dataset.size()))
        {
            return None;
        }
        let mut index = match factory(dataset.clone(), distance.clone(), max_k) {
            Ok(i) => i,
            Err(e) => {
                warn!("automatic knn preprocessor creation failed: {e}");
                return None;
            }
        };
        if let Err(e) = index.initialize() {
            warn!("automatic knn preprocessor creation failed: {e}");
            return None;
        }
        index.log_statistics();
        let index: Arc<dyn KnnIndex> = Arc::from(index);
        if !flags.contains(QueryFlags::NO_CACHE) {
            dataset.register_auxiliary(
                IndexKind::KnnPreprocessor,
                distance.name(),
                AuxHandle::Knn {
                    index: Arc::downgrade(&index),
                    max_k,
                },
            );
        }
        debug!("optimizer: automatically adding a knn preprocessor");
        Some(index)
    }

    fn make_cover_tree(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        shape: QueryShape,
        flags: QueryFlags,
    ) -> Option<Arc<dyn DistancePriorityIndex>> {
        if !distance.is_metric() {
            debug!(
                distance = distance.name(),
                "cover tree skipped: distance is not metric"
            );
            return None;
        }
        self.make_tree(
            IndexKind::CoverTree,
            self.registry.cover_tree.as_ref(),
            dataset,
            distance,
            shape,
            flags,
        )
    }

    fn make_vp_tree(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        shape: QueryShape,
        flags: QueryFlags,
    ) -> Option<Arc<dyn DistancePriorityIndex>> {
        // Squared Euclidean ranks identically to Euclidean (sqrt is
        // monotone), so the tree is built and cached under the metric
        // substitute.
        let rewritten: DistanceRef;
        let distance = if matches!(distance.family(), DistanceFamily::SquaredEuclidean) {
            debug!("VP tree: substituting Euclidean for squared Euclidean");
            rewritten = Arc::new(Euclidean);
            &rewritten
        } else {
            distance
        };
        if !distance.is_metric() {
            debug!(
                distance = distance.name(),
                "VP tree skipped: distance is not metric"
            );
            return None;
        }
        self.make_tree(
            IndexKind::VpTree,
            self.registry.vp_tree.as_ref(),
            dataset,
            distance,
            shape,
            flags,
        )
    }

    fn make_kd_tree(
        &self,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        shape: QueryShape,
        flags: QueryFlags,
    ) -> Option<Arc<dyn DistancePriorityIndex>> {
        let DataTypeDescriptor::NumericVectorField { dim } = dataset.descriptor() else {
            debug!("k-d tree skipped: not a numeric vector field");
            return None;
        };
        if dim > 30 {
            debug!(dim, "k-d tree skipped: dimensionality too high");
            return None;
        }
        if !matches!(
            distance.family(),
            DistanceFamily::LpNorm(_) | DistanceFamily::SquaredEuclidean
        ) {
            debug!(
                distance = distance.name(),
                "k-d tree skipped: unsupported distance family"
            );
            return None;
        }
        self.make_tree(
            IndexKind::KdTree,
            self.registry.kd_tree.as_ref(),
            dataset,
            distance,
            shape,
            flags,
        )
    }

    fn make_tree(
        &self,
        kind: IndexKind,
        factory: Option<&TreeFactory>,
        dataset: &Arc<Dataset>,
        distance: &DistanceRef,
        shape: QueryShape,
        flags: QueryFlags,
    ) -> Option<Arc<dyn DistancePriorityIndex>> {
        if let Some(CachedIndex::Tree(t)) = dataset.find_auxiliary(kind, distance.name()) {
            debug!(kind = kind.label(), "reusing cached index");
            return Some(t);
        }
        let factory = factory?;
        let leaf = self.leaf_size(kind, shape, dataset.size(), flags);
        let mut index = match factory(dataset.clone(), distance.clone(), leaf) {
            Ok(i) => i,
            Err(e) => {
                warn!("automatic {} creation failed: {e}", kind.label());
                return None;
            }
        };
        if let Err(e) = index.initialize() {
            warn!("automatic {} creation failed: {e}", kind.label());
            return None;
        }
        index.log_statistics();
        let index: Arc<dyn DistancePriorityIndex> = Arc::from(index);
        if !flags.contains(QueryFlags::NO_CACHE) {
            dataset.register_auxiliary(
                kind,
                distance.name(),
                AuxHandle::Tree(Arc::downgrade(&index)),
            );
        }
        debug!("optimizer: automatically adding a {}", kind.label());
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_are_distinct() {
        let all = QueryFlags::PRECOMPUTE | QueryFlags::NO_CACHE | QueryFlags::LOW_SELECTIVITY;
        assert_eq!(all.bits(), 0b111);
        assert!(all.difference(QueryFlags::PRECOMPUTE) == QueryFlags::NO_CACHE | QueryFlags::LOW_SELECTIVITY);
    }

    #[test]
    fn leaf_size_honors_low_selectivity() {
        let opt = QueryOptimizer::new().with_registry(CapabilityRegistry::empty());
        assert_eq!(
            opt.leaf_size(IndexKind::KdTree, QueryShape::Knn, 100, QueryFlags::empty()),
            3
        );
        assert_eq!(
            opt.leaf_size(
                IndexKind::KdTree,
                QueryShape::Knn,
                100,
                QueryFlags::LOW_SELECTIVITY
            ),
            21
        );
    }
}
