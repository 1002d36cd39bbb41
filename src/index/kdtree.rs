//! k-d tree over fixed-dimensionality numeric vector fields.
//!
//! Classic median-split construction: each internal node splits its records
//! at the median of the widest dimension. Every node keeps the bounding box
//! of its records, so searches prune with the exact minimum distance from
//! the query to the box under the index's distance family.
//!
//! Only Lp-norm distances and squared Euclidean are supported — those are
//! the families for which a per-dimension box lower bound exists. Searches
//! are exact, and the structure degrades with dimensionality; the optimizer
//! only admits it up to 30 dimensions.

use std::collections::BinaryHeap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::dataset::{DataTypeDescriptor, Dataset, RecordId};
use crate::distance::{DistanceFamily, DistanceRef};
use crate::error::{BuildError, BuildResult};
use crate::index::{
    keep_in_range, keep_k_smallest, DistancePriorityIndex, IndexKind, IndexStats, KnnIndex,
    PriorityIndex, ProximityIndex, RangeIndex,
};

struct Bounds {
    min: Vec<f32>,
    max: Vec<f32>,
}

enum KdNode {
    Internal {
        bounds: Bounds,
        left: Box<KdNode>,
        right: Box<KdNode>,
    },
    Leaf {
        bounds: Bounds,
        records: SmallVec<[RecordId; 8]>,
    },
}

impl KdNode {
    fn bounds(&self) -> &Bounds {
        match self {
            KdNode::Internal { bounds, .. } => bounds,
            KdNode::Leaf { bounds, .. } => bounds,
        }
    }
}

/// k-d tree index.
pub struct KdTree {
    dataset: Arc<Dataset>,
    distance: DistanceRef,
    leaf_size: usize,
    family: DistanceFamily,
    root: Option<KdNode>,
    node_count: usize,
}

impl KdTree {
    /// Create an unbuilt k-d tree with the given leaf size. The tree is
    /// built by [`ProximityIndex::initialize`].
    pub fn new(dataset: Arc<Dataset>, distance: DistanceRef, leaf_size: usize) -> BuildResult<Self> {
        if leaf_size == 0 {
            return Err(BuildError::InvalidParameter(
                "leaf size must be at least 1".into(),
            ));
        }
        if !matches!(
            dataset.descriptor(),
            DataTypeDescriptor::NumericVectorField { .. }
        ) {
            return Err(BuildError::InvalidParameter(
                "k-d tree requires a numeric vector field".into(),
            ));
        }
        let family = distance.family();
        if !matches!(
            family,
            DistanceFamily::LpNorm(_) | DistanceFamily::SquaredEuclidean
        ) {
            return Err(BuildError::UnsupportedDistance(
                "k-d tree supports Lp-norm and squared Euclidean distances",
            ));
        }
        Ok(Self {
            dataset,
            distance,
            leaf_size,
            family,
            root: None,
            node_count: 0,
        })
    }

    /// The leaf size the tree was built with.
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    fn compute_bounds(&self, ids: &[RecordId]) -> Bounds {
        let dim = self.dataset.dimensionality();
        let mut min = vec![f32::INFINITY; dim];
        let mut max = vec![f32::NEG_INFINITY; dim];
        for &id in ids {
            for (d, &v) in self.dataset.row(id).iter().enumerate() {
                min[d] = min[d].min(v);
                max[d] = max[d].max(v);
            }
        }
        Bounds { min, max }
    }

    fn build_node(&mut self, ids: &mut [RecordId]) -> KdNode {
        self.node_count += 1;
        let bounds = self.compute_bounds(ids);

        let (split_dim, extent) = bounds
            .max
            .iter()
            .zip(bounds.min.iter())
            .map(|(hi, lo)| hi - lo)
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));

        // Degenerate extents cannot be split further.
        if ids.len() <= self.leaf_size || extent <= 0.0 {
            return KdNode::Leaf {
                bounds,
                records: SmallVec::from_slice(ids),
            };
        }

        let mid = ids.len() / 2;
        ids.select_nth_unstable_by(mid, |&a, &b| {
            self.dataset.row(a)[split_dim].total_cmp(&self.dataset.row(b)[split_dim])
        });
        let (left_ids, right_ids) = ids.split_at_mut(mid);
        let left = Box::new(self.build_node(left_ids));
        let right = Box::new(self.build_node(right_ids));
        KdNode::Internal {
            bounds,
            left,
            right,
        }
    }

    /// Exact lower bound on the distance from `query` to any point inside
    /// `bounds`, in the units of the index's distance family.
    fn min_dist(&self, query: &[f32], bounds: &Bounds) -> f32 {
        let clamped = query.iter().zip(bounds.min.iter().zip(bounds.max.iter()));
        match self.family {
            DistanceFamily::LpNorm(p) => {
                let sum: f32 = clamped
                    .map(|(&q, (&lo, &hi))| {
                        let gap = if q < lo {
                            lo - q
                        } else if q > hi {
                            q - hi
                        } else {
                            0.0
                        };
                        if p == 1.0 {
                            gap
                        } else if p == 2.0 {
                            gap * gap
                        } else {
                            gap.powf(p)
                        }
                    })
                    .sum();
                if p == 1.0 {
                    sum
                } else if p == 2.0 {
                    sum.sqrt()
                } else {
                    sum.powf(1.0 / p)
                }
            }
            DistanceFamily::SquaredEuclidean => clamped
                .map(|(&q, (&lo, &hi))| {
                    let gap = if q < lo {
                        lo - q
                    } else if q > hi {
                        q - hi
                    } else {
                        0.0
                    };
                    gap * gap
                })
                .sum(),
            // Unreachable for admitted distances; 0 disables pruning but
            // stays correct.
            DistanceFamily::Other => 0.0,
        }
    }

    fn search_knn(
        &self,
        node: &KdNode,
        query: &[f32],
        k: usize,
        best: &mut Vec<(RecordId, f32)>,
        tau: &mut f32,
    ) {
        if self.min_dist(query, node.bounds()) > *tau {
            return;
        }
        match node {
            KdNode::Leaf { records, .. } => {
                for &id in records {
                    let d = self.distance.evaluate(query, self.dataset.row(id));
                    if best.len() < k {
                        best.push((id, d));
                        if best.len() == k {
                            *tau = best.iter().map(|&(_, d)| d).fold(f32::NEG_INFINITY, f32::max);
                        }
                    } else if d < *tau {
                        let worst = best
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
                            .map(|(i, _)| i)
                            .unwrap_or(0);
                        best[worst] = (id, d);
                        *tau = best.iter().map(|&(_, d)| d).fold(f32::NEG_INFINITY, f32::max);
                    }
                }
            }
            KdNode::Internal { left, right, .. } => {
                // Descend into the closer child first.
                let dl = self.min_dist(query, left.bounds());
                let dr = self.min_dist(query, right.bounds());
                if dl <= dr {
                    self.search_knn(left, query, k, best, tau);
                    self.search_knn(right, query, k, best, tau);
                } else {
                    self.search_knn(right, query, k, best, tau);
                    self.search_knn(left, query, k, best, tau);
                }
            }
        }
    }

    fn search_range(
        &self,
        node: &KdNode,
        query: &[f32],
        radius: f32,
        out: &mut Vec<(RecordId, f32)>,
    ) {
        if self.min_dist(query, node.bounds()) > radius {
            return;
        }
        match node {
            KdNode::Leaf { records, .. } => {
                for &id in records {
                    let d = self.distance.evaluate(query, self.dataset.row(id));
                    if d <= radius {
                        out.push((id, d));
                    }
                }
            }
            KdNode::Internal { left, right, .. } => {
                self.search_range(left, query, radius, out);
                self.search_range(right, query, radius, out);
            }
        }
    }
}

impl ProximityIndex for KdTree {
    fn kind(&self) -> IndexKind {
        IndexKind::KdTree
    }

    fn initialize(&mut self) -> BuildResult<()> {
        if self.dataset.size() == 0 {
            return Err(BuildError::EmptyDataset);
        }
        let mut ids: Vec<RecordId> = self.dataset.ids().collect();
        self.node_count = 0;
        let root = self.build_node(&mut ids);
        self.root = Some(root);
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        let dim = self.dataset.dimensionality();
        IndexStats {
            kind: self.kind(),
            num_records: self.dataset.size(),
            size_bytes: self.dataset.size() * std::mem::size_of::<RecordId>()
                + self.node_count * 2 * dim * std::mem::size_of::<f32>(),
        }
    }
}

impl KnnIndex for KdTree {
    fn knn_by_object(&self, query: &[f32], k: usize) -> Vec<(RecordId, f32)> {
        let Some(root) = self.root.as_ref() else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let mut best = Vec::with_capacity(k);
        let mut tau = f32::INFINITY;
        self.search_knn(root, query, k, &mut best, &mut tau);
        keep_k_smallest(best, k)
    }

    fn knn_by_id(&self, id: RecordId, k: usize) -> Vec<(RecordId, f32)> {
        self.knn_by_object(self.dataset.row(id), k)
    }
}

impl RangeIndex for KdTree {
    fn range_by_object(&self, query: &[f32], radius: f32) -> Vec<(RecordId, f32)> {
        let Some(root) = self.root.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        self.search_range(root, query, radius, &mut out);
        keep_in_range(out, radius)
    }

    fn range_by_id(&self, id: RecordId, radius: f32) -> Vec<(RecordId, f32)> {
        self.range_by_object(self.dataset.row(id), radius)
    }
}

enum Frontier<'a> {
    Node(&'a KdNode),
    Record(RecordId),
}

struct QueueEntry<'a> {
    bound: f32,
    item: Frontier<'a>,
}

impl PartialEq for QueueEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound
    }
}

impl Eq for QueueEntry<'_> {}

impl PartialOrd for QueueEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry<'_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest bound.
        other.bound.total_cmp(&self.bound)
    }
}

struct BestFirst<'a> {
    tree: &'a KdTree,
    query: &'a [f32],
    heap: BinaryHeap<QueueEntry<'a>>,
}

impl<'a> Iterator for BestFirst<'a> {
    type Item = (RecordId, f32);

    fn next(&mut self) -> Option<(RecordId, f32)> {
        while let Some(entry) = self.heap.pop() {
            match entry.item {
                Frontier::Record(id) => return Some((id, entry.bound)),
                Frontier::Node(KdNode::Leaf { records, .. }) => {
                    for &id in records {
                        let d = self.tree.distance.evaluate(self.query, self.tree.dataset.row(id));
                        self.heap.push(QueueEntry {
                            bound: d,
                            item: Frontier::Record(id),
                        });
                    }
                }
                Frontier::Node(KdNode::Internal { left, right, .. }) => {
                    for child in [left.as_ref(), right.as_ref()] {
                        self.heap.push(QueueEntry {
                            bound: self.tree.min_dist(self.query, child.bounds()),
                            item: Frontier::Node(child),
                        });
                    }
                }
            }
        }
        None
    }
}

impl PriorityIndex for KdTree {
    fn priority_by_object<'a>(
        &'a self,
        query: &'a [f32],
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        let mut heap = BinaryHeap::new();
        if let Some(root) = self.root.as_ref() {
            heap.push(QueueEntry {
                bound: self.min_dist(query, root.bounds()),
                item: Frontier::Node(root),
            });
        }
        Box::new(BestFirst {
            tree: self,
            query,
            heap,
        })
    }

    fn priority_by_id<'a>(
        &'a self,
        id: RecordId,
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        self.priority_by_object(self.dataset.row(id))
    }
}

impl DistancePriorityIndex for KdTree {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{DistanceFunction, Euclidean, Manhattan, SquaredEuclidean};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_dataset(n: usize, dim: usize, seed: u64) -> Arc<Dataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows: Vec<Vec<f32>> = (0..n)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        Arc::new(Dataset::from_rows(&rows).unwrap())
    }

    fn brute_knn(ds: &Dataset, dist: &dyn crate::distance::DistanceFunction, q: &[f32], k: usize) -> Vec<RecordId> {
        let mut all: Vec<(RecordId, f32)> =
            ds.ids().map(|i| (i, dist.evaluate(q, ds.row(i)))).collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1));
        all.truncate(k);
        all.into_iter().map(|(i, _)| i).collect()
    }

    fn built(ds: Arc<Dataset>, dist: DistanceRef, leaf: usize) -> KdTree {
        let mut t = KdTree::new(ds, dist, leaf).unwrap();
        t.initialize().unwrap();
        t
    }

    #[test]
    fn knn_matches_brute_force_euclidean() {
        let ds = random_dataset(200, 4, 7);
        let t = built(ds.clone(), Arc::new(Euclidean), 3);
        for probe in [0u32, 17, 99] {
            let q = ds.row(probe);
            let got: Vec<_> = t.knn_by_object(q, 5).into_iter().map(|(i, _)| i).collect();
            assert_eq!(got, brute_knn(&ds, &Euclidean, q, 5));
        }
    }

    #[test]
    fn knn_matches_brute_force_manhattan() {
        let ds = random_dataset(150, 3, 11);
        let t = built(ds.clone(), Arc::new(Manhattan), 3);
        let q = ds.row(42);
        let got: Vec<_> = t.knn_by_object(q, 7).into_iter().map(|(i, _)| i).collect();
        assert_eq!(got, brute_knn(&ds, &Manhattan, q, 7));
    }

    #[test]
    fn squared_euclidean_prunes_correctly() {
        let ds = random_dataset(120, 5, 13);
        let t = built(ds.clone(), Arc::new(SquaredEuclidean), 4);
        let q = ds.row(60);
        let got: Vec<_> = t.knn_by_object(q, 4).into_iter().map(|(i, _)| i).collect();
        assert_eq!(got, brute_knn(&ds, &SquaredEuclidean, q, 4));
    }

    #[test]
    fn range_returns_exactly_records_within_radius() {
        let ds = random_dataset(100, 3, 17);
        let t = built(ds.clone(), Arc::new(Euclidean), 3);
        let q = ds.row(10);
        let radius = 0.8;
        let got: std::collections::HashSet<_> = t
            .range_by_object(q, radius)
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        let expected: std::collections::HashSet<_> = ds
            .ids()
            .filter(|&i| Euclidean.evaluate(q, ds.row(i)) <= radius)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn priority_search_yields_nondecreasing_distances() {
        let ds = random_dataset(80, 4, 19);
        let t = built(ds.clone(), Arc::new(Euclidean), 3);
        let seq: Vec<_> = t.priority_by_id(5).collect();
        assert_eq!(seq.len(), 80);
        assert!(seq.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(seq[0].0, 5);
    }

    #[test]
    fn priority_prefix_matches_knn() {
        let ds = random_dataset(90, 3, 23);
        let t = built(ds.clone(), Arc::new(Euclidean), 5);
        let q = ds.row(0);
        let prefix: Vec<_> = t
            .priority_by_object(q)
            .take(6)
            .map(|(i, _)| i)
            .collect();
        let knn: Vec<_> = t.knn_by_object(q, 6).into_iter().map(|(i, _)| i).collect();
        assert_eq!(prefix, knn);
    }

    #[test]
    fn rejects_unsupported_distances() {
        let ds = random_dataset(10, 3, 29);
        assert!(matches!(
            KdTree::new(ds, Arc::new(crate::distance::Cosine), 3),
            Err(BuildError::UnsupportedDistance(_))
        ));
    }

    #[test]
    fn duplicate_points_build_into_leaves() {
        let rows = vec![vec![1.0_f32, 1.0]; 40];
        let ds = Arc::new(Dataset::from_rows(&rows).unwrap());
        let t = built(ds, Arc::new(Euclidean), 2);
        let got = t.knn_by_object(&[1.0, 1.0], 3);
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|&(_, d)| d == 0.0));
    }
}
