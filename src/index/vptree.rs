//! Vantage-point tree for metric distances.
//!
//! Each internal node holds a vantage record and partitions the remaining
//! records at the median of their distances to it. Child subtrees keep their
//! min/max distance to the vantage, so searches prune with the triangle
//! inequality: a subtree whose distance band cannot intersect the current
//! search radius is skipped. Searches are exact for any metric distance.
//!
//! The vantage point of each node is sampled with a deterministic seed so
//! repeated builds over the same dataset produce the same tree.

use std::collections::BinaryHeap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::dataset::{Dataset, RecordId};
use crate::distance::DistanceRef;
use crate::error::{BuildError, BuildResult};
use crate::index::{
    keep_in_range, keep_k_smallest, DistancePriorityIndex, IndexKind, IndexStats, KnnIndex,
    PriorityIndex, ProximityIndex, RangeIndex,
};

enum VpNode {
    Leaf {
        records: SmallVec<[RecordId; 8]>,
    },
    Internal {
        vantage: RecordId,
        /// Distance bands of the two subtrees relative to the vantage.
        inner_min: f32,
        inner_max: f32,
        outer_min: f32,
        outer_max: f32,
        inner: Box<VpNode>,
        outer: Box<VpNode>,
    },
}

/// Vantage-point tree index.
pub struct VpTree {
    dataset: Arc<Dataset>,
    distance: DistanceRef,
    leaf_size: usize,
    root: Option<VpNode>,
    node_count: usize,
}

impl VpTree {
    /// Create an unbuilt VP tree. Requires a metric distance; the tree is
    /// built by [`ProximityIndex::initialize`].
    pub fn new(dataset: Arc<Dataset>, distance: DistanceRef, leaf_size: usize) -> BuildResult<Self> {
        if leaf_size == 0 {
            return Err(BuildError::InvalidParameter(
                "leaf size must be at least 1".into(),
            ));
        }
        if !distance.is_metric() {
            return Err(BuildError::UnsupportedDistance(
                "VP tree pruning requires the triangle inequality",
            ));
        }
        Ok(Self {
            dataset,
            distance,
            leaf_size,
            root: None,
            node_count: 0,
        })
    }

    /// The leaf size the tree was built with.
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    fn eval(&self, a: RecordId, q: &[f32]) -> f32 {
        self.distance.evaluate(q, self.dataset.row(a))
    }

    fn build_node(&mut self, mut ids: Vec<RecordId>, rng: &mut StdRng) -> VpNode {
        self.node_count += 1;
        if ids.len() <= self.leaf_size {
            return VpNode::Leaf {
                records: SmallVec::from_slice(&ids),
            };
        }
        let pick = rng.random_range(0..ids.len());
        let vantage = ids.swap_remove(pick);
        let vrow = self.dataset.row(vantage);

        let mut dists: Vec<(RecordId, f32)> = ids
            .iter()
            .map(|&id| (id, self.distance.evaluate(vrow, self.dataset.row(id))))
            .collect();
        let mid = dists.len() / 2;
        dists.select_nth_unstable_by(mid, |a, b| a.1.total_cmp(&b.1));
        let threshold = dists[mid].1;

        let mut inner = Vec::new();
        let mut outer = Vec::new();
        let (mut imin, mut imax) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut omin, mut omax) = (f32::INFINITY, f32::NEG_INFINITY);
        for (id, d) in dists {
            if d <= threshold {
                imin = imin.min(d);
                imax = imax.max(d);
                inner.push(id);
            } else {
                omin = omin.min(d);
                omax = omax.max(d);
                outer.push(id);
            }
        }
        // All distances equal: no split possible, keep everything in a leaf.
        if inner.is_empty() || outer.is_empty() {
            let mut records: SmallVec<[RecordId; 8]> = SmallVec::from_slice(&inner);
            records.extend_from_slice(&outer);
            records.push(vantage);
            return VpNode::Leaf { records };
        }
        VpNode::Internal {
            vantage,
            inner_min: imin,
            inner_max: imax,
            outer_min: omin,
            outer_max: omax,
            inner: Box::new(self.build_node(inner, rng)),
            outer: Box::new(self.build_node(outer, rng)),
        }
    }

    fn search_knn(
        &self,
        node: &VpNode,
        query: &[f32],
        k: usize,
        best: &mut Vec<(RecordId, f32)>,
        tau: &mut f32,
    ) {
        match node {
            VpNode::Leaf { records } => {
                for &id in records {
                    self.offer(id, self.eval(id, query), k, best, tau);
                }
            }
            VpNode::Internal {
                vantage,
                inner_min,
                inner_max,
                outer_min,
                outer_max,
                inner,
                outer,
            } => {
                let d = self.eval(*vantage, query);
                self.offer(*vantage, d, k, best, tau);
                let inner_bound = (inner_min - d).max(d - inner_max).max(0.0);
                let outer_bound = (outer_min - d).max(d - outer_max).max(0.0);
                let children = if inner_bound <= outer_bound {
                    [(inner_bound, inner.as_ref()), (outer_bound, outer.as_ref())]
                } else {
                    [(outer_bound, outer.as_ref()), (inner_bound, inner.as_ref())]
                };
                for (bound, child) in children {
                    if bound <= *tau {
                        self.search_knn(child, query, k, best, tau);
                    }
                }
            }
        }
    }

    fn offer(
        &self,
        id: RecordId,
        d: f32,
        k: usize,
        best: &mut Vec<(RecordId, f32)>,
        tau: &mut f32,
    ) {
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

    fn search_range(
        &self,
        node: &VpNode,
        query: &[f32],
        radius: f32,
        out: &mut Vec<(RecordId, f32)>,
    ) {
        match node {
            VpNode::Leaf { records } => {
                for &id in records {
                    let d = self.eval(id, query);
                    if d <= radius {
                        out.push((id, d));
                    }
                }
            }
            VpNode::Internal {
                vantage,
                inner_min,
                inner_max,
                outer_min,
                outer_max,
                inner,
                outer,
            } => {
                let d = self.eval(*vantage, query);
                if d <= radius {
                    out.push((*vantage, d));
                }
                if (inner_min - d).max(d - inner_max).max(0.0) <= radius {
                    self.search_range(inner, query, radius, out);
                }
                if (outer_min - d).max(d - outer_max).max(0.0) <= radius {
                    self.search_range(outer, query, radius, out);
                }
            }
        }
    }
}

impl ProximityIndex for VpTree {
    fn kind(&self) -> IndexKind {
        IndexKind::VpTree
    }

    fn initialize(&mut self) -> BuildResult<()> {
        let n = self.dataset.size();
        if n == 0 {
            return Err(BuildError::EmptyDataset);
        }
        let mut rng = StdRng::seed_from_u64(0x7009_u64 ^ n as u64);
        let ids: Vec<RecordId> = self.dataset.ids().collect();
        self.node_count = 0;
        let root = self.build_node(ids, &mut rng);
        self.root = Some(root);
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind(),
            num_records: self.dataset.size(),
            size_bytes: self.dataset.size() * std::mem::size_of::<RecordId>()
                + self.node_count * 6 * std::mem::size_of::<f32>(),
        }
    }
}

impl KnnIndex for VpTree {
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

impl RangeIndex for VpTree {
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
    Node(&'a VpNode),
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
        other.bound.total_cmp(&self.bound)
    }
}

struct BestFirst<'a> {
    tree: &'a VpTree,
    query: &'a [f32],
    heap: BinaryHeap<QueueEntry<'a>>,
}

impl<'a> Iterator for BestFirst<'a> {
    type Item = (RecordId, f32);

    fn next(&mut self) -> Option<(RecordId, f32)> {
        while let Some(entry) = self.heap.pop() {
            match entry.item {
                Frontier::Record(id) => return Some((id, entry.bound)),
                Frontier::Node(VpNode::Leaf { records }) => {
                    for &id in records {
                        self.heap.push(QueueEntry {
                            bound: self.tree.eval(id, self.query),
                            item: Frontier::Record(id),
                        });
                    }
                }
                Frontier::Node(VpNode::Internal {
                    vantage,
                    inner_min,
                    inner_max,
                    outer_min,
                    outer_max,
                    inner,
                    outer,
                }) => {
                    let d = self.tree.eval(*vantage, self.query);
                    self.heap.push(QueueEntry {
                        bound: d,
                        item: Frontier::Record(*vantage),
                    });
                    self.heap.push(QueueEntry {
                        bound: (inner_min - d).max(d - inner_max).max(0.0),
                        item: Frontier::Node(inner),
                    });
                    self.heap.push(QueueEntry {
                        bound: (outer_min - d).max(d - outer_max).max(0.0),
                        item: Frontier::Node(outer),
                    });
                }
            }
        }
        None
    }
}

impl PriorityIndex for VpTree {
    fn priority_by_object<'a>(
        &'a self,
        query: &'a [f32],
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        let mut heap = BinaryHeap::new();
        if let Some(root) = self.root.as_ref() {
            heap.push(QueueEntry {
                bound: 0.0,
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

impl DistancePriorityIndex for VpTree {}

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

    fn brute_knn(
        ds: &Dataset,
        dist: &dyn crate::distance::DistanceFunction,
        q: &[f32],
        k: usize,
    ) -> Vec<RecordId> {
        let mut all: Vec<(RecordId, f32)> =
            ds.ids().map(|i| (i, dist.evaluate(q, ds.row(i)))).collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1));
        all.truncate(k);
        all.into_iter().map(|(i, _)| i).collect()
    }

    fn built(ds: Arc<Dataset>, dist: DistanceRef, leaf: usize) -> VpTree {
        let mut t = VpTree::new(ds, dist, leaf).unwrap();
        t.initialize().unwrap();
        t
    }

    #[test]
    fn knn_matches_brute_force() {
        let ds = random_dataset(250, 6, 31);
        let t = built(ds.clone(), Arc::new(Euclidean), 5);
        for probe in [0u32, 40, 199] {
            let q = ds.row(probe);
            let got: Vec<_> = t.knn_by_object(q, 8).into_iter().map(|(i, _)| i).collect();
            assert_eq!(got, brute_knn(&ds, &Euclidean, q, 8));
        }
    }

    #[test]
    fn knn_with_manhattan_metric() {
        let ds = random_dataset(150, 4, 37);
        let t = built(ds.clone(), Arc::new(Manhattan), 5);
        let q = ds.row(77);
        let got: Vec<_> = t.knn_by_object(q, 5).into_iter().map(|(i, _)| i).collect();
        assert_eq!(got, brute_knn(&ds, &Manhattan, q, 5));
    }

    #[test]
    fn range_returns_exactly_records_within_radius() {
        let ds = random_dataset(180, 4, 41);
        let t = built(ds.clone(), Arc::new(Euclidean), 5);
        let q = ds.row(9);
        let radius = 0.9;
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
    fn priority_search_yields_every_record_in_order() {
        let ds = random_dataset(100, 4, 43);
        let t = built(ds.clone(), Arc::new(Euclidean), 8);
        let seq: Vec<_> = t.priority_by_id(50).collect();
        assert_eq!(seq.len(), 100);
        assert!(seq.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(seq[0].0, 50);
    }

    #[test]
    fn non_metric_distance_is_rejected() {
        let ds = random_dataset(10, 3, 47);
        assert!(matches!(
            VpTree::new(ds, Arc::new(SquaredEuclidean), 5),
            Err(BuildError::UnsupportedDistance(_))
        ));
    }

    #[test]
    fn identical_points_collapse_into_a_leaf() {
        let rows = vec![vec![2.0_f32, -1.0, 0.5]; 30];
        let ds = Arc::new(Dataset::from_rows(&rows).unwrap());
        let t = built(ds, Arc::new(Euclidean), 4);
        let got = t.knn_by_object(&[2.0, -1.0, 0.5], 5);
        assert_eq!(got.len(), 5);
        assert!(got.iter().all(|&(_, d)| d == 0.0));
    }
}
