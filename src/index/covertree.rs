//! Metric cover tree with routing objects and covering radii.
//!
//! Each node is anchored at a routing record and stores the covering radius
//! of its whole subtree, so any metric distance admits the triangle-inequality
//! lower bound `max(0, d(query, routing) - radius)`. Internal nodes split
//! their remaining records between an approximate farthest pair, which keeps
//! the covering radii shrinking quickly without any coordinate access — the
//! tree only ever calls the distance function, making it the generic metric
//! fallback when no vector structure is available.
//!
//! Routing objects are real records and are reported by searches at the node
//! that anchors them; they do not reappear in child subtrees.

use std::collections::BinaryHeap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::dataset::{Dataset, RecordId};
use crate::distance::DistanceRef;
use crate::error::{BuildError, BuildResult};
use crate::index::{
    keep_in_range, keep_k_smallest, DistancePriorityIndex, IndexKind, IndexStats, KnnIndex,
    PriorityIndex, ProximityIndex, RangeIndex,
};

enum CoverNode {
    Leaf {
        routing: RecordId,
        radius: f32,
        records: SmallVec<[RecordId; 8]>,
    },
    Internal {
        routing: RecordId,
        radius: f32,
        left: Box<CoverNode>,
        right: Box<CoverNode>,
    },
}

impl CoverNode {
    fn routing(&self) -> RecordId {
        match self {
            CoverNode::Leaf { routing, .. } => *routing,
            CoverNode::Internal { routing, .. } => *routing,
        }
    }

    fn radius(&self) -> f32 {
        match self {
            CoverNode::Leaf { radius, .. } => *radius,
            CoverNode::Internal { radius, .. } => *radius,
        }
    }
}

/// Cover tree index.
pub struct CoverTree {
    dataset: Arc<Dataset>,
    distance: DistanceRef,
    leaf_size: usize,
    root: Option<CoverNode>,
    node_count: usize,
}

impl CoverTree {
    /// Create an unbuilt cover tree. Requires a metric distance; the tree is
    /// built by [`ProximityIndex::initialize`].
    pub fn new(dataset: Arc<Dataset>, distance: DistanceRef, leaf_size: usize) -> BuildResult<Self> {
        if leaf_size == 0 {
            return Err(BuildError::InvalidParameter(
                "leaf size must be at least 1".into(),
            ));
        }
        if !distance.is_metric() {
            return Err(BuildError::UnsupportedDistance(
                "cover tree pruning requires the triangle inequality",
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

    fn pair(&self, a: RecordId, b: RecordId) -> f32 {
        self.distance.evaluate(self.dataset.row(a), self.dataset.row(b))
    }

    /// Build a node anchored at `ids[0]`, covering all of `ids`.
    fn build_node(&mut self, ids: &[RecordId]) -> CoverNode {
        self.node_count += 1;
        let routing = ids[0];
        let rest = &ids[1..];

        let dists: Vec<f32> = rest.iter().map(|&id| self.pair(routing, id)).collect();
        let radius = dists.iter().copied().fold(0.0_f32, f32::max);

        if rest.len() <= self.leaf_size {
            return CoverNode::Leaf {
                routing,
                radius,
                records: SmallVec::from_slice(rest),
            };
        }

        // Approximate farthest pair: the record farthest from the routing
        // object, then the record farthest from that one.
        let a_pos = dists
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(y.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let a = rest[a_pos];
        let (b_pos, spread) = rest
            .iter()
            .enumerate()
            .map(|(i, &id)| (i, self.pair(a, id)))
            .max_by(|x, y| x.1.total_cmp(&y.1))
            .unwrap_or((a_pos, 0.0));
        let b = rest[b_pos];

        // All remaining records coincide; no split can make progress.
        if spread <= 0.0 {
            return CoverNode::Leaf {
                routing,
                radius,
                records: SmallVec::from_slice(rest),
            };
        }

        let mut left = vec![a];
        let mut right = vec![b];
        for &id in rest {
            if id == a || id == b {
                continue;
            }
            if self.pair(a, id) <= self.pair(b, id) {
                left.push(id);
            } else {
                right.push(id);
            }
        }
        CoverNode::Internal {
            routing,
            radius,
            left: Box::new(self.build_node(&left)),
            right: Box::new(self.build_node(&right)),
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

    /// `d` is the precomputed distance from the query to this node's routing
    /// object.
    fn search_knn(
        &self,
        node: &CoverNode,
        d: f32,
        query: &[f32],
        k: usize,
        best: &mut Vec<(RecordId, f32)>,
        tau: &mut f32,
    ) {
        self.offer(node.routing(), d, k, best, tau);
        match node {
            CoverNode::Leaf { records, .. } => {
                for &id in records {
                    self.offer(id, self.eval(id, query), k, best, tau);
                }
            }
            CoverNode::Internal { left, right, .. } => {
                let dl = self.eval(left.routing(), query);
                let dr = self.eval(right.routing(), query);
                let bl = (dl - left.radius()).max(0.0);
                let br = (dr - right.radius()).max(0.0);
                let children = if bl <= br {
                    [(bl, dl, left.as_ref()), (br, dr, right.as_ref())]
                } else {
                    [(br, dr, right.as_ref()), (bl, dl, left.as_ref())]
                };
                for (bound, d_child, child) in children {
                    if bound <= *tau {
                        self.search_knn(child, d_child, query, k, best, tau);
                    }
                }
            }
        }
    }

    fn search_range(
        &self,
        node: &CoverNode,
        d: f32,
        query: &[f32],
        radius: f32,
        out: &mut Vec<(RecordId, f32)>,
    ) {
        if d <= radius {
            out.push((node.routing(), d));
        }
        match node {
            CoverNode::Leaf { records, .. } => {
                for &id in records {
                    let d = self.eval(id, query);
                    if d <= radius {
                        out.push((id, d));
                    }
                }
            }
            CoverNode::Internal { left, right, .. } => {
                for child in [left.as_ref(), right.as_ref()] {
                    let d_child = self.eval(child.routing(), query);
                    if (d_child - child.radius()).max(0.0) <= radius {
                        self.search_range(child, d_child, query, radius, out);
                    }
                }
            }
        }
    }
}

impl ProximityIndex for CoverTree {
    fn kind(&self) -> IndexKind {
        IndexKind::CoverTree
    }

    fn initialize(&mut self) -> BuildResult<()> {
        if self.dataset.size() == 0 {
            return Err(BuildError::EmptyDataset);
        }
        let ids: Vec<RecordId> = self.dataset.ids().collect();
        self.node_count = 0;
        let root = self.build_node(&ids);
        self.root = Some(root);
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind(),
            num_records: self.dataset.size(),
            size_bytes: self.dataset.size() * std::mem::size_of::<RecordId>()
                + self.node_count * 2 * std::mem::size_of::<f32>(),
        }
    }
}

impl KnnIndex for CoverTree {
    fn knn_by_object(&self, query: &[f32], k: usize) -> Vec<(RecordId, f32)> {
        let Some(root) = self.root.as_ref() else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let mut best = Vec::with_capacity(k);
        let mut tau = f32::INFINITY;
        let d = self.eval(root.routing(), query);
        self.search_knn(root, d, query, k, &mut best, &mut tau);
        keep_k_smallest(best, k)
    }

    fn knn_by_id(&self, id: RecordId, k: usize) -> Vec<(RecordId, f32)> {
        self.knn_by_object(self.dataset.row(id), k)
    }
}

impl RangeIndex for CoverTree {
    fn range_by_object(&self, query: &[f32], radius: f32) -> Vec<(RecordId, f32)> {
        let Some(root) = self.root.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let d = self.eval(root.routing(), query);
        self.search_range(root, d, query, radius, &mut out);
        keep_in_range(out, radius)
    }

    fn range_by_id(&self, id: RecordId, radius: f32) -> Vec<(RecordId, f32)> {
        self.range_by_object(self.dataset.row(id), radius)
    }
}

enum Frontier<'a> {
    /// A subtree together with the query distance to its routing object.
    Node(&'a CoverNode, f32),
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
    tree: &'a CoverTree,
    query: &'a [f32],
    heap: BinaryHeap<QueueEntry<'a>>,
}

impl<'a> Iterator for BestFirst<'a> {
    type Item = (RecordId, f32);

    fn next(&mut self) -> Option<(RecordId, f32)> {
        while let Some(entry) = self.heap.pop() {
            match entry.item {
                Frontier::Record(id) => return Some((id, entry.bound)),
                Frontier::Node(node, d) => {
                    self.heap.push(QueueEntry {
                        bound: d,
                        item: Frontier::Record(node.routing()),
                    });
                    match node {
                        CoverNode::Leaf { records, .. } => {
                            for &id in records {
                                self.heap.push(QueueEntry {
                                    bound: self.tree.eval(id, self.query),
                                    item: Frontier::Record(id),
                                });
                            }
                        }
                        CoverNode::Internal { left, right, .. } => {
                            for child in [left.as_ref(), right.as_ref()] {
                                let d_child = self.tree.eval(child.routing(), self.query);
                                self.heap.push(QueueEntry {
                                    bound: (d_child - child.radius()).max(0.0),
                                    item: Frontier::Node(child, d_child),
                                });
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

impl PriorityIndex for CoverTree {
    fn priority_by_object<'a>(
        &'a self,
        query: &'a [f32],
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        let mut heap = BinaryHeap::new();
        if let Some(root) = self.root.as_ref() {
            let d = self.eval(root.routing(), query);
            heap.push(QueueEntry {
                bound: (d - root.radius()).max(0.0),
                item: Frontier::Node(root, d),
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

impl DistancePriorityIndex for CoverTree {}
