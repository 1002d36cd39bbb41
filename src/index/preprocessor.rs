//! Materialized k-nearest-neighbor preprocessor.
//!
//! Precomputes each record's `max_k` nearest neighbors into per-record
//! lists, so identifier-based kNN queries become table lookups. Works with
//! any distance or similarity — no metricity requirement — which makes it
//! the candidate of last resort for non-metric workloads when the caller
//! asked for precomputation.
//!
//! Construction is brute force, O(n²) distance computations; admission is
//! guarded by the optimizer's memory budget (`12 * max_k * n` bytes).

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::dataset::{Dataset, RecordId};
use crate::distance::DistanceRef;
use crate::error::{BuildError, BuildResult};
use crate::index::{keep_k_smallest, IndexKind, IndexStats, KnnIndex, ProximityIndex};

type NeighborList = SmallVec<[(RecordId, f32); 16]>;

/// Materialized kNN lists for every record.
pub struct MaterializedKnn {
    dataset: Arc<Dataset>,
    distance: DistanceRef,
    max_k: usize,
    lists: Vec<NeighborList>,
}

impl MaterializedKnn {
    /// Create an unmaterialized preprocessor for up to `max_k` neighbors per
    /// record.
    pub fn new(dataset: Arc<Dataset>, distance: DistanceRef, max_k: usize) -> BuildResult<Self> {
        if max_k == 0 {
            return Err(BuildError::InvalidParameter(
                "max_k must be at least 1".into(),
            ));
        }
        Ok(Self {
            dataset,
            distance,
            max_k,
            lists: Vec::new(),
        })
    }

    /// The number of neighbors materialized per record.
    pub fn max_k(&self) -> usize {
        self.max_k
    }
}

impl ProximityIndex for MaterializedKnn {
    fn kind(&self) -> IndexKind {
        IndexKind::KnnPreprocessor
    }

    fn initialize(&mut self) -> BuildResult<()> {
        let n = self.dataset.size();
        if n == 0 {
            return Err(BuildError::EmptyDataset);
        }
        let mut lists = Vec::with_capacity(n);
        for i in self.dataset.ids() {
            let a = self.dataset.row(i);
            let all: Vec<(RecordId, f32)> = self
                .dataset
                .ids()
                .map(|j| (j, self.distance.evaluate(a, self.dataset.row(j))))
                .collect();
            lists.push(NeighborList::from_vec(keep_k_smallest(all, self.max_k)));
        }
        self.lists = lists;
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind(),
            num_records: self.lists.len(),
            size_bytes: self
                .lists
                .iter()
                .map(|l| l.len() * std::mem::size_of::<(RecordId, f32)>())
                .sum(),
        }
    }
}

impl KnnIndex for MaterializedKnn {
    fn knn_by_object(&self, query: &[f32], k: usize) -> Vec<(RecordId, f32)> {
        // Unseen objects are not in the materialized table; fall back to a
        // scan with the same distance.
        let all: Vec<(RecordId, f32)> = self
            .dataset
            .ids()
            .map(|j| (j, self.distance.evaluate(query, self.dataset.row(j))))
            .collect();
        keep_k_smallest(all, k)
    }

    fn knn_by_id(&self, id: RecordId, k: usize) -> Vec<(RecordId, f32)> {
        debug_assert!(!self.lists.is_empty(), "index not initialized");
        if k > self.max_k {
            debug!(
                requested = k,
                materialized = self.max_k,
                "kNN request exceeds materialized depth; truncating"
            );
        }
        let list = &self.lists[id as usize];
        list[..k.min(list.len())].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{Cosine, Euclidean};

    fn dataset() -> Arc<Dataset> {
        let rows: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![(i as f32 * 0.7).sin(), (i as f32 * 0.3).cos(), i as f32])
            .collect();
        Arc::new(Dataset::from_rows(&rows).unwrap())
    }

    #[test]
    fn materialized_lists_match_brute_force() {
        let ds = dataset();
        let mut pp = MaterializedKnn::new(ds.clone(), Arc::new(Euclidean), 4).unwrap();
        pp.initialize().unwrap();

        for id in ds.ids() {
            let got = pp.knn_by_id(id, 4);
            let brute = pp.knn_by_object(ds.row(id), 4);
            assert_eq!(got.len(), 4);
            let got_ids: Vec<_> = got.iter().map(|&(i, _)| i).collect();
            let brute_ids: Vec<_> = brute.iter().map(|&(i, _)| i).collect();
            assert_eq!(got_ids, brute_ids);
            assert_eq!(got[0].0, id); // own nearest neighbor
        }
    }

    #[test]
    fn requests_beyond_max_k_are_truncated() {
        let ds = dataset();
        let mut pp = MaterializedKnn::new(ds, Arc::new(Euclidean), 3).unwrap();
        pp.initialize().unwrap();
        assert_eq!(pp.knn_by_id(0, 10).len(), 3);
    }

    #[test]
    fn works_with_non_metric_distances() {
        let ds = dataset();
        let mut pp = MaterializedKnn::new(ds, Arc::new(Cosine), 2).unwrap();
        pp.initialize().unwrap();
        let got = pp.knn_by_id(5, 2);
        assert_eq!(got.len(), 2);
        assert!(got[0].1 <= got[1].1);
    }

    #[test]
    fn zero_k_is_rejected() {
        let ds = dataset();
        assert!(MaterializedKnn::new(ds, Arc::new(Euclidean), 0).is_err());
    }
}
