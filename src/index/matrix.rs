//! Precomputed all-pairs distance matrix.
//!
//! Stores the full `n × n` table of single-precision distances in one flat
//! buffer. The layout is deliberately square rather than triangular: the
//! optimizer's admission cost model (`4 * n * n` bytes) is then the true
//! allocation size, and lookups stay a single multiply-add away.
//!
//! Construction is O(n²) distance computations and is only admitted by the
//! optimizer for static identifier spaces with at most 65536 records, under
//! the memory budget.

use std::sync::Arc;

use crate::dataset::{Dataset, RecordId};
use crate::distance::DistanceRef;
use crate::error::{BuildError, BuildResult};
use crate::index::{
    keep_in_range, keep_k_smallest, DistanceMatrixIndex, DistancePriorityIndex, IndexKind,
    IndexStats, KnnIndex, PriorityIndex, ProximityIndex, RangeIndex,
};

/// Precomputed distance matrix index.
pub struct DistanceMatrix {
    dataset: Arc<Dataset>,
    distance: DistanceRef,
    cells: Vec<f32>,
    n: usize,
    built: bool,
}

impl DistanceMatrix {
    /// Create an uninitialized matrix index. The table is filled by
    /// [`ProximityIndex::initialize`].
    pub fn new(dataset: Arc<Dataset>, distance: DistanceRef) -> BuildResult<Self> {
        Ok(Self {
            dataset,
            distance,
            cells: Vec::new(),
            n: 0,
            built: false,
        })
    }

    #[inline]
    fn cell(&self, a: RecordId, b: RecordId) -> f32 {
        self.cells[a as usize * self.n + b as usize]
    }

    fn row_neighbors(&self, id: RecordId) -> Vec<(RecordId, f32)> {
        let row = &self.cells[id as usize * self.n..(id as usize + 1) * self.n];
        row.iter()
            .enumerate()
            .map(|(j, &d)| (j as RecordId, d))
            .collect()
    }

    fn scan_neighbors(&self, query: &[f32]) -> Vec<(RecordId, f32)> {
        self.dataset
            .ids()
            .map(|id| (id, self.distance.evaluate(query, self.dataset.row(id))))
            .collect()
    }
}

impl ProximityIndex for DistanceMatrix {
    fn kind(&self) -> IndexKind {
        IndexKind::DistanceMatrix
    }

    fn initialize(&mut self) -> BuildResult<()> {
        let n = self.dataset.size();
        if n == 0 {
            return Err(BuildError::EmptyDataset);
        }
        let mut cells = vec![0.0_f32; n * n];
        for i in 0..n {
            let a = self.dataset.row(i as RecordId);
            // Symmetric fill; the diagonal is evaluated too, in case the
            // distance has nonzero self-distance.
            cells[i * n + i] = self.distance.evaluate(a, a);
            for j in (i + 1)..n {
                let d = self.distance.evaluate(a, self.dataset.row(j as RecordId));
                cells[i * n + j] = d;
                cells[j * n + i] = d;
            }
        }
        self.cells = cells;
        self.n = n;
        self.built = true;
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind(),
            num_records: self.n,
            size_bytes: self.cells.len() * std::mem::size_of::<f32>(),
        }
    }
}

impl KnnIndex for DistanceMatrix {
    fn knn_by_object(&self, query: &[f32], k: usize) -> Vec<(RecordId, f32)> {
        keep_k_smallest(self.scan_neighbors(query), k)
    }

    fn knn_by_id(&self, id: RecordId, k: usize) -> Vec<(RecordId, f32)> {
        debug_assert!(self.built, "index not initialized");
        keep_k_smallest(self.row_neighbors(id), k)
    }
}

impl RangeIndex for DistanceMatrix {
    fn range_by_object(&self, query: &[f32], radius: f32) -> Vec<(RecordId, f32)> {
        keep_in_range(self.scan_neighbors(query), radius)
    }

    fn range_by_id(&self, id: RecordId, radius: f32) -> Vec<(RecordId, f32)> {
        debug_assert!(self.built, "index not initialized");
        keep_in_range(self.row_neighbors(id), radius)
    }
}

impl PriorityIndex for DistanceMatrix {
    fn priority_by_object<'a>(
        &'a self,
        query: &'a [f32],
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        let mut all = self.scan_neighbors(query);
        all.sort_by(|a, b| a.1.total_cmp(&b.1));
        Box::new(all.into_iter())
    }

    fn priority_by_id<'a>(
        &'a self,
        id: RecordId,
    ) -> Box<dyn Iterator<Item = (RecordId, f32)> + 'a> {
        debug_assert!(self.built, "index not initialized");
        let mut all = self.row_neighbors(id);
        all.sort_by(|a, b| a.1.total_cmp(&b.1));
        Box::new(all.into_iter())
    }
}

impl DistancePriorityIndex for DistanceMatrix {}

impl DistanceMatrixIndex for DistanceMatrix {
    fn pairwise(&self, a: RecordId, b: RecordId) -> f32 {
        debug_assert!(self.built, "index not initialized");
        self.cell(a, b)
    }
}
