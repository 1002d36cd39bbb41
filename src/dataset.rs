//! The dataset (relation) the optimizer builds indexes over.
//!
//! Records are stored in a flat structure-of-arrays buffer for cache
//! locality. A dataset is immutable during queries: its cardinality and
//! identifier space are stable for the lifetime of any index built over it.
//!
//! Each dataset also carries the two pieces of mutable shared state the
//! optimizer needs:
//!
//! - the **auxiliary table**: weak references to indexes that were built for
//!   this dataset, so later queries can reuse them instead of rebuilding.
//!   The references are non-owning; dropping the last external handle to an
//!   index removes it from consideration without explicit cleanup.
//! - the **build lock**: a per-dataset mutex held across the whole
//!   check-cache / build / register sequence of one optimizer entry point,
//!   so at most one index of a given kind is built per dataset at a time.
//!   Concurrent callers wait, then find and reuse the registered index.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{BuildError, BuildResult};
use crate::index::{DistanceMatrixIndex, DistancePriorityIndex, IndexKind, KnnIndex};

/// Identifier of a record within a dataset.
pub type RecordId = u32;

/// Whether the record-identifier space can change after creation.
///
/// Indexes that enumerate identifiers positionally (the precomputed distance
/// matrix) are only valid over a static identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// Identifiers are fixed for the lifetime of the dataset.
    Static,
    /// Identifiers may be added or removed by the owning storage layer.
    Dynamic,
}

/// Declared element type of the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeDescriptor {
    /// Fixed-dimensionality numeric vectors.
    NumericVectorField { dim: usize },
    /// Equal-length multivariate series; stored like vectors but without
    /// vector-space semantics (e.g. compared with an elastic measure).
    MultivariateSeries { len: usize },
}

impl DataTypeDescriptor {
    /// Number of values per record.
    pub fn dimensionality(&self) -> usize {
        match self {
            DataTypeDescriptor::NumericVectorField { dim } => *dim,
            DataTypeDescriptor::MultivariateSeries { len } => *len,
        }
    }
}

/// A weakly held, previously built index.
pub(crate) enum AuxHandle {
    Matrix(Weak<dyn DistanceMatrixIndex>),
    Tree(Weak<dyn DistancePriorityIndex>),
    Knn {
        index: Weak<dyn KnnIndex>,
        /// Materialized neighbor depth; the entry can only serve requests
        /// up to this k.
        max_k: usize,
    },
}

impl AuxHandle {
    fn is_live(&self) -> bool {
        match self {
            AuxHandle::Matrix(w) => w.strong_count() > 0,
            AuxHandle::Tree(w) => w.strong_count() > 0,
            AuxHandle::Knn { index, .. } => index.strong_count() > 0,
        }
    }

    fn upgrade(&self) -> Option<CachedIndex> {
        match self {
            AuxHandle::Matrix(w) => w.upgrade().map(CachedIndex::Matrix),
            AuxHandle::Tree(w) => w.upgrade().map(CachedIndex::Tree),
            AuxHandle::Knn { index, .. } => index.upgrade().map(CachedIndex::Knn),
        }
    }
}

/// A cache hit from the auxiliary table, upgraded to a strong handle.
pub(crate) enum CachedIndex {
    Matrix(Arc<dyn DistanceMatrixIndex>),
    Tree(Arc<dyn DistancePriorityIndex>),
    Knn(Arc<dyn KnnIndex>),
}

struct Auxiliary {
    kind: IndexKind,
    distance: &'static str,
    handle: AuxHandle,
}

/// An immutable-during-query collection of records.
pub struct Dataset {
    data: Vec<f32>,
    dim: usize,
    len: usize,
    descriptor: DataTypeDescriptor,
    id_space: IdSpace,
    auxiliaries: Mutex<Vec<Auxiliary>>,
    build_lock: Mutex<()>,
}

impl Dataset {
    /// Create a dataset of fixed-dimensionality numeric vectors with a
    /// static identifier space.
    pub fn from_rows(rows: &[Vec<f32>]) -> BuildResult<Self> {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(BuildError::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            dim,
            len: rows.len(),
            descriptor: DataTypeDescriptor::NumericVectorField { dim },
            id_space: IdSpace::Static,
            auxiliaries: Mutex::new(Vec::new()),
            build_lock: Mutex::new(()),
        })
    }

    /// Declare a dynamic identifier space (managed by an external storage
    /// layer). Disqualifies the distance-matrix candidate.
    pub fn with_id_space(mut self, id_space: IdSpace) -> Self {
        self.id_space = id_space;
        self
    }

    /// Re-declare the records as equal-length multivariate series rather
    /// than vectors. Disqualifies candidates requiring vector fields.
    pub fn as_series(mut self) -> Self {
        self.descriptor = DataTypeDescriptor::MultivariateSeries { len: self.dim };
        self
    }

    /// Number of records (cardinality).
    pub fn size(&self) -> usize {
        self.len
    }

    /// Values per record.
    pub fn dimensionality(&self) -> usize {
        self.dim
    }

    /// Declared element type.
    pub fn descriptor(&self) -> DataTypeDescriptor {
        self.descriptor
    }

    /// Identifier-space stability.
    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }

    /// Access a record by identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range; identifiers come from the dataset
    /// itself, so an out-of-range id is a caller bug.
    pub fn row(&self, id: RecordId) -> &[f32] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Iterate over all record identifiers.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        0..self.len as RecordId
    }

    /// Number of live auxiliary index registrations.
    ///
    /// Dead (dropped) entries are pruned before counting.
    pub fn auxiliary_count(&self) -> usize {
        let mut aux = self.auxiliaries.lock();
        aux.retain(|a| a.handle.is_live());
        aux.len()
    }

    /// Serialize index construction for this dataset.
    pub(crate) fn build_guard(&self) -> MutexGuard<'_, ()> {
        self.build_lock.lock()
    }

    /// Register a built index as a weak auxiliary. Pure bookkeeping; cannot
    /// fail.
    pub(crate) fn register_auxiliary(
        &self,
        kind: IndexKind,
        distance: &'static str,
        handle: AuxHandle,
    ) {
        let mut aux = self.auxiliaries.lock();
        aux.retain(|a| a.handle.is_live());
        aux.push(Auxiliary {
            kind,
            distance,
            handle,
        });
    }

    /// Look up a live auxiliary of the given kind built for the given
    /// distance.
    pub(crate) fn find_auxiliary(
        &self,
        kind: IndexKind,
        distance: &'static str,
    ) -> Option<CachedIndex> {
        let aux = self.auxiliaries.lock();
        aux.iter()
            .filter(|a| a.kind == kind && a.distance == distance)
            .find_map(|a| a.handle.upgrade())
    }

    /// Look up a live materialized-kNN auxiliary for the given distance that
    /// is deep enough to serve `min_k` neighbors. Shallower entries are not
    /// a match: their truncated lists cannot answer the request.
    pub(crate) fn find_knn_auxiliary(
        &self,
        distance: &'static str,
        min_k: usize,
    ) -> Option<Arc<dyn KnnIndex>> {
        let aux = self.auxiliaries.lock();
        aux.iter()
            .filter(|a| a.kind == IndexKind::KnnPreprocessor && a.distance == distance)
            .find_map(|a| match &a.handle {
                AuxHandle::Knn { index, max_k } if *max_k >= min_k => index.upgrade(),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_rejects_ragged_input() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            Dataset::from_rows(&rows),
            Err(BuildError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn row_access_and_ids() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let ds = Dataset::from_rows(&rows).unwrap();
        assert_eq!(ds.size(), 3);
        assert_eq!(ds.dimensionality(), 2);
        assert_eq!(ds.row(1), &[3.0, 4.0]);
        assert_eq!(ds.ids().count(), 3);
    }

    #[test]
    fn descriptor_and_id_space_overrides() {
        let rows = vec![vec![0.0; 4]; 2];
        let ds = Dataset::from_rows(&rows)
            .unwrap()
            .with_id_space(IdSpace::Dynamic)
            .as_series();
        assert_eq!(ds.id_space(), IdSpace::Dynamic);
        assert_eq!(
            ds.descriptor(),
            DataTypeDescriptor::MultivariateSeries { len: 4 }
        );
        assert_eq!(ds.descriptor().dimensionality(), 4);
    }

    #[test]
    fn empty_dataset_is_representable() {
        let ds = Dataset::from_rows(&[]).unwrap();
        assert_eq!(ds.size(), 0);
        assert_eq!(ds.dimensionality(), 0);
    }
}
