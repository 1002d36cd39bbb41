//! Registry of constructible index candidates.
//!
//! The optimizer itself only speaks the capability traits; this registry
//! maps each candidate slot to a factory producing an unbuilt index, or to
//! `None` when the structure is unavailable. [`CapabilityRegistry::probe`]
//! fills the slots from the crate's compiled-in features, and the builder
//! methods swap individual factories out (or in), which is how tests inject
//! recording or failing factories.

use std::sync::Arc;

use crate::dataset::Dataset;
use crate::distance::DistanceRef;
use crate::error::BuildError;
use crate::index::{DistanceMatrixIndex, DistancePriorityIndex, KnnIndex};

/// Builds an unbuilt distance-matrix candidate.
pub type MatrixFactory = Box<
    dyn Fn(Arc<Dataset>, DistanceRef) -> Result<Box<dyn DistanceMatrixIndex>, BuildError>
        + Send
        + Sync,
>;

/// Builds an unbuilt kNN preprocessor for a maximum neighbor count.
pub type KnnFactory = Box<
    dyn Fn(Arc<Dataset>, DistanceRef, usize) -> Result<Box<dyn KnnIndex>, BuildError>
        + Send
        + Sync,
>;

/// Builds an unbuilt tree candidate with a leaf size.
pub type TreeFactory = Box<
    dyn Fn(Arc<Dataset>, DistanceRef, usize) -> Result<Box<dyn DistancePriorityIndex>, BuildError>
        + Send
        + Sync,
>;

/// Which index structures the optimizer may construct.
#[derive(Default)]
pub struct CapabilityRegistry {
    pub(crate) matrix: Option<MatrixFactory>,
    pub(crate) knn_preprocessor: Option<KnnFactory>,
    pub(crate) cover_tree: Option<TreeFactory>,
    pub(crate) vp_tree: Option<TreeFactory>,
    pub(crate) kd_tree: Option<TreeFactory>,
}

impl CapabilityRegistry {
    /// A registry with no candidates; every selection returns "no index".
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fill the slots from the structures compiled into this build.
    pub fn probe() -> Self {
        let mut reg = Self::empty();
        #[cfg(feature = "distance-matrix")]
        {
            reg.matrix = Some(Box::new(|ds, dist| {
                crate::index::DistanceMatrix::new(ds, dist)
                    .map(|m| Box::new(m) as Box<dyn DistanceMatrixIndex>)
            }));
        }
        #[cfg(not(feature = "distance-matrix"))]
        tracing::debug!("distance matrix support not compiled in");

        #[cfg(feature = "knn-preprocessor")]
        {
            reg.knn_preprocessor = Some(Box::new(|ds, dist, max_k| {
                crate::index::MaterializedKnn::new(ds, dist, max_k)
                    .map(|p| Box::new(p) as Box<dyn KnnIndex>)
            }));
        }
        #[cfg(not(feature = "knn-preprocessor"))]
        tracing::debug!("knn preprocessor support not compiled in");

        #[cfg(feature = "cover-tree")]
        {
            reg.cover_tree = Some(Box::new(|ds, dist, leaf| {
                crate::index::CoverTree::new(ds, dist, leaf)
                    .map(|t| Box::new(t) as Box<dyn DistancePriorityIndex>)
            }));
        }
        #[cfg(not(feature = "cover-tree"))]
        tracing::debug!("cover tree support not compiled in");

        #[cfg(feature = "vp-tree")]
        {
            reg.vp_tree = Some(Box::new(|ds, dist, leaf| {
                crate::index::VpTree::new(ds, dist, leaf)
                    .map(|t| Box::new(t) as Box<dyn DistancePriorityIndex>)
            }));
        }
        #[cfg(not(feature = "vp-tree"))]
        tracing::debug!("VP tree support not compiled in");

        #[cfg(feature = "kd-tree")]
        {
            reg.kd_tree = Some(Box::new(|ds, dist, leaf| {
                crate::index::KdTree::new(ds, dist, leaf)
                    .map(|t| Box::new(t) as Box<dyn DistancePriorityIndex>)
            }));
        }
        #[cfg(not(feature = "kd-tree"))]
        tracing::debug!("k-d tree support not compiled in");

        reg
    }

    /// Replace the distance-matrix factory.
    pub fn with_matrix(mut self, factory: MatrixFactory) -> Self {
        self.matrix = Some(factory);
        self
    }

    /// Replace the kNN-preprocessor factory.
    pub fn with_knn_preprocessor(mut self, factory: KnnFactory) -> Self {
        self.knn_preprocessor = Some(factory);
        self
    }

    /// Replace the cover-tree factory.
    pub fn with_cover_tree(mut self, factory: TreeFactory) -> Self {
        self.cover_tree = Some(factory);
        self
    }

    /// Replace the VP-tree factory.
    pub fn with_vp_tree(mut self, factory: TreeFactory) -> Self {
        self.vp_tree = Some(factory);
        self
    }

    /// Replace the k-d-tree factory.
    pub fn with_kd_tree(mut self, factory: TreeFactory) -> Self {
        self.kd_tree = Some(factory);
        self
    }

    /// Remove the distance-matrix candidate.
    pub fn without_matrix(mut self) -> Self {
        self.matrix = None;
        self
    }

    /// Remove the kNN-preprocessor candidate.
    pub fn without_knn_preprocessor(mut self) -> Self {
        self.knn_preprocessor = None;
        self
    }

    /// Remove the cover-tree candidate.
    pub fn without_cover_tree(mut self) -> Self {
        self.cover_tree = None;
        self
    }

    /// Remove the VP-tree candidate.
    pub fn without_vp_tree(mut self) -> Self {
        self.vp_tree = None;
        self
    }

    /// Remove the k-d-tree candidate.
    pub fn without_kd_tree(mut self) -> Self {
        self.kd_tree = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_fills_compiled_in_slots() {
        let reg = CapabilityRegistry::probe();
        assert_eq!(reg.matrix.is_some(), cfg!(feature = "distance-matrix"));
        assert_eq!(
            reg.knn_preprocessor.is_some(),
            cfg!(feature = "knn-preprocessor")
        );
        assert_eq!(reg.cover_tree.is_some(), cfg!(feature = "cover-tree"));
        assert_eq!(reg.vp_tree.is_some(), cfg!(feature = "vp-tree"));
        assert_eq!(reg.kd_tree.is_some(), cfg!(feature = "kd-tree"));
    }

    #[test]
    fn empty_has_no_candidates() {
        let reg = CapabilityRegistry::empty();
        assert!(reg.matrix.is_none());
        assert!(reg.knn_preprocessor.is_none());
        assert!(reg.cover_tree.is_none());
        assert!(reg.vp_tree.is_none());
        assert!(reg.kd_tree.is_none());
    }

    #[test]
    fn builders_replace_and_remove_slots() {
        let reg = CapabilityRegistry::empty()
            .with_kd_tree(Box::new(|_, _, _| {
                Err(BuildError::Construction("unused".into()))
            }))
            .without_vp_tree();
        assert!(reg.kd_tree.is_some());
        assert!(reg.vp_tree.is_none());
    }
}
