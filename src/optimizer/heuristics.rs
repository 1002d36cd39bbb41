//! Leaf-size heuristics for the tree candidates.
//!
//! Small leaves pay off when queries visit few leaves (selective kNN and
//! range workloads); larger leaves amortize traversal overhead when many
//! records are touched anyway (priority search, low-selectivity workloads).
//! The per-tree defaults come from empirical tuning; the low-selectivity
//! override scales logarithmically with the dataset size.

use crate::index::IndexKind;

/// The shape of the query workload an index is being selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Knn,
    Range,
    Priority,
}

/// Default leaf size for a tree candidate under a query shape.
///
/// Only meaningful for the tree kinds; the table-based candidates have no
/// leaf parameter.
pub(crate) fn tree_leaf_size(kind: IndexKind, shape: QueryShape) -> usize {
    match (kind, shape) {
        (IndexKind::CoverTree, _) => 20,
        (IndexKind::VpTree, QueryShape::Priority) => 8,
        (IndexKind::VpTree, _) => 5,
        (IndexKind::KdTree, QueryShape::Priority) => 10,
        (IndexKind::KdTree, _) => 3,
        _ => 1,
    }
}

/// Leaf size for low-selectivity workloads: `3 * (1 + floor(log2 n))`.
pub(crate) fn low_selectivity_leaf_size(n: usize) -> usize {
    if n == 0 {
        return 3;
    }
    3 * (1 + n.ilog2() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_tree_defaults() {
        for shape in [QueryShape::Knn, QueryShape::Range, QueryShape::Priority] {
            assert_eq!(tree_leaf_size(IndexKind::CoverTree, shape), 20);
        }
        assert_eq!(tree_leaf_size(IndexKind::VpTree, QueryShape::Knn), 5);
        assert_eq!(tree_leaf_size(IndexKind::VpTree, QueryShape::Range), 5);
        assert_eq!(tree_leaf_size(IndexKind::VpTree, QueryShape::Priority), 8);
        assert_eq!(tree_leaf_size(IndexKind::KdTree, QueryShape::Knn), 3);
        assert_eq!(tree_leaf_size(IndexKind::KdTree, QueryShape::Range), 3);
        assert_eq!(tree_leaf_size(IndexKind::KdTree, QueryShape::Priority), 10);
    }

    #[test]
    fn low_selectivity_scales_logarithmically() {
        assert_eq!(low_selectivity_leaf_size(1), 3);
        assert_eq!(low_selectivity_leaf_size(2), 6);
        assert_eq!(low_selectivity_leaf_size(100), 21);
        assert_eq!(low_selectivity_leaf_size(1 << 16), 51);
        assert_eq!(low_selectivity_leaf_size(0), 3);
    }

    proptest::proptest! {
        #[test]
        fn low_selectivity_matches_float_log2(n in 1usize..1_000_000_000) {
            let expected = 3 * (1 + (n as f64).log2().floor() as usize);
            proptest::prop_assert_eq!(low_selectivity_leaf_size(n), expected);
        }

        #[test]
        fn low_selectivity_is_monotone(n in 1usize..1_000_000) {
            proptest::prop_assert!(
                low_selectivity_leaf_size(n + 1) >= low_selectivity_leaf_size(n)
            );
        }
    }
}
