//! Property tests over the public API: distance function declarations and
//! exactness of the tree indexes against brute force.

use std::sync::Arc;

use proptest::prelude::*;

use proxim::index::{CoverTree, KdTree, VpTree};
use proxim::{
    Dataset, DistanceFunction, DistanceRef, Euclidean, KnnIndex, Manhattan, ProximityIndex,
    RecordId, SquaredEuclidean,
};

fn vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, dim)
}

fn small_dataset() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(vector(3), 10..60)
}

// Compare distance sequences, not identifiers: ties between equidistant
// records may be broken differently by each structure.
fn brute_knn_distances(ds: &Dataset, dist: &dyn DistanceFunction, q: &[f32], k: usize) -> Vec<f32> {
    let mut all: Vec<f32> = ds.ids().map(|i| dist.evaluate(q, ds.row(i))).collect();
    all.sort_by(|a, b| a.total_cmp(b));
    all.truncate(k);
    all
}

proptest! {
    #[test]
    fn euclidean_is_symmetric(a in vector(4), b in vector(4)) {
        let d_ab = Euclidean.evaluate(&a, &b);
        let d_ba = Euclidean.evaluate(&b, &a);
        prop_assert!((d_ab - d_ba).abs() <= 1e-4 * d_ab.abs().max(1.0));
    }

    #[test]
    fn metric_distances_satisfy_the_triangle_inequality(
        a in vector(4),
        b in vector(4),
        c in vector(4),
    ) {
        for dist in [&Euclidean as &dyn DistanceFunction, &Manhattan] {
            let ab = dist.evaluate(&a, &b);
            let bc = dist.evaluate(&b, &c);
            let ac = dist.evaluate(&a, &c);
            prop_assert!(ac <= ab + bc + 1e-3 * (ab + bc).max(1.0));
        }
    }

    #[test]
    fn self_distance_is_zero(a in vector(5)) {
        prop_assert_eq!(Euclidean.evaluate(&a, &a), 0.0);
        prop_assert_eq!(Manhattan.evaluate(&a, &a), 0.0);
    }

    #[test]
    fn squared_euclidean_ranks_like_euclidean(
        q in vector(3),
        a in vector(3),
        b in vector(3),
    ) {
        let plain = Euclidean.evaluate(&q, &a).total_cmp(&Euclidean.evaluate(&q, &b));
        let squared =
            SquaredEuclidean.evaluate(&q, &a).total_cmp(&SquaredEuclidean.evaluate(&q, &b));
        // sqrt is monotone, so strict orderings must agree; ties may differ
        // only through rounding, which the strict cases below exclude.
        if plain != std::cmp::Ordering::Equal && squared != std::cmp::Ordering::Equal {
            prop_assert_eq!(plain, squared);
        }
    }

    #[test]
    fn tree_knn_matches_brute_force(rows in small_dataset(), probe in 0usize..10, k in 1usize..6) {
        let ds = Arc::new(Dataset::from_rows(&rows).unwrap());
        let probe = (probe % rows.len()) as RecordId;
        let q = ds.row(probe).to_vec();
        let expected = brute_knn_distances(&ds, &Euclidean, &q, k);
        let dist: DistanceRef = Arc::new(Euclidean);

        let mut kd = KdTree::new(ds.clone(), dist.clone(), 3).unwrap();
        kd.initialize().unwrap();
        let mut vp = VpTree::new(ds.clone(), dist.clone(), 5).unwrap();
        vp.initialize().unwrap();
        let mut cover = CoverTree::new(ds.clone(), dist, 20).unwrap();
        cover.initialize().unwrap();

        for tree in [&kd as &dyn KnnIndex, &vp, &cover] {
            let got: Vec<f32> =
                tree.knn_by_object(&q, k).into_iter().map(|(_, d)| d).collect();
            prop_assert_eq!(&got, &expected, "{} disagrees", tree.kind().label());
        }
    }
}
