use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reproducible unit vectors for index tests
pub(crate) fn random_unit_vectors(count: usize, dimensions: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut vector: Vec<f32> = (0..dimensions)
                .map(|_| rng.random_range(-1.0_f32..1.0))
                .collect();
            l2_normalize(&mut vector);
            vector
        })
        .collect()
}

#[test]
fn cosine_of_identical_and_opposite_vectors() {
    let a = [1.0, 2.0, 3.0];
    let b = [-1.0, -2.0, -3.0];

    assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
}

#[test]
fn cosine_with_zero_vector_is_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
}

#[test]
fn normalize_produces_unit_length() {
    let mut vector = vec![3.0, 4.0];
    l2_normalize(&mut vector);
    assert_eq!(vector, vec![0.6, 0.8]);

    let mut zero = vec![0.0, 0.0];
    l2_normalize(&mut zero);
    assert_eq!(zero, vec![0.0, 0.0]);
}

#[test]
fn linear_search_orders_by_similarity() {
    let mut index = LinearIndex::new(2);
    index.add("east", &[1.0, 0.0]).expect("add east");
    index.add("north", &[0.0, 1.0]).expect("add north");
    index.add("northeast", &[1.0, 1.0]).expect("add northeast");

    let hits = index.search(&[1.0, 0.1], 3).expect("search should succeed");
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["east", "northeast", "north"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn linear_search_truncates_and_handles_empty() {
    let mut index = LinearIndex::new(3);
    assert!(index.search(&[1.0, 0.0, 0.0], 5).expect("empty search").is_empty());

    for (i, vector) in random_unit_vectors(10, 3, 7).iter().enumerate() {
        index.add(&format!("v{i}"), vector).expect("add vector");
    }
    assert_eq!(index.search(&[1.0, 0.0, 0.0], 4).expect("search").len(), 4);
    assert_eq!(index.search(&[1.0, 0.0, 0.0], 50).expect("search").len(), 10);
    assert!(index.search(&[1.0, 0.0, 0.0], 0).expect("search").is_empty());
}

#[test]
fn linear_rejects_wrong_width_without_mutation() {
    let mut index = LinearIndex::new(3);
    index.add("a", &[1.0, 0.0, 0.0]).expect("add a");

    let error = index.add("b", &[1.0, 0.0]).expect_err("narrow vector");
    assert!(matches!(
        error,
        crate::RagError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(index.size(), 1);
    assert!(!index.contains("b"));

    assert!(index.search(&[1.0; 4], 1).is_err());
}

#[test]
fn linear_add_replaces_and_remove_reports() {
    let mut index = LinearIndex::new(2);
    index.add("a", &[1.0, 0.0]).expect("add a");
    index.add("a", &[0.0, 1.0]).expect("replace a");
    assert_eq!(index.size(), 1);

    let hits = index.search(&[0.0, 1.0], 1).expect("search");
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    assert!(index.remove("a"));
    assert!(!index.remove("a"));
    assert!(index.is_empty());
}

#[test]
fn linear_ties_break_by_id() {
    let mut index = LinearIndex::new(2);
    index.add("b", &[1.0, 0.0]).expect("add b");
    index.add("a", &[2.0, 0.0]).expect("add a");

    let hits = index.search(&[1.0, 0.0], 2).expect("search");
    assert_eq!(hits[0].id, "a");
    assert_eq!(hits[1].id, "b");
}

#[test]
fn linear_stats() {
    let mut index = LinearIndex::new(4);
    index.add("a", &[1.0, 0.0, 0.0, 0.0]).expect("add a");
    index.clear();
    assert_eq!(index.stats().node_count, 0);

    index.add("a", &[1.0, 0.0, 0.0, 0.0]).expect("add a");
    let stats = index.stats();
    assert_eq!(stats.kind, IndexKind::Linear);
    assert_eq!(stats.node_count, 1);
    assert!(stats.memory_estimate_bytes > 0);
}
