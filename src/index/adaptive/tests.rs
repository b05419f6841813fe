use super::*;
use crate::index::tests::random_unit_vectors;

const DIMS: usize = 16;

fn small_threshold_index(threshold: usize) -> AdaptiveIndex {
    AdaptiveIndex::with_threshold(DIMS, threshold, HnswConfig::default()).with_seed(5)
}

#[test]
fn starts_linear_and_migrates_at_threshold() {
    let vectors = random_unit_vectors(50, DIMS, 11);
    let mut index = small_threshold_index(50);

    for (i, vector) in vectors.iter().take(49).enumerate() {
        index.add(&format!("v{i}"), vector).expect("add");
    }
    assert_eq!(index.kind(), IndexKind::Linear);
    assert_eq!(index.size(), 49);

    index.add("v49", &vectors[49]).expect("add");
    assert_eq!(index.kind(), IndexKind::Graph);
    assert_eq!(index.size(), 50);
    for i in 0..50 {
        assert!(index.contains(&format!("v{i}")));
    }
}

#[test]
fn migration_is_one_way() {
    let vectors = random_unit_vectors(20, DIMS, 12);
    let mut index = small_threshold_index(10);
    for (i, vector) in vectors.iter().enumerate() {
        index.add(&format!("v{i}"), vector).expect("add");
    }
    assert_eq!(index.kind(), IndexKind::Graph);

    for i in 0..15 {
        assert!(index.remove(&format!("v{i}")));
    }
    assert_eq!(index.size(), 5);
    assert_eq!(index.kind(), IndexKind::Graph);

    index.clear();
    assert!(index.is_empty());
    assert_eq!(index.kind(), IndexKind::Graph);
}

#[test]
fn default_threshold_migration_keeps_self_search() {
    let vectors = random_unit_vectors(1050, DIMS, 2024);
    let mut index = AdaptiveIndex::new(DIMS).with_seed(3);
    assert_eq!(index.threshold(), DEFAULT_HNSW_THRESHOLD);

    for (i, vector) in vectors.iter().enumerate() {
        index.add(&format!("v{i}"), vector).expect("add");
        if i + 1 < DEFAULT_HNSW_THRESHOLD {
            assert_eq!(index.kind(), IndexKind::Linear);
        }
    }
    assert_eq!(index.kind(), IndexKind::Graph);
    assert_eq!(index.size(), 1050);

    for i in (0..1050).step_by(50) {
        let hits = index.search(&vectors[i], 10).expect("search");
        let own = hits
            .iter()
            .find(|hit| hit.id == format!("v{i}"))
            .expect("vector should find itself after migration");
        assert!(own.score >= 0.99);
    }
}

#[test]
fn dimension_checks_pass_through() {
    let mut index = small_threshold_index(10);
    assert_eq!(index.dimensions(), DIMS);

    assert!(index.add("bad", &[0.5; 4]).is_err());
    assert!(index.is_empty());
    assert!(index.search(&[0.5; 4], 1).is_err());
}

#[test]
fn stats_follow_the_backing_index() {
    let vectors = random_unit_vectors(12, DIMS, 13);
    let mut index = small_threshold_index(10);

    index.add("v0", &vectors[0]).expect("add");
    assert_eq!(index.stats().kind, IndexKind::Linear);

    for (i, vector) in vectors.iter().enumerate().skip(1) {
        index.add(&format!("v{i}"), vector).expect("add");
    }
    let stats = index.stats();
    assert_eq!(stats.kind, IndexKind::Graph);
    assert_eq!(stats.node_count, 12);
}

#[test]
fn serializes_with_its_mode() {
    let vectors = random_unit_vectors(3, DIMS, 14);
    let mut index = small_threshold_index(10);
    for (i, vector) in vectors.iter().enumerate() {
        index.add(&format!("v{i}"), vector).expect("add");
    }

    let value = serde_json::to_value(&index).expect("serialize");
    assert_eq!(value["backing"]["mode"], "linear");

    let decoded: AdaptiveIndex = serde_json::from_value(value).expect("deserialize");
    assert_eq!(decoded.size(), 3);
    assert_eq!(decoded.kind(), IndexKind::Linear);
}
