use super::*;
use crate::RagError;
use crate::index::LinearIndex;
use crate::index::tests::random_unit_vectors;

const DIMS: usize = 16;

fn seeded_index(config: HnswConfig) -> HnswIndex {
    HnswIndex::with_seed(DIMS, config, 42)
}

fn populated(count: usize, config: HnswConfig) -> (HnswIndex, Vec<Vec<f32>>) {
    let vectors = random_unit_vectors(count, DIMS, 1234);
    let mut index = seeded_index(config);
    for (i, vector) in vectors.iter().enumerate() {
        index.add(&format!("n{i}"), vector).expect("add should succeed");
    }
    (index, vectors)
}

fn assert_graph_invariants(index: &HnswIndex) {
    let m = index.config().m;
    let ids: Vec<String> = index.ids().map(str::to_string).collect();

    for id in &ids {
        let level = index.level_of(id).expect("listed id has a level");
        assert!(level <= index.level_max());
        for layer in 0..=level {
            let neighbors = index.neighbors(id, layer).expect("layer exists");
            assert!(neighbors.len() <= m, "{id} has {} links on {layer}", neighbors.len());
            for neighbor in neighbors {
                assert!(index.contains(neighbor), "{id} links to missing {neighbor}");
                assert!(
                    index.level_of(neighbor).expect("neighbor has level") >= layer,
                    "{neighbor} linked above its level"
                );
            }
        }
    }

    match index.entry_point() {
        Some(entry) => assert_eq!(index.level_of(entry), Some(index.level_max())),
        None => assert!(index.is_empty()),
    }
}

#[test]
fn empty_index_searches_to_nothing() {
    let index = seeded_index(HnswConfig::default());
    assert!(index.search(&[0.0; DIMS], 5).expect("search").is_empty());
    assert!(index.entry_point().is_none());
}

#[test]
fn single_node_is_entry_point() {
    let mut index = seeded_index(HnswConfig::default());
    let vector = random_unit_vectors(1, DIMS, 9).remove(0);
    index.add("only", &vector).expect("add");

    assert_eq!(index.entry_point(), Some("only"));
    let hits = index.search(&vector, 3).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "only");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn graph_invariants_hold_after_inserts() {
    let config = HnswConfig {
        m: 4,
        ef_construction: 32,
        ef_search: 16,
    };
    let (index, _) = populated(300, config);

    assert_eq!(index.size(), 300);
    assert_graph_invariants(&index);
}

#[test]
fn graph_invariants_hold_after_removals() {
    let config = HnswConfig {
        m: 4,
        ef_construction: 32,
        ef_search: 16,
    };
    let (mut index, vectors) = populated(200, config);

    for i in (0..200).step_by(3) {
        assert!(index.remove(&format!("n{i}")));
    }
    assert!(!index.remove("n0"));
    assert_graph_invariants(&index);

    for id in index.ids() {
        let level = index.level_of(id).expect("level");
        for layer in 0..=level {
            let neighbors = index.neighbors(id, layer).expect("layer");
            assert!(
                neighbors.iter().all(|n| {
                    let number: usize = n.trim_start_matches('n').parse().expect("numeric id");
                    number % 3 != 0
                }),
                "{id} still links to a removed node"
            );
        }
    }

    let hits = index.search(&vectors[1], 5).expect("search");
    assert!(hits.iter().all(|hit| index.contains(&hit.id)));
}

#[test]
fn removing_entry_point_promotes_highest_level() {
    let (mut index, _) = populated(100, HnswConfig::default());

    while let Some(entry) = index.entry_point().map(str::to_string) {
        assert!(index.remove(&entry));
        assert_graph_invariants(&index);
    }
    assert!(index.is_empty());
    assert_eq!(index.level_max(), 0);
}

#[test]
fn self_search_finds_each_vector() {
    let (index, vectors) = populated(500, HnswConfig::default());

    for (i, vector) in vectors.iter().enumerate().step_by(25) {
        let hits = index.search(vector, 10).expect("search");
        let own = hits
            .iter()
            .find(|hit| hit.id == format!("n{i}"))
            .expect("vector should find itself");
        assert!(own.score >= 0.99);
    }
}

#[test]
fn recall_against_exact_search() {
    let (index, vectors) = populated(600, HnswConfig::default());
    let mut exact = LinearIndex::new(DIMS);
    for (i, vector) in vectors.iter().enumerate() {
        exact.add(&format!("n{i}"), vector).expect("add");
    }

    let queries = random_unit_vectors(20, DIMS, 777);
    let mut found = 0;
    for query in &queries {
        let truth: Vec<String> = exact
            .search(query, 10)
            .expect("exact search")
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        let approx = index.search(query, 10).expect("graph search");
        found += approx.iter().filter(|hit| truth.contains(&hit.id)).count();
    }

    let recall = found as f32 / (queries.len() * 10) as f32;
    assert!(recall >= 0.9, "recall was {recall}");
}

#[test]
fn results_are_sorted_and_bounded() {
    let (index, vectors) = populated(150, HnswConfig::default());

    let hits = index.search(&vectors[0], 7).expect("search");
    assert_eq!(hits.len(), 7);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(index.search(&vectors[0], 0).expect("search").is_empty());
}

#[test]
fn wrong_width_is_rejected_without_mutation() {
    let (mut index, _) = populated(10, HnswConfig::default());

    let error = index.add("bad", &[1.0; 3]).expect_err("narrow vector");
    assert!(matches!(
        error,
        RagError::DimensionMismatch {
            expected: DIMS,
            actual: 3
        }
    ));
    assert_eq!(index.size(), 10);
    assert!(!index.contains("bad"));
    assert!(index.search(&[1.0; 3], 1).is_err());
}

#[test]
fn re_adding_an_id_replaces_it() {
    let (mut index, vectors) = populated(50, HnswConfig::default());

    index.add("n0", &vectors[1]).expect("replace");
    assert_eq!(index.size(), 50);

    let hits = index.search(&vectors[1], 2).expect("search");
    assert!(hits.iter().any(|hit| hit.id == "n0"));
    assert_graph_invariants(&index);
}

#[test]
fn same_seed_builds_same_graph() {
    let (first, vectors) = populated(80, HnswConfig::default());
    let (second, _) = populated(80, HnswConfig::default());

    assert_eq!(first.entry_point(), second.entry_point());
    for id in first.ids() {
        assert_eq!(first.neighbors(id, 0), second.neighbors(id, 0));
    }
    assert_eq!(
        first.search(&vectors[3], 5).expect("search"),
        second.search(&vectors[3], 5).expect("search")
    );
}

#[test]
fn serde_round_trip_preserves_search() {
    let (index, vectors) = populated(120, HnswConfig::default());

    let encoded = serde_json::to_string(&index).expect("serialize");
    let decoded: HnswIndex = serde_json::from_str(&encoded).expect("deserialize");

    assert_eq!(decoded.size(), index.size());
    assert_eq!(decoded.entry_point(), index.entry_point());

    let ids = |hits: Vec<SearchHit>| hits.into_iter().map(|hit| hit.id).collect::<Vec<_>>();
    assert_eq!(
        ids(decoded.search(&vectors[5], 5).expect("search")),
        ids(index.search(&vectors[5], 5).expect("search"))
    );
}

#[test]
fn stats_describe_the_graph() {
    let (index, _) = populated(64, HnswConfig::default());
    let stats = index.stats();

    assert_eq!(stats.kind, IndexKind::Graph);
    assert_eq!(stats.node_count, 64);
    assert_eq!(stats.max_level, index.level_max());
    assert!(stats.avg_connections > 0.0);
    assert_eq!(
        stats.memory_estimate_bytes,
        64 * (DIMS * size_of::<f32>() + NODE_OVERHEAD_BYTES)
    );
}

#[test]
fn clear_resets_everything() {
    let (mut index, vectors) = populated(30, HnswConfig::default());
    index.clear();

    assert!(index.is_empty());
    assert!(index.entry_point().is_none());
    assert!(index.search(&vectors[0], 3).expect("search").is_empty());

    index.add("fresh", &vectors[0]).expect("add after clear");
    assert_eq!(index.entry_point(), Some("fresh"));
}

#[test]
fn level_draw_is_capped() {
    let mut index = seeded_index(HnswConfig {
        m: 2,
        ..HnswConfig::default()
    });
    for _ in 0..10_000 {
        assert!(index.random_level() <= MAX_LEVEL);
    }
}
