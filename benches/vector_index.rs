use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nexus_rag::embeddings::{LocalEmbedder, split_text};
use nexus_rag::index::{HnswConfig, HnswIndex, LinearIndex, VectorIndex, l2_normalize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const DIMENSIONS: usize = 384;

fn unit_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut vector: Vec<f32> = (0..DIMENSIONS)
                .map(|_| rng.random_range(-1.0_f32..1.0))
                .collect();
            l2_normalize(&mut vector);
            vector
        })
        .collect()
}

fn fill<I: VectorIndex>(index: &mut I, vectors: &[Vec<f32>]) {
    for (i, vector) in vectors.iter().enumerate() {
        index
            .add(&format!("v{i}"), vector)
            .expect("vectors have index width");
    }
}

pub fn search_benchmark(c: &mut Criterion) {
    let queries = unit_vectors(32, 7);
    let mut group = c.benchmark_group("search_top10");

    for size in [1_000, 5_000] {
        let vectors = unit_vectors(size, 42);

        let mut linear = LinearIndex::new(DIMENSIONS);
        fill(&mut linear, &vectors);
        let mut graph = HnswIndex::with_seed(DIMENSIONS, HnswConfig::default(), 42);
        fill(&mut graph, &vectors);

        group.bench_with_input(BenchmarkId::new("linear", size), &linear, |b, index| {
            b.iter(|| {
                for query in &queries {
                    black_box(index.search(black_box(query), 10).expect("search"));
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("hnsw", size), &graph, |b, index| {
            b.iter(|| {
                for query in &queries {
                    black_box(index.search(black_box(query), 10).expect("search"));
                }
            });
        });
    }
    group.finish();
}

pub fn insert_benchmark(c: &mut Criterion) {
    let vectors = unit_vectors(1_000, 11);
    c.bench_function("hnsw_insert_1000", |b| {
        b.iter(|| {
            let mut graph = HnswIndex::with_seed(DIMENSIONS, HnswConfig::default(), 3);
            fill(&mut graph, black_box(&vectors));
            graph
        });
    });
}

pub fn pipeline_benchmark(c: &mut Criterion) {
    let text = "Hierarchical navigable small world graphs trade exactness for speed. "
        .repeat(400);
    let embedder = LocalEmbedder::new(DIMENSIONS);

    c.bench_function("chunk_and_embed_locally", |b| {
        b.iter(|| {
            let chunks = split_text(black_box(&text), 800, 100).expect("valid chunking");
            chunks
                .iter()
                .map(|chunk| embedder.embed(chunk))
                .collect::<Vec<_>>()
        });
    });
}

criterion_group!(benches, search_benchmark, insert_benchmark, pipeline_benchmark);
criterion_main!(benches);
