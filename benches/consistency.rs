//! Benchmarks for knowledge consistency scoring and relevance lookup.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use poet_bench::knowledge::{KnowledgeQuery, KnowledgeStore, KnowledgeUnit};

const VOCABULARY: &[&str] = &[
    "market", "growth", "battery", "cost", "policy", "demand", "supply", "risk", "capital",
    "revenue", "margin", "adoption", "regulation", "infrastructure", "forecast", "segment",
    "pricing", "competition", "innovation", "efficiency", "storage", "grid", "subsidy", "export",
];

fn sentence(rng: &mut impl Rng, words: usize) -> String {
    (0..words)
        .map(|_| VOCABULARY[rng.gen_range(0..VOCABULARY.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn seeded_store(units: usize) -> KnowledgeStore {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let store = KnowledgeStore::in_memory();
    let batch: Vec<KnowledgeUnit> = (0..units)
        .map(|i| {
            let tag = VOCABULARY[i % VOCABULARY.len()].to_string();
            KnowledgeUnit::new("seed", i, sentence(&mut rng, 16), "energy", vec![tag])
                .with_quality(rng.gen_range(1.0..5.0))
        })
        .collect();
    store.add_all(batch).unwrap();
    store
}

fn bench_consistency(c: &mut Criterion) {
    let store = seeded_store(1_000);
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let new_units: Vec<KnowledgeUnit> = (0..10)
        .map(|i| KnowledgeUnit::new("new", i, sentence(&mut rng, 16), "energy", Vec::new()))
        .collect();

    c.bench_function("consistency_10_vs_1k", |bench| {
        bench.iter(|| black_box(store.consistency(&new_units, "energy")))
    });
}

fn bench_find_relevant(c: &mut Criterion) {
    let store = seeded_store(1_000);
    let query = KnowledgeQuery::domain("energy")
        .with_tags(["battery", "grid"])
        .with_keywords(["storage"])
        .with_limit(10);

    c.bench_function("find_relevant_1k", |bench| {
        bench.iter(|| black_box(store.find_relevant(&query)))
    });
}

criterion_group!(benches, bench_consistency, bench_find_relevant);
criterion_main!(benches);
