//! Benchmarks for brute-force vector index queries.
//!
//! Uses 5,000 entries by default. Set `BENCH_FULL_SCALE=1` to run against
//! 50,000 entries:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p furrow-vector
//! ```

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Map};

use furrow_vector::embedding::MockEmbedding;
use furrow_vector::index::{MetadataFilter, VectorIndex};

const CI_ENTRY_COUNT: usize = 5_000;
const FULL_SCALE_ENTRY_COUNT: usize = 50_000;
const DIMENSIONS: usize = 384;

const FIELDS: [&str; 4] = ["north-40", "south-10", "creek-bottom", "home-quarter"];
const CROPS: [&str; 3] = ["corn", "soybean", "wheat"];

fn entry_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_ENTRY_COUNT
    } else {
        CI_ENTRY_COUNT
    }
}

fn visit_digest(i: usize) -> String {
    format!(
        "Field: {}. Crop: {}. Notes: Scouted rows {} through {}, some lodging after the storm. Severity: {}/5",
        FIELDS[i % FIELDS.len()],
        CROPS[i % CROPS.len()],
        i,
        i + 12,
        i % 6
    )
}

fn build_index(count: usize) -> VectorIndex {
    let index = VectorIndex::in_memory("bench");
    for i in 0..count {
        let text = visit_digest(i);
        let mut metadata = Map::new();
        metadata.insert("field_id".into(), json!(FIELDS[i % FIELDS.len()]));
        metadata.insert("created_at".into(), json!(1_700_000_000_000i64 + i as i64));
        index
            .upsert(
                &format!("visit-{}", i),
                MockEmbedding::hash_to_vector(&text, DIMENSIONS),
                text,
                metadata,
            )
            .expect("upsert failed");
    }
    assert_eq!(index.count(), count);
    index
}

fn bench_query(c: &mut Criterion) {
    let count = entry_count();
    let index = build_index(count);
    let query = MockEmbedding::hash_to_vector("corn rootworm near the creek", DIMENSIONS);

    let mut group = c.benchmark_group("vector_index_query");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top10_unfiltered_{}", count), |b| {
        b.iter(|| {
            let hits = index
                .query(&query, 10, &MetadataFilter::new())
                .expect("query failed");
            assert_eq!(hits.len(), 10);
            hits
        });
    });

    let mut by_field = MetadataFilter::new();
    by_field.insert("field_id".into(), json!("creek-bottom"));
    group.bench_function(format!("top10_field_filter_{}", count), |b| {
        b.iter(|| index.query(&query, 10, &by_field).expect("query failed"));
    });

    // Over-fetched candidate window used by created_at_min searches.
    group.bench_function(format!("top20_overfetch_{}", count), |b| {
        b.iter(|| index.query(&query, 20, &MetadataFilter::new()).expect("query failed"));
    });

    group.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
