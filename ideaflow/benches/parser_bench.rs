//! Benchmarks for malformed-output recovery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ideaflow::cache::cache_key;
use ideaflow::parser::RecoveryParser;

const CLEAN: &str = r#"{"summary": "Shared grocery list", "target_users": ["Families", "Flatmates"]}"#;
const FENCED: &str = "Here you go:\n```json\n{\"summary\": \"Shared grocery list\", \"target_users\": [\"Families\",],}\n```";
const PROSE: &str = "I could not produce structured output for this idea, sorry.";

fn parser_benchmark(c: &mut Criterion) {
    let parser = RecoveryParser::new();

    c.bench_function("parse_clean", |b| {
        b.iter(|| parser.parse(black_box(CLEAN), None, None));
    });
    c.bench_function("parse_fenced_trailing_comma", |b| {
        b.iter(|| parser.parse(black_box(FENCED), None, None));
    });
    c.bench_function("parse_fallback", |b| {
        b.iter(|| parser.parse(black_box(PROSE), None, Some("idea_analysis")));
    });
}

fn cache_key_benchmark(c: &mut Criterion) {
    let prompt = "Analyse this idea. ".repeat(200);
    c.bench_function("cache_key", |b| {
        b.iter(|| cache_key(Some("idea_analysis"), Some("You are a product analyst."), black_box(&prompt)));
    });
}

criterion_group!(benches, parser_benchmark, cache_key_benchmark);
criterion_main!(benches);
