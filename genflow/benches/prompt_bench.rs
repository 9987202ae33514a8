//! Benchmarks for prompt resolution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genflow::config::{GenerationParams, KeywordMode};
use genflow::orchestrator::PromptPlan;

fn params(mode: KeywordMode) -> GenerationParams {
    GenerationParams {
        template: Some("a {keyword} at dusk, take {variation} of item {index}".to_string()),
        keywords: (0..64).map(|i| format!("lighthouse-{i}")).collect(),
        keyword_mode: mode,
        count: 64,
        variations: 4,
        seed: Some(7),
        ..GenerationParams::default()
    }
}

fn prompt_benchmark(c: &mut Criterion) {
    for (name, mode) in [
        ("resolve_sequential", KeywordMode::Sequential),
        ("resolve_random", KeywordMode::Random),
    ] {
        let Ok(plan) = PromptPlan::new(&params(mode)) else {
            return;
        };
        c.bench_function(name, |b| {
            let mut rng = plan.rng();
            b.iter(|| {
                for index in 0..256 {
                    black_box(plan.resolve(black_box(index), &mut rng));
                }
            });
        });
    }

    c.bench_function("plan_new", |b| {
        let params = params(KeywordMode::Sequential);
        b.iter(|| black_box(PromptPlan::new(black_box(&params)).is_ok()));
    });
}

criterion_group!(benches, prompt_benchmark);
criterion_main!(benches);
