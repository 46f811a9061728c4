//! Benchmarks for the engine's hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genflow::governor::{RateGovernor, RateLimitPolicy};
use genflow::retry::RetryPolicy;

fn backoff_benchmark(c: &mut Criterion) {
    let policy = RetryPolicy::new().with_max_attempts(10);
    c.bench_function("delay_for", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(policy.delay_for(black_box(attempt)));
            }
        });
    });
}

fn governor_benchmark(c: &mut Criterion) {
    let governor = RateGovernor::new();
    let policy = RateLimitPolicy::new(u32::MAX, 60_000);
    let identities: Vec<String> = (0..1000).map(|i| format!("caller-{i}")).collect();
    let mut next = 0usize;

    c.bench_function("check_limit", |b| {
        b.iter(|| {
            let identity = &identities[next % identities.len()];
            next += 1;
            black_box(governor.check_limit(identity, &policy))
        });
    });
}

criterion_group!(benches, backoff_benchmark, governor_benchmark);
criterion_main!(benches);
