use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use reelbatch::credentials::{Credential, CredentialPool};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn make_pool(size: usize) -> CredentialPool {
    let credentials = (0..size)
        .map(|i| Credential::new(format!("api_{i}"), format!("bench-secret-{i:04}")))
        .collect();
    CredentialPool::new(credentials)
}

/// Round-robin acquire with every key available.
fn bench_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire");
    for size in [1usize, 8, 64] {
        let pool = make_pool(size);
        group.bench_with_input(BenchmarkId::new("available", size), &pool, |b, pool| {
            b.iter(|| pool.acquire());
        });
    }
    group.finish();
}

/// Acquire when all but the last key are blocked, so every call scans the pool.
fn bench_acquire_mostly_blocked(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_blocked");
    for size in [8usize, 64] {
        let pool = make_pool(size);
        for i in 0..size - 1 {
            pool.block(&format!("api_{i}"), Duration::from_secs(3600));
        }
        group.bench_with_input(BenchmarkId::new("one_left", size), &pool, |b, pool| {
            b.iter(|| pool.acquire());
        });
    }
    group.finish();
}

/// Four threads contending on one pool.
fn bench_contended(c: &mut Criterion) {
    let pool = Arc::new(make_pool(8));
    c.bench_function("pool_acquire_contended_4x100", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            black_box(pool.acquire().ok());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().ok();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_acquire,
    bench_acquire_mostly_blocked,
    bench_contended
);
criterion_main!(benches);
