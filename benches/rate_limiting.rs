use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dictation_guard::{
    BaselineConfig, BaselineTracker, ErrorReport, ErrorReporter, Fingerprint, KernelMetrics,
    LimiterBaseline, RateLimiter, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;

fn limiter(resources: usize, capacity: u32) -> RateLimiter {
    let baselines = (0..resources)
        .map(|i| LimiterBaseline::new(format!("resource-{i}"), capacity, Duration::from_secs(60)));
    RateLimiter::new(baselines, Arc::new(SystemClock::new()), KernelMetrics::new())
        .expect("valid baselines")
}

/// Benchmark fingerprint computation speed
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    group.bench_function("message_only", |b| {
        b.iter(|| {
            Fingerprint::compute(
                black_box("EngineError"),
                None,
                black_box("model failed to load"),
                None,
            )
        })
    });

    let backtrace = (0..30)
        .map(|i| format!("  {i}: dictation::engine::frame_{i}\n     at src/engine.rs:{i}"))
        .collect::<Vec<_>>()
        .join("\n");
    group.bench_function("with_backtrace", |b| {
        b.iter(|| {
            Fingerprint::compute(
                black_box("EngineError"),
                Some(black_box(backtrace.as_str())),
                black_box("model failed to load"),
                Some("Io"),
            )
        })
    });

    group.finish();
}

/// Benchmark single-threaded admission throughput
fn bench_single_threaded_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded");
    group.throughput(Throughput::Elements(1000));

    for capacity in [100u32, 1_000_000] {
        group.bench_with_input(
            BenchmarkId::new("try_consume", capacity),
            &capacity,
            |b, &capacity| {
                let limiter = limiter(1, capacity);
                b.iter(|| {
                    for _ in 0..1000 {
                        black_box(limiter.try_consume(black_box("resource-0")));
                    }
                })
            },
        );
    }

    group.bench_function("unknown_resource", |b| {
        let limiter = limiter(1, 100);
        b.iter(|| {
            for _ in 0..1000 {
                black_box(limiter.try_consume(black_box("not-registered")));
            }
        })
    });

    group.finish();
}

/// Benchmark multi-threaded concurrent throughput
fn bench_concurrent_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");

    for num_threads in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements((*num_threads as u64) * 1000));

        group.bench_with_input(
            BenchmarkId::new("threads", num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let limiter = Arc::new(limiter(num_threads, 1_000_000));

                    let mut handles = vec![];
                    for i in 0..num_threads {
                        let limiter = Arc::clone(&limiter);
                        let handle = std::thread::spawn(move || {
                            // Each thread uses its own resource to avoid contention
                            let resource = format!("resource-{i}");
                            for _ in 0..1000 {
                                black_box(limiter.try_consume(black_box(&resource)));
                            }
                        });
                        handles.push(handle);
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }
                })
            },
        );
    }

    group.bench_function("shared_resource_4_threads", |b| {
        b.iter(|| {
            let limiter = Arc::new(limiter(1, 1_000_000));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    std::thread::spawn(move || {
                        for _ in 0..1000 {
                            black_box(limiter.try_consume("resource-0"));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });

    group.finish();
}

/// Benchmark the per-operation monitoring hot paths
fn bench_monitoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitoring");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("record_operation", |b| {
        let tracker = BaselineTracker::new(
            BaselineConfig::default(),
            Arc::new(SystemClock::new()),
            KernelMetrics::new(),
        );
        b.iter(|| {
            for i in 0..1000u64 {
                black_box(
                    tracker.record_operation("transcription", Duration::from_millis(100 + i % 7)),
                );
            }
        })
    });

    group.bench_function("report_repeated_error", |b| {
        let reporter = ErrorReporter::new(Arc::new(SystemClock::new()), KernelMetrics::new());
        b.iter(|| {
            for _ in 0..1000 {
                black_box(reporter.report(
                    ErrorReport::new("InjectError", "target window closed"),
                    Some("injection"),
                    None,
                ));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_single_threaded_throughput,
    bench_concurrent_throughput,
    bench_monitoring
);
criterion_main!(benches);
