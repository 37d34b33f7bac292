//! Benchmarks for the Python sandbox.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use restricted_python_sandbox::prelude::*;
use restricted_python_sandbox::{global_cache, Compiler, SandboxOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const LOOP_SOURCE: &str = "\
total = 0
for i in range(1000):
    if i % 3 == 0:
        total += i
print(total)
";

const FIB_SOURCE: &str = "\
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)
print(fib(15))
";

const STRING_SOURCE: &str = "\
words = ' '.join(str(i) for i in range(200)).split()
print(len(','.join(w.upper() for w in words if '1' in w)))
";

fn bench_config() -> SandboxConfig {
    SandboxConfig::builder()
        .timeout(Duration::from_secs(30))
        .build()
}

/// Benchmark sandbox creation with and without the environment cache.
fn bench_sandbox_creation(c: &mut Criterion) {
    let config = bench_config();
    let mut group = c.benchmark_group("sandbox_creation");

    group.bench_function("uncached", |b| {
        b.iter(|| {
            global_cache().clear();
            let sandbox =
                PythonSandbox::with_options(config.clone(), SandboxOptions::uncached()).unwrap();
            black_box(sandbox)
        });
    });

    // Pre-warm the cache
    let _ = PythonSandbox::new(config.clone()).unwrap();
    group.bench_function("cached", |b| {
        b.iter(|| black_box(PythonSandbox::new(config.clone()).unwrap()));
    });

    group.finish();
}

/// Benchmark the restricted compiler on its own.
fn bench_compile(c: &mut Criterion) {
    let compiler = Compiler::new(["math", "random", "string", "json", "sys"], 100);
    let mut group = c.benchmark_group("compile");

    for (name, source) in [("loop", LOOP_SOURCE), ("fib", FIB_SOURCE), ("strings", STRING_SOURCE)] {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::new("source", name), source, |b, source| {
            b.iter(|| black_box(compiler.compile(source).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark Python code execution.
fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = PythonSandbox::new(bench_config()).unwrap();
    let mut group = c.benchmark_group("execution");

    group.bench_function("simple_print", |b| {
        b.iter(|| rt.block_on(async { black_box(sandbox.execute("print('Hello, World!')").await) }));
    });

    group.bench_function("loop_1000", |b| {
        b.iter(|| rt.block_on(async { black_box(sandbox.execute(LOOP_SOURCE).await) }));
    });

    group.bench_function("recursive_fib", |b| {
        b.iter(|| rt.block_on(async { black_box(sandbox.execute(FIB_SOURCE).await) }));
    });

    group.bench_function("string_ops", |b| {
        b.iter(|| rt.block_on(async { black_box(sandbox.execute(STRING_SOURCE).await) }));
    });

    group.bench_function("blocking_simple_print", |b| {
        b.iter(|| black_box(sandbox.execute_blocking("print('Hello, World!')")));
    });

    group.finish();
}

/// Benchmark concurrent execution throughput.
fn bench_concurrent_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = Arc::new(PythonSandbox::new(bench_config()).unwrap());

    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for concurrency in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("executions", concurrency),
            concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut handles = Vec::new();

                        for _ in 0..concurrency {
                            let sandbox = Arc::clone(&sandbox);
                            let handle =
                                tokio::spawn(async move { sandbox.execute(LOOP_SOURCE).await });
                            handles.push(handle);
                        }

                        for handle in handles {
                            let result = handle.await.unwrap();
                            black_box(result);
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

/// Cost of hitting the deadline. The clock is read every 1024 ticks, so
/// the overshoot should stay small.
fn bench_timeout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = PythonSandbox::new(bench_config()).unwrap();

    let mut group = c.benchmark_group("timeout");
    group.sample_size(10);

    for millis in [10u64, 50].iter() {
        group.bench_with_input(BenchmarkId::new("infinite_loop_ms", millis), millis, |b, &millis| {
            b.iter(|| {
                rt.block_on(async {
                    let result = sandbox
                        .execute_with_timeout("while True: pass", Duration::from_millis(millis))
                        .await;
                    assert!(!result.success);
                    black_box(result)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sandbox_creation,
    bench_compile,
    bench_execution,
    bench_concurrent_execution,
    bench_timeout,
);

criterion_main!(benches);
