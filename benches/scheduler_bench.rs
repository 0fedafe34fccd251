//! Benchmarks for spawn/sync throughput and steal-heavy workloads.

use bencher::{benchmark_group, benchmark_main, Bencher};
use forkjoin::{spawn, sync, Pool, PoolConfig};

fn fib(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let left = spawn(n - 1, fib);
    let right = fib(n - 2);
    sync(left) + right
}

fn bench_fib_single_worker(b: &mut Bencher) {
    let pool = Pool::start(PoolConfig {
        n_workers: 1,
        ..Default::default()
    })
    .unwrap();
    b.iter(|| pool.run(20u64, fib));
}

fn bench_fib_four_workers(b: &mut Bencher) {
    let pool = Pool::start(PoolConfig {
        n_workers: 4,
        ..Default::default()
    })
    .unwrap();
    b.iter(|| pool.run(24u64, fib));
}

fn leaf(n: u64) -> u64 {
    n
}

fn bench_spawn_sync_uncontended(b: &mut Bencher) {
    let pool = Pool::start(PoolConfig {
        n_workers: 1,
        ..Default::default()
    })
    .unwrap();
    fn run_chain(_: ()) -> u64 {
        let mut total = 0u64;
        for i in 0..1000u64 {
            let handle = spawn(i, leaf);
            total += sync(handle);
        }
        total
    }
    b.iter(|| pool.run((), run_chain));
}

benchmark_group!(
    benches,
    bench_fib_single_worker,
    bench_fib_four_workers,
    bench_spawn_sync_uncontended
);
benchmark_main!(benches);
