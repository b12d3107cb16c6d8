use criterion::{black_box, criterion_group, criterion_main, Criterion};
use demand_flow::{Sink, Source};
use std::time::Duration;
use tokio::runtime::Runtime;

fn benchmark_single_stage_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("single_stage_1000_msgs", |b| {
        b.to_async(&runtime).iter(|| async {
            Source::from_iter((0..1000u32).map(|i| vec![i as u8; 64]))
                .map(black_box)
                .run_with(Sink::ignore())
                .await
                .expect("Run failed");
        });
    });
}

fn benchmark_three_stage_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("three_stage_1000_msgs", |b| {
        b.to_async(&runtime).iter(|| async {
            Source::from_iter((0..1000u32).map(|i| vec![i as u8; 64]))
                .map(black_box)
                .filter(|data| !data.is_empty())
                .map(|data| data.len())
                .run_with(Sink::ignore())
                .await
                .expect("Run failed");
        });
    });
}

fn benchmark_fan_in_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("merge_interleave_5000_msgs", |b| {
        b.to_async(&runtime).iter(|| async {
            let merged = Source::from_iter(0..2500u32).merge(Source::from_iter(2500..5000u32));
            let interleaved =
                Source::from_iter(0..2500u32).interleave(Source::from_iter(2500..5000u32), 8);
            merged
                .concat(interleaved)
                .run_with(Sink::for_each(|x| {
                    black_box(x);
                }))
                .await
                .expect("Run failed");
        });
    });
}

fn benchmark_map_async_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("map_async_ready_futures_1000_msgs", |b| {
        b.to_async(&runtime).iter(|| async {
            Source::from_iter(0..1000u32)
                .map_async(8, |x| futures::future::ready(Ok::<_, std::io::Error>(x * 2)))
                .run_with(Sink::ignore())
                .await
                .expect("Run failed");
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_single_stage_throughput, benchmark_three_stage_throughput,
        benchmark_fan_in_throughput, benchmark_map_async_throughput
);
criterion_main!(benches);
