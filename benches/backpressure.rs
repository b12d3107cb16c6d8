use criterion::{black_box, criterion_group, criterion_main, Criterion};
use demand_flow::{BufferConfig, OverflowPolicy, Sink, Source};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Fast producer, buffer of `capacity`, consumer that yields to the runtime
/// on every element
async fn slow_consumer(policy: OverflowPolicy, capacity: usize, messages: u32) {
    let result = Source::from_iter((0..messages).map(|i| vec![i as u8; 64]))
        .buffer(BufferConfig::new(capacity, policy))
        .map_async(4, |data| async move {
            tokio::task::yield_now().await;
            Ok::<_, std::io::Error>(black_box(data))
        })
        .run_with(Sink::ignore())
        .await;
    black_box(result).expect("Run failed");
}

fn benchmark_backpressure_slow_consumer(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("backpressure_slow_consumer_1000_msgs", |b| {
        b.to_async(&runtime)
            .iter(|| slow_consumer(OverflowPolicy::BackPressure, 100, 1000));
    });
}

fn benchmark_drop_head_high_load(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("drop_head_high_load_2000_msgs", |b| {
        b.to_async(&runtime)
            .iter(|| slow_consumer(OverflowPolicy::DropHead, 200, 2000));
    });
}

fn benchmark_broadcast_paced_by_slowest(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Runtime failed");
    c.bench_function("broadcast_two_sinks_1000_msgs", |b| {
        b.to_async(&runtime).iter(|| async {
            Source::from_iter(0..1000u32)
                .run_with(Sink::broadcast(vec![
                    Sink::ignore(),
                    Sink::for_each(|x| {
                        black_box(x);
                    }),
                ]))
                .await
                .expect("Run failed");
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(15))
        .sample_size(20);
    targets = benchmark_backpressure_slow_consumer, benchmark_drop_head_high_load,
        benchmark_broadcast_paced_by_slowest
);
criterion_main!(benches);
