//! Number processing pipeline demonstrating filtering and transformations
//!
//! Pipeline:
//! 1. Generate: Produces numbers 1-100
//! 2. Filter: Keep only even numbers
//! 3. Buffer: Decouple the generator from the slow stage behind it
//! 4. Transform: Multiply by 10 on up to 4 concurrent workers
//! 5. Aggregate: Sum all numbers
//!
//! Usage: cargo run --example filter_pipeline --release

use demand_flow::{BufferConfig, OverflowPolicy, Sink, Source};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Totals {
    sum: u64,
    count: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Generating numbers 1-100, filtering evens, multiplying by 10, and summing");
    println!();

    let start = Instant::now();
    let totals = Arc::new(Mutex::new(Totals::default()));
    let aggregate = Arc::clone(&totals);

    let mut pipeline = Source::from_iter(1..=100u64)
        .filter(|num| num % 2 == 0)
        .buffer(BufferConfig::new(16, OverflowPolicy::BackPressure))
        .map_async(4, |num| async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok::<_, std::io::Error>(num * 10)
        })
        .to(Sink::for_each(move |num| {
            let mut totals = aggregate.lock();
            totals.sum += num;
            totals.count += 1;
            if totals.count % 5 == 0 {
                println!("Running sum: {} (count: {})", totals.sum, totals.count);
            }
        }))
        .materialize()?;

    pipeline.run().await?;

    let totals = totals.lock();
    println!("\n=== Final Results ===");
    println!("Total numbers processed: {}", totals.count);
    println!("Sum of all numbers: {}", totals.sum);
    if totals.count > 0 {
        println!("Average: {:.2}", totals.sum as f64 / totals.count as f64);
    }

    println!("\n{}", pipeline.metrics_summary());
    println!("Pipeline execution time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(())
}
