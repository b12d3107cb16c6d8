//! A demand-driven stream processing engine with explicit backpressure.
//!
//! Stages exchange elements over links that carry at most one element and
//! one unit of demand at a time, so a slow consumer throttles every stage
//! upstream of it. Graphs are described with the `Source`/`Flow`/`Sink`
//! blueprint DSL (or wired by hand through [`Graph`]) and run by a
//! single-threaded [`Pipeline`] interpreter.
//!
//! # Features
//!
//! - Pull/push stage protocol with completion, failure and cancellation
//! - Bounded buffers with drop-head, drop-tail, drop-new, drop-buffer, fail
//!   and backpressure overflow policies
//! - Fan-in: merge, concat, zip, interleave
//! - Fan-out: broadcast, balance
//! - Ordered and unordered asynchronous map with bounded parallelism
//! - Flat-map-merge over nested sources with bounded breadth
//! - Per-stage metrics: elements pushed, pulls, drops, job latency percentiles
//!
//! # Example
//!
//! ```ignore
//! use demand_flow::{BufferConfig, OverflowPolicy, Sink, Source};
//!
//! let doubled = Source::from_iter(1..=10)
//!     .buffer(BufferConfig::new(4, OverflowPolicy::BackPressure))
//!     .map_async(2, |x| async move { Ok::<_, std::io::Error>(x * 2) })
//!     .run_with(Sink::collect())
//!     .await?;
//! ```

pub mod buffer;
pub mod error;
pub mod flow;
pub mod graph;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod stage;
pub mod stages;

// Re-exports for convenience
pub use buffer::{
    Buffer, BufferConfig, OverflowPolicy, DEFAULT_BUFFER_SIZE, DEFAULT_OVERFLOW_POLICY,
};
pub use error::{validate_positive, BoxError, Result, StreamError};
pub use flow::Flow;
pub use graph::{DynValue, Graph, Inlet, LinkId, Outlet, StageId, StageState};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{Finalizer, Pipeline, RunnableGraph};
pub use sink::Sink;
pub use source::Source;
pub use stage::{Stage, StageContext};
pub use stages::{Delivery, DEFAULT_BREADTH, DEFAULT_PARALLELISM};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
