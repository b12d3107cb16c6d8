//! Concrete stage implementations behind the `Source`/`Flow`/`Sink` DSL.

mod buffer;
mod fan_in;
mod fan_out;
mod flat_map_merge;
mod map_async;
mod simple;
mod sink;
mod source;

pub use buffer::BufferStage;
pub use fan_in::{Concat, Interleave, Merge, Zip};
pub use fan_out::{Balance, Broadcast};
pub use flat_map_merge::{FlatMapMerge, DEFAULT_BREADTH};
pub use map_async::{Delivery, MapAsync, DEFAULT_PARALLELISM};
pub use simple::{Filter, Map, Take};
pub use sink::{CollectSink, ForEachSink, IgnoreSink};
pub use source::{FailedSource, FutureSource, IterSource};
