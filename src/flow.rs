//! Blueprints with one open input and one open output.

use crate::buffer::BufferConfig;
use crate::error::{BoxError, Result};
use crate::graph::{Graph, Inlet, Outlet};
use crate::sink::Sink;
use crate::source::Source;
use crate::stage::Stage;
use crate::stages::{BufferStage, Delivery, Filter, FlatMapMerge, Map, MapAsync, Take};
use std::future::Future;

type BuildFlow<I, O> = Box<dyn FnOnce(&mut Graph, Outlet<I>) -> Result<Outlet<O>> + Send>;

/// A reusable chain of stages turning `I` elements into `O` elements
pub struct Flow<I, O> {
    build: BuildFlow<I, O>,
}

impl<T: Send + 'static> Flow<T, T> {
    /// Flow that passes elements through unchanged
    pub fn new() -> Self {
        Self::from_graph(|_, upstream| Ok(upstream))
    }
}

impl<T: Send + 'static> Default for Flow<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static, O: Send + 'static> Flow<I, O> {
    /// Flow built by a closure that wires `upstream` and returns the new output
    pub fn from_graph(
        build: impl FnOnce(&mut Graph, Outlet<I>) -> Result<Outlet<O>> + Send + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }

    /// Flow backed by a stage with one input and one output
    pub fn from_stage<S: Stage + 'static>(stage: S) -> Self {
        Self::try_from_stage(Ok(stage))
    }

    fn try_from_stage<S: Stage + 'static>(stage: Result<S>) -> Self {
        Self::from_graph(move |graph, upstream| {
            let id = graph.add_stage(stage?, 1, 1);
            graph.connect(upstream, Inlet::new(id, 0))?;
            Ok(graph.outlet(id, 0))
        })
    }

    pub(crate) fn materialize(self, graph: &mut Graph, upstream: Outlet<I>) -> Result<Outlet<O>> {
        (self.build)(graph, upstream)
    }

    /// Append `next` after this flow
    pub fn via<P: Send + 'static>(self, next: Flow<O, P>) -> Flow<I, P> {
        Flow::from_graph(move |graph, upstream| {
            let outlet = self.materialize(graph, upstream)?;
            next.materialize(graph, outlet)
        })
    }

    pub fn map<P, F>(self, mapper: F) -> Flow<I, P>
    where
        P: Send + 'static,
        F: FnMut(O) -> P + Send + 'static,
    {
        self.via(Flow::from_stage(Map::new(mapper)))
    }

    pub fn filter<F>(self, predicate: F) -> Flow<I, O>
    where
        F: FnMut(&O) -> bool + Send + 'static,
    {
        self.via(Flow::from_stage(Filter::new(predicate)))
    }

    /// Pass the first `limit` elements, then complete and cancel upstream
    pub fn take(self, limit: usize) -> Flow<I, O> {
        self.via(Flow::from_stage(Take::new(limit)))
    }

    /// Decouple upstream and downstream through a bounded buffer
    pub fn buffer(self, config: BufferConfig<O>) -> Flow<I, O> {
        self.via(Flow::try_from_stage(config.into_buffer().map(BufferStage::new)))
    }

    /// Asynchronous map with up to `parallelism` jobs, emitting in input order
    pub fn map_async<P, F, Fut, E>(self, parallelism: usize, transform: F) -> Flow<I, P>
    where
        P: Send + 'static,
        F: FnMut(O) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<P, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.via(Flow::try_from_stage(MapAsync::new(
            parallelism,
            Delivery::Ordered,
            transform,
        )))
    }

    /// Asynchronous map with up to `parallelism` jobs, emitting in completion order
    pub fn map_async_unordered<P, F, Fut, E>(self, parallelism: usize, transform: F) -> Flow<I, P>
    where
        P: Send + 'static,
        F: FnMut(O) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<P, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.via(Flow::try_from_stage(MapAsync::new(
            parallelism,
            Delivery::Unordered,
            transform,
        )))
    }

    /// Expand each element into a nested source, draining up to `breadth`
    /// of them concurrently
    pub fn flat_map_merge<P, F>(self, breadth: usize, expand: F) -> Flow<I, P>
    where
        P: Send + 'static,
        F: FnMut(O) -> Source<P> + Send + 'static,
    {
        self.via(Flow::try_from_stage(FlatMapMerge::new(breadth, expand)))
    }

    /// Terminate this flow with `sink`
    pub fn to<R: 'static>(self, sink: Sink<O, R>) -> Sink<I, R> {
        Sink::from_graph(move |graph, upstream| {
            let outlet = self.materialize(graph, upstream)?;
            sink.materialize(graph, outlet)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OverflowPolicy;
    use crate::error::StreamError;

    #[tokio::test]
    async fn test_flow_reused_through_via() {
        let double_then_keep_large = Flow::new().map(|x: u32| x * 2).filter(|x| *x > 4);
        let result = Source::from_iter(1..=4u32)
            .via(double_then_keep_large)
            .collect()
            .await;
        assert_eq!(result.unwrap(), vec![6, 8]);
    }

    #[tokio::test]
    async fn test_flow_into_sink() {
        let total = std::sync::Arc::new(parking_lot::Mutex::new(0u32));
        let observed = std::sync::Arc::clone(&total);
        let sink = Flow::new()
            .map(|x: u32| x + 1)
            .to(Sink::for_each(move |x| *observed.lock() += x));
        Source::from_iter(1..=3u32).run_with(sink).await.unwrap();
        assert_eq!(*total.lock(), 9);
    }

    #[tokio::test]
    async fn test_zero_sized_buffer_rejected() {
        let result = Source::from_iter(1..=3u32)
            .via(Flow::new().buffer(BufferConfig::new(0, OverflowPolicy::DropHead)))
            .collect()
            .await;
        assert!(matches!(result, Err(StreamError::ConfigError(_))));
    }
}
