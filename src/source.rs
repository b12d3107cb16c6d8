//! Blueprints of graphs with exactly one open output.
//!
//! A [`Source`] records how to add its stages to a [`Graph`]; nothing runs
//! until it is connected to a [`Sink`] and the resulting [`RunnableGraph`]
//! is run. Constructors with invalid arguments report `ConfigError` when
//! the blueprint is materialized.

use crate::buffer::BufferConfig;
use crate::error::{BoxError, Result, StreamError};
use crate::flow::Flow;
use crate::graph::{downcast, DynValue, Graph, Inlet, Outlet};
use crate::pipeline::RunnableGraph;
use crate::sink::Sink;
use crate::stage::Stage;
use crate::stages::{
    Balance, Broadcast, Concat, FailedSource, FutureSource, Interleave, IterSource, Merge, Zip,
};
use futures::FutureExt;
use std::future::Future;

type BuildSource<T> = Box<dyn FnOnce(&mut Graph) -> Result<Outlet<T>> + Send>;

/// A graph blueprint producing elements of type `T`
pub struct Source<T> {
    build: BuildSource<T>,
}

impl<T: Send + 'static> Source<T> {
    /// Source built by an arbitrary closure returning its open output
    pub fn from_graph(build: impl FnOnce(&mut Graph) -> Result<Outlet<T>> + Send + 'static) -> Self {
        Self {
            build: Box::new(build),
        }
    }

    /// Source backed by a stage with no inputs and one output
    pub fn from_stage<S: Stage + 'static>(stage: S) -> Self {
        Self::from_graph(move |graph| {
            let id = graph.add_stage(stage, 0, 1);
            Ok(graph.outlet(id, 0))
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stage(IterSource::new(items))
    }

    pub fn single(item: T) -> Self {
        Self::from_iter(std::iter::once(item))
    }

    /// Completes without emitting
    pub fn empty() -> Self {
        Self::from_iter(std::iter::empty())
    }

    /// Fails as soon as it starts
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::from_stage(FailedSource::new(StreamError::upstream(error)))
    }

    /// Emits the value `operation` resolves to, or fails with its error
    pub fn future<F, E>(operation: F) -> Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let operation = operation
            .map(|result| {
                result
                    .map(|value| Box::new(value) as DynValue)
                    .map_err(StreamError::upstream)
            })
            .boxed();
        Self::from_stage(FutureSource::new(operation))
    }

    pub(crate) fn materialize(self, graph: &mut Graph) -> Result<Outlet<T>> {
        (self.build)(graph)
    }

    /// Attach `flow` to this source's output
    pub fn via<U: Send + 'static>(self, flow: Flow<T, U>) -> Source<U> {
        Source::from_graph(move |graph| {
            let outlet = self.materialize(graph)?;
            flow.materialize(graph, outlet)
        })
    }

    pub fn map<U, F>(self, mapper: F) -> Source<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.via(Flow::new().map(mapper))
    }

    pub fn filter<F>(self, predicate: F) -> Source<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.via(Flow::new().filter(predicate))
    }

    pub fn take(self, limit: usize) -> Source<T> {
        self.via(Flow::new().take(limit))
    }

    pub fn buffer(self, config: BufferConfig<T>) -> Source<T> {
        self.via(Flow::new().buffer(config))
    }

    /// Asynchronous map emitting results in input order
    pub fn map_async<U, F, Fut, E>(self, parallelism: usize, transform: F) -> Source<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.via(Flow::new().map_async(parallelism, transform))
    }

    /// Asynchronous map emitting results as they complete
    pub fn map_async_unordered<U, F, Fut, E>(self, parallelism: usize, transform: F) -> Source<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.via(Flow::new().map_async_unordered(parallelism, transform))
    }

    pub fn flat_map_merge<U, F>(self, breadth: usize, expand: F) -> Source<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Source<U> + Send + 'static,
    {
        self.via(Flow::new().flat_map_merge(breadth, expand))
    }

    /// Emit all of this source, then all of `other`
    pub fn concat(self, other: Source<T>) -> Source<T> {
        Self::concat_all(vec![self, other])
    }

    pub fn concat_all(sources: Vec<Source<T>>) -> Source<T> {
        fan_in(sources, || Ok(Concat::new()))
    }

    /// Emit elements of both sources in arrival order
    pub fn merge(self, other: Source<T>) -> Source<T> {
        Self::merge_all(vec![self, other])
    }

    pub fn merge_all(sources: Vec<Source<T>>) -> Source<T> {
        fan_in(sources, || Ok(Merge::new()))
    }

    /// Alternate between the two sources `segment_size` elements at a time
    pub fn interleave(self, other: Source<T>, segment_size: usize) -> Source<T> {
        Self::interleave_all(vec![self, other], segment_size)
    }

    pub fn interleave_all(sources: Vec<Source<T>>, segment_size: usize) -> Source<T> {
        fan_in(sources, move || Interleave::new(segment_size))
    }

    /// Pair up elements of both sources; ends with the shorter one
    pub fn zip<U: Send + 'static>(self, other: Source<U>) -> Source<(T, U)> {
        Source::from_graph(move |graph| {
            let left = self.materialize(graph)?;
            let right = other.materialize(graph)?;
            let zip = graph.add_stage(
                Zip::new(|mut round: Vec<DynValue>| {
                    let right = round.pop().map(downcast::<U>).transpose()?;
                    let left = round.pop().map(downcast::<T>).transpose()?;
                    match (left, right) {
                        (Some(left), Some(right)) => Ok(Box::new((left, right)) as DynValue),
                        _ => Err(StreamError::protocol("zip round is missing an input")),
                    }
                }),
                2,
                1,
            );
            graph.connect(left, Inlet::new(zip, 0))?;
            graph.connect(right, Inlet::new(zip, 1))?;
            Ok(graph.outlet(zip, 0))
        })
    }

    /// One vector per round holding an element of every source
    pub fn zip_all(sources: Vec<Source<T>>) -> Source<Vec<T>> {
        Source::from_graph(move |graph| {
            let combine = |round: Vec<DynValue>| {
                let items = round
                    .into_iter()
                    .map(downcast::<T>)
                    .collect::<Result<Vec<T>>>()?;
                Ok(Box::new(items) as DynValue)
            };
            let outlets = materialize_all(graph, sources)?;
            connect_fan_in(graph, Zip::new(combine), outlets)
        })
    }

    /// Hand each element to whichever worker flow is ready first, merging
    /// the workers' outputs back into one stream
    pub fn balance<U: Send + 'static>(self, workers: Vec<Flow<T, U>>) -> Source<U> {
        fan_out(self, workers, Balance::new)
    }

    /// Run every flow over a copy of each element and merge their outputs
    pub fn broadcast<U: Send + 'static>(self, flows: Vec<Flow<T, U>>) -> Source<U>
    where
        T: Clone,
    {
        fan_out(self, flows, Broadcast::<T>::new)
    }

    pub fn to<R: 'static>(self, sink: Sink<T, R>) -> RunnableGraph<R> {
        RunnableGraph::new(move |graph| {
            let outlet = self.materialize(graph)?;
            sink.materialize(graph, outlet)
        })
    }

    /// Connect to `sink`, run, and return the sink's result
    pub async fn run_with<R: 'static>(self, sink: Sink<T, R>) -> Result<R> {
        self.to(sink).run().await
    }

    /// Run and gather every element
    pub async fn collect(self) -> Result<Vec<T>> {
        self.run_with(Sink::collect()).await
    }
}

fn materialize_all<T: Send + 'static>(
    graph: &mut Graph,
    sources: Vec<Source<T>>,
) -> Result<Vec<Outlet<T>>> {
    if sources.is_empty() {
        return Err(StreamError::ConfigError(
            "fan-in requires at least one input".to_string(),
        ));
    }
    sources
        .into_iter()
        .map(|source| source.materialize(graph))
        .collect()
}

fn connect_fan_in<T, U, S>(graph: &mut Graph, stage: S, inputs: Vec<Outlet<T>>) -> Result<Outlet<U>>
where
    S: Stage + 'static,
{
    let id = graph.add_stage(stage, inputs.len(), 1);
    for (port, outlet) in inputs.into_iter().enumerate() {
        graph.connect(outlet, Inlet::new(id, port))?;
    }
    Ok(graph.outlet(id, 0))
}

fn fan_in<T, S, F>(sources: Vec<Source<T>>, stage: F) -> Source<T>
where
    T: Send + 'static,
    S: Stage + 'static,
    F: FnOnce() -> Result<S> + Send + 'static,
{
    Source::from_graph(move |graph| {
        let stage = stage()?;
        let outlets = materialize_all(graph, sources)?;
        connect_fan_in(graph, stage, outlets)
    })
}

fn fan_out<T, U, S, F>(source: Source<T>, flows: Vec<Flow<T, U>>, stage: F) -> Source<U>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Stage + 'static,
    F: FnOnce() -> S + Send + 'static,
{
    Source::from_graph(move |graph| {
        if flows.is_empty() {
            return Err(StreamError::ConfigError(
                "fan-out requires at least one output".to_string(),
            ));
        }
        let upstream = source.materialize(graph)?;
        let split = graph.add_stage(stage(), 1, flows.len());
        graph.connect(upstream, Inlet::new(split, 0))?;
        let outlets = flows
            .into_iter()
            .enumerate()
            .map(|(port, flow)| flow.materialize(graph, Outlet::new(split, port)))
            .collect::<Result<Vec<_>>>()?;
        connect_fan_in(graph, Merge::new(), outlets)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn test_fan_in_requires_inputs() {
        let result = Source::<u8>::merge_all(Vec::new()).collect().await;
        assert!(matches!(result, Err(StreamError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_fan_out_requires_outputs() {
        let result = Source::from_iter(1..=3u8)
            .balance::<u8>(Vec::new())
            .collect()
            .await;
        assert!(matches!(result, Err(StreamError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_chained_simple_flows() {
        let result = Source::from_iter(1..=10)
            .filter(|x| x % 2 == 0)
            .map(|x| x * 3)
            .take(3)
            .collect()
            .await;
        assert_eq!(result.unwrap(), vec![6, 12, 18]);
    }

    #[tokio::test]
    async fn test_materialize_builds_every_stage() {
        let pipeline = Source::from_iter(1..=3)
            .map_async(2, |x: i32| async move { Ok::<_, Infallible>(x) })
            .to(Sink::ignore())
            .materialize()
            .unwrap();
        let names: Vec<&str> = pipeline
            .stage_ids()
            .filter_map(|id| pipeline.graph().stage_name(id))
            .collect();
        assert_eq!(names, vec!["iter_source", "map_async", "ignore"]);
    }
}
