//! Blueprints with one open input that produce a result once the run ends.

use crate::error::{Result, StreamError};
use crate::graph::{Graph, Inlet, Outlet};
use crate::pipeline::Finalizer;
use crate::stage::Stage;
use crate::stages::{Balance, Broadcast, CollectSink, ForEachSink, IgnoreSink};
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

type BuildSink<T, R> = Box<dyn FnOnce(&mut Graph, Outlet<T>) -> Result<Finalizer<R>> + Send>;

/// A graph blueprint consuming `T` elements and yielding `R` after a
/// successful run
pub struct Sink<T, R> {
    build: BuildSink<T, R>,
}

impl<T: Send + 'static, R: 'static> Sink<T, R> {
    /// Sink built by a closure that wires `upstream` and returns how to
    /// read the result once the run has completed
    pub fn from_graph(
        build: impl FnOnce(&mut Graph, Outlet<T>) -> Result<Finalizer<R>>
            + Send
            + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }

    pub(crate) fn materialize(self, graph: &mut Graph, upstream: Outlet<T>) -> Result<Finalizer<R>> {
        (self.build)(graph, upstream)
    }
}

impl<T: Send + 'static> Sink<T, ()> {
    /// Sink backed by a stage with one input and no outputs
    pub fn from_stage<S: Stage + 'static>(stage: S) -> Self {
        Self::from_graph(move |graph, upstream| {
            let id = graph.add_stage(stage, 1, 0);
            graph.connect(upstream, Inlet::new(id, 0))?;
            let finalize: Finalizer<()> = Box::new(|| ());
            Ok(finalize)
        })
    }

    pub fn for_each<F>(callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::from_stage(ForEachSink::new(callback))
    }

    /// Pull and discard every element
    pub fn ignore() -> Self {
        Self::from_stage(IgnoreSink)
    }
}

impl<T: Send + 'static> Sink<T, Vec<T>> {
    /// Gather every element, in arrival order
    pub fn collect() -> Self {
        Self::from_graph(|graph, upstream| {
            let items = Arc::new(Mutex::new(Vec::new()));
            let id = graph.add_stage(CollectSink::new(Arc::clone(&items)), 1, 0);
            graph.connect(upstream, Inlet::new(id, 0))?;
            let finalize: Finalizer<Vec<T>> = Box::new(move || mem::take(&mut *items.lock()));
            Ok(finalize)
        })
    }
}

impl<T: Send + 'static, R: 'static> Sink<T, Vec<R>> {
    /// Send a copy of every element to each of `sinks`
    pub fn broadcast(sinks: Vec<Sink<T, R>>) -> Self
    where
        T: Clone,
    {
        fan_out(sinks, Broadcast::<T>::new)
    }

    /// Send each element to one of `sinks`, whichever signals demand first
    pub fn balance(sinks: Vec<Sink<T, R>>) -> Self {
        fan_out(sinks, Balance::new)
    }
}

fn fan_out<T, R, S, F>(sinks: Vec<Sink<T, R>>, stage: F) -> Sink<T, Vec<R>>
where
    T: Send + 'static,
    R: 'static,
    S: Stage + 'static,
    F: FnOnce() -> S + Send + 'static,
{
    Sink::from_graph(move |graph, upstream| {
        if sinks.is_empty() {
            return Err(StreamError::ConfigError(
                "fan-out requires at least one output".to_string(),
            ));
        }
        let split = graph.add_stage(stage(), 1, sinks.len());
        graph.connect(upstream, Inlet::new(split, 0))?;
        let finalizers = sinks
            .into_iter()
            .enumerate()
            .map(|(port, sink)| sink.materialize(graph, Outlet::new(split, port)))
            .collect::<Result<Vec<_>>>()?;
        let finalize: Finalizer<Vec<R>> = Box::new(move || {
            finalizers.into_iter().map(|finalize| finalize()).collect()
        });
        Ok(finalize)
    })
}
