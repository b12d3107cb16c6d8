//! Single-threaded interpreter driving a materialized [`Graph`].
//!
//! Protocol signals are queued and dispatched one at a time, so a stage's
//! handlers never run concurrently with each other. The only concurrency is
//! the set of external futures started through `StageContext::spawn`,
//! polled together while the queue is empty and between batches of
//! signals while it is not.

use crate::error::{Result, StreamError};
use crate::graph::{DynValue, Graph, LinkId, LinkState, StageId, StageState, Transfer};
use crate::metrics::StageMetrics;
use crate::stage::StageContext;
use futures::future::{poll_fn, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::task::Poll;
use tracing::{debug, trace, warn};

/// Signals dispatched before outstanding async operations get polled again
const EVENT_BATCH: usize = 64;

/// Stage, slot generation, token and outcome of an external operation
pub(crate) type Task = BoxFuture<'static, (StageId, u64, u64, Result<DynValue>)>;

/// Reads a sink's result after a successful run
pub type Finalizer<R> = Box<dyn FnOnce() -> R + Send>;

pub(crate) enum Event {
    Start(StageId),
    Pull(LinkId),
    Push(LinkId),
    Complete(LinkId),
    Fail(LinkId, StreamError),
    Cancel(LinkId),
    Resolved(StageId, u64, u64, Result<DynValue>),
}

enum Signal {
    Start,
    Pull(usize),
    Push(usize),
    UpstreamFinish(usize),
    UpstreamFailure(usize, StreamError),
    DownstreamFinish(usize),
    AsyncResult(u64, Result<DynValue>),
}

impl Signal {
    fn label(&self) -> &'static str {
        match self {
            Signal::Start => "start",
            Signal::Pull(_) => "pull",
            Signal::Push(_) => "push",
            Signal::UpstreamFinish(_) => "upstream_finish",
            Signal::UpstreamFailure(..) => "upstream_failure",
            Signal::DownstreamFinish(_) => "downstream_finish",
            Signal::AsyncResult(..) => "async_result",
        }
    }
}

/// Queued signals, outstanding external operations and the run's failure
#[derive(Default)]
pub(crate) struct Scheduler {
    events: VecDeque<Event>,
    tasks: FuturesUnordered<Task>,
    failure: Option<StreamError>,
}

impl Scheduler {
    pub(crate) fn enqueue(&mut self, graph: &mut Graph, event: Event) {
        let (target, link) = match &event {
            Event::Start(stage) => (Some(*stage), None),
            Event::Pull(link) | Event::Cancel(link) => {
                (Some(graph.links[link.0].upstream.0), Some(*link))
            }
            Event::Push(link) | Event::Complete(link) | Event::Fail(link, _) => {
                (Some(graph.links[link.0].downstream.0), Some(*link))
            }
            Event::Resolved(..) => (None, None),
        };
        if let Some(stage) = target {
            graph.stages[stage.0].queued += 1;
        }
        if let Some(link) = link {
            graph.links[link.0].queued += 1;
        }
        self.events.push_back(event);
    }

    pub(crate) fn spawn(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub(crate) fn record_failure(&mut self, error: &StreamError) {
        if self.failure.is_none() {
            self.failure = Some(error.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Ready,
    Running,
    Finished,
}

/// A materialized graph ready to run once
pub struct Pipeline<R = ()> {
    graph: Graph,
    scheduler: Scheduler,
    state: RunState,
    finalizer: Option<Finalizer<R>>,
}

impl Pipeline<()> {
    /// Build a pipeline from a hand-wired graph
    pub fn new(graph: Graph) -> Result<Self> {
        Self::with_finalizer(graph, Box::new(|| ()))
    }
}

impl<R> Pipeline<R> {
    pub(crate) fn with_finalizer(graph: Graph, finalizer: Finalizer<R>) -> Result<Self> {
        graph.validate()?;
        Ok(Self {
            graph,
            scheduler: Scheduler::default(),
            state: RunState::Ready,
            finalizer: Some(finalizer),
        })
    }

    /// Run every stage to termination.
    ///
    /// Returns the first failure of the run, or the sink's result.
    pub async fn run(&mut self) -> Result<R> {
        if self.state != RunState::Ready {
            return Err(StreamError::AlreadyStarted);
        }
        self.state = RunState::Running;
        debug!(stages = self.graph.stage_count(), "pipeline started");
        let stages: Vec<StageId> = self.graph.stage_ids().collect();
        for stage in stages {
            self.scheduler.enqueue(&mut self.graph, Event::Start(stage));
        }

        let outcome = self.drive().await;
        self.state = RunState::Finished;
        match outcome {
            Err(error) if error.is_contract_violation() => return Err(error),
            outcome => {
                // A recorded failure explains any stall it left behind
                if let Some(error) = self.scheduler.failure.take() {
                    debug!(%error, "pipeline failed");
                    return Err(error);
                }
                outcome?;
            }
        }
        debug!("pipeline completed");
        let finalizer = self.finalizer.take().ok_or(StreamError::AlreadyStarted)?;
        Ok(finalizer())
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            let mut dispatched = 0;
            while let Some(event) = self.scheduler.events.pop_front() {
                self.dispatch(event)?;
                dispatched += 1;
                if dispatched == EVENT_BATCH && !self.scheduler.events.is_empty() {
                    self.collect_resolved().await;
                    dispatched = 0;
                }
            }
            let unfinished = self.unfinished_stages();
            if unfinished == 0 {
                return Ok(());
            }
            match self.scheduler.tasks.next().await {
                Some((stage, generation, token, result)) => {
                    self.scheduler
                        .events
                        .push_back(Event::Resolved(stage, generation, token, result));
                }
                None => return Err(StreamError::Stalled { unfinished }),
            }
        }
    }

    /// Yield to the executor once and queue every async result that
    /// resolved in the meantime.
    ///
    /// Keeps timers and IO moving while synchronous stages never let the
    /// event queue run dry.
    async fn collect_resolved(&mut self) {
        let scheduler = &mut self.scheduler;
        let mut yielded = false;
        poll_fn(|cx| {
            while let Poll::Ready(Some((stage, generation, token, result))) =
                scheduler.tasks.poll_next_unpin(cx)
            {
                scheduler
                    .events
                    .push_back(Event::Resolved(stage, generation, token, result));
            }
            if yielded {
                return Poll::Ready(());
            }
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        })
        .await;
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        let links = &self.graph.links;
        let (stage, link, signal) = match event {
            Event::Start(stage) => (stage, None, Some(Signal::Start)),
            Event::Pull(id) => {
                let link = &links[id.0];
                let live = link.upstream_attached
                    && link.is_open()
                    && matches!(link.transfer, Transfer::Demanded);
                let port = link.upstream.1;
                (link.upstream.0, Some(id), live.then_some(Signal::Pull(port)))
            }
            Event::Push(id) => {
                let link = &links[id.0];
                let live = link.downstream_attached
                    && link.state != LinkState::Cancelled
                    && matches!(link.transfer, Transfer::Pushed(_));
                let port = link.downstream.1;
                (link.downstream.0, Some(id), live.then_some(Signal::Push(port)))
            }
            Event::Complete(id) => {
                let link = &links[id.0];
                let live = link.downstream_attached && link.state == LinkState::Completed;
                let port = link.downstream.1;
                (
                    link.downstream.0,
                    Some(id),
                    live.then_some(Signal::UpstreamFinish(port)),
                )
            }
            Event::Fail(id, error) => {
                let link = &links[id.0];
                let live = link.downstream_attached && link.state == LinkState::Failed;
                let port = link.downstream.1;
                (
                    link.downstream.0,
                    Some(id),
                    live.then_some(Signal::UpstreamFailure(port, error)),
                )
            }
            Event::Cancel(id) => {
                let link = &links[id.0];
                let live = link.upstream_attached && link.state == LinkState::Cancelled;
                let port = link.upstream.1;
                (
                    link.upstream.0,
                    Some(id),
                    live.then_some(Signal::DownstreamFinish(port)),
                )
            }
            Event::Resolved(stage, generation, token, result) => {
                let slot = &self.graph.stages[stage.0];
                if slot.vacant || slot.generation != generation {
                    trace!(stage = stage.0, token, "result for recycled stage dropped");
                    return Ok(());
                }
                self.invoke(stage, Signal::AsyncResult(token, result))?;
                self.settle(stage);
                return Ok(());
            }
        };

        let slot = &mut self.graph.stages[stage.0];
        slot.queued = slot.queued.saturating_sub(1);
        if let Some(id) = link {
            let link = &mut self.graph.links[id.0];
            link.queued = link.queued.saturating_sub(1);
            self.graph.try_free_link(id);
        }
        if let Some(signal) = signal {
            self.invoke(stage, signal)?;
        }
        self.settle(stage);
        Ok(())
    }

    fn invoke(&mut self, stage: StageId, signal: Signal) -> Result<()> {
        let slot = &mut self.graph.stages[stage.0];
        if slot.state.is_terminal() {
            trace!(stage = stage.0, signal = signal.label(), "signal to finished stage ignored");
            return Ok(());
        }
        let Some(mut logic) = slot.logic.take() else {
            return Err(StreamError::protocol(format!(
                "stage {} dispatched while already running a handler",
                stage.0
            )));
        };
        if matches!(signal, Signal::Start) {
            slot.state = StageState::Running;
            debug!(stage = stage.0, name = %slot.name, "stage started");
        }
        trace!(stage = stage.0, signal = signal.label(), "dispatch");

        let outcome = {
            let mut ctx = StageContext::new(stage, &mut self.graph, &mut self.scheduler);
            let outcome = match signal {
                Signal::Start => logic.on_start(&mut ctx),
                Signal::Pull(port) => logic.on_pull(&mut ctx, port),
                Signal::Push(port) => logic.on_push(&mut ctx, port),
                Signal::UpstreamFinish(port) => logic.on_upstream_finish(&mut ctx, port),
                Signal::UpstreamFailure(port, error) => {
                    logic.on_upstream_failure(&mut ctx, port, error)
                }
                Signal::DownstreamFinish(port) => logic.on_downstream_finish(&mut ctx, port),
                Signal::AsyncResult(token, result) => {
                    logic.on_async_result(&mut ctx, token, result)
                }
            };
            match outcome {
                Err(error) if !error.is_contract_violation() => {
                    warn!(stage = stage.0, name = logic.name(), %error, "stage failed");
                    ctx.fail_stage(error);
                    Ok(())
                }
                other => other,
            }
        };
        self.graph.stages[stage.0].logic = Some(logic);
        outcome
    }

    fn settle(&mut self, stage: StageId) {
        let slot = &self.graph.stages[stage.0];
        if slot.vacant || slot.state.is_terminal() || !self.graph.is_finished(stage) {
            return;
        }
        let state = self.graph.terminal_state(stage);
        let slot = &mut self.graph.stages[stage.0];
        slot.state = state;
        slot.logic = None;
        let nested = slot.nested;
        debug!(stage = stage.0, name = %slot.name, ?state, "stage finished");
        self.graph.running = self.graph.running.saturating_sub(1);
        if nested {
            self.graph.vacate(stage);
            trace!(stage = stage.0, "nested stage slot recycled");
        }
    }

    fn unfinished_stages(&self) -> usize {
        self.graph.running
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.graph.stage_ids()
    }

    /// First stage registered under `name`
    pub fn find_stage(&self, name: &str) -> Option<StageId> {
        self.graph
            .stage_ids()
            .find(|stage| self.graph.stages[stage.0].name == name)
    }

    pub fn stage_state(&self, stage: StageId) -> Option<StageState> {
        self.graph
            .stages
            .get(stage.0)
            .filter(|slot| !slot.vacant)
            .map(|slot| slot.state)
    }

    pub fn stage_metrics(&self, stage: StageId) -> Option<&StageMetrics> {
        self.graph
            .stages
            .get(stage.0)
            .filter(|slot| !slot.vacant)
            .map(|slot| &slot.metrics)
    }

    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (index, slot) in self.graph.stages.iter().enumerate() {
            if slot.vacant {
                continue;
            }
            summary.push_str(&format!(
                "  Stage {} ({}, {:?}): {}\n",
                index,
                slot.name,
                slot.state,
                slot.metrics.snapshot().format()
            ));
        }
        summary
    }
}

/// Blueprint of a complete graph, materialized on demand
pub struct RunnableGraph<R> {
    build: Box<dyn FnOnce(&mut Graph) -> Result<Finalizer<R>> + Send>,
}

impl<R: 'static> RunnableGraph<R> {
    pub(crate) fn new(
        build: impl FnOnce(&mut Graph) -> Result<Finalizer<R>> + Send + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }

    /// Build the stages and links without running them
    pub fn materialize(self) -> Result<Pipeline<R>> {
        let mut graph = Graph::new();
        let finalizer = (self.build)(&mut graph)?;
        Pipeline::with_finalizer(graph, finalizer)
    }

    pub async fn run(self) -> Result<R> {
        self.materialize()?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Emits `0..count` one element per pull
    struct Counter {
        next: u32,
        count: u32,
    }

    impl Stage for Counter {
        fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
            ctx.push_as(0, self.next)?;
            self.next += 1;
            if self.next == self.count {
                ctx.complete(0)?;
            }
            Ok(())
        }
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl Stage for Recorder {
        fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
            ctx.pull(0)
        }

        fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
            let value = ctx.grab_as::<u32>(inlet)?;
            self.seen.lock().push(value);
            ctx.pull(inlet)
        }
    }

    struct DoublePull;

    impl Stage for DoublePull {
        fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
            ctx.pull(0)?;
            ctx.pull(0)
        }
    }

    struct Silent;

    impl Stage for Silent {}

    fn wire(graph: &mut Graph, source: impl Stage + 'static, sink: impl Stage + 'static) -> (StageId, StageId) {
        let a = graph.add_stage(source, 0, 1);
        let b = graph.add_stage(sink, 1, 0);
        graph
            .connect::<u32>(graph.outlet(a, 0), graph.inlet(b, 0))
            .unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_pull_push_alternation_runs_to_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        let (source, sink) = wire(
            &mut graph,
            Counter { next: 0, count: 4 },
            Recorder { seen: Arc::clone(&seen) },
        );
        let mut pipeline = Pipeline::new(graph).unwrap();
        pipeline.run().await.unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
        assert_eq!(pipeline.stage_state(source), Some(StageState::Completed));
        assert_eq!(pipeline.stage_state(sink), Some(StageState::Completed));
        assert_eq!(pipeline.stage_metrics(source).unwrap().total_pushed(), 4);
        assert_eq!(pipeline.stage_metrics(sink).unwrap().total_pulls(), 4);
    }

    #[tokio::test]
    async fn test_double_pull_is_protocol_violation() {
        let mut graph = Graph::new();
        wire(&mut graph, Counter { next: 0, count: 4 }, DoublePull);
        let result = Pipeline::new(graph).unwrap().run().await;
        assert!(matches!(result, Err(StreamError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_silent_graph_stalls() {
        let mut graph = Graph::new();
        wire(&mut graph, Silent, Silent);
        let result = Pipeline::new(graph).unwrap().run().await;
        assert!(matches!(result, Err(StreamError::Stalled { unfinished: 2 })));
    }

    struct Broken;

    impl Stage for Broken {
        fn on_start(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
            Err(StreamError::upstream("broken"))
        }
    }

    /// Ignores failures from upstream and never closes its outlet
    struct Deaf;

    impl Stage for Deaf {
        fn on_upstream_failure(
            &mut self,
            _ctx: &mut StageContext<'_>,
            _inlet: usize,
            _error: StreamError,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_wins_over_stall() {
        let mut graph = Graph::new();
        let broken = graph.add_stage(Broken, 0, 1);
        let deaf = graph.add_stage(Deaf, 1, 1);
        let sink = graph.add_stage(Silent, 1, 0);
        graph
            .connect::<u32>(graph.outlet(broken, 0), graph.inlet(deaf, 0))
            .unwrap();
        graph
            .connect::<u32>(graph.outlet(deaf, 0), graph.inlet(sink, 0))
            .unwrap();

        let result = Pipeline::new(graph).unwrap().run().await;
        match result {
            Err(StreamError::UpstreamFailure(error)) => assert_eq!(error.to_string(), "broken"),
            other => panic!("expected the recorded failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let mut graph = Graph::new();
        wire(
            &mut graph,
            Counter { next: 0, count: 1 },
            Recorder { seen: Arc::new(Mutex::new(Vec::new())) },
        );
        let mut pipeline = Pipeline::new(graph).unwrap();
        pipeline.run().await.unwrap();
        assert!(matches!(
            pipeline.run().await,
            Err(StreamError::AlreadyStarted)
        ));
        assert!(pipeline.metrics_summary().contains("Completed"));
    }
}
