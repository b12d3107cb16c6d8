//! The demand protocol every stage implements.
//!
//! A link alternates strictly between one unit of demand (`pull`) and one
//! element (`push`); the receiver takes the element with `grab` before it
//! may pull again. Completion and failure travel downstream, cancellation
//! travels upstream.

use crate::error::{Result, StreamError};
use crate::graph::{downcast, DynValue, Graph, Inlet, Link, LinkId, LinkState, StageId, Transfer};
use crate::metrics::StageMetrics;
use crate::pipeline::{Event, Scheduler};
use crate::source::Source;
use futures::FutureExt;
use std::future::Future;
use std::mem;
use tracing::trace;

/// Handlers invoked by the pipeline interpreter.
///
/// Ports are addressed by their index on the stage. `on_start`, `on_pull`
/// and `on_push` do nothing by default; finishing signals complete the
/// stage and failures fail it. An `Err` returned from a handler fails the
/// stage, except contract violations which abort the whole run.
pub trait Stage: Send {
    fn name(&self) -> &str {
        "stage"
    }

    fn on_start(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Downstream on `outlet` can accept one element
    fn on_pull(&mut self, _ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        Ok(())
    }

    /// An element is waiting on `inlet`; take it with [`StageContext::grab`]
    fn on_push(&mut self, _ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        Ok(())
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        ctx.complete_stage();
        Ok(())
    }

    fn on_upstream_failure(
        &mut self,
        ctx: &mut StageContext<'_>,
        _inlet: usize,
        error: StreamError,
    ) -> Result<()> {
        ctx.fail_stage(error);
        Ok(())
    }

    fn on_downstream_finish(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        ctx.complete_stage();
        Ok(())
    }

    /// A future started with [`StageContext::spawn`] resolved
    fn on_async_result(
        &mut self,
        _ctx: &mut StageContext<'_>,
        _token: u64,
        result: Result<DynValue>,
    ) -> Result<()> {
        result.map(|_| ())
    }
}

/// Protocol operations available to a stage while one of its handlers runs
pub struct StageContext<'a> {
    stage: StageId,
    graph: &'a mut Graph,
    scheduler: &'a mut Scheduler,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(stage: StageId, graph: &'a mut Graph, scheduler: &'a mut Scheduler) -> Self {
        Self {
            stage,
            graph,
            scheduler,
        }
    }

    pub fn stage_id(&self) -> StageId {
        self.stage
    }

    pub fn inlet_count(&self) -> usize {
        self.graph.stages[self.stage.0].inlets.len()
    }

    pub fn outlet_count(&self) -> usize {
        self.graph.stages[self.stage.0].outlets.len()
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.graph.stages[self.stage.0].metrics
    }

    fn inlet_link(&self, inlet: usize) -> Result<LinkId> {
        self.graph.stages[self.stage.0]
            .inlets
            .get(inlet)
            .copied()
            .flatten()
            .ok_or_else(|| StreamError::protocol(format!("no connected inlet {inlet}")))
    }

    fn outlet_link(&self, outlet: usize) -> Result<LinkId> {
        self.graph.stages[self.stage.0]
            .outlets
            .get(outlet)
            .copied()
            .flatten()
            .ok_or_else(|| StreamError::protocol(format!("no connected outlet {outlet}")))
    }

    fn inlet(&self, inlet: usize) -> Option<&Link> {
        self.inlet_link(inlet).ok().map(|id| &self.graph.links[id.0])
    }

    fn outlet(&self, outlet: usize) -> Option<&Link> {
        self.outlet_link(outlet).ok().map(|id| &self.graph.links[id.0])
    }

    /// Signal demand for one element on `inlet`.
    ///
    /// Ignored once the inlet is closed.
    pub fn pull(&mut self, inlet: usize) -> Result<()> {
        let id = self.inlet_link(inlet)?;
        let link = &mut self.graph.links[id.0];
        if !link.is_open() {
            trace!(stage = self.stage.0, inlet, "pull on closed inlet ignored");
            return Ok(());
        }
        match link.transfer {
            Transfer::Idle => link.transfer = Transfer::Demanded,
            Transfer::Demanded => {
                return Err(StreamError::protocol(format!(
                    "inlet {inlet} pulled twice without an intervening push"
                )))
            }
            Transfer::Pushed(_) => {
                return Err(StreamError::protocol(format!(
                    "inlet {inlet} pulled before its pending element was grabbed"
                )))
            }
        }
        self.graph.stages[self.stage.0].metrics.record_pull();
        self.scheduler.enqueue(self.graph, Event::Pull(id));
        Ok(())
    }

    /// Pull only when the inlet is open, not yet pulled and holds no element
    pub fn try_pull(&mut self, inlet: usize) -> Result<bool> {
        let allowed = matches!(
            self.inlet(inlet),
            Some(link) if link.is_open() && matches!(link.transfer, Transfer::Idle)
        );
        if allowed {
            self.pull(inlet)?;
        }
        Ok(allowed)
    }

    /// Deliver one element on `outlet` in response to outstanding demand.
    ///
    /// An element pushed into a cancelled outlet is discarded.
    pub fn push(&mut self, outlet: usize, element: DynValue) -> Result<()> {
        let id = self.outlet_link(outlet)?;
        let link = &mut self.graph.links[id.0];
        match link.state {
            LinkState::Open => {}
            LinkState::Cancelled => {
                trace!(stage = self.stage.0, outlet, "push into cancelled outlet discarded");
                return Ok(());
            }
            LinkState::Completed | LinkState::Failed => {
                return Err(StreamError::protocol(format!(
                    "push on outlet {outlet} after it was closed"
                )))
            }
        }
        if !matches!(link.transfer, Transfer::Demanded) {
            return Err(StreamError::protocol(format!(
                "push on outlet {outlet} without outstanding demand"
            )));
        }
        link.transfer = Transfer::Pushed(element);
        self.graph.stages[self.stage.0].metrics.record_push();
        self.scheduler.enqueue(self.graph, Event::Push(id));
        Ok(())
    }

    pub fn push_as<T: Send + 'static>(&mut self, outlet: usize, element: T) -> Result<()> {
        self.push(outlet, Box::new(element))
    }

    /// Take the element pushed on `inlet`
    pub fn grab(&mut self, inlet: usize) -> Result<DynValue> {
        let id = self.inlet_link(inlet)?;
        let link = &mut self.graph.links[id.0];
        match mem::replace(&mut link.transfer, Transfer::Idle) {
            Transfer::Pushed(element) => Ok(element),
            other => {
                link.transfer = other;
                Err(StreamError::protocol(format!(
                    "grab on inlet {inlet} without a pending element"
                )))
            }
        }
    }

    pub fn grab_as<T: 'static>(&mut self, inlet: usize) -> Result<T> {
        downcast(self.grab(inlet)?)
    }

    /// No further elements will be pushed on `outlet`
    pub fn complete(&mut self, outlet: usize) -> Result<()> {
        let id = self.outlet_link(outlet)?;
        let link = &mut self.graph.links[id.0];
        if link.is_open() {
            link.state = LinkState::Completed;
            self.scheduler.enqueue(self.graph, Event::Complete(id));
        }
        Ok(())
    }

    /// Fail `outlet` with `error`
    pub fn fail(&mut self, outlet: usize, error: StreamError) -> Result<()> {
        let id = self.outlet_link(outlet)?;
        let link = &mut self.graph.links[id.0];
        if link.is_open() {
            link.state = LinkState::Failed;
            self.scheduler.enqueue(self.graph, Event::Fail(id, error));
        }
        Ok(())
    }

    /// No further elements are wanted on `inlet`; a pending element is discarded
    pub fn cancel(&mut self, inlet: usize) -> Result<()> {
        let id = self.inlet_link(inlet)?;
        let link = &mut self.graph.links[id.0];
        link.transfer = Transfer::Idle;
        if link.is_open() {
            link.state = LinkState::Cancelled;
            self.scheduler.enqueue(self.graph, Event::Cancel(id));
        }
        Ok(())
    }

    /// Complete every outlet and cancel every inlet
    pub fn complete_stage(&mut self) {
        for outlet in 0..self.outlet_count() {
            let _ = self.complete(outlet);
        }
        self.cancel_inlets();
    }

    /// Fail every outlet and cancel every inlet; the first failure of a run is
    /// the one reported by the pipeline
    pub fn fail_stage(&mut self, error: StreamError) {
        self.scheduler.record_failure(&error);
        for outlet in 0..self.outlet_count() {
            let _ = self.fail(outlet, error.clone());
        }
        self.cancel_inlets();
    }

    fn cancel_inlets(&mut self) {
        for inlet in 0..self.inlet_count() {
            let _ = self.cancel(inlet);
        }
    }

    /// Downstream on `outlet` has outstanding demand
    pub fn is_available(&self, outlet: usize) -> bool {
        matches!(
            self.outlet(outlet),
            Some(link) if link.is_open() && matches!(link.transfer, Transfer::Demanded)
        )
    }

    /// An element waits on `inlet`, even if the inlet has since been completed
    pub fn has_element(&self, inlet: usize) -> bool {
        matches!(
            self.inlet(inlet),
            Some(link) if matches!(link.transfer, Transfer::Pushed(_))
        )
    }

    /// No further elements will arrive on `inlet` beyond a pending one
    pub fn is_inlet_closed(&self, inlet: usize) -> bool {
        self.inlet(inlet).map_or(true, |link| !link.is_open())
    }

    pub fn is_outlet_closed(&self, outlet: usize) -> bool {
        self.outlet(outlet).map_or(true, |link| !link.is_open())
    }

    /// Run an external asynchronous operation; its single result comes back
    /// through [`Stage::on_async_result`] tagged with `token`
    pub fn spawn<F>(&mut self, token: u64, operation: F)
    where
        F: Future<Output = Result<DynValue>> + Send + 'static,
    {
        let stage = self.stage;
        let generation = self.graph.stages[stage.0].generation;
        self.scheduler.spawn(
            operation
                .map(move |result| (stage, generation, token, result))
                .boxed(),
        );
    }

    /// Materialize `source` inside the running graph and wire it to a new
    /// inlet of this stage, returning that inlet's index.
    ///
    /// Nothing is left behind when building the source fails. The nested
    /// stages are recycled once they finish; the stage lets go of the inlet
    /// with [`release_inlet`](Self::release_inlet).
    pub fn attach_source<T: Send + 'static>(&mut self, source: Source<T>) -> Result<usize> {
        self.graph.begin_batch();
        let mut port = None;
        let wired = self.wire_nested(source, &mut port);
        let batch = self.graph.end_batch();
        let checked = wired.and_then(|inlet| {
            self.graph.validate_stages(batch.iter().copied())?;
            Ok(inlet)
        });
        let inlet = match checked {
            Ok(inlet) => inlet,
            Err(error) => {
                self.graph.discard_batch(&batch, self.stage, port);
                return Err(error);
            }
        };
        for &stage in &batch {
            self.graph.stages[stage.0].nested = true;
            self.scheduler.enqueue(self.graph, Event::Start(stage));
        }
        trace!(
            stage = self.stage.0,
            inlet,
            added = batch.len(),
            "attached nested source"
        );
        Ok(inlet)
    }

    fn wire_nested<T: Send + 'static>(
        &mut self,
        source: Source<T>,
        port: &mut Option<usize>,
    ) -> Result<usize> {
        let outlet = source.materialize(self.graph)?;
        let inlet = self.graph.add_inlet(self.stage)?;
        *port = Some(inlet);
        self.graph.connect(outlet, Inlet::<T>::new(self.stage, inlet))?;
        Ok(inlet)
    }

    /// Let go of a finished inlet so its link and index can be reused.
    ///
    /// The inlet must be closed with no element left to grab.
    pub fn release_inlet(&mut self, inlet: usize) -> Result<()> {
        if !self.is_inlet_closed(inlet) || self.has_element(inlet) {
            return Err(StreamError::protocol(format!(
                "inlet {inlet} released while still in use"
            )));
        }
        self.graph.release_inlet(self.stage, inlet)
    }
}
