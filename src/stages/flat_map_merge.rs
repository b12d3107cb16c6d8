use crate::error::{validate_positive, Result};
use crate::source::Source;
use crate::stage::{Stage, StageContext};
use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::debug;

/// Default number of nested sources drained concurrently
pub const DEFAULT_BREADTH: usize = 16;

const UPSTREAM: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamState {
    Open,
    Finished,
}

/// Turns every element into a nested source and merges up to `breadth` of
/// them at a time.
///
/// Each nested source is materialized into the running graph and wired to a
/// fresh inlet of this stage. Inlet 0 stays the upstream of elements.
pub struct FlatMapMerge<T, U, F> {
    expand: F,
    breadth: usize,
    upstream: UpstreamState,
    /// Inlets of nested sources that have not finished
    active: Vec<usize>,
    /// Inlets holding an element that awaits downstream demand
    ready: VecDeque<usize>,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, F> FlatMapMerge<T, U, F> {
    pub fn new(breadth: usize, expand: F) -> Result<Self> {
        Ok(Self {
            expand,
            breadth: validate_positive("breadth", breadth)?,
            upstream: UpstreamState::Open,
            active: Vec::new(),
            ready: VecDeque::new(),
            _marker: PhantomData,
        })
    }

    fn pull_upstream(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.upstream == UpstreamState::Open && self.active.len() < self.breadth {
            ctx.try_pull(UPSTREAM)?;
        }
        Ok(())
    }

    /// Drop a finished nested source and make room for the next one
    fn retire(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        self.active.retain(|&port| port != inlet);
        ctx.release_inlet(inlet)?;
        self.pull_upstream(ctx)
    }

    fn complete_if_drained(&self, ctx: &mut StageContext<'_>) {
        if self.upstream == UpstreamState::Finished && self.active.is_empty() && self.ready.is_empty()
        {
            ctx.complete_stage();
        }
    }
}

impl<T, U, F> Stage for FlatMapMerge<T, U, F>
where
    T: 'static,
    U: Send + 'static,
    F: FnMut(T) -> Source<U> + Send,
{
    fn name(&self) -> &str {
        "flat_map_merge"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(UPSTREAM)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if inlet == UPSTREAM {
            let element = ctx.grab_as::<T>(UPSTREAM)?;
            let nested = (self.expand)(element);
            let port = ctx.attach_source(nested)?;
            debug!(inlet = port, active = self.active.len() + 1, "nested source attached");
            self.active.push(port);
            ctx.pull(port)?;
            return self.pull_upstream(ctx);
        }
        if ctx.is_available(0) {
            let element = ctx.grab(inlet)?;
            ctx.push(0, element)?;
            ctx.try_pull(inlet)?;
        } else {
            self.ready.push_back(inlet);
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        while let Some(inlet) = self.ready.pop_front() {
            if !ctx.has_element(inlet) {
                continue;
            }
            let element = ctx.grab(inlet)?;
            ctx.push(0, element)?;
            if !ctx.try_pull(inlet)? && ctx.is_inlet_closed(inlet) {
                self.retire(ctx, inlet)?;
            }
            self.complete_if_drained(ctx);
            return Ok(());
        }
        self.pull_upstream(ctx)
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if inlet == UPSTREAM {
            self.upstream = UpstreamState::Finished;
        } else if !ctx.has_element(inlet) {
            self.retire(ctx, inlet)?;
        }
        self.complete_if_drained(ctx);
        Ok(())
    }
}
