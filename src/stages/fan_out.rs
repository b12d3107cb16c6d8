//! Stages splitting one upstream into N outputs.

use crate::error::Result;
use crate::stage::{Stage, StageContext};
use std::marker::PhantomData;

fn open_outlets(ctx: &StageContext<'_>) -> Vec<usize> {
    (0..ctx.outlet_count())
        .filter(|outlet| !ctx.is_outlet_closed(*outlet))
        .collect()
}

/// Copies every element to all open outputs.
///
/// Upstream is pulled only once every open output has demand again, so the
/// slowest output paces the others. Cancelled outputs drop out of the set.
pub struct Broadcast<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broadcast<T> {
    fn pull_when_all_ready(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let open = open_outlets(ctx);
        if !open.is_empty() && open.iter().all(|outlet| ctx.is_available(*outlet)) {
            ctx.try_pull(0)?;
        }
        Ok(())
    }
}

impl<T: Clone + Send + 'static> Stage for Broadcast<T> {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        self.pull_when_all_ready(ctx)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        for outlet in open_outlets(ctx) {
            ctx.push_as(outlet, item.clone())?;
        }
        Ok(())
    }

    fn on_downstream_finish(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if open_outlets(ctx).is_empty() {
            ctx.complete_stage();
            return Ok(());
        }
        self.pull_when_all_ready(ctx)
    }
}

/// Routes each element to the first output that has demand.
///
/// Upstream is cancelled only when every output has cancelled.
pub struct Balance;

impl Balance {
    pub fn new() -> Self {
        Balance
    }

    fn dispatch(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let Some(target) = (0..ctx.outlet_count()).find(|outlet| ctx.is_available(*outlet)) else {
            return Ok(());
        };
        let item = ctx.grab(0)?;
        ctx.push(target, item)?;
        if ctx.is_inlet_closed(0) {
            ctx.complete_stage();
        } else if (0..ctx.outlet_count()).any(|outlet| ctx.is_available(outlet)) {
            ctx.try_pull(0)?;
        }
        Ok(())
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Balance {
    fn name(&self) -> &str {
        "balance"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if ctx.has_element(0) {
            self.dispatch(ctx)
        } else {
            ctx.try_pull(0).map(|_| ())
        }
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        self.dispatch(ctx)
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        if !ctx.has_element(0) {
            ctx.complete_stage();
        }
        Ok(())
    }

    fn on_downstream_finish(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if open_outlets(ctx).is_empty() {
            ctx.complete_stage();
        }
        Ok(())
    }
}
