//! Stages combining N upstream inputs into one output.

use crate::error::{validate_positive, Result};
use crate::graph::DynValue;
use crate::stage::{Stage, StageContext};
use std::collections::VecDeque;

fn all_inlets_closed(ctx: &StageContext<'_>) -> bool {
    (0..ctx.inlet_count()).all(|inlet| ctx.is_inlet_closed(inlet) && !ctx.has_element(inlet))
}

/// Emits whichever input delivers first; completes when every input has
pub struct Merge {
    /// Inputs holding an element that could not be pushed yet, in arrival order
    ready: VecDeque<usize>,
}

impl Merge {
    pub fn new() -> Self {
        Self {
            ready: VecDeque::new(),
        }
    }

    fn complete_if_drained(&self, ctx: &mut StageContext<'_>) {
        if self.ready.is_empty() && all_inlets_closed(ctx) {
            ctx.complete_stage();
        }
    }
}

impl Default for Merge {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Merge {
    fn name(&self) -> &str {
        "merge"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for inlet in 0..ctx.inlet_count() {
            ctx.try_pull(inlet)?;
        }
        self.complete_if_drained(ctx);
        Ok(())
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if ctx.is_available(0) && self.ready.is_empty() {
            let item = ctx.grab(inlet)?;
            ctx.push(0, item)?;
            ctx.try_pull(inlet)?;
        } else if !self.ready.contains(&inlet) {
            self.ready.push_back(inlet);
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if let Some(inlet) = self.ready.pop_front() {
            let item = ctx.grab(inlet)?;
            ctx.push(0, item)?;
            ctx.try_pull(inlet)?;
        }
        self.complete_if_drained(ctx);
        Ok(())
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        self.complete_if_drained(ctx);
        Ok(())
    }
}

/// Drains its inputs strictly one after another, in index order
pub struct Concat {
    current: usize,
}

impl Concat {
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Move to the next input that is still open
    fn advance(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        while self.current < ctx.inlet_count() && ctx.is_inlet_closed(self.current) {
            self.current += 1;
        }
        if self.current >= ctx.inlet_count() {
            ctx.complete_stage();
        } else if ctx.is_available(0) {
            ctx.try_pull(self.current)?;
        }
        Ok(())
    }
}

impl Default for Concat {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if self.current < ctx.inlet_count() {
            ctx.try_pull(self.current)?;
        }
        Ok(())
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab(inlet)?;
        ctx.push(0, item)
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if inlet == self.current {
            self.advance(ctx)?;
        }
        Ok(())
    }
}

type Combiner = Box<dyn FnMut(Vec<DynValue>) -> Result<DynValue> + Send>;

/// Pulls every input in lockstep and emits one combined element per round.
///
/// Completes as soon as any input is exhausted.
pub struct Zip {
    combine: Combiner,
}

impl Zip {
    pub fn new(combine: impl FnMut(Vec<DynValue>) -> Result<DynValue> + Send + 'static) -> Self {
        Self {
            combine: Box::new(combine),
        }
    }
}

impl Stage for Zip {
    fn name(&self) -> &str {
        "zip"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        for inlet in 0..ctx.inlet_count() {
            if !ctx.has_element(inlet) {
                ctx.try_pull(inlet)?;
            }
        }
        Ok(())
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        let inlets = ctx.inlet_count();
        if !(0..inlets).all(|inlet| ctx.has_element(inlet)) {
            return Ok(());
        }
        let mut round = Vec::with_capacity(inlets);
        for inlet in 0..inlets {
            round.push(ctx.grab(inlet)?);
        }
        let combined = (self.combine)(round)?;
        ctx.push(0, combined)?;
        if (0..inlets).any(|inlet| ctx.is_inlet_closed(inlet)) {
            ctx.complete_stage();
        }
        Ok(())
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if !ctx.has_element(inlet) {
            ctx.complete_stage();
        }
        Ok(())
    }
}

/// Round-robin over the inputs, taking `segment_size` consecutive elements
/// from each before moving on. Exhausted inputs are skipped.
pub struct Interleave {
    segment_size: usize,
    current: usize,
    count: usize,
}

impl Interleave {
    pub fn new(segment_size: usize) -> Result<Self> {
        Ok(Self {
            segment_size: validate_positive("segment_size", segment_size)?,
            current: 0,
            count: 0,
        })
    }

    fn emit_or_pull(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if ctx.has_element(self.current) {
            let item = ctx.grab(self.current)?;
            ctx.push(0, item)?;
            self.count += 1;
            if self.count >= self.segment_size || ctx.is_inlet_closed(self.current) {
                self.switch_input(ctx);
            }
        } else {
            ctx.try_pull(self.current)?;
        }
        Ok(())
    }

    /// Move to the next open input after the current one, wrapping around.
    /// Completes the stage when none is left.
    fn switch_input(&mut self, ctx: &mut StageContext<'_>) -> bool {
        self.count = 0;
        let inputs = ctx.inlet_count();
        for step in 1..=inputs {
            let candidate = (self.current + step) % inputs;
            if !ctx.is_inlet_closed(candidate) || ctx.has_element(candidate) {
                self.current = candidate;
                return true;
            }
        }
        ctx.complete_stage();
        false
    }
}

impl Stage for Interleave {
    fn name(&self) -> &str {
        "interleave"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        self.emit_or_pull(ctx)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if inlet == self.current && ctx.is_available(0) {
            self.emit_or_pull(ctx)?;
        }
        Ok(())
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if all_inlets_closed(ctx) {
            ctx.complete_stage();
        } else if inlet == self.current
            && !ctx.has_element(inlet)
            && self.switch_input(ctx)
            && ctx.is_available(0)
        {
            self.emit_or_pull(ctx)?;
        }
        Ok(())
    }
}
