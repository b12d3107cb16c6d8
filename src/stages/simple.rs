//! One-to-one transforms built directly on the protocol.

use crate::error::Result;
use crate::stage::{Stage, StageContext};
use std::marker::PhantomData;

pub struct Map<T, U, F> {
    mapper: F,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, F> Map<T, U, F> {
    pub fn new(mapper: F) -> Self {
        Self {
            mapper,
            _marker: PhantomData,
        }
    }
}

impl<T, U, F> Stage for Map<T, U, F>
where
    T: 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send,
{
    fn name(&self) -> &str {
        "map"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        ctx.push_as(0, (self.mapper)(item))
    }
}

pub struct Filter<T, F> {
    predicate: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> Filter<T, F> {
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Stage for Filter<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send,
{
    fn name(&self) -> &str {
        "filter"
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        if (self.predicate)(&item) {
            ctx.push_as(0, item)
        } else {
            ctx.pull(inlet)
        }
    }
}

/// Passes the first `limit` elements, then completes downstream and
/// cancels upstream
pub struct Take {
    limit: usize,
    taken: usize,
}

impl Take {
    pub fn new(limit: usize) -> Self {
        Self { limit, taken: 0 }
    }
}

impl Stage for Take {
    fn name(&self) -> &str {
        "take"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.limit == 0 {
            ctx.complete_stage();
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab(inlet)?;
        ctx.push(0, item)?;
        self.taken += 1;
        if self.taken >= self.limit {
            ctx.complete_stage();
        }
        Ok(())
    }
}
