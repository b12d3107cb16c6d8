use crate::error::{Result, StreamError};
use crate::graph::DynValue;
use crate::stage::{Stage, StageContext};
use futures::future::BoxFuture;
use std::iter::Peekable;

/// Emits the items of an iterator, completing as soon as it is exhausted
pub struct IterSource<I: Iterator> {
    items: Peekable<I>,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            items: items.into_iter().peekable(),
        }
    }
}

impl<I> Stage for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    fn name(&self) -> &str {
        "iter_source"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.items.peek().is_none() {
            ctx.complete(0)?;
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        match self.items.next() {
            Some(item) => {
                ctx.push_as(0, item)?;
                if self.items.peek().is_none() {
                    ctx.complete(0)?;
                }
            }
            None => ctx.complete(0)?,
        }
        Ok(())
    }
}

enum Pending {
    Waiting,
    Ready(DynValue),
}

/// Emits the single value a future resolves to
pub struct FutureSource {
    operation: Option<BoxFuture<'static, Result<DynValue>>>,
    pending: Pending,
}

impl FutureSource {
    pub fn new(operation: BoxFuture<'static, Result<DynValue>>) -> Self {
        Self {
            operation: Some(operation),
            pending: Pending::Waiting,
        }
    }
}

impl Stage for FutureSource {
    fn name(&self) -> &str {
        "future_source"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if let Some(operation) = self.operation.take() {
            ctx.spawn(0, operation);
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        if let Pending::Ready(value) = std::mem::replace(&mut self.pending, Pending::Waiting) {
            ctx.push(0, value)?;
            ctx.complete(0)?;
        }
        Ok(())
    }

    fn on_async_result(
        &mut self,
        ctx: &mut StageContext<'_>,
        _token: u64,
        result: Result<DynValue>,
    ) -> Result<()> {
        let value = result?;
        if ctx.is_available(0) {
            ctx.push(0, value)?;
            ctx.complete(0)?;
        } else {
            self.pending = Pending::Ready(value);
        }
        Ok(())
    }
}

/// Fails immediately on start
pub struct FailedSource {
    error: StreamError,
}

impl FailedSource {
    pub fn new(error: StreamError) -> Self {
        Self { error }
    }
}

impl Stage for FailedSource {
    fn name(&self) -> &str {
        "failed_source"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.fail_stage(self.error.clone());
        Ok(())
    }
}
