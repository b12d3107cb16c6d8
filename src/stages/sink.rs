use crate::error::Result;
use crate::stage::{Stage, StageContext};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// Collects every element into a shared vector
pub struct CollectSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectSink<T> {
    pub fn new(items: Arc<Mutex<Vec<T>>>) -> Self {
        Self { items }
    }
}

impl<T: Send + 'static> Stage for CollectSink<T> {
    fn name(&self) -> &str {
        "collect"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        self.items.lock().push(item);
        ctx.pull(inlet)
    }
}

/// Hands every element to a callback
pub struct ForEachSink<T, F> {
    callback: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> ForEachSink<T, F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Stage for ForEachSink<T, F>
where
    T: 'static,
    F: FnMut(T) + Send,
{
    fn name(&self) -> &str {
        "for_each"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        (self.callback)(item);
        ctx.pull(inlet)
    }
}

/// Requests and discards every element
pub struct IgnoreSink;

impl Stage for IgnoreSink {
    fn name(&self) -> &str {
        "ignore"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        ctx.grab(inlet)?;
        ctx.pull(inlet)
    }
}
