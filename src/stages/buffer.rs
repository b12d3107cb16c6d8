use crate::buffer::{Buffer, OverflowPolicy};
use crate::error::Result;
use crate::stage::{Stage, StageContext};
use tracing::debug;

/// Decouples upstream from downstream through a bounded [`Buffer`].
///
/// With a dropping or failing policy upstream is always pulled and overflow
/// is resolved by the buffer. With `BackPressure` the stage stops pulling
/// while the buffer is full. Upstream completion is forwarded once the
/// buffer has drained.
pub struct BufferStage<T> {
    buffer: Buffer<T>,
}

impl<T> BufferStage<T> {
    pub fn new(buffer: Buffer<T>) -> Self {
        Self { buffer }
    }

    fn has_room_for_demand(&self) -> bool {
        self.buffer.policy() != OverflowPolicy::BackPressure || !self.buffer.is_full()
    }
}

impl<T: Send + 'static> BufferStage<T> {
    fn emit(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if ctx.is_available(0) && !self.buffer.is_empty() {
            let item = self.buffer.pop()?;
            ctx.push_as(0, item)?;
        }
        if ctx.is_inlet_closed(0) {
            if self.buffer.is_empty() {
                ctx.complete(0)?;
            }
        } else if self.has_room_for_demand() {
            ctx.try_pull(0)?;
        }
        Ok(())
    }
}

impl<T: Send + 'static> Stage for BufferStage<T> {
    fn name(&self) -> &str {
        "buffer"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        let item = ctx.grab_as::<T>(inlet)?;
        let dropped_before = self.buffer.dropped_count();
        let pushed = self.buffer.push(item);
        let dropped = self.buffer.dropped_count() - dropped_before;
        if dropped > 0 {
            ctx.metrics().record_dropped(dropped);
            debug!(
                stage = ctx.stage_id().index(),
                dropped,
                policy = ?self.buffer.policy(),
                utilization = self.buffer.utilization(),
                "buffer overflow"
            );
        }
        pushed?;
        self.emit(ctx)
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        self.emit(ctx)
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        if self.buffer.is_empty() {
            ctx.complete_stage();
        }
        Ok(())
    }
}
