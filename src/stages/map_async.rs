use crate::error::{validate_positive, BoxError, Result, StreamError};
use crate::graph::DynValue;
use crate::stage::{Stage, StageContext};
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Instant;

/// Default number of in-flight jobs of an asynchronous map
pub const DEFAULT_PARALLELISM: usize = 1;

/// Order in which results of an asynchronous map are released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Input order, whatever the completion order
    Ordered,
    /// Completion order
    Unordered,
}

enum JobState {
    Running,
    Done(DynValue),
}

/// One element being processed
struct Job {
    seq: u64,
    started: Instant,
    state: JobState,
}

/// Runs an asynchronous function over each element with at most
/// `parallelism` jobs in flight.
///
/// A slot is held from admission until the result has been pushed
/// downstream, so results waiting for demand also count against the limit.
pub struct MapAsync<T, U, F> {
    transform: F,
    parallelism: usize,
    delivery: Delivery,
    next_seq: u64,
    /// Admitted jobs in input order
    jobs: VecDeque<Job>,
    /// Results released for delivery
    ready: VecDeque<DynValue>,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, F> MapAsync<T, U, F> {
    pub fn new(parallelism: usize, delivery: Delivery, transform: F) -> Result<Self> {
        Ok(Self {
            transform,
            parallelism: validate_positive("parallelism", parallelism)?,
            delivery,
            next_seq: 0,
            jobs: VecDeque::new(),
            ready: VecDeque::new(),
            _marker: PhantomData,
        })
    }

    fn occupied(&self) -> usize {
        self.jobs.len() + self.ready.len()
    }

    fn is_idle(&self) -> bool {
        self.jobs.is_empty() && self.ready.is_empty()
    }

    /// Push a released result if demand allows, then either admit more
    /// input or complete once input and jobs are exhausted
    fn flush(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if ctx.is_available(0) {
            if let Some(value) = self.ready.pop_front() {
                ctx.push(0, value)?;
            }
        }
        if ctx.is_inlet_closed(0) {
            if self.is_idle() {
                ctx.complete_stage();
            }
        } else if self.occupied() < self.parallelism {
            ctx.try_pull(0)?;
        }
        Ok(())
    }
}

impl<T, U, F, Fut, E> Stage for MapAsync<T, U, F>
where
    T: 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = std::result::Result<U, E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn name(&self) -> &str {
        match self.delivery {
            Delivery::Ordered => "map_async",
            Delivery::Unordered => "map_async_unordered",
        }
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> Result<()> {
        if self.occupied() >= self.parallelism {
            return Err(StreamError::protocol("element pushed with no available worker"));
        }
        let item = ctx.grab_as::<T>(inlet)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        let job = (self.transform)(item);
        ctx.spawn(
            seq,
            job.map(|result| {
                result
                    .map(|value| Box::new(value) as DynValue)
                    .map_err(StreamError::upstream)
            }),
        );
        self.jobs.push_back(Job {
            seq,
            started: Instant::now(),
            state: JobState::Running,
        });
        if self.occupied() < self.parallelism {
            ctx.try_pull(0)?;
        }
        Ok(())
    }

    fn on_pull(&mut self, ctx: &mut StageContext<'_>, _outlet: usize) -> Result<()> {
        self.flush(ctx)
    }

    fn on_upstream_finish(&mut self, ctx: &mut StageContext<'_>, _inlet: usize) -> Result<()> {
        if self.is_idle() {
            ctx.complete_stage();
        }
        Ok(())
    }

    fn on_async_result(
        &mut self,
        ctx: &mut StageContext<'_>,
        token: u64,
        result: Result<DynValue>,
    ) -> Result<()> {
        let value = result?;
        let Some(position) = self.jobs.iter().position(|job| job.seq == token) else {
            return Ok(());
        };
        ctx.metrics()
            .record_job_latency(self.jobs[position].started.elapsed());
        match self.delivery {
            Delivery::Ordered => {
                self.jobs[position].state = JobState::Done(value);
                while matches!(self.jobs.front(), Some(job) if matches!(job.state, JobState::Done(_))) {
                    if let Some(Job {
                        state: JobState::Done(value),
                        ..
                    }) = self.jobs.pop_front()
                    {
                        self.ready.push_back(value);
                    }
                }
            }
            Delivery::Unordered => {
                self.jobs.remove(position);
                self.ready.push_back(value);
            }
        }
        self.flush(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn identity(x: u32) -> futures::future::Ready<std::result::Result<u32, Infallible>> {
        futures::future::ready(Ok(x))
    }

    #[test]
    fn test_parallelism_must_be_positive() {
        assert!(matches!(
            MapAsync::<u32, u32, _>::new(0, Delivery::Ordered, identity),
            Err(StreamError::ConfigError(_))
        ));
        let stage = MapAsync::<u32, u32, _>::new(DEFAULT_PARALLELISM, Delivery::Unordered, identity)
            .unwrap();
        assert_eq!(stage.name(), "map_async_unordered");
        assert_eq!(stage.occupied(), 0);
    }
}
