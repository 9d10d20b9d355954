//! The per-worker measurement loop.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;

use crate::{
    clock::{Clock, MonotonicClock},
    error::ConfigError,
    gate::StartGate,
    histogram::{HistogramConfig, LatencyHistogram},
    operation::Operation,
    pacer::{Pacer, PacerState},
};

/// Everything a worker needs for one run.
pub struct WorkerContext<C = MonotonicClock> {
    pub id: usize,
    /// Minimum time spent in the timed loop. Only checked between batches.
    pub duration: Duration,
    /// Operations per batch.
    pub samples: usize,
    pub gate: Arc<StartGate>,
    /// A fresh pacer, owned by this worker for the whole run.
    pub pacer: Pacer<C>,
    pub histogram: HistogramConfig,
    pub operation: Arc<dyn Operation>,
}

/// What a worker measured.
#[derive(Debug)]
pub struct WorkerHistograms {
    pub id: usize,
    /// Time from the actual start of each operation to its completion.
    pub service: LatencyHistogram,
    /// Time from the scheduled start of each operation to its completion.
    pub response: LatencyHistogram,
    pub batches: u64,
    /// Pacing state at the end of the last batch.
    pub pacer_state: PacerState,
}

#[derive(Debug)]
pub enum WorkerOutcome {
    Completed(WorkerHistograms),
    /// The start gate was aborted before the run began. Nothing was recorded.
    Aborted,
}

pub struct Worker<C = MonotonicClock> {
    id: usize,
    duration: Duration,
    samples: usize,
    gate: Arc<StartGate>,
    pacer: Pacer<C>,
    operation: Arc<dyn Operation>,
    service: LatencyHistogram,
    response: LatencyHistogram,
}

impl<C: Clock> Worker<C> {
    pub fn new(ctx: WorkerContext<C>) -> Result<Self, ConfigError> {
        if ctx.samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        Ok(Worker {
            id: ctx.id,
            duration: ctx.duration,
            samples: ctx.samples,
            gate: ctx.gate,
            pacer: ctx.pacer,
            operation: ctx.operation,
            service: ctx.histogram.build()?,
            response: ctx.histogram.build()?,
        })
    }

    /// Wait at the start gate, then run batches until the deadline.
    ///
    /// The schedule is anchored once, when the gate opens, and runs on across batches.
    ///
    /// A batch always runs to completion, so the time spent measuring is at least the configured
    /// duration. A failing operation ends the worker with an error.
    pub fn run(mut self) -> anyhow::Result<WorkerOutcome> {
        if self.gate.arrive_and_wait().is_err() {
            tracing::debug!(worker = self.id, "start gate aborted, exiting");
            return Ok(WorkerOutcome::Aborted);
        }

        let start = self.pacer.now_nanos();
        let deadline = start.saturating_add(saturating_nanos(self.duration));
        self.pacer.set_initial_start_time(start);

        let mut batches = 0u64;
        loop {
            self.run_batch()
                .with_context(|| format!("worker {} failed in batch {}", self.id, batches))?;
            batches += 1;
            if self.pacer.now_nanos() >= deadline {
                break;
            }
        }

        tracing::debug!(
            worker = self.id,
            batches,
            samples = self.service.len(),
            state = ?self.pacer.state(),
            "worker finished",
        );

        Ok(WorkerOutcome::Completed(WorkerHistograms {
            id: self.id,
            service: self.service,
            response: self.response,
            batches,
            pacer_state: self.pacer.state(),
        }))
    }

    fn run_batch(&mut self) -> anyhow::Result<()> {
        for _ in 0..self.samples {
            // captured before acquire, which moves the schedule on to the next operation.
            let expected_start = self.pacer.expected_next_operation_nanos();
            self.pacer.acquire(1);
            let actual_start = self.pacer.now_nanos();
            self.operation.perform()?;
            let done = self.pacer.now_nanos();

            self.service.record(done.saturating_sub(actual_start));
            self.response.record(done.saturating_sub(expected_start));
        }
        Ok(())
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
