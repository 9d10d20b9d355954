//! Run coordination: spawning workers, releasing them together, joining them and merging what
//! they measured.
//!
//! A run goes through three stages, each with its own type:
//!
//! - [`PreparedRun`]: worker threads exist and are parked at the start gate. The coordinator
//!   still holds its own slot of the gate, so nothing is measured yet. Dropping a prepared run
//!   aborts it.
//! - [`StartedRun`]: the coordinator released the gate and the workers are measuring.
//! - [`RunResult`]: every worker was joined and the per-worker histograms were merged.
//!
//! Several runs may be prepared at once (e.g. a warmup and a measured run) and released one
//! after another; see [`Benchmark`].

use std::{
    any::Any,
    mem,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant, SystemTime},
};

use anyhow::Context as _;

use crate::{
    clock::MonotonicClock,
    error::ConfigError,
    gate::StartGate,
    histogram::{HistogramConfig, RunHistogram},
    idle::IdleStrategy,
    operation::Operation,
    pacer::{
        validate_catch_up_multiple, validate_throughput, Pacer, PacerState,
        DEFAULT_CATCH_UP_MULTIPLE,
    },
    worker::{Worker, WorkerContext, WorkerHistograms, WorkerOutcome},
};

/// How the target throughput of a run is applied to its workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateMode {
    /// Every worker is paced at the full target throughput.
    #[default]
    PerWorker,
    /// The target throughput is split evenly between the workers.
    Split,
}

/// Parameters of a single run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub workers: usize,
    /// Target throughput in operations per second, see [`RateMode`].
    pub throughput: f64,
    pub rate_mode: RateMode,
    /// Minimum time spent measuring.
    pub duration: Duration,
    /// Operations per batch, per worker. The deadline is only checked between batches.
    pub samples_per_batch: usize,
    pub catch_up_multiple: f64,
    pub histogram: HistogramConfig,
}

impl RunConfig {
    pub fn new(
        workers: usize,
        throughput: f64,
        duration: Duration,
        samples_per_batch: usize,
    ) -> Self {
        RunConfig {
            workers,
            throughput,
            rate_mode: RateMode::default(),
            duration,
            samples_per_batch,
            catch_up_multiple: DEFAULT_CATCH_UP_MULTIPLE,
            histogram: HistogramConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        // the start gate also holds a slot for the coordinator.
        if self.gate_parties().is_none() {
            return Err(ConfigError::TooManyWorkers(self.workers));
        }
        if self.samples_per_batch == 0 {
            return Err(ConfigError::NoSamples);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        validate_throughput(self.throughput)?;
        validate_catch_up_multiple(self.catch_up_multiple)?;
        self.histogram.validate()
    }

    fn gate_parties(&self) -> Option<usize> {
        self.workers.checked_add(1)
    }

    /// The rate each individual worker is paced at.
    pub fn worker_throughput(&self) -> f64 {
        match self.rate_mode {
            RateMode::PerWorker => self.throughput,
            RateMode::Split => self.throughput / self.workers as f64,
        }
    }
}

type WorkerHandle = JoinHandle<anyhow::Result<WorkerOutcome>>;

/// Worker threads parked at the start gate.
pub struct PreparedRun {
    label: String,
    config: RunConfig,
    gate: Arc<StartGate>,
    handles: Vec<WorkerHandle>,
}

impl PreparedRun {
    /// Validate `config`, then spawn one thread per worker. The workers block at the start gate
    /// until [`PreparedRun::start`].
    pub fn prepare(
        label: impl Into<String>,
        config: &RunConfig,
        operation: Arc<dyn Operation>,
        idle: Arc<dyn IdleStrategy>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let label = label.into();

        let parties = config
            .gate_parties()
            .ok_or(ConfigError::TooManyWorkers(config.workers))?;
        let gate = Arc::new(StartGate::new(parties));
        let clock = MonotonicClock::new();

        let mut prepared = PreparedRun {
            label,
            config: config.clone(),
            gate: gate.clone(),
            handles: Vec::with_capacity(config.workers),
        };

        for id in 0..config.workers {
            let pacer = Pacer::with_clock(
                config.worker_throughput(),
                config.catch_up_multiple,
                idle.clone(),
                clock,
            )?;
            let worker = Worker::new(WorkerContext {
                id,
                duration: config.duration,
                samples: config.samples_per_batch,
                gate: gate.clone(),
                pacer,
                histogram: config.histogram,
                operation: operation.clone(),
            })?;
            // on error, dropping `prepared` aborts the threads spawned so far.
            let handle = std::thread::Builder::new()
                .name(format!("latency-{}", id))
                .spawn(move || worker.run())
                .with_context(|| format!("failed to spawn worker {}", id))?;
            prepared.handles.push(handle);
        }

        tracing::debug!(
            run = %prepared.label,
            workers = config.workers,
            throughput = config.throughput,
            per_worker = config.worker_throughput(),
            "run prepared",
        );
        Ok(prepared)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Release the workers. The run's window starts right after the release.
    pub fn start(mut self) -> StartedRun {
        let handles = mem::take(&mut self.handles);
        self.gate.count_down();
        let start = SystemTime::now();
        let started_at = Instant::now();
        tracing::info!(run = %self.label, workers = handles.len(), "run started");

        StartedRun {
            label: mem::take(&mut self.label),
            config: self.config.clone(),
            handles,
            start,
            started_at,
        }
    }

    /// Release the workers without measuring anything and wait for them to exit.
    pub fn abort(self) {
        drop(self)
    }
}

impl Drop for PreparedRun {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.gate.abort();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!(run = %self.label, "run aborted before start");
    }
}

/// A released run whose workers are measuring.
pub struct StartedRun {
    label: String,
    config: RunConfig,
    handles: Vec<WorkerHandle>,
    start: SystemTime,
    started_at: Instant,
}

impl StartedRun {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for every worker, then merge their histograms.
    ///
    /// Fails if any worker failed or panicked; there is no partial result. Every worker is
    /// joined before returning, also on failure.
    pub fn finish(self) -> anyhow::Result<RunResult> {
        let mut measured = Vec::with_capacity(self.handles.len());
        let mut first_error = None;

        for (id, handle) in self.handles.into_iter().enumerate() {
            let failure = match handle.join() {
                Ok(Ok(WorkerOutcome::Completed(h))) => {
                    measured.push(h);
                    continue;
                }
                Ok(Ok(WorkerOutcome::Aborted)) => {
                    anyhow::anyhow!("worker {} aborted after start", id)
                }
                Ok(Err(e)) => e,
                Err(payload) => {
                    anyhow::anyhow!("worker {} panicked: {}", id, panic_message(&*payload))
                }
            };
            if first_error.is_none() {
                first_error = Some(failure);
            }
        }

        let elapsed = self.started_at.elapsed();
        let end = SystemTime::now();

        if let Some(e) = first_error {
            return Err(e.context(format!("run `{}` failed", self.label)));
        }

        let service = RunHistogram::merge_all(
            self.config.histogram,
            self.start,
            end,
            measured.iter().map(|w| &w.service),
        )?;
        let response = RunHistogram::merge_all(
            self.config.histogram,
            self.start,
            end,
            measured.iter().map(|w| &w.response),
        )?;

        let workers: Vec<WorkerSummary> = measured.iter().map(WorkerSummary::from).collect();

        tracing::info!(
            run = %self.label,
            elapsed = ?elapsed,
            samples = service.histogram().len(),
            "run finished",
        );

        Ok(RunResult {
            label: self.label,
            config: self.config,
            service,
            response,
            elapsed,
            workers,
        })
    }
}

/// Per-worker counters kept after the histograms were merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSummary {
    pub id: usize,
    pub batches: u64,
    pub samples: u64,
    pub pacer_state: PacerState,
}

impl From<&WorkerHistograms> for WorkerSummary {
    fn from(h: &WorkerHistograms) -> Self {
        WorkerSummary {
            id: h.id,
            batches: h.batches,
            samples: h.service.len(),
            pacer_state: h.pacer_state,
        }
    }
}

/// The merged outcome of a run.
#[derive(Debug)]
pub struct RunResult {
    pub label: String,
    pub config: RunConfig,
    /// Service times of every worker, tagged with the run's window.
    pub service: RunHistogram,
    /// Response times of every worker, tagged with the run's window.
    pub response: RunHistogram,
    /// Time from release to the last join, measured on the monotonic clock.
    pub elapsed: Duration,
    pub workers: Vec<WorkerSummary>,
}

impl RunResult {
    pub fn start(&self) -> SystemTime {
        self.service.start()
    }

    pub fn end(&self) -> SystemTime {
        self.service.end()
    }

    pub fn total_samples(&self) -> u64 {
        self.service.histogram().len()
    }

    /// Achieved throughput over the whole run, in operations per second.
    pub fn achieved_throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total_samples() as f64 / secs
    }
}

/// An optional, discarded warmup run followed by a measured run.
#[derive(Clone, Debug)]
pub struct Benchmark {
    pub warmup: Option<RunConfig>,
    pub measured: RunConfig,
}

impl Benchmark {
    /// Prepare both runs up front, run the warmup and throw its results away, then run and
    /// return the measured run.
    pub fn run(
        &self,
        operation: Arc<dyn Operation>,
        idle: Arc<dyn IdleStrategy>,
    ) -> anyhow::Result<RunResult> {
        let warmup = self
            .warmup
            .as_ref()
            .map(|config| PreparedRun::prepare("warmup", config, operation.clone(), idle.clone()))
            .transpose()?;
        let measured = PreparedRun::prepare("measured", &self.measured, operation, idle)?;

        if let Some(warmup) = warmup {
            let result = warmup.start().finish()?;
            tracing::info!(
                samples = result.total_samples(),
                elapsed = ?result.elapsed,
                "warmup done",
            );
        }

        measured.start().finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{RateMode, RunConfig};
    use crate::error::ConfigError;
    use std::time::Duration;

    #[test]
    fn validate_rejects_misconfiguration() {
        let ok = RunConfig::new(2, 1000.0, Duration::from_millis(10), 10);
        assert_eq!(ok.validate(), Ok(()));

        let mut c = ok.clone();
        c.workers = 0;
        assert_eq!(c.validate(), Err(ConfigError::NoWorkers));

        let mut c = ok.clone();
        c.workers = usize::MAX;
        assert_eq!(c.validate(), Err(ConfigError::TooManyWorkers(usize::MAX)));

        let mut c = ok.clone();
        c.throughput = 0.0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidThroughput(0.0)));

        let mut c = ok.clone();
        c.throughput = -5.0;
        assert_eq!(c.validate(), Err(ConfigError::InvalidThroughput(-5.0)));

        let mut c = ok.clone();
        c.samples_per_batch = 0;
        assert_eq!(c.validate(), Err(ConfigError::NoSamples));

        let mut c = ok.clone();
        c.duration = Duration::ZERO;
        assert_eq!(c.validate(), Err(ConfigError::ZeroDuration));

        let mut c = ok;
        c.catch_up_multiple = 0.5;
        assert_eq!(c.validate(), Err(ConfigError::InvalidCatchUpMultiple(0.5)));
    }

    #[test]
    fn worker_throughput_by_mode() {
        let mut c = RunConfig::new(4, 1000.0, Duration::from_secs(1), 10);
        assert_eq!(c.worker_throughput(), 1000.0);
        c.rate_mode = RateMode::Split;
        assert_eq!(c.worker_throughput(), 250.0);
    }
}
