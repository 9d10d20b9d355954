//! The unit of work being measured.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Target of the events emitted by [`LogMessage`].
pub const LATENCY_TARGET: &str = "pacebench::latency";

/// Length of the default [`LogMessage`] payload.
pub const DEFAULT_PAYLOAD_LEN: usize = 64;

/// A synchronous operation with bounded, but unknown, latency.
///
/// The harness only observes how long `perform` takes. Errors are not retried: they end the
/// worker that hit them and fail the run.
pub trait Operation: Send + Sync {
    fn perform(&self) -> anyhow::Result<()>;
}

impl<F> Operation for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn perform(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Does nothing. Measures the overhead of the harness itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct Noop;

impl Operation for Noop {
    #[inline(never)]
    fn perform(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Spins for a fixed duration, without yielding.
#[derive(Clone, Copy, Debug)]
pub struct FixedLatency {
    latency: Duration,
}

impl FixedLatency {
    pub fn new(latency: Duration) -> Self {
        FixedLatency { latency }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

impl Operation for FixedLatency {
    fn perform(&self) -> anyhow::Result<()> {
        let start = Instant::now();
        while start.elapsed() < self.latency {
            std::hint::spin_loop();
        }
        Ok(())
    }
}

/// Emits one `info` event at [`LATENCY_TARGET`] carrying a fixed payload.
///
/// The payload is built once and shared by every worker. It is never mutated.
#[derive(Clone, Debug)]
pub struct LogMessage {
    payload: Arc<str>,
}

impl LogMessage {
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        LogMessage {
            payload: payload.into(),
        }
    }

    /// A payload of `len` filler characters.
    pub fn with_len(len: usize) -> Self {
        Self::new("x".repeat(len))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl Default for LogMessage {
    fn default() -> Self {
        Self::with_len(DEFAULT_PAYLOAD_LEN)
    }
}

impl Operation for LogMessage {
    fn perform(&self) -> anyhow::Result<()> {
        tracing::info!(target: LATENCY_TARGET, "{}", &*self.payload);
        Ok(())
    }
}
