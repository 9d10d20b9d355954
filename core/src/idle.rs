//! Strategies for what a worker does while busy-waiting for its next deadline.

use std::{fmt, str::FromStr, sync::Arc};

/// Called repeatedly while spinning until an external deadline passes.
pub trait IdleStrategy: Send + Sync {
    fn idle(&self);
}

/// Does nothing: a pure busy-spin. Best timing precision, burns a whole core.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpIdle;

impl IdleStrategy for NoOpIdle {
    #[inline(never)]
    fn idle(&self) {}
}

/// Yields the processor on every call. Costs some scheduling jitter.
#[derive(Clone, Copy, Debug, Default)]
pub struct YieldIdle;

impl IdleStrategy for YieldIdle {
    fn idle(&self) {
        std::thread::yield_now();
    }
}

/// Named idle strategies, for configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleKind {
    NoOp,
    Yield,
}

impl IdleKind {
    /// Pick a strategy for `workers` spinning threads.
    ///
    /// Pure spinning is only chosen when every worker can have a processor to itself, with one
    /// left for measurement overhead and one for the OS.
    pub fn select(workers: usize, available_processors: usize) -> Self {
        let required = workers.saturating_add(2);
        if available_processors > required {
            IdleKind::NoOp
        } else {
            IdleKind::Yield
        }
    }

    pub fn build(self) -> Arc<dyn IdleStrategy> {
        match self {
            IdleKind::NoOp => Arc::new(NoOpIdle),
            IdleKind::Yield => Arc::new(YieldIdle),
        }
    }
}

impl fmt::Display for IdleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdleKind::NoOp => "noop",
            IdleKind::Yield => "yield",
        };
        f.write_str(name)
    }
}

impl FromStr for IdleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noop" => Ok(IdleKind::NoOp),
            "yield" => Ok(IdleKind::Yield),
            other => anyhow::bail!("invalid idle strategy: {}", other),
        }
    }
}
