use thiserror::Error;

/// A run parameter that makes the run impossible to start.
///
/// These are rejected before any worker thread exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("target throughput must be a finite, positive number of units per second, got {0}")]
    InvalidThroughput(f64),
    #[error("catch-up rate multiple must be finite and at least 1, got {0}")]
    InvalidCatchUpMultiple(f64),
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("too many workers: {0}")]
    TooManyWorkers(usize),
    #[error("a batch must contain at least one sample")]
    NoSamples,
    #[error("run duration must be non-zero")]
    ZeroDuration,
    #[error("invalid histogram configuration: {0}")]
    InvalidHistogram(String),
}
