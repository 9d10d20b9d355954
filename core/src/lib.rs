//! Open-loop latency measurement.
//!
//! Workers issue operations on a fixed schedule driven by a [`Pacer`], independent of how long
//! earlier operations took, and record two latencies per operation:
//!
//! - *service time*: from the moment the operation actually started until it completed.
//! - *response time*: from the moment the operation was *scheduled* to start until it
//!   completed. This includes any queueing delay caused by the worker falling behind.
//!
//! Each worker records into its own histograms. Once all workers of a run have been joined,
//! their histograms are merged into one service-time and one response-time [`RunHistogram`].

pub mod clock;
pub mod error;
pub mod gate;
pub mod histogram;
pub mod idle;
pub mod operation;
pub mod pacer;
pub mod run;
pub mod worker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::ConfigError;
pub use histogram::{HistogramConfig, LatencyHistogram, PercentileRow, RunHistogram};
pub use idle::{IdleKind, IdleStrategy, NoOpIdle, YieldIdle};
pub use operation::{FixedLatency, LogMessage, Noop, Operation};
pub use pacer::{Pacer, PacerState, DEFAULT_CATCH_UP_MULTIPLE};
pub use run::{Benchmark, PreparedRun, RateMode, RunConfig, RunResult, StartedRun, WorkerSummary};
