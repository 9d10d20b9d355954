//! Open-loop pacing with bounded catch-up.
//!
//! A [`Pacer`] decides when each operation of a worker *should* start. Operations are issued on
//! a fixed schedule, independent of how long previous operations took. A worker that falls
//! behind (because an operation stalled, or the machine did) is allowed to catch up, but never
//! faster than a fixed multiple of the target rate. That keeps a single stall from turning into
//! an unbounded burst while still charging the queueing delay to the response time of every
//! operation that was issued late.
//!
//! Usage, per worker:
//!
//! - re-arm the schedule with [`Pacer::set_initial_start_time`] right before the timed loop.
//! - for every operation:
//!   - remember [`Pacer::expected_next_operation_nanos`] as the expected start.
//!   - call [`Pacer::acquire`], which blocks until the operation may start.
//!   - time the operation. Service time is measured from the actual start, response time from
//!     the expected start.

use std::sync::Arc;

use crate::{
    clock::{Clock, MonotonicClock},
    error::ConfigError,
    idle::IdleStrategy,
};

/// Catch-up rate used unless configured otherwise, as a multiple of the target rate.
pub const DEFAULT_CATCH_UP_MULTIPLE: f64 = 3.0;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Whether the pacer was keeping up with its schedule the last time it was asked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacerState {
    OnPace,
    CatchingUp,
}

/// Per-worker open-loop scheduler. Never shared between threads.
pub struct Pacer<C = MonotonicClock> {
    clock: C,
    idle: Arc<dyn IdleStrategy>,

    initial_start_time: u64,
    throughput_per_ns: f64,
    units_completed: u64,

    caught_up: bool,
    catch_up_start_time: u64,
    units_completed_at_catch_up_start: u64,
    catch_up_rate_multiple: f64,
    catch_up_throughput_per_ns: f64,
}

impl Pacer<MonotonicClock> {
    /// Create a pacer targeting `units_per_sec`, catching up at the default multiple.
    pub fn new(units_per_sec: f64, idle: Arc<dyn IdleStrategy>) -> Result<Self, ConfigError> {
        Self::with_catch_up(units_per_sec, DEFAULT_CATCH_UP_MULTIPLE, idle)
    }

    pub fn with_catch_up(
        units_per_sec: f64,
        catch_up_rate_multiple: f64,
        idle: Arc<dyn IdleStrategy>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(
            units_per_sec,
            catch_up_rate_multiple,
            idle,
            MonotonicClock::new(),
        )
    }
}

impl<C: Clock> Pacer<C> {
    /// Create a pacer reading time from `clock`. The schedule starts at the clock's current time.
    pub fn with_clock(
        units_per_sec: f64,
        catch_up_rate_multiple: f64,
        idle: Arc<dyn IdleStrategy>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        validate_throughput(units_per_sec)?;
        validate_catch_up_multiple(catch_up_rate_multiple)?;

        let throughput_per_ns = units_per_sec / NANOS_PER_SEC;
        let initial_start_time = clock.now_nanos();
        Ok(Pacer {
            clock,
            idle,
            initial_start_time,
            throughput_per_ns,
            units_completed: 0,
            caught_up: true,
            catch_up_start_time: 0,
            units_completed_at_catch_up_start: 0,
            catch_up_rate_multiple,
            catch_up_throughput_per_ns: catch_up_rate_multiple * throughput_per_ns,
        })
    }

    /// Re-arm the origin of the schedule. Must be called before the first `acquire` of a run.
    pub fn set_initial_start_time(&mut self, initial_start_time: u64) {
        self.initial_start_time = initial_start_time;
    }

    pub fn set_throughput(&mut self, units_per_sec: f64) -> Result<(), ConfigError> {
        validate_throughput(units_per_sec)?;
        self.throughput_per_ns = units_per_sec / NANOS_PER_SEC;
        self.catch_up_throughput_per_ns = self.catch_up_rate_multiple * self.throughput_per_ns;
        Ok(())
    }

    pub fn set_catch_up_rate_multiple(&mut self, multiple: f64) -> Result<(), ConfigError> {
        validate_catch_up_multiple(multiple)?;
        self.catch_up_rate_multiple = multiple;
        self.catch_up_throughput_per_ns = self.catch_up_rate_multiple * self.throughput_per_ns;
        Ok(())
    }

    /// The ideal start time of the next, not yet acquired, operation.
    pub fn expected_next_operation_nanos(&self) -> u64 {
        let offset = (self.units_completed as f64 / self.throughput_per_ns) as u64;
        self.initial_start_time.saturating_add(offset)
    }

    /// How long the caller should wait before starting the next operation.
    ///
    /// Early callers are told to wait for their scheduled time. Late callers enter catch-up and
    /// are spaced at the catch-up rate, counted from the moment they were first seen behind.
    ///
    /// The catch-up origin is only taken on the first late call after an on-pace call. A stall
    /// while already catching up keeps the old origin, and the backlog drains without spacing
    /// until that origin's schedule passes the current time.
    pub fn nanos_to_next_operation(&mut self) -> u64 {
        let now = self.clock.now_nanos();
        let expected = self.expected_next_operation_nanos();

        if expected > now {
            self.caught_up = true;
            return expected - now;
        }

        if self.caught_up {
            // first fall-behind since we were last on pace.
            self.caught_up = false;
            self.catch_up_start_time = now;
            self.units_completed_at_catch_up_start = self.units_completed;
        }

        let units_since_catch_up_start =
            self.units_completed - self.units_completed_at_catch_up_start;
        let catch_up_offset =
            (units_since_catch_up_start as f64 / self.catch_up_throughput_per_ns) as u64;
        let next_start_time = self.catch_up_start_time.saturating_add(catch_up_offset);

        next_start_time.saturating_sub(now)
    }

    /// Block until the next operation may start, then advance the schedule by `unit_count`.
    ///
    /// Read [`Self::expected_next_operation_nanos`] before calling this: afterwards it already
    /// refers to the following operation.
    pub fn acquire(&mut self, unit_count: u64) {
        let wait = self.nanos_to_next_operation();
        if wait > 0 {
            self.spin_for(wait);
        }
        self.units_completed += unit_count;
    }

    fn spin_for(&self, nanos: u64) {
        let deadline = self.clock.now_nanos().saturating_add(nanos);
        while self.clock.now_nanos() < deadline {
            self.idle.idle();
        }
    }

    /// The current time according to this pacer's clock.
    pub fn now_nanos(&self) -> u64 {
        self.clock.now_nanos()
    }

    pub fn units_completed(&self) -> u64 {
        self.units_completed
    }

    pub fn state(&self) -> PacerState {
        if self.caught_up {
            PacerState::OnPace
        } else {
            PacerState::CatchingUp
        }
    }

    /// Target rate in units per second.
    pub fn throughput(&self) -> f64 {
        self.throughput_per_ns * NANOS_PER_SEC
    }

    pub fn catch_up_rate_multiple(&self) -> f64 {
        self.catch_up_rate_multiple
    }
}

pub(crate) fn validate_throughput(units_per_sec: f64) -> Result<(), ConfigError> {
    if units_per_sec.is_finite() && units_per_sec > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThroughput(units_per_sec))
    }
}

pub(crate) fn validate_catch_up_multiple(multiple: f64) -> Result<(), ConfigError> {
    if multiple.is_finite() && multiple >= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidCatchUpMultiple(multiple))
    }
}
