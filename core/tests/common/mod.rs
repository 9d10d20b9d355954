use pacebench_core::{IdleStrategy, ManualClock, Operation, Pacer};
use std::sync::Arc;

/// An idle strategy that moves a manual clock forward by a fixed step on every spin, so that a
/// pacer waiting on that clock always makes progress.
pub struct Ticking {
    clock: ManualClock,
    step: u64,
}

impl Ticking {
    pub fn new(clock: ManualClock, step: u64) -> Arc<Self> {
        Arc::new(Ticking { clock, step })
    }
}

impl IdleStrategy for Ticking {
    fn idle(&self) {
        self.clock.advance(self.step);
    }
}

/// An operation taking exactly `nanos` of manual-clock time.
#[allow(dead_code)]
pub struct Takes {
    pub clock: ManualClock,
    pub nanos: u64,
}

impl Operation for Takes {
    fn perform(&self) -> anyhow::Result<()> {
        self.clock.advance(self.nanos);
        Ok(())
    }
}

/// A pacer on a manual clock starting at zero, spinning in steps of `step` nanoseconds.
#[allow(dead_code)]
pub fn manual_pacer(
    units_per_sec: f64,
    catch_up_multiple: f64,
    step: u64,
) -> (Pacer<ManualClock>, ManualClock) {
    let clock = ManualClock::new(0);
    let pacer = Pacer::with_clock(
        units_per_sec,
        catch_up_multiple,
        Ticking::new(clock.clone(), step),
        clock.clone(),
    )
    .unwrap();
    (pacer, clock)
}
