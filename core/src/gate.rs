//! A start gate: parties arrive one by one, and are all released together once the last one
//! arrives. The gate can be aborted instead, which releases everybody with an error.

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned to parties waiting at a gate that was aborted before it opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("start gate aborted")]
pub struct Aborted;

struct GateState {
    remaining: usize,
    aborted: bool,
}

pub struct StartGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl StartGate {
    /// Create a gate that opens after `parties` calls to [`StartGate::count_down`].
    pub fn new(parties: usize) -> Self {
        StartGate {
            state: Mutex::new(GateState {
                remaining: parties,
                aborted: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Register the arrival of one party without waiting. Opens the gate on the last arrival.
    /// No-op once the gate is open.
    pub fn count_down(&self) {
        let mut state = self.state.lock();
        if state.remaining == 0 {
            return;
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            self.cv.notify_all();
        }
    }

    /// Block until the gate opens.
    pub fn wait(&self) -> Result<(), Aborted> {
        let mut state = self.state.lock();
        loop {
            if state.remaining == 0 {
                return Ok(());
            }
            if state.aborted {
                return Err(Aborted);
            }
            self.cv.wait(&mut state);
        }
    }

    /// Arrive and block until every other party has arrived.
    pub fn arrive_and_wait(&self) -> Result<(), Aborted> {
        self.count_down();
        self.wait()
    }

    /// Wake up every waiting party with [`Aborted`]. Has no effect on an already open gate.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if state.remaining == 0 {
            return;
        }
        state.aborted = true;
        self.cv.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().remaining == 0
    }

    /// Parties that have yet to arrive.
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }
}

#[cfg(test)]
mod tests {
    use super::{Aborted, StartGate};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn opens_on_last_arrival() {
        let gate = Arc::new(StartGate::new(3));
        let passed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = gate.clone();
                let passed = passed.clone();
                thread::spawn(move || {
                    gate.arrive_and_wait().unwrap();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        while gate.remaining() > 1 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(10));
        assert_eq!(passed.load(Ordering::SeqCst), 0);
        assert!(!gate.is_open());

        gate.count_down();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 2);
        assert!(gate.is_open());
    }

    #[test]
    fn abort_releases_waiters_with_error() {
        let gate = Arc::new(StartGate::new(2));
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.arrive_and_wait())
        };
        while gate.remaining() > 1 {
            thread::yield_now();
        }
        gate.abort();
        assert_eq!(waiter.join().unwrap(), Err(Aborted));
        assert!(!gate.is_open());
    }

    #[test]
    fn abort_after_open_is_ignored() {
        let gate = StartGate::new(1);
        gate.count_down();
        gate.abort();
        assert_eq!(gate.wait(), Ok(()));
        // extra arrivals don't underflow.
        gate.count_down();
        assert_eq!(gate.remaining(), 0);
    }
}
