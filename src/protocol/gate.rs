// src/protocol/gate.rs
//! One-shot notify-all gate that holds senders until the handshake
//! completes.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Open,
    Closed,
}

/// Result of waiting on the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Open,
    Closed,
    TimedOut,
}

#[derive(Debug)]
pub struct ReadyGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Re-arm the gate. A closed gate stays closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if *state != GateState::Closed {
            *state = GateState::Pending;
        }
    }

    /// Open the gate and wake every waiter. Returns true on the first
    /// transition only.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        if *state != GateState::Pending {
            return false;
        }
        *state = GateState::Open;
        self.cond.notify_all();
        true
    }

    /// Close the gate for good and release every waiter
    pub fn close(&self) {
        let mut state = self.state.lock();
        *state = GateState::Closed;
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock() == GateState::Open
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == GateState::Closed
    }

    /// Block until the gate opens, closes, or `timeout` elapses. A timeout
    /// too large to represent as a deadline waits without one.
    pub fn wait(&self, timeout: Duration) -> GateStatus {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            match *state {
                GateState::Open => return GateStatus::Open,
                GateState::Closed => return GateStatus::Closed,
                GateState::Pending => {
                    let Some(deadline) = deadline else {
                        self.cond.wait(&mut state);
                        continue;
                    };
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return match *state {
                            GateState::Open => GateStatus::Open,
                            GateState::Closed => GateStatus::Closed,
                            GateState::Pending => GateStatus::TimedOut,
                        };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out_while_pending() {
        let gate = ReadyGate::new();
        let started = Instant::now();
        assert_eq!(gate.wait(Duration::from_millis(50)), GateStatus::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_open_releases_all_waiters() {
        let gate = Arc::new(ReadyGate::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert!(gate.open());
        assert!(!gate.open());

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), GateStatus::Open);
        }
        // Stays open for later senders
        assert_eq!(gate.wait(Duration::from_millis(1)), GateStatus::Open);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        gate.close();
        assert_eq!(waiter.join().unwrap(), GateStatus::Closed);

        gate.reset();
        assert!(gate.is_closed());
        assert!(!gate.open());
    }

    #[test]
    fn test_unbounded_timeout_waits_for_open() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.open();
        assert_eq!(waiter.join().unwrap(), GateStatus::Open);

        // Same for a millisecond count taken straight from configuration
        gate.reset();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait(Duration::from_millis(u64::MAX)))
        };
        thread::sleep(Duration::from_millis(20));
        gate.close();
        assert_eq!(waiter.join().unwrap(), GateStatus::Closed);
    }

    #[test]
    fn test_reset_rearms() {
        let gate = ReadyGate::new();
        gate.open();
        assert!(gate.is_open());
        gate.reset();
        assert!(!gate.is_open());
        assert_eq!(gate.wait(Duration::from_millis(1)), GateStatus::TimedOut);
    }
}
