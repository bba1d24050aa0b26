// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-zone admission control.
//!
//! A Sequential zone admits at most one in-flight writer, because writes
//! must land at exactly the write pointer. The gate enforces this and also
//! serializes writers against reclaim and reset of the same zone. It is the
//! only place the write pointer lives — you cannot observe or mutate it
//! without holding the gate.

use std::sync::{Condvar, Mutex, MutexGuard};

use log::trace;

/// The write pointer and a busy flag for a single zone, guarded together.
struct GateState {
    wp: u32,
    busy: bool,
}

/// The admission gate for one zone.
pub struct ZoneGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl ZoneGate {
    /// Creates a gate for a zone with the given initial write pointer.
    pub fn new(wp: u32) -> Self {
        Self {
            state: Mutex::new(GateState { wp, busy: false }),
            cv: Condvar::new(),
        }
    }

    /// Blocks until no other caller holds this gate, then grants exclusive
    /// access to the zone's write pointer.
    pub fn acquire(&self) -> ZoneGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.busy {
            state = self.cv.wait(state).unwrap();
        }
        state.busy = true;
        ZoneGuard { gate: self }
    }

    /// Non-blocking: whether some caller currently holds this gate. Used
    /// only by the allocator to prefer idle zones; never blocks.
    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().busy
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.busy = false;
        drop(state);
        self.cv.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap()
    }
}

/// A held gate. Grants read/write access to the zone's write pointer;
/// dropping it (or calling [`release`](ZoneGuard::release) explicitly)
/// releases the gate for the next waiter.
#[must_use]
pub struct ZoneGuard<'a> {
    gate: &'a ZoneGate,
}

impl ZoneGuard<'_> {
    /// The zone's current write pointer.
    pub fn wp(&self) -> u32 {
        self.gate.lock_state().wp
    }

    /// Sets the zone's write pointer.
    pub fn set_wp(&self, wp: u32) {
        self.gate.lock_state().wp = wp;
    }

    /// Advances the write pointer by `n` blocks, returning the prior value
    /// (the offset at which the caller's write should land).
    pub fn advance_wp(&self, n: u32) -> u32 {
        let mut state = self.gate.lock_state();
        let prior = state.wp;
        state.wp += n;
        prior
    }

    /// Resets the write pointer to zero.
    pub fn reset_wp(&self) {
        self.gate.lock_state().wp = 0;
    }

    /// Releases the gate. Equivalent to dropping the guard; provided for
    /// callers that want the release point to be explicit.
    pub fn release(self) {
        trace!("zone gate released");
        drop(self);
    }
}

impl Drop for ZoneGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// One gate per zone on the device.
pub struct ZoneGateSet {
    gates: Vec<ZoneGate>,
}

impl ZoneGateSet {
    /// Creates a gate per zone, all starting at `wp = 0` (every Sequential
    /// zone is reset to empty at startup; the metadata zone's gate is
    /// allocated but never contended since the allocator skips it).
    pub fn new(zone_count: usize) -> Self {
        Self {
            gates: (0..zone_count).map(|_| ZoneGate::new(0)).collect(),
        }
    }

    /// The gate for zone `z`.
    pub fn get(&self, z: usize) -> &ZoneGate {
        &self.gates[z]
    }

    /// The number of gates (equal to the zone count).
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Acquires two distinct zone gates in ascending index order. See
    /// [`acquire_ascending`].
    pub fn acquire_two_ascending(&self, a_idx: usize, b_idx: usize) -> (usize, ZoneGuard<'_>, usize, ZoneGuard<'_>) {
        acquire_ascending(&self.gates, a_idx, b_idx)
    }
}

/// Acquires two distinct zone gates in ascending index order, returning
/// guards in the order `(lower, higher)`. This is the only multi-zone
/// locking pattern the core uses; acquiring three or more gates at once is
/// never necessary.
///
/// # Panics
///
/// Panics if `a_idx == b_idx`.
pub fn acquire_ascending<'a>(
    gates: &'a [ZoneGate],
    a_idx: usize,
    b_idx: usize,
) -> (usize, ZoneGuard<'a>, usize, ZoneGuard<'a>) {
    assert_ne!(a_idx, b_idx, "cannot acquire the same zone gate twice");
    let (lo, hi) = if a_idx < b_idx { (a_idx, b_idx) } else { (b_idx, a_idx) };
    let lo_guard = gates[lo].acquire();
    let hi_guard = gates[hi].acquire();
    (lo, lo_guard, hi, hi_guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_tracks_busy() {
        let gate = ZoneGate::new(0);
        assert!(!gate.is_busy());
        let guard = gate.acquire();
        assert!(gate.is_busy());
        drop(guard);
        assert!(!gate.is_busy());
    }

    #[test]
    fn advance_wp_returns_prior_offset() {
        let gate = ZoneGate::new(4);
        let guard = gate.acquire();
        assert_eq!(guard.advance_wp(3), 4);
        assert_eq!(guard.wp(), 7);
    }

    #[test]
    fn reset_wp_zeroes() {
        let gate = ZoneGate::new(10);
        let guard = gate.acquire();
        guard.reset_wp();
        assert_eq!(guard.wp(), 0);
    }

    #[test]
    fn second_acquire_blocks_until_release() {
        let gate = Arc::new(ZoneGate::new(0));
        let guard = gate.acquire();
        let gate2 = gate.clone();
        let handle = thread::spawn(move || {
            let _g = gate2.acquire();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(gate.is_busy());
        drop(guard);
        handle.join().unwrap();
        assert!(!gate.is_busy());
    }

    #[test]
    fn acquire_ascending_orders_by_index() {
        let gates = vec![ZoneGate::new(0), ZoneGate::new(0), ZoneGate::new(0)];
        let (lo, _lo_guard, hi, _hi_guard) = acquire_ascending(&gates, 2, 0);
        assert_eq!(lo, 0);
        assert_eq!(hi, 2);
    }

    #[test]
    #[should_panic(expected = "cannot acquire the same zone gate twice")]
    fn acquire_ascending_rejects_same_index() {
        let gates = vec![ZoneGate::new(0)];
        let _ = acquire_ascending(&gates, 0, 0);
    }
}
