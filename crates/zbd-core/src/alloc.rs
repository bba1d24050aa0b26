// SPDX-License-Identifier: MIT OR Apache-2.0

//! Round-robin destination-zone allocation with lap-then-reclaim progress.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use log::{debug, warn};
use zbd_block::{Pba, ZoneKind};

use crate::{
    gate::{ZoneGateSet, ZoneGuard},
    geometry::Geometry,
    indirection::IndirectionTable,
    prelude::*,
    reclaim::{ReclaimQueue, ReclaimRequest},
};

/// A bound on how many times `allocate` will restart its lap after
/// requesting reclaim before giving up. Not part of the algorithm proper —
/// a backstop against a caller wiring no reclaim worker at all.
const MAX_ALLOC_RETRIES: u32 = 10_000;

/// State shared between the allocator and the reclaim engine: the
/// round-robin cursor and the index of the current reserved (empty)
/// zone. Guarded by the same lock that serializes reclaim — the "reclaim
/// lock" of §5.
pub struct ReclaimLock {
    pub(crate) cursor: usize,
    pub(crate) reserved_zone: usize,
}

impl ReclaimLock {
    /// Builds the shared state with the given initial reserved zone.
    pub fn new(reserved_zone: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            cursor: 0,
            reserved_zone,
        }))
    }
}

/// A granted allocation: the caller owns the returned zone's gate until
/// `guard` (or the whole `Allocation`) is dropped, and must submit its
/// write before releasing it.
pub struct Allocation<'a> {
    pub zone_index: usize,
    pub starting_pba: Pba,
    pub granted_blocks: u32,
    pub guard: ZoneGuard<'a>,
}

/// Chooses destination zones for incoming writes.
pub struct Allocator {
    geometry: Arc<Geometry>,
    gates: Arc<ZoneGateSet>,
    indirection: Arc<IndirectionTable>,
    reclaim_queue: Arc<ReclaimQueue>,
    lock: Arc<Mutex<ReclaimLock>>,
}

impl Allocator {
    /// Builds an allocator over the given components, sharing `lock` with
    /// the reclaim engine.
    pub fn new(
        geometry: Arc<Geometry>,
        gates: Arc<ZoneGateSet>,
        indirection: Arc<IndirectionTable>,
        reclaim_queue: Arc<ReclaimQueue>,
        lock: Arc<Mutex<ReclaimLock>>,
    ) -> Self {
        Self {
            geometry,
            gates,
            indirection,
            reclaim_queue,
            lock,
        }
    }

    fn device_full(&self, meta_zone: usize, reserved_zone: usize) -> bool {
        let z = self.geometry.blocks_per_zone();
        (0..self.geometry.zone_count())
            .filter(|&i| i != meta_zone && i != reserved_zone)
            .filter(|&i| self.geometry.zone_kind(i) != ZoneKind::Offline)
            .all(|i| self.indirection.weight(i) >= z)
    }

    /// Grants a destination for up to `nr_blocks` blocks.
    ///
    /// `granted_blocks <= nr_blocks`, equal to `min(nr_blocks, Z - wp)` for
    /// the chosen zone. The returned [`Allocation`] holds that zone's gate;
    /// the caller must submit its write and then drop the allocation to
    /// release it.
    pub fn allocate(&self, nr_blocks: u32) -> Result<Allocation<'_>> {
        let meta_zone = self.geometry.meta_zone();
        let zone_count = self.geometry.zone_count();
        let blocks_per_zone = self.geometry.blocks_per_zone();

        for _retry in 0..MAX_ALLOC_RETRIES {
            // Hold the reclaim lock for the whole scan, acquiring any zone
            // gate only while already holding it. `reclaim()` always takes
            // the same lock-then-gate order, so no gate is ever held while
            // blocking on this lock -- the inverse order deadlocks against
            // a concurrent reclaim of the zone this call is about to try.
            let mut state = self.lock.lock().unwrap();
            let start_cursor = state.cursor;
            let reserved_zone = state.reserved_zone;

            let mut tgt = start_cursor;
            loop {
                if tgt != meta_zone
                    && tgt != reserved_zone
                    && self.geometry.zone_kind(tgt) != ZoneKind::Offline
                {
                    let guard = self.gates.get(tgt).acquire();
                    let wp = guard.wp();
                    if wp < blocks_per_zone {
                        let granted = nr_blocks.min(blocks_per_zone - wp);
                        let start_offset = guard.advance_wp(granted);
                        let starting_pba = Pba::new(self.geometry.join_pba(tgt, start_offset));
                        state.cursor = (tgt + 1) % zone_count;
                        drop(state);
                        return Ok(Allocation {
                            zone_index: tgt,
                            starting_pba,
                            granted_blocks: granted,
                            guard,
                        });
                    }
                    drop(guard);
                }
                tgt = (tgt + 1) % zone_count;
                if tgt == start_cursor {
                    break;
                }
            }

            let device_full = self.device_full(meta_zone, reserved_zone);
            drop(state);

            if device_full {
                warn!("allocator: full lap found no room and device is full");
                return_errno!(Errno::NoSpace);
            }
            debug!("allocator: lap exhausted, requesting reclaim");
            self.reclaim_queue.push(ReclaimRequest::LapExhausted);
            thread::sleep(Duration::from_millis(1));
        }

        warn!("allocator: exceeded retry budget waiting for reclaim");
        return_errno!(Errno::NoSpace);
    }
}
