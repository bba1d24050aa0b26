// SPDX-License-Identifier: MIT OR Apache-2.0

//! Garbage collection: copies live blocks out of a victim zone into the
//! reserved zone, then resets the victim so it can rejoin the allocator's
//! rotation as the new reserved zone.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use zbd_block::{BioStatus, BioType, Pba, ZoneKind, ZonedDevice, BLOCK_SIZE};

use crate::{
    alloc::ReclaimLock,
    gate::ZoneGateSet,
    geometry::{EngineConfig, Geometry},
    indirection::IndirectionTable,
    prelude::*,
};

/// A unit of reclaim work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimRequest {
    /// Reclaim a specific zone (pushed by the request mapper when a write
    /// completion drops a zone's live ratio below the watermark).
    Victim(usize),
    /// The allocator completed a full lap without finding room; the
    /// reclaim engine picks the worst zone itself.
    LapExhausted,
}

/// A FIFO queue of pending reclaim work, drained by a single worker.
pub struct ReclaimQueue {
    items: Mutex<VecDeque<ReclaimRequest>>,
    cv: Condvar,
}

impl ReclaimQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    /// Enqueues a request and wakes the worker.
    pub fn push(&self, req: ReclaimRequest) {
        let mut items = self.items.lock().unwrap();
        items.push_back(req);
        self.cv.notify_one();
    }

    /// Blocks until a request is available, then pops and returns it.
    pub fn pop_blocking(&self) -> ReclaimRequest {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(req) = items.pop_front() {
                return req;
            }
            items = self.cv.wait(items).unwrap();
        }
    }

    /// The number of requests currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Whether the queue currently has no pending requests.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReclaimQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies live data out of victim zones and resets them.
pub struct ReclaimEngine {
    geometry: Arc<Geometry>,
    gates: Arc<ZoneGateSet>,
    indirection: Arc<IndirectionTable>,
    device: Arc<dyn ZonedDevice>,
    queue: Arc<ReclaimQueue>,
    lock: Arc<Mutex<ReclaimLock>>,
    config: EngineConfig,
}

impl ReclaimEngine {
    /// Builds a reclaim engine over the given components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        geometry: Arc<Geometry>,
        gates: Arc<ZoneGateSet>,
        indirection: Arc<IndirectionTable>,
        device: Arc<dyn ZonedDevice>,
        queue: Arc<ReclaimQueue>,
        lock: Arc<Mutex<ReclaimLock>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            geometry,
            gates,
            indirection,
            device,
            queue,
            lock,
            config,
        }
    }

    /// Spawns the dedicated worker thread that drains `self.queue`,
    /// reclaiming one victim at a time until the returned handle is
    /// dropped... in practice the thread runs for the engine's lifetime,
    /// since nothing signals it to stop; see [`Self::run_once`] for a
    /// synchronous alternative used in tests.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            let req = self.queue.pop_blocking();
            if let Err(e) = self.run_once(req) {
                warn!("reclaim worker: request {req:?} failed: {e}");
            }
        })
    }

    /// Services one reclaim request synchronously. Used by the worker
    /// thread, and directly by callers (including the allocator's
    /// saturated-queue fallback and tests) that want inline reclaim.
    pub fn run_once(&self, req: ReclaimRequest) -> Result<()> {
        match req {
            ReclaimRequest::Victim(idx) => self.reclaim(idx),
            ReclaimRequest::LapExhausted => match self.pick_worst_zone() {
                Some(idx) => self.reclaim(idx),
                None => {
                    warn!("reclaim: lap exhausted but no reclaimable zone found");
                    Ok(())
                }
            },
        }
    }

    /// Picks a victim when the allocator's lap found no room: the zone
    /// with the worst live ratio, as long as it has *some* garbage to
    /// reclaim. Unlike the watermark-triggered path, this does not require
    /// the ratio to be below `reclaim_low_watermark` — a full lap means
    /// every zone's `wp` is already at capacity, so anything short of
    /// `ratio == 1.0` is worth reclaiming.
    fn pick_worst_zone(&self) -> Option<usize> {
        let meta = self.geometry.meta_zone();
        let reserved = self.lock.lock().unwrap().reserved_zone;
        let mut best: Option<(usize, f32)> = None;
        for z in 0..self.geometry.zone_count() {
            if z == meta || z == reserved || self.geometry.zone_kind(z) == ZoneKind::Offline {
                continue;
            }
            let wp = self.gates.get(z).acquire().wp();
            if wp == 0 {
                continue;
            }
            let weight = self.indirection.weight(z);
            let ratio = weight as f32 / wp as f32;
            if ratio >= 1.0 {
                continue;
            }
            if best.map(|(_, r)| ratio < r).unwrap_or(true) {
                best = Some((z, ratio));
            }
        }
        if best.is_none() {
            debug!(
                "reclaim: no zone below ratio 1.0 (watermark {} unused, nothing reclaimable)",
                self.config.reclaim_low_watermark
            );
        }
        best.map(|(z, _)| z)
    }

    /// Reclaims `victim`: copies its live blocks into the reserved zone,
    /// resets it, and swaps its role with the reserved zone.
    ///
    /// Precondition: `victim` is neither the metadata zone nor the current
    /// reserved zone. On failure, invariants are unchanged and `victim`
    /// remains usable.
    pub fn reclaim(&self, victim: usize) -> Result<()> {
        let mut lock = self.lock.lock().unwrap();
        let reserved = lock.reserved_zone;
        if victim == self.geometry.meta_zone() || victim == reserved {
            return_errno_with_msg!(Errno::InvalidArgs, "victim cannot be the metadata or reserved zone");
        }

        let (lo, lo_guard, hi, hi_guard) = self.gates.acquire_two_ascending(victim, reserved);
        info!("reclaim: starting on zone {victim}, reserved zone {reserved}");

        let (victim_guard, reserved_guard) = if lo == victim { (lo_guard, hi_guard) } else { (hi_guard, lo_guard) };

        if reserved_guard.wp() != 0 {
            if let Err(e) = self.device.zone_reset(reserved) {
                warn!("reclaim: failed to reset reserved zone {reserved}: {e:?}");
                return_errno_with_msg!(Errno::DeviceIo, "failed to reset reserved zone before reclaim");
            }
            reserved_guard.reset_wp();
        }

        let victim_wp = victim_guard.wp();
        let mut copied = 0u32;

        for offset in 0..victim_wp {
            let victim_pba = Pba::new(self.geometry.join_pba(victim, offset));
            if !self.indirection.bitmap_test(victim_pba) {
                continue;
            }
            let lba = match self.indirection.reverse(victim_pba) {
                Some(lba) => lba,
                None => continue,
            };

            let mut buf = vec![0u8; BLOCK_SIZE as usize];
            if let Err(e) = self.blocking_io(BioType::Read, victim_pba, &mut buf) {
                warn!("reclaim: read failed at zone {victim} offset {offset}: {e:?}, skipping block");
                continue;
            }

            // A write failure retries at the next offset in the reserved
            // zone rather than the same one -- the device already consumed
            // the sequential write slot. Give up after one retry; do not
            // rewind the reserved zone's wp, since offsets before it may
            // already hold blocks this loop has committed via
            // `indirection.update`, and rewinding would leave those bits
            // valid past wp (invariant 4).
            let mut written = None;
            for attempt in 0..2 {
                if reserved_guard.wp() >= self.geometry.blocks_per_zone() {
                    warn!("reclaim: reserved zone {reserved} ran out of space during copy");
                    break;
                }
                let new_offset = reserved_guard.advance_wp(1);
                let new_pba = Pba::new(self.geometry.join_pba(reserved, new_offset));
                match self.blocking_io(BioType::Write, new_pba, &mut buf) {
                    Ok(()) => {
                        written = Some(new_pba);
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "reclaim: write failed at reserved zone {reserved} offset {new_offset} \
                             (attempt {attempt}): {e:?}"
                        );
                    }
                }
            }

            let new_pba = match written {
                Some(pba) => pba,
                None => {
                    warn!("reclaim: aborting cycle on zone {victim}, victim left usable and unreset");
                    return_errno_with_msg!(Errno::DeviceIo, "reclaim write failed after retry, cycle aborted");
                }
            };

            self.indirection.update(lba, new_pba)?;
            copied += 1;
        }

        if let Err(e) = self.device.zone_reset(victim) {
            warn!("reclaim: failed to reset victim zone {victim}: {e:?}");
            return_errno_with_msg!(Errno::DeviceIo, "failed to reset victim zone after copy");
        }
        victim_guard.reset_wp();

        lock.reserved_zone = victim;
        info!("reclaim: finished on zone {victim}, {copied} blocks copied, now reserved");

        if victim > reserved {
            drop(victim_guard);
            drop(reserved_guard);
        } else {
            drop(reserved_guard);
            drop(victim_guard);
        }
        drop(lock);
        Ok(())
    }

    fn blocking_io(&self, ty: BioType, pba: Pba, buf: &mut Vec<u8>) -> Result<()> {
        let bio = zbd_block::Bio::new(ty, pba, std::mem::take(buf), None);
        let status = bio
            .submit_and_wait(self.device.as_ref())
            .map_err(|_| Error::with_msg(Errno::DeviceIo, "device refused reclaim I/O"))?;
        *buf = bio.buf();
        if status != BioStatus::Complete {
            return_errno_with_msg!(Errno::DeviceIo, "device reported failure during reclaim I/O");
        }
        Ok(())
    }
}
