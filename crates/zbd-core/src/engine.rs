// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level wiring: discovers device geometry, builds every component,
//! and spawns the reclaim worker. This is the single long-lived value an
//! embedding application owns in place of the source's file-scope statics.

use std::sync::Arc;

use log::info;
use zbd_block::{Sid, ZoneKind, ZonedDevice};

use crate::{
    alloc::{Allocator, ReclaimLock},
    gate::ZoneGateSet,
    geometry::{EngineConfig, Geometry},
    indirection::IndirectionTable,
    prelude::*,
    reclaim::{ReclaimEngine, ReclaimQueue, ReclaimRequest},
    request::{HostRequest, HostResponse, RequestMapper},
};

/// The translation, allocation, and reclaim engine for one zoned device.
pub struct Engine {
    geometry: Arc<Geometry>,
    indirection: Arc<IndirectionTable>,
    gates: Arc<ZoneGateSet>,
    reclaim_engine: Arc<ReclaimEngine>,
    reclaim_queue: Arc<ReclaimQueue>,
    mapper: RequestMapper,
}

impl Engine {
    /// Discovers geometry from `device`, resets every Sequential zone,
    /// builds all components, and spawns the reclaim worker thread.
    ///
    /// Startup fails outright (no degraded mode) if geometry validation
    /// fails or any Sequential zone cannot be reset.
    pub fn new(device: Arc<dyn ZonedDevice>, config: EngineConfig) -> Result<Arc<Self>> {
        let reports = device.report_zones();
        let geometry = Arc::new(Geometry::from_reports(&reports, &config)?);

        for z in 0..geometry.zone_count() {
            if geometry.zone_kind(z) == ZoneKind::Sequential {
                device
                    .zone_reset(z)
                    .map_err(|_| Error::with_msg(Errno::DeviceIo, "failed to reset zone at startup"))?;
            }
        }

        let reserved_zone = (0..geometry.zone_count())
            .find(|&z| geometry.zone_kind(z) == ZoneKind::Sequential)
            .ok_or_else(|| Error::with_msg(Errno::InvalidArgs, "no Sequential zone available to reserve"))?;
        info!("engine: reserving zone {reserved_zone} for reclaim");

        let gates = Arc::new(ZoneGateSet::new(geometry.zone_count()));
        let indirection = Arc::new(IndirectionTable::new(geometry.clone()));
        let reclaim_queue = Arc::new(ReclaimQueue::new());
        let lock = ReclaimLock::new(reserved_zone);

        let allocator = Arc::new(Allocator::new(
            geometry.clone(),
            gates.clone(),
            indirection.clone(),
            reclaim_queue.clone(),
            lock.clone(),
        ));

        let reclaim_engine = Arc::new(ReclaimEngine::new(
            geometry.clone(),
            gates.clone(),
            indirection.clone(),
            device.clone(),
            reclaim_queue.clone(),
            lock,
            config,
        ));
        let _worker = reclaim_engine.clone().spawn_worker();

        let mapper = RequestMapper::new(
            geometry.clone(),
            indirection.clone(),
            allocator,
            device,
            reclaim_queue.clone(),
            config,
        );

        Ok(Arc::new(Self {
            geometry,
            indirection,
            gates,
            reclaim_engine,
            reclaim_queue,
            mapper,
        }))
    }

    /// Dispatches a block-aligned host request. See [`RequestMapper::map_request`].
    pub fn map_request(&self, request: HostRequest) -> Result<HostResponse> {
        self.mapper.map_request(request)
    }

    /// Dispatches a sector-addressed host request. See
    /// [`RequestMapper::map_request_sectors`].
    pub fn map_request_sectors(
        &self,
        op: crate::request::RequestOp,
        start_sector: Sid,
        sector_count: u64,
        write_data: Option<Vec<u8>>,
    ) -> Result<HostResponse> {
        self.mapper.map_request_sectors(op, start_sector, sector_count, write_data)
    }

    /// The device's zone geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The current live-block count for zone `z`.
    pub fn zone_weight(&self, z: usize) -> u32 {
        self.indirection.weight(z)
    }

    /// Recomputes zone `z`'s weight from the validity bitmap and asserts it
    /// matches the cached value (§4.1's periodic cross-check). Intended for
    /// tests; panics on divergence.
    pub fn zone_weight_cross_check(&self, z: usize) -> u32 {
        self.indirection.weight_cross_check(z)
    }

    /// The current mapping for `lba`, or `None` if unmapped. Exposes the
    /// indirection table's `lookup` directly (§4.2) for invariant checks
    /// that need the raw PBA rather than a read's payload.
    pub fn lba_lookup(&self, lba: zbd_block::Lba) -> Result<Option<zbd_block::Pba>> {
        self.indirection.lookup(lba)
    }

    /// The LBA currently mapped to `pba`, or `None`. Exposes the
    /// indirection table's `reverse` directly (§4.2).
    pub fn pba_reverse(&self, pba: zbd_block::Pba) -> Option<zbd_block::Lba> {
        self.indirection.reverse(pba)
    }

    /// Whether `pba` is currently marked valid in the global bitmap (§4.2).
    pub fn pba_is_valid(&self, pba: zbd_block::Pba) -> bool {
        self.indirection.bitmap_test(pba)
    }

    /// Zone `z`'s current write pointer. Briefly acquires and releases that
    /// zone's gate; intended for tests and diagnostics, not the hot path.
    pub fn zone_wp(&self, z: usize) -> u32 {
        self.gates.get(z).acquire().wp()
    }

    /// Number of reclaim requests currently queued.
    pub fn pending_reclaims(&self) -> usize {
        self.reclaim_queue.len()
    }

    /// Runs reclaim on `victim` synchronously, bypassing the queue and
    /// worker thread. Used by tests, and as the allocator's fallback if the
    /// queue itself is saturated (§9's resolved open question).
    pub fn reclaim_inline(&self, victim: usize) -> Result<()> {
        self.reclaim_engine.reclaim(victim)
    }

    /// Queues `victim` for reclaim by the background worker.
    pub fn request_reclaim(&self, victim: usize) {
        self.reclaim_queue.push(ReclaimRequest::Victim(victim));
    }
}
