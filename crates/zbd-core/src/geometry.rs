// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device shape: zone count, zone size, per-zone type, and the metadata
//! zone. Immutable once constructed — the mutable per-zone state (write
//! pointer, weight, forward/reverse maps, validity bitmap) lives in
//! [`crate::gate`] and [`crate::indirection`], which both borrow a
//! [`Geometry`] for sizing.

use log::{info, warn};
use zbd_block::{ZoneKind, ZoneReport};

use crate::prelude::*;

/// Tuning knobs supplied at engine construction time.
///
/// See §6 of the design notes: block size defaults to the device's reported
/// logical block size, the reclaim low-watermark ratio defaults to 3/4, and
/// exactly one reserved zone is used.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Block size in bytes. Must match `zbd_block::id::BLOCK_SIZE`.
    pub block_size: u32,
    /// A zone is queued for reclaim once its live ratio (`weight / wp`)
    /// drops below this fraction.
    pub reclaim_low_watermark: f32,
    /// Number of reserved (empty, held-for-reclaim) zones. Fixed at 1.
    pub reserved_zones: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: zbd_block::BLOCK_SIZE,
            reclaim_low_watermark: 0.75,
            reserved_zones: 1,
        }
    }
}

/// The immutable shape of the backing device: zone count, zone size, and
/// the type of each zone.
#[derive(Debug)]
pub struct Geometry {
    blocks_per_zone: u32,
    zone_kinds: Vec<ZoneKind>,
    /// Index of the first Conventional zone; reserved for metadata and
    /// never handed out by the allocator.
    meta_zone: usize,
}

impl Geometry {
    /// Validates `reports` against `config` and builds a `Geometry`.
    ///
    /// Validation: at least 2 usable zones (one metadata, one reserved);
    /// `blocks_per_zone` a power of two; zones contiguous and
    /// non-overlapping; `config.block_size` matches the compiled block
    /// size. Any violation aborts construction — there is no degraded
    /// startup mode.
    pub fn from_reports(reports: &[ZoneReport], config: &EngineConfig) -> Result<Self> {
        if config.block_size != zbd_block::BLOCK_SIZE {
            return_errno_with_msg!(Errno::InvalidArgs, "block_size does not match compiled BLOCK_SIZE");
        }
        if reports.is_empty() {
            return_errno_with_msg!(Errno::InvalidArgs, "device reported no zones");
        }

        let sectors_per_block = (zbd_block::BLOCK_SIZE / zbd_block::SECTOR_SIZE) as u64;
        let mut sorted: Vec<&ZoneReport> = reports.iter().collect();
        sorted.sort_by_key(|r| r.index);

        let blocks_per_zone = sorted[0].length_sectors / sectors_per_block;
        if blocks_per_zone == 0 || !blocks_per_zone.is_power_of_two() {
            return_errno_with_msg!(Errno::InvalidArgs, "blocks_per_zone must be a nonzero power of two");
        }

        let mut expected_start = sorted[0].start_sector;
        let mut zone_kinds = Vec::with_capacity(sorted.len());
        for (expected_index, report) in sorted.iter().enumerate() {
            if report.index != expected_index {
                return_errno_with_msg!(Errno::InvalidArgs, "zone indices must be contiguous from 0");
            }
            if report.start_sector != expected_start {
                return_errno_with_msg!(Errno::InvalidArgs, "zones must be contiguous and non-overlapping");
            }
            if report.length_sectors / sectors_per_block != blocks_per_zone {
                return_errno_with_msg!(Errno::InvalidArgs, "all zones must be the same size");
            }
            expected_start += report.length_sectors;
            zone_kinds.push(report.kind);
        }

        let usable = zone_kinds.iter().filter(|k| **k != ZoneKind::Offline).count();
        if usable < 1 + config.reserved_zones {
            return_errno_with_msg!(
                Errno::InvalidArgs,
                "need at least one metadata zone and one reserved zone"
            );
        }

        let meta_zone = zone_kinds
            .iter()
            .position(|k| *k == ZoneKind::Conventional)
            .ok_or_else(|| Error::with_msg(Errno::InvalidArgs, "no Conventional zone available for metadata"))?;

        info!(
            "geometry: {} zones x {} blocks, meta_zone={}",
            zone_kinds.len(),
            blocks_per_zone,
            meta_zone
        );
        for (idx, kind) in zone_kinds.iter().enumerate() {
            if *kind == ZoneKind::Offline {
                warn!("zone {idx} reported Offline, excluded from allocation");
            }
        }

        Ok(Self {
            blocks_per_zone: blocks_per_zone as u32,
            zone_kinds,
            meta_zone,
        })
    }

    /// Number of zones on the device.
    pub fn zone_count(&self) -> usize {
        self.zone_kinds.len()
    }

    /// Number of blocks per zone.
    pub fn blocks_per_zone(&self) -> u32 {
        self.blocks_per_zone
    }

    /// Total addressable blocks across the device.
    pub fn total_blocks(&self) -> u64 {
        self.zone_count() as u64 * self.blocks_per_zone as u64
    }

    /// `log2(BLOCK_SIZE / SECTOR_SIZE)`.
    pub fn blocks_per_sector_shift(&self) -> u32 {
        (zbd_block::BLOCK_SIZE / zbd_block::SECTOR_SIZE).trailing_zeros()
    }

    /// The type of zone `z`.
    ///
    /// # Panics
    ///
    /// Panics if `z` is out of range.
    pub fn zone_kind(&self, z: usize) -> ZoneKind {
        self.zone_kinds[z]
    }

    /// Index of the metadata zone.
    pub fn meta_zone(&self) -> usize {
        self.meta_zone
    }

    /// Splits a global PBA offset into `(zone_index, offset_in_zone)`.
    pub fn split_pba(&self, raw_pba: u64) -> (usize, u32) {
        let z = self.blocks_per_zone as u64;
        ((raw_pba / z) as usize, (raw_pba % z) as u32)
    }

    /// Joins a zone index and in-zone offset into a global PBA offset.
    pub fn join_pba(&self, zone: usize, offset: u32) -> u64 {
        zone as u64 * self.blocks_per_zone as u64 + offset as u64
    }
}
