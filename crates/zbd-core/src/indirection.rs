// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forward map (LBA→PBA), reverse map (PBA→LBA), and the global validity
//! bitmap, partitioned per owning zone and guarded by a single spinlock.
//!
//! All three structures change together under `update`/`invalidate`, so a
//! single [`spin::Mutex`] covers them for the duration of a mutation —
//! readers never observe a state where the old mapping is still valid
//! after the new one has appeared.

use std::sync::Arc;

use spin::Mutex;
use zbd_block::{Lba, Pba};

use crate::{geometry::Geometry, prelude::*, util::BitMap};

struct Inner {
    /// `fwd[z][o] = Some(pba)` iff LBA `z*Z + o` is mapped to `pba`.
    fwd: Vec<Vec<Option<Pba>>>,
    /// `rev[z][o] = Some(lba)` iff PBA `z*Z + o` currently holds `lba`.
    rev: Vec<Vec<Option<Lba>>>,
    /// Global validity bitmap, flat across `zone * blocks_per_zone + offset`.
    bitmap: BitMap,
    /// Cached live-block count per zone; always equal to the popcount of
    /// that zone's bitmap window.
    weight: Vec<u32>,
}

/// The forward/reverse indirection tables and validity bitmap for the
/// whole device.
pub struct IndirectionTable {
    geometry: Arc<Geometry>,
    inner: Mutex<Inner>,
}

impl IndirectionTable {
    /// Builds an empty table sized to `geometry`.
    pub fn new(geometry: Arc<Geometry>) -> Self {
        let z = geometry.zone_count();
        let blocks = geometry.blocks_per_zone() as usize;
        let inner = Inner {
            fwd: (0..z).map(|_| vec![None; blocks]).collect(),
            rev: (0..z).map(|_| vec![None; blocks]).collect(),
            bitmap: BitMap::repeat(false, z * blocks),
            weight: vec![0; z],
        };
        Self {
            geometry,
            inner: Mutex::new(inner),
        }
    }

    fn check_lba(&self, lba: Lba) -> Result<()> {
        if lba.to_raw() >= self.geometry.total_blocks() {
            return_errno_with_msg!(Errno::RangeError, "lba out of range");
        }
        Ok(())
    }

    /// Returns the current mapping for `lba`, or `None` if unmapped.
    ///
    /// Fails with [`Errno::RangeError`] if `lba` is out of range.
    pub fn lookup(&self, lba: Lba) -> Result<Option<Pba>> {
        self.check_lba(lba)?;
        let (z, o) = self.geometry.split_pba(lba.to_raw());
        let inner = self.inner.lock();
        Ok(inner.fwd[z][o as usize])
    }

    /// Returns the LBA currently mapped to `pba`, or `None`.
    pub fn reverse(&self, pba: Pba) -> Option<Lba> {
        let (z, o) = self.geometry.split_pba(pba.to_raw());
        let inner = self.inner.lock();
        inner.rev[z][o as usize]
    }

    /// The number of valid blocks in zone `z`, per the cached weight.
    pub fn weight(&self, z: usize) -> u32 {
        self.inner.lock().weight[z]
    }

    /// Recomputes zone `z`'s weight from the bitmap and returns it,
    /// asserting it matches the cached value. Intended for test
    /// cross-checks (§4.1).
    pub fn weight_cross_check(&self, z: usize) -> u32 {
        let blocks = self.geometry.blocks_per_zone() as usize;
        let base = z * blocks;
        let inner = self.inner.lock();
        let counted = inner.bitmap.count_ones_in(base..base + blocks) as u32;
        assert_eq!(counted, inner.weight[z], "zone {z} weight diverged from bitmap popcount");
        counted
    }

    /// Installs `fwd[lba] = new_pba`, clearing any previous mapping for
    /// `lba` first. Atomic with respect to `lookup` and `reverse`.
    ///
    /// Returns the index of the zone that lost a live block as a result
    /// (the zone `lba` was previously mapped into), if any — callers use
    /// this to decide whether that zone just crossed the reclaim
    /// watermark.
    pub fn update(&self, lba: Lba, new_pba: Pba) -> Result<Option<usize>> {
        self.check_lba(lba)?;
        let (lz, lo) = self.geometry.split_pba(lba.to_raw());
        let (pz, po) = self.geometry.split_pba(new_pba.to_raw());

        let mut inner = self.inner.lock();
        let mut displaced_zone = None;
        if let Some(old_pba) = inner.fwd[lz][lo as usize] {
            let (oz, oo) = self.geometry.split_pba(old_pba.to_raw());
            inner.bitmap.clear_bit(old_pba.to_raw() as usize);
            inner.rev[oz][oo as usize] = None;
            inner.weight[oz] -= 1;
            displaced_zone = Some(oz);
        }

        inner.fwd[lz][lo as usize] = Some(new_pba);
        inner.rev[pz][po as usize] = Some(lba);
        inner.bitmap.set_bit(new_pba.to_raw() as usize);
        inner.weight[pz] += 1;
        Ok(displaced_zone)
    }

    /// Clears the mapping for `lba`, if any. A no-op if `lba` is unmapped.
    pub fn invalidate(&self, lba: Lba) -> Result<()> {
        self.check_lba(lba)?;
        let (lz, lo) = self.geometry.split_pba(lba.to_raw());
        let mut inner = self.inner.lock();
        if let Some(old_pba) = inner.fwd[lz][lo as usize].take() {
            let (oz, oo) = self.geometry.split_pba(old_pba.to_raw());
            inner.bitmap.clear_bit(old_pba.to_raw() as usize);
            inner.rev[oz][oo as usize] = None;
            inner.weight[oz] -= 1;
        }
        Ok(())
    }

    /// Tests whether `pba` is currently marked valid in the bitmap.
    pub fn bitmap_test(&self, pba: Pba) -> bool {
        self.inner.lock().bitmap.test_bit(pba.to_raw() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::EngineConfig;
    use zbd_block::{ZoneKind, ZoneReport};

    fn test_geometry() -> Arc<Geometry> {
        let sectors_per_block = (zbd_block::BLOCK_SIZE / zbd_block::SECTOR_SIZE) as u64;
        let kinds = [
            ZoneKind::Conventional,
            ZoneKind::Sequential,
            ZoneKind::Sequential,
            ZoneKind::Sequential,
        ];
        let reports: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| ZoneReport {
                index: i,
                kind,
                start_sector: i as u64 * 16 * sectors_per_block,
                length_sectors: 16 * sectors_per_block,
            })
            .collect();
        Arc::new(Geometry::from_reports(&reports, &EngineConfig::default()).unwrap())
    }

    #[test]
    fn fresh_table_is_unmapped() {
        let table = IndirectionTable::new(test_geometry());
        assert_eq!(table.lookup(Lba::new(5)).unwrap(), None);
        assert_eq!(table.reverse(Pba::new(5)), None);
    }

    #[test]
    fn update_then_lookup() {
        let table = IndirectionTable::new(test_geometry());
        table.update(Lba::new(0), Pba::new(16)).unwrap();
        assert_eq!(table.lookup(Lba::new(0)).unwrap(), Some(Pba::new(16)));
        assert_eq!(table.reverse(Pba::new(16)), Some(Lba::new(0)));
        assert!(table.bitmap_test(Pba::new(16)));
        assert_eq!(table.weight(1), 1);
    }

    #[test]
    fn overwrite_clears_old_mapping() {
        let table = IndirectionTable::new(test_geometry());
        table.update(Lba::new(0), Pba::new(16)).unwrap();
        table.update(Lba::new(0), Pba::new(17)).unwrap();
        assert_eq!(table.lookup(Lba::new(0)).unwrap(), Some(Pba::new(17)));
        assert_eq!(table.reverse(Pba::new(16)), None);
        assert!(!table.bitmap_test(Pba::new(16)));
        assert_eq!(table.weight(1), 1);
    }

    #[test]
    fn invalidate_clears_mapping() {
        let table = IndirectionTable::new(test_geometry());
        table.update(Lba::new(0), Pba::new(16)).unwrap();
        table.invalidate(Lba::new(0)).unwrap();
        assert_eq!(table.lookup(Lba::new(0)).unwrap(), None);
        assert_eq!(table.reverse(Pba::new(16)), None);
        assert_eq!(table.weight(1), 0);
    }

    #[test]
    fn out_of_range_lba_errors() {
        let table = IndirectionTable::new(test_geometry());
        let err = table.lookup(Lba::new(1_000_000)).unwrap_err();
        assert_eq!(err.errno(), Errno::RangeError);
    }

    #[test]
    fn weight_cross_check_matches_bitmap() {
        let table = IndirectionTable::new(test_geometry());
        table.update(Lba::new(0), Pba::new(16)).unwrap();
        table.update(Lba::new(1), Pba::new(17)).unwrap();
        assert_eq!(table.weight_cross_check(1), 2);
    }
}
