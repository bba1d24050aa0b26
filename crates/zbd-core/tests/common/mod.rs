// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fake zoned device shared by the integration tests below: a flat
//! in-memory buffer plus a zone layout, used to drive a real [`Engine`]
//! through the scenarios and property tests without any real hardware or
//! file-backed storage.

use std::sync::Mutex;

use zbd_block::{
    BioEnqueueError, BioStatus, BioType, SubmittedBio, ZoneKind, ZoneReport, ZonedDevice, BLOCK_SIZE,
};

pub struct MemZonedDevice {
    storage: Mutex<Vec<u8>>,
    reports: Vec<ZoneReport>,
}

impl MemZonedDevice {
    /// Builds a device with `zone_count` zones of `blocks_per_zone` blocks
    /// each. Zone 0 is Conventional (the metadata zone); every other zone is
    /// Sequential.
    pub fn new(zone_count: usize, blocks_per_zone: u64) -> Self {
        let sectors_per_block = (BLOCK_SIZE / zbd_block::SECTOR_SIZE) as u64;
        let reports = (0..zone_count)
            .map(|i| ZoneReport {
                index: i,
                kind: if i == 0 {
                    ZoneKind::Conventional
                } else {
                    ZoneKind::Sequential
                },
                start_sector: i as u64 * blocks_per_zone * sectors_per_block,
                length_sectors: blocks_per_zone * sectors_per_block,
            })
            .collect();
        Self {
            storage: Mutex::new(vec![0u8; zone_count * blocks_per_zone as usize * BLOCK_SIZE as usize]),
            reports,
        }
    }
}

impl ZonedDevice for MemZonedDevice {
    fn submit_io(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError> {
        let pba = bio.pba().to_raw() as usize;
        let base = pba * BLOCK_SIZE as usize;
        let mut storage = self.storage.lock().unwrap();
        match bio.type_() {
            BioType::Read => {
                let mut buf = bio.buf();
                let len = buf.len();
                buf.copy_from_slice(&storage[base..base + len]);
            }
            BioType::Write => {
                let buf = bio.buf();
                storage[base..base + buf.len()].copy_from_slice(&buf);
            }
            BioType::Discard | BioType::Flush => {}
        }
        drop(storage);
        bio.complete(BioStatus::Complete);
        Ok(())
    }

    fn zone_reset(&self, zone_index: usize) -> Result<(), BioEnqueueError> {
        let blocks_per_zone = self.reports[0].length_sectors / (BLOCK_SIZE / zbd_block::SECTOR_SIZE) as u64;
        let base = zone_index * blocks_per_zone as usize * BLOCK_SIZE as usize;
        let len = blocks_per_zone as usize * BLOCK_SIZE as usize;
        self.storage.lock().unwrap()[base..base + len].fill(0);
        Ok(())
    }

    fn report_zones(&self) -> Vec<ZoneReport> {
        self.reports.clone()
    }
}
