// SPDX-License-Identifier: MIT OR Apache-2.0

//! An in-memory fake [`ZonedDevice`], shared by this crate's unit tests.

#![cfg(test)]

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

use zbd_block::{BioEnqueueError, BioStatus, BioType, SubmittedBio, ZonedDevice, ZoneReport, BLOCK_SIZE};

/// A flat in-memory buffer standing in for a real zoned device. Ignores
/// zone boundaries on writes (the allocator and gates are what actually
/// enforce sequential-write discipline; this fake just stores bytes).
pub struct MemDevice {
    storage: Mutex<Vec<u8>>,
    pub reset_calls: AtomicU32,
}

impl MemDevice {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            storage: Mutex::new(vec![0u8; total_blocks * BLOCK_SIZE as usize]),
            reset_calls: AtomicU32::new(0),
        }
    }
}

impl ZonedDevice for MemDevice {
    fn submit_io(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError> {
        let pba = bio.pba().to_raw() as usize;
        let mut storage = self.storage.lock().unwrap();
        let base = pba * BLOCK_SIZE as usize;
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
            _ => {}
        }
        drop(storage);
        bio.complete(BioStatus::Complete);
        Ok(())
    }

    fn zone_reset(&self, _zone_index: usize) -> Result<(), BioEnqueueError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn report_zones(&self) -> Vec<ZoneReport> {
        Vec::new()
    }
}
