// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits a host-level block I/O request into per-block operations against
//! the indirection table, allocator, and zone gates, and assembles the
//! response.

use std::sync::Arc;

use log::warn;
use zbd_block::{Bio, BioStatus, BioType, BioWaiter, Lba, Sid, ZonedDevice, BLOCK_SIZE, SECTOR_SIZE};

use crate::{
    alloc::Allocator,
    geometry::{EngineConfig, Geometry},
    indirection::IndirectionTable,
    prelude::*,
    reclaim::{ReclaimQueue, ReclaimRequest},
};

/// The operation named by a host request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOp {
    Read,
    Write,
    /// TRIM/DISCARD/WriteZeroes: advisory invalidation, no device I/O.
    Discard,
    /// No persistent write-back cache exists, so this is a no-op that
    /// always succeeds.
    Flush,
}

/// A host-level block I/O request, already in block units.
pub struct HostRequest {
    pub op: RequestOp,
    pub start_lba: Lba,
    pub nr_blocks: u32,
    /// Required (and must be exactly `nr_blocks * BLOCK_SIZE` bytes) for
    /// `Write`; ignored otherwise.
    pub write_data: Option<Vec<u8>>,
}

/// The result of mapping a [`HostRequest`].
pub struct HostResponse {
    pub status: BioStatus,
    /// Populated for `Read`: `nr_blocks * BLOCK_SIZE` bytes, zero-filled
    /// wherever the corresponding LBA was unmapped.
    pub read_data: Option<Vec<u8>>,
}

/// Dispatches host requests to the translation engine's components.
pub struct RequestMapper {
    geometry: Arc<Geometry>,
    indirection: Arc<IndirectionTable>,
    allocator: Arc<Allocator>,
    device: Arc<dyn ZonedDevice>,
    reclaim_queue: Arc<ReclaimQueue>,
    config: EngineConfig,
}

impl RequestMapper {
    /// Builds a request mapper over the given components.
    pub fn new(
        geometry: Arc<Geometry>,
        indirection: Arc<IndirectionTable>,
        allocator: Arc<Allocator>,
        device: Arc<dyn ZonedDevice>,
        reclaim_queue: Arc<ReclaimQueue>,
        config: EngineConfig,
    ) -> Self {
        Self {
            geometry,
            indirection,
            allocator,
            device,
            reclaim_queue,
            config,
        }
    }

    /// Accepts a request expressed in device sectors, validates alignment,
    /// and dispatches it. This is the literal shape of §4.6's contract;
    /// [`map_request`](Self::map_request) is the block-granular core it
    /// delegates to.
    pub fn map_request_sectors(
        &self,
        op: RequestOp,
        start_sector: Sid,
        sector_count: u64,
        write_data: Option<Vec<u8>>,
    ) -> Result<HostResponse> {
        let sectors_per_block = (BLOCK_SIZE / SECTOR_SIZE) as u64;
        if start_sector.to_raw() % sectors_per_block != 0 || sector_count % sectors_per_block != 0 {
            return_errno_with_msg!(Errno::Unsupported, "request is not block-aligned");
        }
        let start_lba = Lba::new(start_sector.to_raw() / sectors_per_block);
        let nr_blocks = (sector_count / sectors_per_block) as u32;
        self.map_request(HostRequest {
            op,
            start_lba,
            nr_blocks,
            write_data,
        })
    }

    /// Dispatches a block-aligned host request.
    pub fn map_request(&self, request: HostRequest) -> Result<HostResponse> {
        match request.op {
            RequestOp::Read => self.map_read(request.start_lba, request.nr_blocks),
            RequestOp::Write => {
                let data = request
                    .write_data
                    .ok_or_else(|| Error::with_msg(Errno::Unsupported, "write request with no data"))?;
                if data.len() != request.nr_blocks as usize * BLOCK_SIZE as usize {
                    return_errno_with_msg!(Errno::Unsupported, "write data length does not match nr_blocks");
                }
                self.map_write(request.start_lba, request.nr_blocks, data)
            }
            RequestOp::Discard => self.map_discard(request.start_lba, request.nr_blocks),
            RequestOp::Flush => Ok(HostResponse {
                status: BioStatus::Complete,
                read_data: None,
            }),
        }
    }

    fn map_read(&self, start_lba: Lba, nr_blocks: u32) -> Result<HostResponse> {
        let mut out = vec![0u8; nr_blocks as usize * BLOCK_SIZE as usize];
        let mut waiter = BioWaiter::new();
        let mut bios = Vec::new();

        for i in 0..nr_blocks {
            let lba = start_lba + i as u64;
            let pba = match self.indirection.lookup(lba)? {
                Some(pba) => pba,
                // Unmapped: the output buffer is already zeroed. No device I/O.
                None => continue,
            };
            let bio = Bio::new(BioType::Read, pba, vec![0u8; BLOCK_SIZE as usize], None);
            let this_waiter = bio
                .submit(self.device.as_ref())
                .map_err(|_| Error::with_msg(Errno::DeviceIo, "device refused read submission"))?;
            waiter.extend(this_waiter);
            bios.push((i, bio));
        }

        // All clones are submitted before we wait on any of them, which is
        // what rules out the "last clone completes before dispatch
        // finishes" race: there is no observer of the waiter until this
        // point.
        let overall = waiter.wait();

        for (i, bio) in bios {
            let start = i as usize * BLOCK_SIZE as usize;
            if bio.status() == BioStatus::Complete {
                out[start..start + BLOCK_SIZE as usize].copy_from_slice(&bio.buf());
            }
        }

        Ok(HostResponse {
            status: overall.unwrap_or(BioStatus::IoError),
            read_data: Some(out),
        })
    }

    fn map_write(&self, start_lba: Lba, nr_blocks: u32, data: Vec<u8>) -> Result<HostResponse> {
        let mut remaining = nr_blocks;
        let mut cursor = start_lba;
        let mut data_offset = 0usize;

        while remaining > 0 {
            let allocation = self.allocator.allocate(remaining)?;
            let granted = allocation.granted_blocks;
            let span_bytes = granted as usize * BLOCK_SIZE as usize;
            let span = data[data_offset..data_offset + span_bytes].to_vec();
            let starting_pba = allocation.starting_pba;

            let status = self.write_span_with_retry(starting_pba, span)?;
            if status != BioStatus::Complete {
                return_errno_with_msg!(Errno::DeviceIo, "write span failed after retry");
            }
            // The allocation's gate can be released once the write lands;
            // the indirection updates below don't need it held.
            drop(allocation);

            for b in 0..granted {
                let lba = cursor + b as u64;
                let pba = starting_pba + b as u64;
                if let Some(displaced_zone) = self.indirection.update(lba, pba)? {
                    self.maybe_trigger_reclaim(displaced_zone);
                }
            }

            cursor = cursor + granted as u64;
            data_offset += span_bytes;
            remaining -= granted;
        }

        Ok(HostResponse {
            status: BioStatus::Complete,
            read_data: None,
        })
    }

    fn write_span_with_retry(&self, pba: zbd_block::Pba, span: Vec<u8>) -> Result<BioStatus> {
        let bio = Bio::new(BioType::Write, pba, span.clone(), None);
        let status = bio
            .submit_and_wait(self.device.as_ref())
            .map_err(|_| Error::with_msg(Errno::DeviceIo, "device refused write submission"))?;
        if status == BioStatus::Complete {
            return Ok(status);
        }
        warn!("write to pba {pba} failed, retrying once");
        let retry_bio = Bio::new(BioType::Write, pba, span, None);
        retry_bio
            .submit_and_wait(self.device.as_ref())
            .map_err(|_| Error::with_msg(Errno::DeviceIo, "device refused retried write submission"))
    }

    fn maybe_trigger_reclaim(&self, zone: usize) {
        if zone == self.geometry.meta_zone() {
            return;
        }
        let weight = self.indirection.weight(zone);
        // wp is not directly visible here without acquiring the zone's
        // gate; approximate with blocks_per_zone, which is a safe upper
        // bound that only makes the trigger slightly more conservative.
        let blocks_per_zone = self.geometry.blocks_per_zone();
        let ratio = weight as f32 / blocks_per_zone as f32;
        if ratio < self.config.reclaim_low_watermark {
            self.reclaim_queue.push(ReclaimRequest::Victim(zone));
        }
    }

    fn map_discard(&self, start_lba: Lba, nr_blocks: u32) -> Result<HostResponse> {
        for i in 0..nr_blocks {
            self.indirection.invalidate(start_lba + i as u64)?;
        }
        Ok(HostResponse {
            status: BioStatus::Complete,
            read_data: None,
        })
    }
}
