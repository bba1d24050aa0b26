// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bio and device-driver primitives shared between a zoned block device and
//! the translation engine built on top of it.
//!
//! This crate knows nothing about indirection tables, allocators, or
//! reclaim: it only defines the shape of an I/O request ([`bio`]), the
//! address-space newtypes the engine uses to avoid mixing up LBAs, PBAs, and
//! sectors ([`id`]), and the [`ZonedDevice`] trait a backing device
//! implements to receive submissions from the engine.

pub mod bio;
pub mod id;
pub mod prelude;

pub use bio::{Bio, BioEnqueueError, BioStatus, BioType, BioWaiter, SubmittedBio};
pub use id::{Lba, Pba, Sid, BLOCK_SIZE, SECTOR_SIZE};

/// The kind of a zone, as reported by [`ZonedDevice::report_zones`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneKind {
    /// Randomly writable; used only for the metadata zone.
    Conventional,
    /// Append-only: writes must land at the zone's write pointer.
    Sequential,
    /// Not usable (offline or out of provisioned range).
    Offline,
}

/// One entry of a device's zone layout, as reported once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneReport {
    /// Zone index, in device order.
    pub index: usize,
    /// The zone's type.
    pub kind: ZoneKind,
    /// First sector of the zone.
    pub start_sector: u64,
    /// Length of the zone, in sectors.
    pub length_sectors: u64,
}

/// The interface a backing zoned device exposes to the translation engine.
///
/// Implementors own the actual storage (a file, a real ZNS namespace, an
/// in-memory fake for tests) and are responsible for calling
/// [`SubmittedBio::complete`] exactly once for every `Bio` handed to
/// [`submit_io`](ZonedDevice::submit_io).
pub trait ZonedDevice: Send + Sync {
    /// Accepts a submitted I/O. Must not block; completion is reported later
    /// via [`SubmittedBio::complete`], which may run on any thread.
    fn submit_io(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError>;

    /// Resets a zone to empty (`wp = 0`). Synchronous.
    fn zone_reset(&self, zone_index: usize) -> Result<(), BioEnqueueError>;

    /// Reports the device's zone layout. Called once at startup.
    fn report_zones(&self) -> Vec<ZoneReport>;
}
