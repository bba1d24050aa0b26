// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports for consumers of this crate.

pub use crate::{
    bio::{Bio, BioEnqueueError, BioStatus, BioType, BioWaiter, SubmittedBio},
    id::{Lba, Pba, Sid, BLOCK_SIZE, SECTOR_SIZE},
    ZoneKind, ZoneReport, ZonedDevice,
};
