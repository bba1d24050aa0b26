// SPDX-License-Identifier: MIT OR Apache-2.0

//! The translation, allocation, and reclaim engine for a log-structured
//! block translation layer over zoned block devices.
//!
//! This crate owns the hard engineering: the indirection table mapping
//! logical block addresses to physical block addresses ([`indirection`]),
//! the write-pointer-respecting allocator that picks destination zones
//! ([`alloc`]), the per-zone admission control that keeps sequential writes
//! race-free ([`gate`]), the reclaim engine that compacts live data out of a
//! victim zone ([`reclaim`]), and the request mapper that splits host I/O
//! into per-block operations against all of the above ([`request`]).
//!
//! It deliberately knows nothing about how a request arrives from the host,
//! how the backing device executes raw I/O, or how device geometry is
//! discovered at boot — those are the concern of a collaborator providing
//! the [`zbd_block::ZonedDevice`] implementation this crate is built
//! against. There is no on-disk persistence: [`Engine`] is a volatile,
//! in-memory structure rebuilt from a zero scan every time it is
//! constructed.

pub mod alloc;
pub mod engine;
pub mod error;
pub mod gate;
pub mod geometry;
pub mod indirection;
pub mod prelude;
pub mod reclaim;
pub mod request;
mod testutil;
pub mod util;

pub use self::{
    alloc::{Allocation, Allocator, ReclaimLock},
    engine::Engine,
    error::{Errno, Error, Result},
    gate::{ZoneGate, ZoneGateSet, ZoneGuard},
    geometry::{EngineConfig, Geometry},
    indirection::IndirectionTable,
    reclaim::{ReclaimEngine, ReclaimQueue, ReclaimRequest},
    request::{HostRequest, HostResponse, RequestMapper, RequestOp},
};
