// SPDX-License-Identifier: MIT OR Apache-2.0

//! The unit for block I/O between the request mapper and the backing device.
//!
//! A [`Bio`] packs:
//! 1. the type of the I/O,
//! 2. the target physical block on the device,
//! 3. the memory buffer from/to which data is read/written,
//! 4. an optional callback invoked on completion.
//!
//! ```no_run
//! # use zbd_block::bio::*;
//! # use zbd_block::id::Pba;
//! # fn f(dev: &dyn ZonedDevice) -> Result<(), BioEnqueueError> {
//! let bio = Bio::new(BioType::Write, Pba::new(0), vec![0u8; 4096], None);
//! let waiter = bio.submit(dev)?;
//! assert_eq!(waiter.wait(), Some(BioStatus::Complete));
//! # Ok(())
//! # }
//! ```
use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Condvar, Mutex,
    },
};

use crate::ZonedDevice;

/// The type of a [`Bio`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BioType {
    /// Read a block from the device.
    Read,
    /// Write a block to the device.
    Write,
    /// Discard (invalidate) a block; carries no payload.
    Discard,
    /// Flush the volatile write cache.
    Flush,
}

/// The status of a [`Bio`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BioStatus {
    /// The initial status for a newly created `Bio`.
    Init,
    /// After a `Bio` is submitted, its status is changed to `Submit`.
    Submit,
    /// The I/O completed successfully.
    Complete,
    /// The operation is not supported (unaligned request, unknown op).
    NotSupported,
    /// No space was available to service the request.
    NoSpace,
    /// The device reported an I/O error.
    IoError,
}

/// The error returned when enqueueing a `Bio` fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BioEnqueueError {
    /// The request queue is full.
    IsFull,
    /// The device refused the request.
    Refused,
}

/// A single block I/O request.
///
/// `Bio` is cheaply cloned (it is a thin handle around a reference-counted
/// inner record); every clone observes the same completion.
#[derive(Clone)]
pub struct Bio(Arc<BioInner>);

struct BioInner {
    type_: BioType,
    pba: crate::id::Pba,
    /// The buffer: written into on `Read`, read from on `Write`.
    buf: Mutex<Vec<u8>>,
    status: AtomicU32,
    completion: Condvar,
    completion_lock: Mutex<()>,
    complete_fn: Option<fn(&SubmittedBio)>,
}

impl Bio {
    /// Constructs a new `Bio` targeting `pba`.
    ///
    /// For `Write`, `buf` holds the data to write. For `Read`, `buf` must be
    /// pre-sized to the number of bytes to read; it is overwritten in place.
    pub fn new(
        type_: BioType,
        pba: crate::id::Pba,
        buf: Vec<u8>,
        complete_fn: Option<fn(&SubmittedBio)>,
    ) -> Self {
        Self(Arc::new(BioInner {
            type_,
            pba,
            buf: Mutex::new(buf),
            status: AtomicU32::new(BioStatus::Init as u32),
            completion: Condvar::new(),
            completion_lock: Mutex::new(()),
            complete_fn,
        }))
    }

    /// Returns the type of this `Bio`.
    pub fn type_(&self) -> BioType {
        self.0.type_
    }

    /// Returns the target physical block address.
    pub fn pba(&self) -> crate::id::Pba {
        self.0.pba
    }

    /// Returns the current status.
    pub fn status(&self) -> BioStatus {
        status_from_u32(self.0.status.load(Ordering::Acquire))
    }

    /// Copies the current buffer contents out.
    pub fn buf(&self) -> Vec<u8> {
        self.0.buf.lock().unwrap().clone()
    }

    /// Submits this `Bio` to `device`, returning a waiter for its completion.
    ///
    /// # Panics
    ///
    /// Panics if the `Bio` has already been submitted.
    pub fn submit(&self, device: &dyn ZonedDevice) -> Result<BioWaiter, BioEnqueueError> {
        let prev = self.0.status.compare_exchange(
            BioStatus::Init as u32,
            BioStatus::Submit as u32,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        assert!(prev.is_ok(), "Bio submitted more than once");

        if let Err(e) = device.submit_io(SubmittedBio(self.0.clone())) {
            let _ = self.0.status.compare_exchange(
                BioStatus::Submit as u32,
                BioStatus::Init as u32,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            return Err(e);
        }

        Ok(BioWaiter {
            bios: vec![self.0.clone()],
        })
    }

    /// Submits this `Bio` and waits for it to complete, synchronously.
    pub fn submit_and_wait(&self, device: &dyn ZonedDevice) -> Result<BioStatus, BioEnqueueError> {
        let waiter = self.submit(device)?;
        Ok(waiter.wait().unwrap_or(BioStatus::IoError))
    }
}

impl fmt::Debug for Bio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bio")
            .field("type", &self.type_())
            .field("pba", &self.pba())
            .field("status", &self.status())
            .finish()
    }
}

/// A waiter over one or more in-flight [`Bio`]s.
///
/// This is the "clone context" aggregate from the request mapper's point of
/// view: a host request is split into one `Bio` per block, and the mapper
/// waits on the resulting `BioWaiter` for all of them to complete.
#[must_use]
pub struct BioWaiter {
    bios: Vec<Arc<BioInner>>,
}

impl BioWaiter {
    /// An empty waiter, for requests that issue no device I/O (e.g. Discard).
    pub fn new() -> Self {
        Self { bios: Vec::new() }
    }

    /// The number of `Bio`s tracked by this waiter.
    pub fn len(&self) -> usize {
        self.bios.len()
    }

    /// Whether this waiter tracks no `Bio`s.
    pub fn is_empty(&self) -> bool {
        self.bios.is_empty()
    }

    /// Appends the `Bio`s from `other` onto `self`.
    pub fn extend(&mut self, other: Self) {
        self.bios.extend(other.bios);
    }

    /// Blocks until every tracked `Bio` has left the `Submit` state.
    ///
    /// Returns `Some(BioStatus::Complete)` iff every `Bio` completed
    /// successfully; `None` if any did not.
    pub fn wait(&self) -> Option<BioStatus> {
        let mut all_complete = true;
        for inner in &self.bios {
            let guard = inner.completion_lock.lock().unwrap();
            let _guard = inner
                .completion
                .wait_while(guard, |_| {
                    status_from_u32(inner.status.load(Ordering::Acquire)) == BioStatus::Submit
                })
                .unwrap();
            if status_from_u32(inner.status.load(Ordering::Acquire)) != BioStatus::Complete {
                all_complete = false;
            }
        }
        if all_complete {
            Some(BioStatus::Complete)
        } else {
            None
        }
    }
}

impl Default for BioWaiter {
    fn default() -> Self {
        Self::new()
    }
}

/// A `Bio` that has been handed to the device; the only handle the device
/// driver collaborator needs to report completion.
pub struct SubmittedBio(Arc<BioInner>);

impl SubmittedBio {
    /// Returns the type of this I/O.
    pub fn type_(&self) -> BioType {
        self.0.type_
    }

    /// Returns the target physical block address.
    pub fn pba(&self) -> crate::id::Pba {
        self.0.pba
    }

    /// Returns a mutable view of the buffer, for the device to fill (on
    /// read) or consume (on write).
    pub fn buf(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.buf.lock().unwrap()
    }

    /// Completes the I/O with `status`, waking any waiter and invoking the
    /// completion callback, if one was registered.
    ///
    /// # Panics
    ///
    /// Panics if called with `Init` or `Submit`, or more than once.
    pub fn complete(&self, status: BioStatus) {
        assert!(status != BioStatus::Init && status != BioStatus::Submit);
        let _guard = self.0.completion_lock.lock().unwrap();
        let prev = self.0.status.compare_exchange(
            BioStatus::Submit as u32,
            status as u32,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        assert!(prev.is_ok(), "Bio completed more than once");
        self.0.completion.notify_all();
        drop(_guard);
        if let Some(complete_fn) = self.0.complete_fn {
            complete_fn(self);
        }
    }
}

fn status_from_u32(v: u32) -> BioStatus {
    match v {
        0 => BioStatus::Init,
        1 => BioStatus::Submit,
        2 => BioStatus::Complete,
        3 => BioStatus::NotSupported,
        4 => BioStatus::NoSpace,
        5 => BioStatus::IoError,
        _ => unreachable!("invalid BioStatus encoding"),
    }
}
