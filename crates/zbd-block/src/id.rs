// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    ops::{Add, Sub},
};

use static_assertions::const_assert;

pub const BLOCK_SIZE: u32 = 4096;
pub const SECTOR_SIZE: u32 = 512;
const_assert!(BLOCK_SIZE / SECTOR_SIZE >= 1);

/// Defines a newtype wrapping a raw block/sector index.
///
/// Each address space the core juggles (logical blocks, physical blocks,
/// device sectors) gets its own type so the compiler rejects an accidental
/// mix of units; this mirrors the `BlockId<const N: u16>` pattern used
/// elsewhere in the pack for the same purpose, specialized per-kind instead
/// of per-const-generic since the kinds here don't share a unit size.
macro_rules! block_index_type {
    ($name:ident, $unit_bytes:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Constructs an id from a raw index.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Constructs an id from a byte offset.
            ///
            /// # Panics
            ///
            /// Panics if `offset` is not aligned to the unit size.
            pub fn from_offset(offset: usize) -> Self {
                debug_assert_eq!(offset % ($unit_bytes as usize), 0);
                Self((offset / ($unit_bytes as usize)) as u64)
            }

            /// Converts to a byte offset.
            pub fn to_offset(self) -> usize {
                (self.0 as usize) * ($unit_bytes as usize)
            }

            /// Converts to a raw index.
            pub const fn to_raw(self) -> u64 {
                self.0
            }

            /// The unit size, in bytes, of this index kind.
            pub const fn unit_bytes() -> u32 {
                $unit_bytes
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            fn add(self, other: u64) -> Self::Output {
                Self(self.0 + other)
            }
        }

        impl Sub<u64> for $name {
            type Output = Self;

            fn sub(self, other: u64) -> Self::Output {
                Self(self.0 - other)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

block_index_type!(Lba, BLOCK_SIZE, "A logical block address, as seen by the host.");
block_index_type!(Pba, BLOCK_SIZE, "A physical block address on the backing device.");
block_index_type!(Sid, SECTOR_SIZE, "A sector index on the backing device.");

impl From<Lba> for Sid {
    fn from(lba: Lba) -> Self {
        Self::new(lba.to_raw() * (BLOCK_SIZE / SECTOR_SIZE) as u64)
    }
}

impl From<Pba> for Sid {
    fn from(pba: Pba) -> Self {
        Self::new(pba.to_raw() * (BLOCK_SIZE / SECTOR_SIZE) as u64)
    }
}
