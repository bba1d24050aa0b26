// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small shared utilities.

pub mod bitmap;

pub use bitmap::BitMap;
