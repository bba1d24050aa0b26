// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports shared across this crate's modules.

pub use crate::{
    error::{Errno, Error, Result},
    return_errno, return_errno_with_msg,
};
