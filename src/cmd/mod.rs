//! # Command surface
//!
//! Every DESFire command is a thin wrapper: build a small
//! fixed-offset payload, pick the `comm_mode` the operation requires, and run
//! it through [`DesfireContext::exchange_raw`]. Split by the area of the card
//! each group touches.

mod data;
mod file;
mod system;
mod value;

pub use data::*;
pub use file::*;
pub use system::*;
pub use value::*;

use crate::error::DesfireError;

/// 3-byte little-endian encode.
pub(crate) fn le3(value: u32) -> [u8; 3] {
    let b = value.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// 3-byte little-endian decode.
pub(crate) fn from_le3(bytes: &[u8]) -> Result<u32, DesfireError> {
    if bytes.len() < 3 {
        return Err(DesfireError::CardExchange);
    }
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
}

/// 4-byte little-endian encode.
pub(crate) fn le4(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

pub(crate) fn from_le4(bytes: &[u8]) -> Result<i32, DesfireError> {
    if bytes.len() < 4 {
        return Err(DesfireError::CardExchange);
    }
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
