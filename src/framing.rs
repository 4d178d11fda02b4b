//! # Request/response framing
//!
//! The PICC speaks two wire encodings for the same logical command set
//!:
//!
//! - **Native**: `[INS, payload...]` out, `[status_byte, data...]` back.
//! - **ISO 7816 wrap**: `CLA=0x90, INS, P1=P2=0, Lc, data, Le=0x00` out,
//!   `data..., SW1, SW2` back, with `SW1=0x91` mirroring the native status
//!   family.
//!
//! `CommandSet::Iso` (true ISO 7816 commands, distinct INS codes) is not
//! handled by [`encode`]/[`decode`] - `DesfireExchange` surfaces
//! `DesfireError::NotImplemented` for it; only the dedicated ISO
//! external/internal authenticate flow (`crate::auth`) builds those APDUs
//! directly.

use crate::consts::ISO_WRAP_CLA;
use crate::error::DesfireError;
use crate::status::DesfireStatus;

/// Wire encoding selected for the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSet {
    /// One-byte INS, native status byte, sent via `exchange_raw`.
    Native,
    /// Native INS codes wrapped in an ISO 7816 APDU, sent via
    /// `exchange_apdu`.
    NativeIso,
    /// True ISO 7816-4 command set (GET CHALLENGE / EXTERNAL AUTHENTICATE /
    /// INTERNAL AUTHENTICATE); only `crate::auth::authenticate_iso` speaks
    /// this directly.
    Iso,
}

/// Encode a native frame: just the instruction byte followed by the
/// payload.
pub fn encode_native(ins: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(ins);
    frame.extend_from_slice(payload);
    frame
}

/// Encode an ISO 7816 APDU wrapping a native instruction.
pub fn encode_iso_wrap(ins: u8, payload: &[u8]) -> Result<Vec<u8>, DesfireError> {
    if payload.len() > 255 {
        return Err(DesfireError::ApduEncode);
    }
    let mut apdu = Vec::with_capacity(5 + payload.len() + 1);
    apdu.push(ISO_WRAP_CLA);
    apdu.push(ins);
    apdu.push(0x00);
    apdu.push(0x00);
    apdu.push(payload.len() as u8);
    apdu.extend_from_slice(payload);
    apdu.push(0x00);
    Ok(apdu)
}

/// Split a native response into its normalised status and data.
pub fn decode_native(response: &[u8]) -> Result<(DesfireStatus, &[u8]), DesfireError> {
    let (status_byte, data) = response.split_first().ok_or(DesfireError::CardExchange)?;
    Ok((DesfireStatus::from_native(*status_byte), data))
}

/// Pair an ISO 7816 response body with its `SW1 SW2` into a normalised
/// status and data slice.
pub fn decode_iso(data: &[u8], sw: [u8; 2]) -> Result<(DesfireStatus, &[u8]), DesfireError> {
    let status = DesfireStatus::from_sw(sw[0], sw[1]).ok_or(DesfireError::CardExchange)?;
    Ok((status, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_round_trip() {
        let frame = encode_native(0x5A, &[1, 2, 3]);
        assert_eq!(frame, vec![0x5A, 1, 2, 3]);
        let response = [0x00, 9, 9];
        let (status, data) = decode_native(&response).unwrap();
        assert!(status.is_success());
        assert_eq!(data, &[9, 9]);
    }

    #[test]
    fn iso_wrap_has_expected_header_and_le() {
        let apdu = encode_iso_wrap(0x5A, &[1, 2, 3]).unwrap();
        assert_eq!(&apdu[..5], &[ISO_WRAP_CLA, 0x5A, 0x00, 0x00, 3]);
        assert_eq!(apdu.last(), Some(&0x00));
    }

    #[test]
    fn iso_decode_rejects_non_family_sw() {
        assert!(decode_iso(&[], [0x6A, 0x82]).is_err());
    }
}
