//! # PICC status normalisation
//!
//! Both wire framings (native one-byte status, ISO 7816 `SW1SW2`) report the
//! same underlying set of DESFire status codes. This module gives them a
//! single normalised representation so the exchange engine and secure
//! channel never need to know which framing produced a response.
//!
//! Native status bytes and ISO `SW1SW2` share the `0x91xx` family: `SW1`
//! mirrors the native status byte's role, `SW2` carries the DESFire code.
//! [`DesfireStatus::from_native`] and [`DesfireStatus::from_sw`] both funnel
//! into the same `0x91<code>` representation.

use crate::error::DesfireError;

/// A normalised DESFire status word, always represented as `0x91<code>`
/// regardless of which wire framing produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesfireStatus(u16);

/// The four "non-error" statuses that drive the exchange engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// `0x00` - terminal success.
    OperationOk,
    /// `0xAF` - more data follows, continue chaining.
    AdditionalFrame,
    /// `0x90` - success carrying a signature payload.
    Signature,
    /// `0x0C` - success, nothing changed.
    NoChanges,
    /// Any other code: the exchange terminates with `ApduFail`.
    Error,
}

/// Raw DESFire status code (low byte of the `0x91xx` word).
pub const CODE_OPERATION_OK: u8 = 0x00;
pub const CODE_NO_CHANGES: u8 = 0x0C;
pub const CODE_SIGNATURE: u8 = 0x90;
pub const CODE_ADDITIONAL_FRAME: u8 = 0xAF;

/// `SW1` value used by both native-mirrored and ISO-wrapped responses.
pub const STATUS_FAMILY: u8 = 0x91;

impl DesfireStatus {
    /// Build from a native exchange's single status byte.
    pub fn from_native(status_byte: u8) -> Self {
        Self(u16::from_be_bytes([STATUS_FAMILY, status_byte]))
    }

    /// Build from an ISO 7816 `SW1 SW2` pair. Returns `None` if `SW1` is not
    /// in the `0x91xx` DESFire family (the caller should surface the raw
    /// `SW1SW2` as an unrelated ISO error in that case).
    pub fn from_sw(sw1: u8, sw2: u8) -> Option<Self> {
        if sw1 == STATUS_FAMILY {
            Some(Self(u16::from_be_bytes([sw1, sw2])))
        } else {
            None
        }
    }

    /// The raw DESFire status code, i.e. the low byte of `0x91xx`.
    pub fn code(self) -> u8 {
        (self.0 & 0x00FF) as u8
    }

    /// Full normalised status word, always `0x91xx`.
    pub fn word(self) -> u16 {
        self.0
    }

    pub fn kind(self) -> StatusKind {
        match self.code() {
            CODE_OPERATION_OK => StatusKind::OperationOk,
            CODE_ADDITIONAL_FRAME => StatusKind::AdditionalFrame,
            CODE_SIGNATURE => StatusKind::Signature,
            CODE_NO_CHANGES => StatusKind::NoChanges,
            _ => StatusKind::Error,
        }
    }

    /// True for any of the four non-error statuses.
    pub fn is_success(self) -> bool {
        !matches!(self.kind(), StatusKind::Error)
    }

    pub fn is_additional_frame(self) -> bool {
        matches!(self.kind(), StatusKind::AdditionalFrame)
    }

    /// Turn a non-success status into `Err(ApduFail)`; pass success through.
    pub fn check(self) -> Result<Self, DesfireError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(DesfireError::ApduFail(self))
        }
    }
}

impl core::fmt::Display for DesfireStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_and_iso_normalise_to_same_word() {
        let native = DesfireStatus::from_native(CODE_ADDITIONAL_FRAME);
        let iso = DesfireStatus::from_sw(0x91, CODE_ADDITIONAL_FRAME).unwrap();
        assert_eq!(native.word(), iso.word());
        assert!(native.is_additional_frame());
    }

    #[test]
    fn non_family_sw_is_none() {
        assert!(DesfireStatus::from_sw(0x90, 0x00).is_none());
    }

    #[test]
    fn error_status_fails_check() {
        let s = DesfireStatus::from_native(0x1E);
        assert!(matches!(s.kind(), StatusKind::Error));
        assert!(s.check().is_err());
    }

    #[test]
    fn success_variants_pass_check() {
        for code in [CODE_OPERATION_OK, CODE_NO_CHANGES, CODE_SIGNATURE, CODE_ADDITIONAL_FRAME] {
            assert!(DesfireStatus::from_native(code).check().is_ok());
        }
    }
}
