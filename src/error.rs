//! # Error types
//!
//! All fallible operations in this crate return [`DesfireError`]. Transport
//! and integrity failures are treated as fatal to the current session (the
//! caller should expect [`crate::context::DesfireContext`] to have been
//! cleared); [`DesfireError::ApduFail`] preserves the session since the PICC
//! itself is still in a well defined state.

use thiserror::Error;

use crate::status::DesfireStatus;

/// Step-indexed authentication failure.
///
/// Steps 1-11 are shared by the EV1 and EV2 challenge-response handshakes,
/// 100/200/201 cover protocol selection and application-selection
/// prerequisites, and 301-308 are ISO external/internal authenticate
/// sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureCode {
    /// Could not send the initial AUTHENTICATE/AUTHENTICATE_ISO/AUTHENTICATE_AES request.
    SendAuthenticate = 1,
    /// PICC did not answer ADDITIONAL_FRAME to the initial request.
    ExpectAdditionalFrame = 2,
    /// Encrypted RndB did not have the expected length.
    RndBLength = 3,
    /// Could not decrypt RndB.
    DecryptRndB = 4,
    /// Could not encrypt RndA || RndB'.
    EncryptChallenge = 5,
    /// Could not send the second-pass frame.
    SendChallenge = 6,
    /// PICC rejected the second-pass frame.
    ChallengeRejected = 7,
    /// Encrypted RndA' did not have the expected length.
    RndALength = 8,
    /// Could not decrypt RndA'.
    DecryptRndA = 9,
    /// Session-key derivation failed (should not happen; reserved for future checks).
    DeriveSessionKey = 10,
    /// Rotated RndA does not match the PICC's answer: mutual authentication failed.
    ChallengeMismatch = 11,
    /// `command_set`/`secure_channel` combination has no matching protocol.
    NoMatchingProtocol = 100,
    /// Application selection failed before authentication could start.
    SelectFailed = 200,
    /// Caller attempted an authenticated operation without `is_authenticated`.
    NotAuthenticated = 201,
    /// ISO GET CHALLENGE failed.
    IsoGetChallenge = 301,
    /// ISO GET CHALLENGE response had the wrong length.
    IsoChallengeLength = 302,
    /// ISO EXTERNAL AUTHENTICATE failed.
    IsoExternalAuthenticate = 303,
    /// ISO INTERNAL AUTHENTICATE failed.
    IsoInternalAuthenticate = 304,
    /// ISO INTERNAL AUTHENTICATE response had the wrong length.
    IsoInternalAuthLength = 305,
    /// Could not decrypt the ISO INTERNAL AUTHENTICATE response.
    IsoDecryptResponse = 306,
    /// Key-reference algorithm tag does not match `key_type`.
    IsoUnsupportedKeyType = 307,
    /// Rotated RndA mismatch in the ISO flow.
    IsoChallengeMismatch = 308,
}

impl AuthFailureCode {
    /// Numeric step code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl core::fmt::Display for AuthFailureCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: ", self.code())?;
        let msg = match self {
            Self::SendAuthenticate => "failed to send authenticate request",
            Self::ExpectAdditionalFrame => "expected ADDITIONAL_FRAME after authenticate request",
            Self::RndBLength => "encrypted RndB has unexpected length",
            Self::DecryptRndB => "failed to decrypt RndB",
            Self::EncryptChallenge => "failed to encrypt RndA || RndB'",
            Self::SendChallenge => "failed to send second-pass challenge",
            Self::ChallengeRejected => "PICC rejected second-pass challenge",
            Self::RndALength => "encrypted RndA' has unexpected length",
            Self::DecryptRndA => "failed to decrypt RndA'",
            Self::DeriveSessionKey => "failed to derive session key",
            Self::ChallengeMismatch => "mutual authentication failed: RndA mismatch",
            Self::NoMatchingProtocol => "no authentication protocol matches command_set/secure_channel",
            Self::SelectFailed => "application selection failed before authenticate",
            Self::NotAuthenticated => "context is not authenticated",
            Self::IsoGetChallenge => "ISO GET CHALLENGE failed",
            Self::IsoChallengeLength => "ISO GET CHALLENGE response has unexpected length",
            Self::IsoExternalAuthenticate => "ISO EXTERNAL AUTHENTICATE failed",
            Self::IsoInternalAuthenticate => "ISO INTERNAL AUTHENTICATE failed",
            Self::IsoInternalAuthLength => "ISO INTERNAL AUTHENTICATE response has unexpected length",
            Self::IsoDecryptResponse => "failed to decrypt ISO INTERNAL AUTHENTICATE response",
            Self::IsoUnsupportedKeyType => "key reference does not support this key_type",
            Self::IsoChallengeMismatch => "ISO mutual authentication failed: RndA mismatch",
        };
        f.write_str(msg)
    }
}

/// Transport-layer sub-errors, surfaced unchanged by [`DesfireError::Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    RfTransmit,
    CardExchange,
}

impl core::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::Timeout => "transport timeout",
            Self::RfTransmit => "RF transmit error",
            Self::CardExchange => "card exchange error",
        };
        f.write_str(msg)
    }
}

/// All errors this crate can return.
#[derive(Debug, Error)]
pub enum DesfireError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("failed to encode command frame")]
    ApduEncode,

    #[error("PICC returned non-success status {0}")]
    ApduFail(DesfireStatus),

    #[error("transport error: {0}")]
    Transport(TransportFailure),

    #[error("integrity check failed (CRC/MAC mismatch)")]
    Integrity,

    #[error("authentication failed: {0}")]
    AuthFailure(AuthFailureCode),

    #[error("command_set not implemented for this operation")]
    NotImplemented,

    #[error("unexpected response shape")]
    CardExchange,
}

impl DesfireError {
    /// True for errors that leave the session in an indeterminate state and
    /// therefore require [`crate::context::DesfireContext::clear_session`]
    /// before any further command.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Integrity)
    }
}

pub type Result<T> = core::result::Result<T, DesfireError>;
