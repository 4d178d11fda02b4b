//! # RF transport boundary
//!
//! The low-level ISO 14443-A half-duplex exchange (field activation, frame
//! timing, anticollision) is out of scope for this crate; it is
//! consumed here as a pair of blocking primitives a caller implements
//! against whatever reader hardware they have.

use crate::error::{DesfireError, TransportFailure};

/// Collaborator implemented by the caller: one physical PICC in the RF
/// field, addressed with either wire framing.
///
/// Both methods are blocking I/O boundaries - the only points where a caller's scheduler can pre-empt
/// this crate's otherwise CPU-bound work.
pub trait Transport {
    /// Send an ISO 7816 APDU (`CLA INS P1 P2 Lc data Le`), returning the
    /// response body and the two-byte status word.
    fn exchange_apdu(&mut self, apdu: &[u8], activate_field: bool) -> Result<(Vec<u8>, [u8; 2]), TransportFailure>;

    /// Send a native frame (`INS payload...`), returning the response with
    /// its leading status byte still attached.
    fn exchange_raw(&mut self, frame: &[u8], activate_field: bool) -> Result<Vec<u8>, TransportFailure>;
}

pub(crate) fn map_transport_err(e: TransportFailure) -> DesfireError {
    DesfireError::Transport(e)
}
