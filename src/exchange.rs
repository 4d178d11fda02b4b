//! # Command exchange engine
//!
//! TX chaining for payloads exceeding one PCD→PICC frame, RX chaining while
//! the PICC answers `ADDITIONAL_FRAME`, and the `split_by_size` block
//! representation used by commands whose response is a sequence of
//! variable-length records (`GetDFNames`). The secure-channel wrap/unwrap
//! calls live here too: wrap sees the payload before
//! TX chaining splits it, unwrap sees the response after RX chaining has
//! reassembled it.

use crate::error::DesfireError;
use crate::framing::{self, CommandSet};
use crate::secure_channel::{ChannelState, CommMode};
use crate::status::DesfireStatus;
use crate::transport::{map_transport_err, Transport};

/// Maximum PCD→PICC payload per frame.
const FRAME_MAX: usize = crate::consts::MAX_PCD_TO_PICC_PAYLOAD;

/// Options controlling one [`exchange`] call.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeFlags {
    pub activate_field: bool,
    pub enable_chaining: bool,
    /// Non-zero selects the `[len, bytes...]` block representation with
    /// this record stride; zero means a flat byte
    /// stream.
    pub split_by_size: usize,
}

impl Default for ExchangeFlags {
    fn default() -> Self {
        Self { activate_field: false, enable_chaining: true, split_by_size: 0 }
    }
}

/// Result of a fully chained exchange: the PICC's final status plus either
/// a flat byte stream or, when `split_by_size != 0`, its re-blocked form.
pub enum ExchangeOutput {
    Flat(Vec<u8>),
    Blocks(Vec<Vec<u8>>),
}

impl ExchangeOutput {
    pub fn into_flat(self) -> Vec<u8> {
        match self {
            ExchangeOutput::Flat(v) => v,
            ExchangeOutput::Blocks(blocks) => blocks.into_iter().flatten().collect(),
        }
    }

    pub fn into_blocks(self) -> Vec<Vec<u8>> {
        match self {
            ExchangeOutput::Flat(v) => vec![v],
            ExchangeOutput::Blocks(b) => b,
        }
    }
}

/// Run one logical command: wrap, chain TX, chain RX, unwrap, re-block.
///
/// `ins` is the instruction byte used both for wire framing and as the MAC
/// header. Transport errors and integrity errors are session
/// fatal; the caller (`crate::context`) is responsible for clearing the
/// session on those.
pub fn exchange(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    channel: &mut ChannelState,
    ins: u8,
    payload: &[u8],
    mode: CommMode,
    flags: ExchangeFlags,
) -> Result<ExchangeOutput, DesfireError> {
    if command_set == CommandSet::Iso {
        return Err(DesfireError::NotImplemented);
    }

    let wrapped = channel.wrap(ins, payload, mode)?;
    let (status, flat) = tx_chain(transport, command_set, ins, &wrapped, flags)?;
    let status = rx_chain(transport, command_set, status, flat, flags)?;
    let (status, data) = status;
    status.check()?;

    let unwrapped = channel.unwrap(status.code(), &data, mode)?;
    if flags.split_by_size >= 2 {
        Ok(ExchangeOutput::Blocks(split_blocks(&unwrapped, flags.split_by_size)))
    } else {
        Ok(ExchangeOutput::Flat(unwrapped))
    }
}

/// Run one command with TX/RX chaining and status checking but *no*
/// secure-channel wrap/unwrap - used by `ChangeKey`, whose
/// cryptogram the command layer builds and encrypts itself because its CRC
/// covers `INS || key_no_byte || payload` rather than the payload alone.
pub fn exchange_plain(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    ins: u8,
    payload: &[u8],
    flags: ExchangeFlags,
) -> Result<Vec<u8>, DesfireError> {
    if command_set == CommandSet::Iso {
        return Err(DesfireError::NotImplemented);
    }
    let (status, flat) = tx_chain(transport, command_set, ins, payload, flags)?;
    let (status, data) = rx_chain(transport, command_set, status, flat, flags)?;
    status.check()?;
    Ok(data)
}

/// TX chaining: split `wrapped` into `FRAME_MAX`-sized chunks; the first
/// uses `ins`, the rest use `ADDITIONAL_FRAME` (0xAF). Every chunk is its
/// own framing round trip; a non-success status on any but the last chunk
/// aborts with `ApduFail`. Returns the *last* chunk's status and whatever
/// data came back with it (RX chaining continues from there).
fn tx_chain(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    ins: u8,
    wrapped: &[u8],
    flags: ExchangeFlags,
) -> Result<(DesfireStatus, Vec<u8>), DesfireError> {
    let chunks: Vec<&[u8]> = if wrapped.is_empty() {
        vec![&[]]
    } else {
        wrapped.chunks(FRAME_MAX).collect()
    };
    let last = chunks.len() - 1;
    let mut status = DesfireStatus::from_native(0);
    let mut data = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk_ins = if i == 0 { ins } else { crate::consts::ADDITIONAL_FRAME_INS };
        let activate = flags.activate_field && i == 0;
        let (s, d) = send_frame(transport, command_set, chunk_ins, chunk, activate)?;
        if i != last && !s.is_additional_frame() {
            return Err(DesfireError::ApduFail(s));
        }
        status = s;
        data = d;
    }
    if chunks.iter().map(|c| c.len()).sum::<usize>() != wrapped.len() {
        log_warn("TX chaining sent fewer bytes than requested");
    }
    Ok((status, data))
}

/// RX chaining: while the PICC answers `ADDITIONAL_FRAME` and chaining is
/// enabled, request the next fragment with a bare `0xAF` frame and
/// accumulate. `enable_chaining = false` hands the first fragment back
/// verbatim.
fn rx_chain(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    mut status: DesfireStatus,
    mut data: Vec<u8>,
    flags: ExchangeFlags,
) -> Result<(DesfireStatus, Vec<u8>), DesfireError> {
    if !flags.enable_chaining {
        return Ok((status, data));
    }
    while status.is_additional_frame() {
        let (s, d) = send_frame(transport, command_set, crate::consts::ADDITIONAL_FRAME_INS, &[], false)?;
        data.extend_from_slice(&d);
        status = s;
    }
    Ok((status, data))
}

/// Single framing round-trip with no chaining - used directly by the
/// authentication flows (`crate::auth`), which never see the secure-channel
/// wrap/unwrap (there is no session yet) and whose frames are always small
/// enough to fit one PCD→PICC frame.
pub(crate) fn send_frame(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    ins: u8,
    payload: &[u8],
    activate_field: bool,
) -> Result<(DesfireStatus, Vec<u8>), DesfireError> {
    match command_set {
        CommandSet::Native => {
            let frame = framing::encode_native(ins, payload);
            let response = transport.exchange_raw(&frame, activate_field).map_err(map_transport_err)?;
            let (status, data) = framing::decode_native(&response)?;
            Ok((status, data.to_vec()))
        }
        CommandSet::NativeIso => {
            let apdu = framing::encode_iso_wrap(ins, payload)?;
            let (data, sw) = transport.exchange_apdu(&apdu, activate_field).map_err(map_transport_err)?;
            let (status, data) = framing::decode_iso(&data, sw)?;
            Ok((status, data.to_vec()))
        }
        CommandSet::Iso => Err(DesfireError::NotImplemented),
    }
}

/// Split a flat byte stream into `stride`-sized chunks (last one may be
/// shorter); `join_blocks` concatenates them back. Together they are a
/// total, lossless pair for any `stride >= 2` and any input - unlike a length-prefixed record codec, which would have
/// to reject malformed inputs.
pub fn split_blocks(data: &[u8], stride: usize) -> Vec<Vec<u8>> {
    if stride < 2 || data.is_empty() {
        return vec![data.to_vec()];
    }
    data.chunks(stride).map(|c| c.to_vec()).collect()
}

/// Inverse of [`split_blocks`].
pub fn join_blocks(blocks: &[Vec<u8>], _stride: usize) -> Vec<u8> {
    blocks.iter().flat_map(|b| b.iter().copied()).collect()
}

#[cfg(feature = "log")]
fn log_warn(msg: &str) {
    log::warn!("{msg}");
}

#[cfg(not(feature = "log"))]
fn log_warn(_msg: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_split_round_trips_for_any_stride_and_data() {
        for stride in 2..10 {
            for len in 0..40 {
                let data: Vec<u8> = (0..len as u8).collect();
                let blocks = split_blocks(&data, stride);
                assert_eq!(join_blocks(&blocks, stride), data);
            }
        }
    }

    #[test]
    fn split_blocks_stride_one_is_single_block() {
        let data = vec![1, 2, 3];
        let blocks = split_blocks(&data, 1);
        assert_eq!(join_blocks(&blocks, 1), data);
    }
}
