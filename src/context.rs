//! # `DesfireContext`: the process-visible session handle
//!
//! Owns the key slot under negotiation, the wire/comm-mode defaults for the
//! next command, and the [`ChannelState`] that `crate::auth` and
//! `crate::secure_channel` populate. At most one authenticated session lives
//! in a context at a time; selecting an application clears it.
//!
//! APDU tracing is a per-context callback ([`ApduTrace`]), not a process-wide
//! flag - the source's global log switch is exactly the "global mutable
//! state" would otherwise force on every caller.

use zeroize::Zeroizing;

use crate::auth;
use crate::crypto::KeyType;
use crate::error::{AuthFailureCode, DesfireError};
use crate::exchange::{self, ExchangeFlags, ExchangeOutput};
use crate::framing::CommandSet;
use crate::secure_channel::{ChannelState, CommMode, SecureChannel};
use crate::transport::Transport;

/// Pre-authentication key diversification algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfAlgorithm {
    #[default]
    None,
    An10922,
    /// Declared but not implemented: no card-specific Gallagher input was
    /// available to ground the construction against.
    Gallagher,
}

/// Per-context exchange observer, called with the instruction byte and the
/// wrapped request/response bytes actually placed on the wire. Replaces the
/// source's global APDU-log flag.
pub trait ApduTrace {
    fn on_exchange(&mut self, ins: u8, request: &[u8], response: &[u8]);
}

/// Builder for [`DesfireContext`].
pub struct DesfireContextBuilder {
    key_num: u8,
    key_type: KeyType,
    key: Vec<u8>,
    kdf_algo: KdfAlgorithm,
    kdf_input: Vec<u8>,
    command_set: CommandSet,
    comm_mode: CommMode,
}

impl DesfireContextBuilder {
    pub fn new(key_num: u8, key_type: KeyType, key: Vec<u8>) -> Self {
        Self {
            key_num,
            key_type,
            key,
            kdf_algo: KdfAlgorithm::None,
            kdf_input: Vec::new(),
            command_set: CommandSet::Native,
            comm_mode: CommMode::Plain,
        }
    }

    pub fn command_set(mut self, command_set: CommandSet) -> Self {
        self.command_set = command_set;
        self
    }

    pub fn comm_mode(mut self, comm_mode: CommMode) -> Self {
        self.comm_mode = comm_mode;
        self
    }

    pub fn kdf(mut self, algo: KdfAlgorithm, input: Vec<u8>) -> Self {
        self.kdf_algo = algo;
        self.kdf_input = input;
        self
    }

    pub fn build(self) -> Result<DesfireContext, DesfireError> {
        if self.key_num > 13 {
            return Err(DesfireError::InvalidArgument("key_num out of range 0..=13"));
        }
        if self.key.len() != self.key_type.raw_key_length() {
            return Err(DesfireError::InvalidArgument("key length does not match key_type"));
        }
        if self.kdf_input.len() > 31 {
            return Err(DesfireError::InvalidArgument("kdf_input exceeds 31 bytes"));
        }
        let effective_key = match self.kdf_algo {
            KdfAlgorithm::None => self.key,
            KdfAlgorithm::An10922 => {
                crate::crypto::kdf_an10922(&self.key, self.key_type, &self.kdf_input)?
            }
            KdfAlgorithm::Gallagher => return Err(DesfireError::NotImplemented),
        };
        Ok(DesfireContext {
            key_num: self.key_num,
            key_type: self.key_type,
            key: Zeroizing::new(effective_key),
            kdf_algo: self.kdf_algo,
            kdf_input: self.kdf_input,
            command_set: self.command_set,
            comm_mode: self.comm_mode,
            channel: ChannelState::new(self.key_type),
            app_selected: false,
            trace: None,
        })
    }
}

/// The process-visible handle. Invariant: at most one
/// authenticated session at a time, enforced by [`ChannelState`].
pub struct DesfireContext {
    key_num: u8,
    key_type: KeyType,
    key: Zeroizing<Vec<u8>>,
    kdf_algo: KdfAlgorithm,
    kdf_input: Vec<u8>,
    command_set: CommandSet,
    comm_mode: CommMode,
    channel: ChannelState,
    app_selected: bool,
    trace: Option<Box<dyn ApduTrace>>,
}

impl DesfireContext {
    pub fn builder(key_num: u8, key_type: KeyType, key: Vec<u8>) -> DesfireContextBuilder {
        DesfireContextBuilder::new(key_num, key_type, key)
    }

    pub fn key_num(&self) -> u8 {
        self.key_num
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn command_set(&self) -> CommandSet {
        self.command_set
    }

    pub fn set_command_set(&mut self, command_set: CommandSet) {
        self.command_set = command_set;
    }

    pub fn comm_mode(&self) -> CommMode {
        self.comm_mode
    }

    pub fn set_comm_mode(&mut self, comm_mode: CommMode) {
        self.comm_mode = comm_mode;
    }

    pub fn app_selected(&self) -> bool {
        self.app_selected
    }

    pub fn secure_channel(&self) -> SecureChannel {
        self.channel.channel
    }

    pub fn is_authenticated(&self) -> bool {
        self.channel.is_authenticated()
    }

    pub fn set_trace(&mut self, trace: Box<dyn ApduTrace>) {
        self.trace = Some(trace);
    }

    pub fn clear_trace(&mut self) {
        self.trace = None;
    }

    /// `DesfireClearSession`: resets `secure_channel`,
    /// session keys, `iv`, `ti` and `cmd_cntr`. Does not touch `key_num`,
    /// `key_type`, the master `key`, `command_set` or `comm_mode`.
    pub fn clear_session(&mut self) {
        self.channel.clear();
    }

    /// Authenticate against `target_channel`, routed by
    /// `(command_set, target_channel)`. `app_level` only matters for the ISO
    /// flow's key-reference `P2`.
    pub fn authenticate(
        &mut self,
        transport: &mut dyn Transport,
        target_channel: SecureChannel,
        app_level: bool,
    ) -> Result<(), DesfireError> {
        auth::authenticate(
            transport,
            self.command_set,
            target_channel,
            self.key_num,
            self.key_type,
            &self.key,
            app_level,
            &mut self.channel,
        )
    }

    /// `SelectApplication`: always clears the session first,
    /// then issues the command itself plain.
    pub fn select_application(&mut self, transport: &mut dyn Transport, aid: crate::types::Aid) -> Result<(), DesfireError> {
        self.clear_session();
        let payload = aid.to_le_bytes();
        self.exchange_raw(transport, crate::consts::SELECT_APPLICATION_INS, &payload, CommMode::Plain, ExchangeFlags::default())?;
        self.app_selected = aid.value() != 0;
        Ok(())
    }

    /// Run one command through the secure channel and exchange engine,
    /// notifying the trace callback (if any) with the instruction byte and
    /// the bytes actually exchanged. Transport and integrity errors clear
    /// the session before propagating.
    pub fn exchange_raw(
        &mut self,
        transport: &mut dyn Transport,
        ins: u8,
        payload: &[u8],
        mode: CommMode,
        flags: ExchangeFlags,
    ) -> Result<ExchangeOutput, DesfireError> {
        let result = exchange::exchange(transport, self.command_set, &mut self.channel, ins, payload, mode, flags);
        if let Some(trace) = self.trace.as_mut() {
            let response_preview: &[u8] = match &result {
                Ok(ExchangeOutput::Flat(v)) => v,
                Ok(ExchangeOutput::Blocks(_)) => &[],
                Err(_) => &[],
            };
            trace.on_exchange(ins, payload, response_preview);
        }
        match &result {
            Err(e) if e.is_session_fatal() => self.clear_session(),
            _ => {}
        }
        result
    }

    /// Encrypt an already-CRC'd plaintext under the current session; see `crate::secure_channel::ChannelState::raw_session_encrypt`.
    pub(crate) fn raw_session_encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, DesfireError> {
        self.channel.raw_session_encrypt(plaintext)
    }

    /// Run a command whose payload is already fully formed on the wire, with
    /// TX/RX chaining and status checking but no secure-channel wrap/unwrap.
    pub(crate) fn exchange_plain(
        &mut self,
        transport: &mut dyn Transport,
        ins: u8,
        payload: &[u8],
        flags: ExchangeFlags,
    ) -> Result<Vec<u8>, DesfireError> {
        exchange::exchange_plain(transport, self.command_set, ins, payload, flags)
    }

    /// Require an authenticated session before proceeding.
    pub fn require_authenticated(&self) -> Result<(), DesfireError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(DesfireError::AuthFailure(AuthFailureCode::NotAuthenticated))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_mismatched_key_length() {
        let err = DesfireContext::builder(0, KeyType::Aes, vec![0u8; 8]).build();
        assert!(err.is_err());
    }

    #[test]
    fn builder_rejects_key_num_out_of_range() {
        let err = DesfireContext::builder(14, KeyType::Aes, vec![0u8; 16]).build();
        assert!(err.is_err());
    }

    #[test]
    fn fresh_context_has_no_secure_channel() {
        let ctx = DesfireContext::builder(0, KeyType::Aes, vec![0u8; 16]).build().unwrap();
        assert_eq!(ctx.secure_channel(), SecureChannel::None);
        assert!(!ctx.is_authenticated());
    }
}
