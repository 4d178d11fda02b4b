//! # Authentication protocols
//!
//! The three challenge-response handshakes that produce session material for
//! `crate::secure_channel`: legacy/EV1 (`authenticate_ev1`), ISO 7816
//! external/internal authenticate (`authenticate_iso`), and EV2
//! (`authenticate_ev2`), plus the [`authenticate`] selector that picks among
//! them from `(command_set, secure_channel)`.
//!
//! None of these flows go through the secure-channel codec - there is no
//! session yet, so every frame here is sent with `crate::exchange::send_frame`
//! directly. On any failure the caller's [`ChannelState`] is left untouched by
//! the individual protocol functions and cleared by [`authenticate`] itself,
//! so no partial session is ever observable.

use rand::RngCore;

use crate::consts;
use crate::crypto::{self, KeyType};
use crate::error::{AuthFailureCode, DesfireError};
use crate::exchange::send_frame;
use crate::framing::CommandSet;
use crate::secure_channel::{ChannelState, SecureChannel, SessionKeys};
use crate::status::StatusKind;
use crate::transport::Transport;

fn auth_err(code: AuthFailureCode) -> DesfireError {
    DesfireError::AuthFailure(code)
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// `sk`, keyed on `key_type`. 3TDEA and AES are each
/// self-contained 16-byte constructions, not appends onto the 2TDEA/DES
/// prefix - reading step 8 as cumulative would produce a 24+ byte key for
/// 3TDEA, contradicting `KeyType::session_key_length` (always 16 there).
fn derive_session_key_challenge(key_type: KeyType, rnd_a: &[u8], rnd_b: &[u8]) -> Vec<u8> {
    match key_type {
        KeyType::Des => [&rnd_a[0..4], &rnd_b[0..4]].concat(),
        KeyType::TwoTdea => [&rnd_a[0..4], &rnd_b[0..4], &rnd_a[4..8], &rnd_b[4..8]].concat(),
        KeyType::ThreeTdea => [&rnd_a[6..10], &rnd_b[6..10], &rnd_a[12..16], &rnd_b[12..16]].concat(),
        KeyType::Aes => [&rnd_a[0..4], &rnd_b[0..4], &rnd_a[12..16], &rnd_b[12..16]].concat(),
    }
}

/// Protocol selector: routes to ISO, EV1/d40, or EV2 by
/// `(command_set, target_channel)`. Clears `state` on any failure so no
/// partial session survives.
#[allow(clippy::too_many_arguments)]
pub fn authenticate(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    target_channel: SecureChannel,
    key_num: u8,
    key_type: KeyType,
    key: &[u8],
    app_level: bool,
    state: &mut ChannelState,
) -> Result<(), DesfireError> {
    let first_auth = !state.is_authenticated();
    let result = if command_set == CommandSet::Iso && target_channel != SecureChannel::Ev2 {
        authenticate_iso(transport, key_num, key_type, key, app_level, target_channel, state)
    } else {
        match target_channel {
            SecureChannel::D40 | SecureChannel::Ev1 => {
                authenticate_ev1(transport, command_set, target_channel, key_num, key_type, key, state)
            }
            SecureChannel::Ev2 => authenticate_ev2(transport, command_set, key_num, key, first_auth, state),
            SecureChannel::None => Err(auth_err(AuthFailureCode::NoMatchingProtocol)),
        }
    };
    if result.is_err() {
        state.clear();
    }
    result
}

/// Legacy d40 / EV1 challenge-response.
fn authenticate_ev1(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    channel: SecureChannel,
    key_num: u8,
    key_type: KeyType,
    key: &[u8],
    state: &mut ChannelState,
) -> Result<(), DesfireError> {
    let subcmd = match (channel, key_type) {
        (SecureChannel::D40, KeyType::Des | KeyType::TwoTdea | KeyType::ThreeTdea) => consts::AUTHENTICATE_LEGACY_INS,
        (SecureChannel::Ev1, KeyType::Des | KeyType::TwoTdea | KeyType::ThreeTdea) => consts::AUTHENTICATE_ISO_INS,
        (SecureChannel::Ev1, KeyType::Aes) => consts::AUTHENTICATE_AES_INS,
        _ => return Err(auth_err(AuthFailureCode::NoMatchingProtocol)),
    };
    let bs = key_type.block_size();

    let (status, enc_rnd_b) = send_frame(transport, command_set, subcmd, &[key_num], false)
        .map_err(|_| auth_err(AuthFailureCode::SendAuthenticate))?;
    if status.kind() != StatusKind::AdditionalFrame {
        return Err(auth_err(AuthFailureCode::ExpectAdditionalFrame));
    }
    if enc_rnd_b.len() != bs {
        return Err(auth_err(AuthFailureCode::RndBLength));
    }

    // Single block: ECB decrypt and "CBC decrypt with zero IV" coincide.
    let mut rnd_b = enc_rnd_b;
    crypto::ecb_decrypt_block(key_type, key, &mut rnd_b).map_err(|_| auth_err(AuthFailureCode::DecryptRndB))?;
    let rnd_b_rot = crypto::rol8(&rnd_b);

    let rnd_a = random_bytes(bs);
    let mut challenge = rnd_a.clone();
    challenge.extend_from_slice(&rnd_b_rot);
    let zero_iv = vec![0u8; bs];
    match channel {
        SecureChannel::D40 => crypto::d40_cbc_via_decrypt(key_type, key, &zero_iv, &mut challenge),
        _ => crypto::cbc_encrypt(key_type, key, &zero_iv, &mut challenge),
    }
    .map_err(|_| auth_err(AuthFailureCode::EncryptChallenge))?;

    let (status, enc_rnd_a_rot) = send_frame(transport, command_set, consts::ADDITIONAL_FRAME_INS, &challenge, false)
        .map_err(|_| auth_err(AuthFailureCode::SendChallenge))?;
    if status.kind() != StatusKind::OperationOk {
        return Err(auth_err(AuthFailureCode::ChallengeRejected));
    }
    if enc_rnd_a_rot.len() != bs {
        return Err(auth_err(AuthFailureCode::RndALength));
    }

    let mut rnd_a_rot = enc_rnd_a_rot;
    match channel {
        SecureChannel::D40 => crypto::d40_cbc_via_encrypt(key_type, key, &zero_iv, &mut rnd_a_rot),
        _ => crypto::cbc_decrypt(key_type, key, &zero_iv, &mut rnd_a_rot),
    }
    .map_err(|_| auth_err(AuthFailureCode::DecryptRndA))?;

    if rnd_a_rot != crypto::rol8(&rnd_a) {
        return Err(auth_err(AuthFailureCode::ChallengeMismatch));
    }

    let session_key = derive_session_key_challenge(key_type, &rnd_a, &rnd_b);
    state.channel = channel;
    state.key_type = key_type;
    state.keys = SessionKeys { enc: session_key.clone(), mac: session_key };
    state.ti = [0u8; 4];
    state.cmd_cntr = 0;
    state.reset_iv();
    Ok(())
}

/// ISO 7816 external/internal authenticate, used when
/// `command_set == Iso` and the target channel is d40 or EV1 - ISO here is
/// only an alternate envelope for the same challenge-response crypto as
/// [`authenticate_ev1`], never a separate secure-channel generation.
#[allow(clippy::too_many_arguments)]
fn authenticate_iso(
    transport: &mut dyn Transport,
    key_num: u8,
    key_type: KeyType,
    key: &[u8],
    app_level: bool,
    channel: SecureChannel,
    state: &mut ChannelState,
) -> Result<(), DesfireError> {
    let algo_ref = match key_type {
        KeyType::Des | KeyType::TwoTdea => consts::ISO_ALGO_REF_DES_2TDEA,
        KeyType::ThreeTdea => consts::ISO_ALGO_REF_3TDEA,
        KeyType::Aes => consts::ISO_ALGO_REF_AES,
    };
    let p2 = (if app_level { 0x80 } else { 0x00 }) | (key_num & 0x0F);
    let bs = key_type.block_size();
    let zero_iv = vec![0u8; bs];

    let get_challenge = [0x00, consts::ISO_GET_CHALLENGE_INS, 0x00, 0x00, bs as u8];
    let (rnd_b, sw) = transport
        .exchange_apdu(&get_challenge, false)
        .map_err(|_| auth_err(AuthFailureCode::IsoGetChallenge))?;
    if sw != [0x90, 0x00] {
        return Err(auth_err(AuthFailureCode::IsoGetChallenge));
    }
    if rnd_b.len() != bs {
        return Err(auth_err(AuthFailureCode::IsoChallengeLength));
    }

    let rnd_b_rot = crypto::rol8(&rnd_b);
    let rnd_a = random_bytes(bs);
    let mut cryptogram = rnd_a.clone();
    cryptogram.extend_from_slice(&rnd_b_rot);
    crypto::cbc_encrypt(key_type, key, &zero_iv, &mut cryptogram)
        .map_err(|_| auth_err(AuthFailureCode::EncryptChallenge))?;

    let mut external_auth = vec![0x00, consts::ISO_EXTERNAL_AUTHENTICATE_INS, algo_ref, p2, cryptogram.len() as u8];
    external_auth.extend_from_slice(&cryptogram);
    let (_, sw) = transport
        .exchange_apdu(&external_auth, false)
        .map_err(|_| auth_err(AuthFailureCode::IsoExternalAuthenticate))?;
    if sw != [0x90, 0x00] {
        return Err(auth_err(AuthFailureCode::IsoExternalAuthenticate));
    }

    let mut internal_auth = vec![0x00, consts::ISO_INTERNAL_AUTHENTICATE_INS, algo_ref, p2, rnd_a.len() as u8];
    internal_auth.extend_from_slice(&rnd_a);
    internal_auth.push(bs as u8);
    let (enc_rnd_a_rot, sw) = transport
        .exchange_apdu(&internal_auth, false)
        .map_err(|_| auth_err(AuthFailureCode::IsoInternalAuthenticate))?;
    if sw != [0x90, 0x00] {
        return Err(auth_err(AuthFailureCode::IsoInternalAuthenticate));
    }
    if enc_rnd_a_rot.len() != bs {
        return Err(auth_err(AuthFailureCode::IsoInternalAuthLength));
    }

    let mut rnd_a_rot = enc_rnd_a_rot;
    crypto::cbc_decrypt(key_type, key, &zero_iv, &mut rnd_a_rot)
        .map_err(|_| auth_err(AuthFailureCode::IsoDecryptResponse))?;
    if rnd_a_rot != crypto::rol8(&rnd_a) {
        return Err(auth_err(AuthFailureCode::IsoChallengeMismatch));
    }

    // `rnd_b` here plays the role step 8's formula calls RndB: the ISO flow
    // never encrypts it in transit, but it is the same quantity.
    let session_key = derive_session_key_challenge(key_type, &rnd_a, &rnd_b);
    state.channel = channel;
    state.key_type = key_type;
    state.keys = SessionKeys { enc: session_key.clone(), mac: session_key };
    state.ti = [0u8; 4];
    state.cmd_cntr = 0;
    state.reset_iv();
    Ok(())
}

/// EV2 first/non-first authenticate. Always AES-128.
fn authenticate_ev2(
    transport: &mut dyn Transport,
    command_set: CommandSet,
    key_num: u8,
    key: &[u8],
    first_auth: bool,
    state: &mut ChannelState,
) -> Result<(), DesfireError> {
    let subcmd = if first_auth { consts::AUTHENTICATE_EV2_FIRST_INS } else { consts::AUTHENTICATE_EV2_NONFIRST_INS };
    let payload: Vec<u8> = if first_auth { vec![key_num, 0x00] } else { vec![key_num] };
    let zero_iv = vec![0u8; 16];

    let (status, enc_rnd_b) = send_frame(transport, command_set, subcmd, &payload, false)
        .map_err(|_| auth_err(AuthFailureCode::SendAuthenticate))?;
    if status.kind() != StatusKind::AdditionalFrame {
        return Err(auth_err(AuthFailureCode::ExpectAdditionalFrame));
    }
    if enc_rnd_b.len() != 16 {
        return Err(auth_err(AuthFailureCode::RndBLength));
    }
    let mut rnd_b = enc_rnd_b;
    crypto::ecb_decrypt_block(KeyType::Aes, key, &mut rnd_b).map_err(|_| auth_err(AuthFailureCode::DecryptRndB))?;

    let rnd_b_rot = crypto::rol8(&rnd_b);
    let rnd_a = random_bytes(16);
    let mut challenge = rnd_a.clone();
    challenge.extend_from_slice(&rnd_b_rot);
    crypto::cbc_encrypt(KeyType::Aes, key, &zero_iv, &mut challenge)
        .map_err(|_| auth_err(AuthFailureCode::EncryptChallenge))?;

    let (status, enc_data) = send_frame(transport, command_set, consts::ADDITIONAL_FRAME_INS, &challenge, false)
        .map_err(|_| auth_err(AuthFailureCode::SendChallenge))?;
    if status.kind() != StatusKind::OperationOk {
        return Err(auth_err(AuthFailureCode::ChallengeRejected));
    }
    if enc_data.len() != 32 {
        return Err(auth_err(AuthFailureCode::RndALength));
    }
    let mut data = enc_data;
    crypto::cbc_decrypt(KeyType::Aes, key, &zero_iv, &mut data).map_err(|_| auth_err(AuthFailureCode::DecryptRndA))?;

    let (ti, cmd_cntr) = if first_auth {
        let ti: [u8; 4] = data[0..4].try_into().unwrap();
        if data[4..20] != crypto::rol8(&rnd_a)[..] {
            return Err(auth_err(AuthFailureCode::ChallengeMismatch));
        }
        (ti, 0u16)
    } else {
        if data[0..16] != crypto::rol8(&rnd_a)[..] {
            return Err(auth_err(AuthFailureCode::ChallengeMismatch));
        }
        (state.ti, state.cmd_cntr)
    };

    let mut rnd_a16 = [0u8; 16];
    rnd_a16.copy_from_slice(&rnd_a);
    let mut rnd_b16 = [0u8; 16];
    rnd_b16.copy_from_slice(&rnd_b);
    let sv1 = build_sv([0xA5, 0x5A], &rnd_a16, &rnd_b16);
    let sv2 = build_sv([0x5A, 0xA5], &rnd_a16, &rnd_b16);
    let session_key_enc =
        crypto::cmac(key, KeyType::Aes, &sv1).map_err(|_| auth_err(AuthFailureCode::DeriveSessionKey))?;
    let session_key_mac =
        crypto::cmac(key, KeyType::Aes, &sv2).map_err(|_| auth_err(AuthFailureCode::DeriveSessionKey))?;

    state.channel = SecureChannel::Ev2;
    state.key_type = KeyType::Aes;
    state.keys = SessionKeys { enc: session_key_enc, mac: session_key_mac };
    state.ti = ti;
    state.cmd_cntr = cmd_cntr;
    state.reset_iv();
    Ok(())
}

/// `SV1`/`SV2`: `prefix(2) || 00 01 00 80 ||
/// RndA[0..2] || (RndA[2..8] XOR RndB[0..6]) || RndB[6..16] || RndA[8..16]`.
fn build_sv(prefix: [u8; 2], rnd_a: &[u8; 16], rnd_b: &[u8; 16]) -> Vec<u8> {
    let mut sv = Vec::with_capacity(32);
    sv.extend_from_slice(&prefix);
    sv.extend_from_slice(&[0x00, 0x01, 0x00, 0x80]);
    sv.extend_from_slice(&rnd_a[0..2]);
    for i in 0..6 {
        sv.push(rnd_a[2 + i] ^ rnd_b[i]);
    }
    sv.extend_from_slice(&rnd_b[6..16]);
    sv.extend_from_slice(&rnd_a[8..16]);
    sv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_derivation_matches_known_lengths() {
        let rnd_a = (0u8..16).collect::<Vec<_>>();
        let rnd_b = (100u8..116).collect::<Vec<_>>();
        assert_eq!(derive_session_key_challenge(KeyType::Des, &rnd_a, &rnd_b).len(), 8);
        assert_eq!(derive_session_key_challenge(KeyType::TwoTdea, &rnd_a, &rnd_b).len(), 16);
        assert_eq!(derive_session_key_challenge(KeyType::ThreeTdea, &rnd_a, &rnd_b).len(), 16);
        assert_eq!(derive_session_key_challenge(KeyType::Aes, &rnd_a, &rnd_b).len(), 16);
    }

    #[test]
    fn build_sv_differs_only_in_prefix() {
        let rnd_a = [1u8; 16];
        let rnd_b = [2u8; 16];
        let sv1 = build_sv([0xA5, 0x5A], &rnd_a, &rnd_b);
        let sv2 = build_sv([0x5A, 0xA5], &rnd_a, &rnd_b);
        assert_eq!(sv1.len(), 32);
        assert_eq!(sv1[2..], sv2[2..]);
        assert_ne!(sv1[0..2], sv2[0..2]);
    }

    #[test]
    fn s1_ev1_aes_zero_key_session_key_matches_vector() {
        // RndA fixed, RndB all-zero.
        let rnd_a: Vec<u8> = vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16,
        ];
        let rnd_b = vec![0u8; 16];
        let sk = derive_session_key_challenge(KeyType::Aes, &rnd_a, &rnd_b);
        assert_eq!(
            sk,
            vec![0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x13, 0x14, 0x15, 0x16, 0x00, 0x00, 0x00, 0x00]
        );
    }
}
