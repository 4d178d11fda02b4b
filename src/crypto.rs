//! # Crypto primitives façade
//!
//! Uniform `{encrypt, decrypt, CBC, CMAC subkeys}` over the four key
//! algorithms DESFire cards speak: single-DES, 2-key 3DES ("2TDEA"), 3-key
//! 3DES ("3TDEA") and AES-128. Everything above this module (the secure
//! channel codec, the authentication protocols) is written against
//! [`KeyType`] and the free functions here, never against a concrete cipher
//! type directly - a tagged variant with a capability set, not a cascade
//! of if/else, lives entirely in this file.
//!
//! ## Available functions
//!
//! - [`cbc_encrypt`] / [`cbc_decrypt`] - CBC over any of the four ciphers.
//! - [`ecb_encrypt_block`] / [`ecb_decrypt_block`] - single-block, no
//!   chaining; used by the legacy d40 authentication quirk and by the EV2
//!   session-IV derivation (`AES_ENC` of one block).
//! - [`cmac_subkeys`] - NIST SP 800-38B K1/K2 derivation.
//! - [`kdf_an10922`] - NXP AN10922 key diversification.

use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cipher::{generic_array::GenericArray, BlockCipher, BlockDecrypt, BlockEncrypt, KeyInit};
use des::{Des, TdesEde2, TdesEde3};
use zeroize::Zeroize;

use crate::error::DesfireError;

/// The four key algorithms a DESFire PICC key slot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Des,
    TwoTdea,
    ThreeTdea,
    Aes,
}

impl KeyType {
    /// Logical challenge/session-IV/CMAC block size: 8 bytes for DES and
    /// 2TDEA, 16 for 3TDEA and AES. For 3TDEA this is twice the underlying
    /// cipher's actual physical block (still 8 bytes, like every DES-family
    /// variant) - the CBC/ECB helpers in this module account for that
    /// themselves, so callers outside this module never need the physical
    /// size directly.
    pub fn block_size(self) -> usize {
        match self {
            KeyType::Des | KeyType::TwoTdea => 8,
            KeyType::ThreeTdea | KeyType::Aes => 16,
        }
    }

    /// Raw key material length expected in `DesfireContext::key`.
    pub fn raw_key_length(self) -> usize {
        match self {
            KeyType::Des => 8,
            KeyType::TwoTdea | KeyType::Aes => 16,
            KeyType::ThreeTdea => 24,
        }
    }

    /// Session-key length produced by authentication: always
    /// 16 bytes for every 3DES flavour and for AES, 8 only for plain DES -
    /// DESFire silicon never derives a 24-byte 3DES session key even from a
    /// 3-key master key.
    pub fn session_key_length(self) -> usize {
        match self {
            KeyType::Des => 8,
            KeyType::TwoTdea | KeyType::ThreeTdea | KeyType::Aes => 16,
        }
    }
}

/// Materialise an 8-byte single-DES key as a 16-byte 2TDEA key by
/// duplicating its halves (`K || K`), matching the DES↔2TDEA
/// normalisation rule.
pub fn duplicate_des_to_2tdea(key: &[u8; 8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(key);
    out[8..].copy_from_slice(key);
    out
}

/// True if a 16-byte 3DES session key's two halves are equal, i.e. it is
/// degenerate single-DES wearing a 2TDEA hat. Downstream code (secure
/// channel codec) uses this to pick the cheaper single-DES path.
pub fn session_key_halves_equal(session_key: &[u8]) -> bool {
    session_key.len() == 16 && session_key[..8] == session_key[8..]
}

macro_rules! dispatch_block_size {
    ($key_type:expr, $des:expr, $tdea2:expr, $tdea3:expr, $aes:expr) => {
        match $key_type {
            KeyType::Des => $des,
            KeyType::TwoTdea => $tdea2,
            KeyType::ThreeTdea => $tdea3,
            KeyType::Aes => $aes,
        }
    };
}

fn key_len_error() -> DesfireError {
    DesfireError::InvalidArgument("key length does not match key_type")
}

/// Encrypt `data` in place with CBC using `iv` as the initial chaining
/// value. `data.len()` must be a multiple of `key_type.block_size()`.
pub fn cbc_encrypt(key_type: KeyType, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError> {
    if data.len() % key_type.block_size() != 0 {
        return Err(DesfireError::InvalidArgument("data not block-aligned"));
    }
    dispatch_block_size!(
        key_type,
        cbc_encrypt_with::<Des>(key, iv, data)?,
        cbc_encrypt_with::<TdesEde2>(key, iv, data)?,
        cbc_encrypt_with::<TdesEde3>(key, iv, data)?,
        cbc_encrypt_with::<aes::Aes128>(key, iv, data)?
    );
    Ok(())
}

/// Decrypt `data` in place with CBC using `iv` as the initial chaining
/// value.
pub fn cbc_decrypt(key_type: KeyType, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError> {
    if data.len() % key_type.block_size() != 0 {
        return Err(DesfireError::InvalidArgument("data not block-aligned"));
    }
    dispatch_block_size!(
        key_type,
        cbc_decrypt_with::<Des>(key, iv, data)?,
        cbc_decrypt_with::<TdesEde2>(key, iv, data)?,
        cbc_decrypt_with::<TdesEde3>(key, iv, data)?,
        cbc_decrypt_with::<aes::Aes128>(key, iv, data)?
    );
    Ok(())
}

/// `iv` may be sized to `KeyType::block_size()` (the logical session/challenge
/// unit, e.g. 16 bytes for 3TDEA), which can be longer than `C`'s actual
/// physical cipher block (8 bytes for every DES-family variant). CBC chains
/// at the physical granularity, so only the trailing physical-block-sized
/// slice of `iv` is the real initial chaining value - for DES/2TDEA/AES,
/// logical and physical sizes coincide and this is the whole `iv`.
fn cbc_encrypt_with<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockEncrypt + KeyInit,
{
    let bs = c_block_size::<C>();
    let iv = &iv[iv.len().saturating_sub(bs)..];
    let mut enc = cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| key_len_error())?;
    for block in data.chunks_mut(bs) {
        let ga = GenericArray::from_mut_slice(block);
        enc.encrypt_block_mut(ga);
    }
    Ok(())
}

fn cbc_decrypt_with<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockDecrypt + KeyInit,
{
    let bs = c_block_size::<C>();
    let iv = &iv[iv.len().saturating_sub(bs)..];
    let mut dec = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| key_len_error())?;
    for block in data.chunks_mut(bs) {
        let ga = GenericArray::from_mut_slice(block);
        dec.decrypt_block_mut(ga);
    }
    Ok(())
}

fn c_block_size<C: BlockCipher>() -> usize {
    use cipher::generic_array::typenum::Unsigned;
    C::BlockSize::to_usize()
}

/// Encrypt one logical `key_type` block (8/16 bytes depending on
/// `key_type`). For 3TDEA this spans two of the cipher's physical 8-byte
/// blocks, chained with a zero IV; every other key type is exactly one
/// physical block, where that chaining degenerates to plain ECB. Used by
/// the EV2 session-IV derivation and by the legacy d40 authentication quirk.
pub fn ecb_encrypt_block(key_type: KeyType, key: &[u8], block: &mut [u8]) -> Result<(), DesfireError> {
    dispatch_block_size!(
        key_type,
        ecb_encrypt_block_with::<Des>(key, block)?,
        ecb_encrypt_block_with::<TdesEde2>(key, block)?,
        ecb_encrypt_block_with::<TdesEde3>(key, block)?,
        ecb_encrypt_block_with::<aes::Aes128>(key, block)?
    );
    Ok(())
}

/// Decrypt one logical `key_type` block; see [`ecb_encrypt_block`].
pub fn ecb_decrypt_block(key_type: KeyType, key: &[u8], block: &mut [u8]) -> Result<(), DesfireError> {
    dispatch_block_size!(
        key_type,
        ecb_decrypt_block_with::<Des>(key, block)?,
        ecb_decrypt_block_with::<TdesEde2>(key, block)?,
        ecb_decrypt_block_with::<TdesEde3>(key, block)?,
        ecb_decrypt_block_with::<aes::Aes128>(key, block)?
    );
    Ok(())
}

/// `block` is one logical `KeyType` block, which for 3TDEA is two of
/// `C`'s physical 8-byte blocks. Chaining those with a zero initial vector
/// is exactly "CBC with a zero IV", the same equivalence the legacy
/// challenge-response already leans on for its single-physical-block key
/// types - this just extends it to 3TDEA's two-block case instead of
/// assuming every logical block fits in one physical cipher call.
fn ecb_encrypt_block_with<C>(key: &[u8], block: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockEncrypt + KeyInit,
{
    let bs = c_block_size::<C>();
    let zero_iv = vec![0u8; bs];
    cbc_encrypt_with::<C>(key, &zero_iv, block)
}

fn ecb_decrypt_block_with<C>(key: &[u8], block: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockDecrypt + KeyInit,
{
    let bs = c_block_size::<C>();
    let zero_iv = vec![0u8; bs];
    cbc_decrypt_with::<C>(key, &zero_iv, block)
}

/// Full, untruncated one-shot CMAC (NIST SP 800-38B) over `data`. EV2 uses
/// this directly (its MAC is never chained across commands); EV1's chained
/// per-command CMAC reimplements the same block loop with a carried IV
/// (`crate::secure_channel::ChannelState::ev1_cmac_update`).
pub fn cmac(key: &[u8], key_type: KeyType, data: &[u8]) -> Result<Vec<u8>, DesfireError> {
    let bs = key_type.block_size();
    let (k1, k2) = cmac_subkeys(key, key_type)?;
    let mut input = data.to_vec();
    let complete = !input.is_empty() && input.len() % bs == 0;
    if !complete {
        input.push(0x80);
        while input.len() % bs != 0 {
            input.push(0x00);
        }
    }
    let subkey = if complete { &k1 } else { &k2 };
    let n = input.len() / bs;
    let mut iv = vec![0u8; bs];
    for (i, block) in input.chunks_mut(bs).enumerate() {
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        if i + 1 == n {
            for (b, v) in block.iter_mut().zip(subkey.iter()) {
                *b ^= v;
            }
        }
        ecb_encrypt_block(key_type, key, block)?;
        iv.copy_from_slice(block);
    }
    Ok(iv)
}

/// d40's "send" (host→PICC) direction: CBC chaining built from the block
/// cipher's *decrypt* primitive instead of encrypt, the legacy MIFARE
/// convention legacy MIFARE silicon uses (hardware that only ever implements
/// decrypt). DES/2TDEA/3TDEA only; d40 never carries an AES key.
pub fn d40_cbc_via_decrypt(key_type: KeyType, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError> {
    if data.len() % key_type.block_size() != 0 {
        return Err(DesfireError::InvalidArgument("data not block-aligned"));
    }
    match key_type {
        KeyType::Des => d40_send_with::<Des>(key, iv, data),
        KeyType::TwoTdea => d40_send_with::<TdesEde2>(key, iv, data),
        KeyType::ThreeTdea => d40_send_with::<TdesEde3>(key, iv, data),
        KeyType::Aes => Err(DesfireError::InvalidArgument("d40 channel never carries an AES key")),
    }
}

/// d40's "receive" (PICC→host) direction: CBC dechaining built from the
/// block cipher's *encrypt* primitive instead of decrypt (the mirror image
/// of [`d40_cbc_via_decrypt`]).
pub fn d40_cbc_via_encrypt(key_type: KeyType, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError> {
    if data.len() % key_type.block_size() != 0 {
        return Err(DesfireError::InvalidArgument("data not block-aligned"));
    }
    match key_type {
        KeyType::Des => d40_receive_with::<Des>(key, iv, data),
        KeyType::TwoTdea => d40_receive_with::<TdesEde2>(key, iv, data),
        KeyType::ThreeTdea => d40_receive_with::<TdesEde3>(key, iv, data),
        KeyType::Aes => Err(DesfireError::InvalidArgument("d40 channel never carries an AES key")),
    }
}

fn d40_send_with<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockDecrypt + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| key_len_error())?;
    let bs = c_block_size::<C>();
    let mut chain = iv[iv.len().saturating_sub(bs)..].to_vec();
    for block in data.chunks_mut(bs) {
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        let ga = GenericArray::from_mut_slice(block);
        cipher.decrypt_block(ga);
        chain.copy_from_slice(block);
    }
    Ok(())
}

fn d40_receive_with<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), DesfireError>
where
    C: BlockCipher + BlockEncrypt + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| key_len_error())?;
    let bs = c_block_size::<C>();
    let mut chain = iv[iv.len().saturating_sub(bs)..].to_vec();
    for block in data.chunks_mut(bs) {
        let ciphertext = block.to_vec();
        let ga = GenericArray::from_mut_slice(block);
        cipher.encrypt_block(ga);
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        chain = ciphertext;
    }
    Ok(())
}

/// NIST SP 800-38B subkey derivation (K1, K2), generic over the block size
/// of `key_type`. For AES that's the textbook CMAC subkey step; for the
/// DES family it is the equivalent construction over a 64-bit block.
pub fn cmac_subkeys(session_key: &[u8], key_type: KeyType) -> Result<(Vec<u8>, Vec<u8>), DesfireError> {
    let bs = key_type.block_size();
    let mut zero = vec![0u8; bs];
    ecb_encrypt_block(key_type, session_key, &mut zero)?;
    let k1 = gf_double(&zero, bs);
    let k2 = gf_double(&k1, bs);
    zero.zeroize();
    Ok((k1, k2))
}

/// Left-shift by one bit and conditionally XOR the irreducible polynomial,
/// per SP 800-38B's `dbl` operation. `bs` is 8 (R_64 = 0x1B) or 16
/// (R_128 = 0x87).
fn gf_double(input: &[u8], bs: usize) -> Vec<u8> {
    let msb_set = input[0] & 0x80 != 0;
    let mut out = vec![0u8; bs];
    let mut carry = 0u8;
    for i in (0..bs).rev() {
        let v = (input[i] << 1) | carry;
        carry = (input[i] & 0x80 != 0) as u8;
        out[i] = v;
    }
    if msb_set {
        let r = if bs == 8 { 0x1B } else { 0x87 };
        out[bs - 1] ^= r;
    }
    out
}

/// Left-rotate a buffer by one byte: `ROL8`.
pub fn rol8(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[1..]);
    out.push(data[0]);
    out
}

/// AN10922 key diversification: derive a key from `key` using `input`
/// (at most 31 bytes).
///
/// The construction pads `input` with `0x80` then zero bytes up to one
/// block, runs CMAC over it with the diversification key's own subkeys,
/// and uses that as the derived key (truncated/expanded to the key's
/// natural length).
pub fn kdf_an10922(key: &[u8], key_type: KeyType, input: &[u8]) -> Result<Vec<u8>, DesfireError> {
    if input.len() > 31 {
        return Err(DesfireError::InvalidArgument("AN10922 input exceeds 31 bytes"));
    }
    let bs = key_type.block_size();
    let (k1, k2) = cmac_subkeys(key, key_type)?;
    let mut padded = input.to_vec();
    let needs_pad = padded.len() % bs != 0 || padded.is_empty();
    if needs_pad {
        padded.push(0x80);
        while padded.len() % bs != 0 {
            padded.push(0x00);
        }
    }
    let subkey = if needs_pad { &k2 } else { &k1 };
    let mut iv = vec![0u8; bs];
    let mut blocks = padded;
    let n = blocks.len() / bs;
    for (i, block) in blocks.chunks_mut(bs).enumerate() {
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        if i + 1 == n {
            for (b, v) in block.iter_mut().zip(subkey.iter()) {
                *b ^= v;
            }
        }
        ecb_encrypt_block(key_type, key, block)?;
        iv.copy_from_slice(block);
    }
    let derived = iv;
    let want = key_type.raw_key_length();
    if derived.len() >= want {
        Ok(derived[..want].to_vec())
    } else {
        // Extend by re-encrypting (OMAC-style counter) - unreachable for the
        // key types in scope (8/16 derived vs <=16 raw) but kept total.
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes_match_key_type_table() {
        assert_eq!(KeyType::Des.block_size(), 8);
        assert_eq!(KeyType::TwoTdea.block_size(), 8);
        assert_eq!(KeyType::ThreeTdea.block_size(), 16);
        assert_eq!(KeyType::Aes.block_size(), 16);
    }

    #[test]
    fn session_key_lengths_match_key_type_table() {
        assert_eq!(KeyType::Des.session_key_length(), 8);
        assert_eq!(KeyType::TwoTdea.session_key_length(), 16);
        assert_eq!(KeyType::ThreeTdea.session_key_length(), 16);
        assert_eq!(KeyType::Aes.session_key_length(), 16);
    }

    #[test]
    fn des_duplicates_into_2tdea() {
        let key = [0x11u8; 8];
        let doubled = duplicate_des_to_2tdea(&key);
        assert!(session_key_halves_equal(&doubled));
    }

    #[test]
    fn aes_cbc_round_trips() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut data = [1u8; 32];
        let plain = data;
        cbc_encrypt(KeyType::Aes, &key, &iv, &mut data).unwrap();
        assert_ne!(data, plain);
        cbc_decrypt(KeyType::Aes, &key, &iv, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn aes_cmac_subkeys_are_distinct_from_zero_key() {
        let key = [0u8; 16];
        let (k1, k2) = cmac_subkeys(&key, KeyType::Aes).unwrap();
        assert_ne!(k1, vec![0u8; 16]);
        assert_ne!(k1, k2);
    }

    #[test]
    fn three_tdea_cbc_round_trips() {
        let key = [0x11u8; 24];
        let iv = [0u8; 16];
        let mut data = [2u8; 32];
        let plain = data;
        cbc_encrypt(KeyType::ThreeTdea, &key, &iv, &mut data).unwrap();
        assert_ne!(data, plain);
        cbc_decrypt(KeyType::ThreeTdea, &key, &iv, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn three_tdea_ecb_block_round_trips() {
        let key = [0x22u8; 24];
        let mut block = [5u8; 16];
        let plain = block;
        ecb_encrypt_block(KeyType::ThreeTdea, &key, &mut block).unwrap();
        assert_ne!(block, plain);
        ecb_decrypt_block(KeyType::ThreeTdea, &key, &mut block).unwrap();
        assert_eq!(block, plain);
    }

    #[test]
    fn three_tdea_cmac_subkeys_do_not_panic() {
        let key = [0x33u8; 24];
        let (k1, k2) = cmac_subkeys(&key, KeyType::ThreeTdea).unwrap();
        assert_eq!(k1.len(), 16);
        assert_eq!(k2.len(), 16);
        assert_ne!(k1, k2);
    }

    #[test]
    fn three_tdea_d40_quirk_round_trips() {
        let key = [0x44u8; 24];
        let iv = [0u8; 16];
        let plaintext = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let mut buf = plaintext;
        d40_cbc_via_decrypt(KeyType::ThreeTdea, &key, &iv, &mut buf).unwrap();
        d40_cbc_via_encrypt(KeyType::ThreeTdea, &key, &iv, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn rol8_rotates_left_by_one_byte() {
        let data = [1, 2, 3, 4];
        assert_eq!(rol8(&data), vec![2, 3, 4, 1]);
    }
}
