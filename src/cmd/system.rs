//! # PICC/application/key management commands
//!
//! `FormatPICC`, `GetFreeMem`, `GetUID`, `GetAIDList`, `GetDFList`
//! (`split_by_size = 24`), `CreateApplication`, `DeleteApplication`,
//! `GetKeySettings`, `GetKeyVersion`, `ChangeKeySettings`, `ChangeKey`,
//! `SetConfiguration`.

use crate::consts;
use crate::context::DesfireContext;
use crate::crypto::{self, KeyType};
use crate::error::DesfireError;
use crate::exchange::ExchangeFlags;
use crate::secure_channel::{crc16_iso14443a, crc32_iso_hdlc, CommMode};
use crate::transport::Transport;
use crate::types::{Aid, PiccInfo};

use super::{from_le3, le3};

impl DesfireContext {
    /// `FormatPICC`: erase every application. Card master key
    /// authenticated.
    pub fn format_picc(&mut self, transport: &mut dyn Transport) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(transport, consts::FORMAT_PICC_INS, &[], self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    /// `GetFreeMem`: remaining EEPROM, 3-byte little-endian.
    pub fn get_free_mem(&mut self, transport: &mut dyn Transport) -> Result<u32, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_FREE_MEMORY_INS, &[], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        from_le3(&out)
    }

    /// `GetVersion`: hardware/software revision and free memory. Three chained frames on real silicon; chaining is
    /// transparent here.
    pub fn get_version(&mut self, transport: &mut dyn Transport) -> Result<PiccInfo, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_VERSION_INS, &[], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        if out.len() < 14 {
            return Err(DesfireError::CardExchange);
        }
        Ok(PiccInfo { free_memory_bytes: 0, hardware_version: (out[3], out[4]), software_version: (out[10], out[11]) })
    }

    /// `GetUID`: the card's real 7-byte UID (only meaningful when random ID
    /// is enabled and the session is authenticated).
    pub fn get_uid(&mut self, transport: &mut dyn Transport) -> Result<[u8; 7], DesfireError> {
        self.require_authenticated()?;
        let out = self
            .exchange_raw(transport, consts::GET_CARD_UID_INS, &[], CommMode::Encrypted, ExchangeFlags::default())?
            .into_flat();
        if out.len() < 7 {
            return Err(DesfireError::CardExchange);
        }
        let mut uid = [0u8; 7];
        uid.copy_from_slice(&out[..7]);
        Ok(uid)
    }

    /// `GetAIDList`: every application on the card, as a flat stream of
    /// 3-byte little-endian AIDs.
    pub fn get_aid_list(&mut self, transport: &mut dyn Transport) -> Result<Vec<Aid>, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_APPLICATION_IDS_INS, &[], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        out.chunks(3).filter(|c| c.len() == 3).map(|c| Ok(Aid::from_le_bytes([c[0], c[1], c[2]]))).collect()
    }

    /// `GetDFList`: AID + ISO DF name pairs, one fixed 24-byte record per
    /// application.
    pub fn get_df_list(&mut self, transport: &mut dyn Transport) -> Result<Vec<(Aid, String)>, DesfireError> {
        let flags = ExchangeFlags { split_by_size: consts::DF_NAMES_RECORD_STRIDE, ..ExchangeFlags::default() };
        let blocks = self
            .exchange_raw(transport, consts::GET_DF_NAMES_INS, &[], CommMode::Plain, flags)?
            .into_blocks();
        blocks
            .into_iter()
            .filter(|b| b.len() == consts::DF_NAMES_RECORD_STRIDE)
            .map(|b| {
                let aid = Aid::from_le_bytes([b[0], b[1], b[2]]);
                let name_end = b[3..].iter().position(|&c| c == 0).map(|p| 3 + p).unwrap_or(b.len());
                let name = String::from_utf8_lossy(&b[3..name_end]).into_owned();
                Ok((aid, name))
            })
            .collect()
    }

    /// `CreateApplication`. `key_type` selects the application's own master
    /// key algorithm (encoded in the high bit of the key-count byte for AES
    /// apps, per NXP's `CreateApplication` layout).
    pub fn create_application(
        &mut self,
        transport: &mut dyn Transport,
        aid: Aid,
        key_settings: u8,
        num_keys: u8,
        key_type: KeyType,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = le3(aid.value()).to_vec();
        payload.push(key_settings);
        let aes_flag = if key_type == KeyType::Aes { 0x80 } else { 0x00 };
        payload.push((num_keys & 0x0F) | aes_flag);
        self.exchange_raw(transport, consts::CREATE_APPLICATION_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn delete_application(&mut self, transport: &mut dyn Transport, aid: Aid) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let payload = le3(aid.value());
        self.exchange_raw(transport, consts::DELETE_APPLICATION_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    /// `GetKeySettings`: `(key_settings_byte, num_keys_byte)`.
    pub fn get_key_settings(&mut self, transport: &mut dyn Transport) -> Result<(u8, u8), DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_KEY_SETTINGS_INS, &[], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        if out.len() < 2 {
            return Err(DesfireError::CardExchange);
        }
        Ok((out[0], out[1]))
    }

    pub fn get_key_version(&mut self, transport: &mut dyn Transport, key_no: u8) -> Result<u8, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_KEY_VERSION_INS, &[key_no], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        out.first().copied().ok_or(DesfireError::CardExchange)
    }

    pub fn change_key_settings(&mut self, transport: &mut dyn Transport, new_settings: u8) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(
            transport,
            consts::CHANGE_KEY_SETTINGS_INS,
            &[new_settings],
            CommMode::Encrypted,
            ExchangeFlags::default(),
        )?;
        Ok(())
    }

    pub fn set_configuration(&mut self, transport: &mut dyn Transport, option: u8, data: &[u8]) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![option];
        payload.extend_from_slice(data);
        self.exchange_raw(transport, consts::SET_CONFIGURATION_INS, &payload, CommMode::Encrypted, ExchangeFlags::default())?;
        Ok(())
    }

    /// `ChangeKey`: the one command with non-trivial payload
    /// construction. `old_key` is required whenever `key_no` differs from
    /// the currently authenticated key (the new key material is XORed
    /// against it before transmission); `master_key_num` identifies the
    /// slot whose key-number byte carries the algorithm tag in its top two
    /// bits when changing the PICC/application master key.
    #[allow(clippy::too_many_arguments)]
    pub fn change_key(
        &mut self,
        transport: &mut dyn Transport,
        key_no: u8,
        new_key_type: KeyType,
        new_key: &[u8],
        new_key_version: u8,
        old_key: Option<&[u8]>,
        master_key_num: Option<u8>,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        if new_key.len() != new_key_type.raw_key_length() {
            return Err(DesfireError::InvalidArgument("new key length does not match new_key_type"));
        }
        let changing_other_key = key_no != self.key_num();
        if changing_other_key && old_key.is_none() {
            return Err(DesfireError::InvalidArgument("old_key required to change a different key slot"));
        }

        let mut key_no_byte = key_no;
        if let Some(mkn) = master_key_num {
            if key_no == mkn {
                let tag: u8 = match new_key_type {
                    KeyType::Des | KeyType::TwoTdea => 0b00,
                    KeyType::ThreeTdea => 0b01,
                    KeyType::Aes => 0b10,
                };
                key_no_byte |= tag << 6;
            }
        }

        let mut new_key_material = new_key.to_vec();
        if changing_other_key {
            let old = old_key.unwrap();
            let padded: Vec<u8> =
                if old.len() == 8 { crypto::duplicate_des_to_2tdea(old.try_into().unwrap()).to_vec() } else { old.to_vec() };
            for (i, b) in new_key_material.iter_mut().enumerate() {
                *b ^= padded[i % padded.len()];
            }
        }

        let mut plaintext = vec![key_no_byte];
        plaintext.extend_from_slice(&new_key_material);
        if new_key_type == KeyType::Aes {
            plaintext.push(new_key_version);
        }

        match self.secure_channel() {
            crate::secure_channel::SecureChannel::D40 => {
                let crc = crc16_iso14443a(&new_key_material);
                plaintext.extend_from_slice(&crc.to_le_bytes());
                if changing_other_key {
                    // Second CRC for the cross-key case, covering the same
                    // new-key material again; documented simplification.
                    plaintext.extend_from_slice(&crc.to_le_bytes());
                }
            }
            _ => {
                let mut header = vec![consts::CHANGE_KEY_INS, key_no_byte];
                header.extend_from_slice(&new_key_material);
                if new_key_type == KeyType::Aes {
                    header.push(new_key_version);
                }
                let crc = crc32_iso_hdlc(&header);
                plaintext.extend_from_slice(&crc.to_le_bytes());
            }
        }

        let cryptogram = self.raw_session_encrypt(&plaintext[1..])?;
        let mut wire_payload = vec![key_no_byte];
        wire_payload.extend_from_slice(&cryptogram);

        self.exchange_plain(transport, consts::CHANGE_KEY_INS, &wire_payload, ExchangeFlags::default())?;

        if !changing_other_key {
            self.clear_session();
        }
        Ok(())
    }
}
