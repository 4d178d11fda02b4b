//! # File management commands
//!
//! `CreateStdDataFile`/`CreateBackupDataFile`/`CreateValueFile`/
//! `CreateLinearRecordFile`/`CreateCyclicRecordFile`, `DeleteFile`,
//! `GetFileIDs`, `GetFileSettings`, `ChangeFileSettings`.

use crate::consts;
use crate::context::DesfireContext;
use crate::error::DesfireError;
use crate::exchange::ExchangeFlags;
use crate::secure_channel::CommMode;
use crate::transport::Transport;
use crate::types::{AccessRights, FileSettings, FileType};

use super::{from_le3, le3};

/// Comm-mode tag byte carried inside `CreateXxxFile`/`ChangeFileSettings`
/// payloads (distinct from the `CommMode` the command itself is sent under).
fn comm_mode_byte(mode: CommMode) -> u8 {
    match mode {
        CommMode::Plain => 0x00,
        CommMode::Mac => 0x01,
        CommMode::Encrypted => 0x03,
    }
}

fn comm_mode_from_byte(b: u8) -> CommMode {
    match b & 0x03 {
        0x01 => CommMode::Mac,
        0x03 => CommMode::Encrypted,
        _ => CommMode::Plain,
    }
}

impl DesfireContext {
    #[allow(clippy::too_many_arguments)]
    fn create_file_fixed(
        &mut self,
        transport: &mut dyn Transport,
        ins: u8,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        file_size: u32,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no, comm_mode_byte(file_comm_mode)];
        payload.extend_from_slice(&access_rights.to_le_bytes());
        payload.extend_from_slice(&le3(file_size));
        self.exchange_raw(transport, ins, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn create_std_data_file(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        file_size: u32,
    ) -> Result<(), DesfireError> {
        self.create_file_fixed(transport, consts::CREATE_STD_DATA_FILE_INS, file_no, file_comm_mode, access_rights, file_size)
    }

    pub fn create_backup_data_file(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        file_size: u32,
    ) -> Result<(), DesfireError> {
        self.create_file_fixed(transport, consts::CREATE_BACKUP_DATA_FILE_INS, file_no, file_comm_mode, access_rights, file_size)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_value_file(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        lower_limit: i32,
        upper_limit: i32,
        initial_value: i32,
        limited_credit_enabled: bool,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no, comm_mode_byte(file_comm_mode)];
        payload.extend_from_slice(&access_rights.to_le_bytes());
        payload.extend_from_slice(&lower_limit.to_le_bytes());
        payload.extend_from_slice(&upper_limit.to_le_bytes());
        payload.extend_from_slice(&initial_value.to_le_bytes());
        payload.push(limited_credit_enabled as u8);
        self.exchange_raw(transport, consts::CREATE_VALUE_FILE_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_record_file(
        &mut self,
        transport: &mut dyn Transport,
        ins: u8,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        record_size: u32,
        max_records: u32,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no, comm_mode_byte(file_comm_mode)];
        payload.extend_from_slice(&access_rights.to_le_bytes());
        payload.extend_from_slice(&le3(record_size));
        payload.extend_from_slice(&le3(max_records));
        self.exchange_raw(transport, ins, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn create_linear_record_file(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        record_size: u32,
        max_records: u32,
    ) -> Result<(), DesfireError> {
        self.create_record_file(
            transport,
            consts::CREATE_LINEAR_RECORD_FILE_INS,
            file_no,
            file_comm_mode,
            access_rights,
            record_size,
            max_records,
        )
    }

    pub fn create_cyclic_record_file(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
        record_size: u32,
        max_records: u32,
    ) -> Result<(), DesfireError> {
        self.create_record_file(
            transport,
            consts::CREATE_CYCLIC_RECORD_FILE_INS,
            file_no,
            file_comm_mode,
            access_rights,
            record_size,
            max_records,
        )
    }

    pub fn delete_file(&mut self, transport: &mut dyn Transport, file_no: u8) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(transport, consts::DELETE_FILE_INS, &[file_no], self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn get_file_ids(&mut self, transport: &mut dyn Transport) -> Result<Vec<u8>, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_FILE_IDS_INS, &[], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        Ok(out)
    }

    pub fn get_file_settings(&mut self, transport: &mut dyn Transport, file_no: u8) -> Result<FileSettings, DesfireError> {
        let out = self
            .exchange_raw(transport, consts::GET_FILE_SETTINGS_INS, &[file_no], CommMode::Plain, ExchangeFlags::default())?
            .into_flat();
        if out.len() < 4 {
            return Err(DesfireError::CardExchange);
        }
        let file_type = match out[0] {
            0x00 => FileType::Standard,
            0x01 => FileType::Backup,
            0x02 => FileType::Value,
            0x03 => FileType::LinearRecord,
            0x04 => FileType::CyclicRecord,
            _ => return Err(DesfireError::CardExchange),
        };
        let comm_mode = comm_mode_from_byte(out[1]);
        let access_rights = AccessRights::from_le_bytes([out[2], out[3]]);
        let rest = &out[4..];
        let (file_size, value_limits, record_layout) = match file_type {
            FileType::Standard | FileType::Backup => (from_le3(rest)?, None, None),
            FileType::Value => {
                if rest.len() < 13 {
                    return Err(DesfireError::CardExchange);
                }
                let lower = super::from_le4(&rest[0..4])?;
                let upper = super::from_le4(&rest[4..8])?;
                let limited_credit = super::from_le4(&rest[8..12])?;
                (0, Some((lower, upper, limited_credit)), None)
            }
            FileType::LinearRecord | FileType::CyclicRecord => {
                if rest.len() < 9 {
                    return Err(DesfireError::CardExchange);
                }
                let record_size = from_le3(&rest[0..3])?;
                let max_records = from_le3(&rest[3..6])?;
                let current_records = from_le3(&rest[6..9])?;
                (0, None, Some((record_size, max_records, current_records)))
            }
        };
        Ok(FileSettings { file_type, comm_mode, access_rights, file_size, value_limits, record_layout })
    }

    pub fn change_file_settings(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        file_comm_mode: CommMode,
        access_rights: AccessRights,
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![comm_mode_byte(file_comm_mode)];
        payload.extend_from_slice(&access_rights.to_le_bytes());
        self.exchange_raw(
            transport,
            consts::CHANGE_FILE_SETTINGS_INS,
            &[&[file_no][..], &payload].concat(),
            CommMode::Encrypted,
            ExchangeFlags::default(),
        )?;
        Ok(())
    }
}
