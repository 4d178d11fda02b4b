//! # Data-file and record-file I/O
//!
//! `ReadData`, `WriteData`, `ReadRecords`, `WriteRecord`, `UpdateRecord`,
//! `ClearRecordFile`. Offsets/lengths/record counts are 3-byte
//! little-endian; the `comm_mode` a given file requires is the caller's
//! responsibility.

use crate::consts;
use crate::context::DesfireContext;
use crate::error::DesfireError;
use crate::exchange::ExchangeFlags;
use crate::transport::Transport;

use super::le3;

impl DesfireContext {
    pub fn read_data(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le3(offset));
        payload.extend_from_slice(&le3(length));
        let out = self.exchange_raw(transport, consts::READ_DATA_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(out.into_flat())
    }

    pub fn write_data(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le3(offset));
        payload.extend_from_slice(&le3(data.len() as u32));
        payload.extend_from_slice(data);
        self.exchange_raw(transport, consts::WRITE_DATA_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn read_records(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        offset_record: u32,
        num_records: u32,
    ) -> Result<Vec<u8>, DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le3(offset_record));
        payload.extend_from_slice(&le3(num_records));
        let out = self.exchange_raw(transport, consts::READ_RECORDS_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(out.into_flat())
    }

    pub fn write_record(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le3(offset));
        payload.extend_from_slice(&le3(data.len() as u32));
        payload.extend_from_slice(data);
        self.exchange_raw(transport, consts::WRITE_RECORD_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    /// `UpdateRecord`: overwrite an already-committed record in place,
    /// same `[file_no, offset(3), length(3), data]` framing as `WriteRecord`.
    pub fn update_record(
        &mut self,
        transport: &mut dyn Transport,
        file_no: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le3(offset));
        payload.extend_from_slice(&le3(data.len() as u32));
        payload.extend_from_slice(data);
        self.exchange_raw(transport, consts::UPDATE_RECORD_INS, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn clear_record_file(&mut self, transport: &mut dyn Transport, file_no: u8) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(transport, consts::CLEAR_RECORD_FILE_INS, &[file_no], self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }
}
