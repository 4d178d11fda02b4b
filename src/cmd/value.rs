//! # Value-file and transaction commands
//!
//! `GetValue`, `Credit`, `Debit`, `LimitedCredit`, `CommitTransaction`,
//! `AbortTransaction`. Amounts are 4-byte little-endian signed.

use crate::consts;
use crate::context::DesfireContext;
use crate::error::DesfireError;
use crate::exchange::ExchangeFlags;
use crate::transport::Transport;

use super::{from_le4, le4};

impl DesfireContext {
    pub fn get_value(&mut self, transport: &mut dyn Transport, file_no: u8) -> Result<i32, DesfireError> {
        self.require_authenticated()?;
        let out = self
            .exchange_raw(transport, consts::GET_VALUE_INS, &[file_no], self.comm_mode(), ExchangeFlags::default())?
            .into_flat();
        from_le4(&out)
    }

    fn value_op(&mut self, transport: &mut dyn Transport, ins: u8, file_no: u8, amount: i32) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        let mut payload = vec![file_no];
        payload.extend_from_slice(&le4(amount));
        self.exchange_raw(transport, ins, &payload, self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn credit(&mut self, transport: &mut dyn Transport, file_no: u8, amount: i32) -> Result<(), DesfireError> {
        self.value_op(transport, consts::CREDIT_INS, file_no, amount)
    }

    pub fn debit(&mut self, transport: &mut dyn Transport, file_no: u8, amount: i32) -> Result<(), DesfireError> {
        self.value_op(transport, consts::DEBIT_INS, file_no, amount)
    }

    pub fn limited_credit(&mut self, transport: &mut dyn Transport, file_no: u8, amount: i32) -> Result<(), DesfireError> {
        self.value_op(transport, consts::LIMITED_CREDIT_INS, file_no, amount)
    }

    pub fn commit_transaction(&mut self, transport: &mut dyn Transport) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(transport, consts::COMMIT_TRANSACTION_INS, &[], self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }

    pub fn abort_transaction(&mut self, transport: &mut dyn Transport) -> Result<(), DesfireError> {
        self.require_authenticated()?;
        self.exchange_raw(transport, consts::ABORT_TRANSACTION_INS, &[], self.comm_mode(), ExchangeFlags::default())?;
        Ok(())
    }
}
