//! # Wire constants
//!
//! The fixed instruction bytes and framing constants DESFire wire framing needs,
//! collected here the way `lr1120::status` collects its `IRQ_MASK_*`
//! constants - named once, used from every module that needs them instead
//! of being re-spelled as magic numbers at each call site.

/// `CLA` byte for the ISO 7816 wrap of native commands.
pub const ISO_WRAP_CLA: u8 = 0x90;
/// Continuation instruction for TX/RX chaining.
pub const ADDITIONAL_FRAME_INS: u8 = 0xAF;
/// Legacy/EV1 non-AES authenticate.
pub const AUTHENTICATE_LEGACY_INS: u8 = 0x0A;
/// EV1 ISO authenticate (DES/3DES over EV1 channel).
pub const AUTHENTICATE_ISO_INS: u8 = 0x1A;
/// EV1 AES authenticate.
pub const AUTHENTICATE_AES_INS: u8 = 0xAA;
/// EV2 first authentication.
pub const AUTHENTICATE_EV2_FIRST_INS: u8 = 0x71;
/// EV2 non-first (re-)authentication.
pub const AUTHENTICATE_EV2_NONFIRST_INS: u8 = 0x77;
/// Select application.
pub const SELECT_APPLICATION_INS: u8 = 0x5A;
/// Get free memory.
pub const GET_FREE_MEMORY_INS: u8 = 0x6E;

/// Maximum PCD→PICC payload per native/ISO frame.
pub const MAX_PCD_TO_PICC_PAYLOAD: usize = 54;

/// ISO 7816-4 GET CHALLENGE, used only by `crate::auth::authenticate_iso`.
pub const ISO_GET_CHALLENGE_INS: u8 = 0x84;
/// ISO 7816-4 EXTERNAL AUTHENTICATE.
pub const ISO_EXTERNAL_AUTHENTICATE_INS: u8 = 0x82;
/// ISO 7816-4 INTERNAL AUTHENTICATE.
pub const ISO_INTERNAL_AUTHENTICATE_INS: u8 = 0x88;

/// ISO key-reference algorithm tags, used as EXTERNAL/INTERNAL
/// AUTHENTICATE's `P1`.
pub const ISO_ALGO_REF_DES_2TDEA: u8 = 0x02;
pub const ISO_ALGO_REF_3TDEA: u8 = 0x04;
pub const ISO_ALGO_REF_AES: u8 = 0x09;

// The command surface names each operation but not its
// instruction byte; these are the standard NXP DESFire native opcodes
// (public, card-independent) rather than values derived from protocol internals.
pub const FORMAT_PICC_INS: u8 = 0xFC;
pub const GET_VERSION_INS: u8 = 0x60;
pub const GET_CARD_UID_INS: u8 = 0x51;
pub const GET_APPLICATION_IDS_INS: u8 = 0x6A;
pub const GET_DF_NAMES_INS: u8 = 0x6D;
pub const CREATE_APPLICATION_INS: u8 = 0xCA;
pub const DELETE_APPLICATION_INS: u8 = 0xDA;
pub const GET_KEY_SETTINGS_INS: u8 = 0x45;
pub const GET_KEY_VERSION_INS: u8 = 0x64;
pub const CHANGE_KEY_SETTINGS_INS: u8 = 0x54;
pub const CHANGE_KEY_INS: u8 = 0xC4;
pub const SET_CONFIGURATION_INS: u8 = 0x5C;
pub const CREATE_STD_DATA_FILE_INS: u8 = 0xCD;
pub const CREATE_BACKUP_DATA_FILE_INS: u8 = 0xCB;
pub const CREATE_VALUE_FILE_INS: u8 = 0xCC;
pub const CREATE_LINEAR_RECORD_FILE_INS: u8 = 0xC1;
pub const CREATE_CYCLIC_RECORD_FILE_INS: u8 = 0xC0;
pub const DELETE_FILE_INS: u8 = 0xDF;
pub const GET_FILE_IDS_INS: u8 = 0x6F;
pub const GET_FILE_SETTINGS_INS: u8 = 0xF5;
pub const CHANGE_FILE_SETTINGS_INS: u8 = 0x5F;
pub const READ_DATA_INS: u8 = 0xBD;
pub const WRITE_DATA_INS: u8 = 0x3D;
pub const GET_VALUE_INS: u8 = 0x6C;
pub const CREDIT_INS: u8 = 0x0C;
pub const DEBIT_INS: u8 = 0xDC;
pub const LIMITED_CREDIT_INS: u8 = 0x1C;
pub const WRITE_RECORD_INS: u8 = 0x3B;
pub const UPDATE_RECORD_INS: u8 = 0xDB;
pub const READ_RECORDS_INS: u8 = 0xBB;
pub const CLEAR_RECORD_FILE_INS: u8 = 0xEB;
pub const COMMIT_TRANSACTION_INS: u8 = 0xC7;
pub const ABORT_TRANSACTION_INS: u8 = 0xA7;

/// Record stride `GetDFNames` re-blocks its response into.
pub const DF_NAMES_RECORD_STRIDE: usize = 24;
