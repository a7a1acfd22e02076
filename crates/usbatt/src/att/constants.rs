//! ATT Protocol constants

// ATT opcode values
pub const ATT_ERROR_RSP: u8 = 0x01;
pub const ATT_EXCHANGE_MTU_REQ: u8 = 0x02;
pub const ATT_EXCHANGE_MTU_RSP: u8 = 0x03;
pub const ATT_FIND_INFO_RSP: u8 = 0x05;
pub const ATT_FIND_BY_TYPE_VALUE_RSP: u8 = 0x07;
pub const ATT_READ_BY_TYPE_RSP: u8 = 0x09;
pub const ATT_READ_REQ: u8 = 0x0A;
pub const ATT_READ_RSP: u8 = 0x0B;
pub const ATT_READ_BLOB_RSP: u8 = 0x0D;
pub const ATT_READ_MULTIPLE_RSP: u8 = 0x0F;
pub const ATT_READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
pub const ATT_READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
pub const ATT_WRITE_REQ: u8 = 0x12;
pub const ATT_WRITE_RSP: u8 = 0x13;
pub const ATT_PREPARE_WRITE_RSP: u8 = 0x17;
pub const ATT_EXECUTE_WRITE_RSP: u8 = 0x19;
pub const ATT_HANDLE_VALUE_NTF: u8 = 0x1B;
pub const ATT_HANDLE_VALUE_IND: u8 = 0x1D;
pub const ATT_HANDLE_VALUE_CONF: u8 = 0x1E;
pub const ATT_WRITE_CMD: u8 = 0x52;

/// Every opcode a server may send back to complete a client transaction.
pub const ATT_RESPONSE_OPCODES: [u8; 12] = [
    ATT_ERROR_RSP,
    ATT_EXCHANGE_MTU_RSP,
    ATT_FIND_INFO_RSP,
    ATT_FIND_BY_TYPE_VALUE_RSP,
    ATT_READ_BY_TYPE_RSP,
    ATT_READ_RSP,
    ATT_READ_BLOB_RSP,
    ATT_READ_MULTIPLE_RSP,
    ATT_READ_BY_GROUP_TYPE_RSP,
    ATT_WRITE_RSP,
    ATT_PREPARE_WRITE_RSP,
    ATT_EXECUTE_WRITE_RSP,
];

// ATT error codes
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERROR_READ_NOT_PERMITTED: u8 = 0x02;
pub const ATT_ERROR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERROR_INVALID_PDU: u8 = 0x04;
pub const ATT_ERROR_INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
pub const ATT_ERROR_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const ATT_ERROR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERROR_INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
pub const ATT_ERROR_PREPARE_QUEUE_FULL: u8 = 0x09;
pub const ATT_ERROR_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
pub const ATT_ERROR_ATTRIBUTE_NOT_LONG: u8 = 0x0B;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE: u8 = 0x0C;
pub const ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;
pub const ATT_ERROR_UNLIKELY: u8 = 0x0E;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
pub const ATT_ERROR_UNSUPPORTED_GROUP_TYPE: u8 = 0x10;
pub const ATT_ERROR_INSUFFICIENT_RESOURCES: u8 = 0x11;
pub const ATT_ERROR_DATABASE_OUT_OF_SYNC: u8 = 0x12;
pub const ATT_ERROR_VALUE_NOT_ALLOWED: u8 = 0x13;
pub const ATT_ERROR_APPLICATION_ERROR_START: u8 = 0x80;
pub const ATT_ERROR_APPLICATION_ERROR_END: u8 = 0x9F;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_START: u8 = 0xE0;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_END: u8 = 0xFF;

// ATT handle values
pub const ATT_HANDLE_MIN: u16 = 0x0001;
pub const ATT_HANDLE_MAX: u16 = 0xFFFF;

// ATT MTU
pub const ATT_DEFAULT_MTU: u16 = 23;

// USB framing: report id (1) + ATT PDU length (1)
pub const FRAME_HEADER_SIZE: usize = 2;
pub const FRAME_MAX_ATT_LEN: usize = u8::MAX as usize;
pub const DEFAULT_REPORT_ID: u8 = 0x00;

// Fixed PDU sizes, opcode included
pub const ERROR_RSP_LEN: usize = 5;
pub const HANDLE_VALUE_HEADER_LEN: usize = 3;
pub const EXCHANGE_MTU_LEN: usize = 3;
pub const READ_BY_GROUP_TYPE_RSP_HEADER_LEN: usize = 2;
/// Handle (2) + end group handle (2); the value fills the rest of an entry.
pub const GROUP_ENTRY_HEADER_LEN: usize = 4;

// Grouping attribute types
pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const SECONDARY_SERVICE_UUID: u16 = 0x2801;
