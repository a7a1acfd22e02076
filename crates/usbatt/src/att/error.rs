//! Error handling for the ATT protocol
use super::constants::*;
use crate::error::TransportError;
use std::fmt;
use thiserror::Error;

/// ATT error codes carried in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    /// Invalid handle
    InvalidHandle,
    /// Read not permitted
    ReadNotPermitted,
    /// Write not permitted
    WriteNotPermitted,
    /// Invalid PDU
    InvalidPdu,
    /// Insufficient authentication
    InsufficientAuthentication,
    /// Request not supported
    RequestNotSupported,
    /// Invalid offset
    InvalidOffset,
    /// Insufficient authorization
    InsufficientAuthorization,
    /// Prepare queue full
    PrepareQueueFull,
    /// Attribute not found
    AttributeNotFound,
    /// Attribute not long
    AttributeNotLong,
    /// Insufficient encryption key size
    InsufficientEncryptionKeySize,
    /// Invalid attribute value length
    InvalidAttributeValueLength,
    /// Unlikely error
    Unlikely,
    /// Insufficient encryption
    InsufficientEncryption,
    /// Unsupported group type
    UnsupportedGroupType,
    /// Insufficient resources
    InsufficientResources,
    /// Database out of sync
    DatabaseOutOfSync,
    /// Value not allowed
    ValueNotAllowed,
    /// Application error (0x80-0x9F)
    ApplicationError(u8),
    /// Common profile error (0xE0-0xFF)
    CommonProfileError(u8),
    /// Reserved or vendor code
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_DATABASE_OUT_OF_SYNC => AttErrorCode::DatabaseOutOfSync,
            ATT_ERROR_VALUE_NOT_ALLOWED => AttErrorCode::ValueNotAllowed,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=ATT_ERROR_COMMON_PROFILE_ERROR_END => {
                AttErrorCode::CommonProfileError(code)
            }
            _ => AttErrorCode::Unknown(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::DatabaseOutOfSync => ATT_ERROR_DATABASE_OUT_OF_SYNC,
            AttErrorCode::ValueNotAllowed => ATT_ERROR_VALUE_NOT_ALLOWED,
            AttErrorCode::ApplicationError(code)
            | AttErrorCode::CommonProfileError(code)
            | AttErrorCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, u8::from(*self))
    }
}

/// Failure to encode or decode an ATT PDU or its USB frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PduError {
    #[error("PDU truncated: opcode 0x{opcode:02X} needs {needed} bytes, got {actual}")]
    Truncated { opcode: u8, needed: usize, actual: usize },

    #[error("Empty PDU")]
    Empty,

    #[error("Unexpected opcode 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    #[error("Unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Invalid UUID length: {0} (expected 2 or 16)")]
    InvalidUuidLength(usize),

    #[error("ATT PDU of {0} bytes does not fit the one-byte frame length")]
    FrameTooLong(usize),

    #[error("Frame length field says {declared} bytes, {actual} present")]
    LengthMismatch { declared: usize, actual: usize },
}

/// PDU codec result type
pub type PduResult<T> = Result<T, PduError>;

/// Outcome of a single transaction that did not succeed.
///
/// Delivered through the request's completion handler on a worker thread,
/// never returned from the call that enqueued the request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Failed to write request to the bulk-out endpoint: {0}")]
    SendFailed(#[source] TransportError),

    #[error("No response from server within the transaction timeout")]
    ReceiveTimeout,

    #[error("Server rejected request 0x{request_opcode:02X} on handle 0x{handle:04X}: {error_code}")]
    ServerError {
        /// Opcode the server actually answered with
        response_opcode: u8,
        /// Request opcode reported in error
        request_opcode: u8,
        /// Attribute handle in error
        handle: u16,
        /// Decoded error code
        error_code: AttErrorCode,
    },

    #[error("Connection closed while the request was in flight")]
    Cancelled,

    #[error("Request discarded before transmission")]
    Discarded,
}

impl RequestError {
    /// ATT error code, if the server produced this failure
    pub fn error_code(&self) -> Option<AttErrorCode> {
        match self {
            RequestError::ServerError { error_code, .. } => Some(*error_code),
            _ => None,
        }
    }

    /// Whether this failure was a transaction timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::ReceiveTimeout)
    }
}
