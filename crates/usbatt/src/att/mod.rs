//! Attribute Protocol (ATT) implementation
//!
//! This module provides the client side of the ATT wire protocol: opcodes and
//! error codes, the PDU codec for every request, command and response the
//! connector speaks, and the USB framing wrapped around outbound PDUs.

pub mod constants;
pub mod error;
pub mod frame;
pub mod pdu;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::constants::*;
pub use self::error::{AttErrorCode, PduError, PduResult, RequestError};
pub use self::frame::UsbFrame;
pub use self::pdu::{
    AttCommand, AttPacket, AttRequest, AttResponse, AttributeData, ErrorResponse, GroupType,
    HandleValue, InboundPdu, ReadByGroupTypeResponse,
};
