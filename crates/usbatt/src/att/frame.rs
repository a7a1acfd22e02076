//! USB framing of outbound ATT PDUs
//!
//! ```text
//! offset 0      1          2        3..
//!        report | att len  | opcode | body (little-endian fields)
//! ```
//!
//! The length byte counts everything from offset 2 onward, so an ATT PDU may
//! be at most 255 bytes long once framed.
use super::constants::*;
use super::error::{PduError, PduResult};
use super::pdu::AttPacket;

/// One outbound frame: a report id wrapped around an ATT PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbFrame {
    /// Transport framing tag
    report_id: u8,
    /// ATT PDU, opcode first
    pdu: Vec<u8>,
}

impl UsbFrame {
    /// Wrap an already encoded ATT PDU
    pub fn new(report_id: u8, pdu: Vec<u8>) -> PduResult<Self> {
        if pdu.is_empty() {
            return Err(PduError::Empty);
        }
        if pdu.len() > FRAME_MAX_ATT_LEN {
            return Err(PduError::FrameTooLong(pdu.len()));
        }
        Ok(Self { report_id, pdu })
    }

    /// Encode a packet and wrap it
    pub fn from_packet<P: AttPacket>(report_id: u8, packet: &P) -> PduResult<Self> {
        Self::new(report_id, packet.encode())
    }

    /// Transport framing tag
    pub fn report_id(&self) -> u8 {
        self.report_id
    }

    /// ATT PDU, opcode first
    pub fn pdu(&self) -> &[u8] {
        &self.pdu
    }

    /// ATT opcode carried by this frame
    pub fn opcode(&self) -> u8 {
        // Never empty once constructed
        self.pdu[0]
    }

    /// Serialize to the bytes written on the bulk-out endpoint
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + self.pdu.len());
        bytes.push(self.report_id);
        // Length checked on construction
        bytes.push(self.pdu.len() as u8);
        bytes.extend_from_slice(&self.pdu);
        bytes
    }

    /// Parse bytes as written on the bulk-out endpoint
    pub fn parse(bytes: &[u8]) -> PduResult<Self> {
        if bytes.len() <= FRAME_HEADER_SIZE {
            return Err(PduError::Empty);
        }

        let declared = bytes[1] as usize;
        let actual = bytes.len() - FRAME_HEADER_SIZE;
        if declared != actual {
            return Err(PduError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            report_id: bytes[0],
            pdu: bytes[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}
