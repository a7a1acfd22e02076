//! ATT PDU codec
//!
//! Every PDU the connector sends or receives is one of a handful of closed sum
//! types. Each variant knows its opcode, how to lay itself out on the wire and
//! how to read itself back. Multi-byte fields are little-endian. Inbound PDUs
//! start at the opcode byte; the USB frame header lives in [`super::frame`].
use super::constants::*;
use super::error::{AttErrorCode, PduError, PduResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

/// ATT packet formats
pub trait AttPacket: Sized {
    /// Opcode this packet is sent with
    fn opcode(&self) -> u8;

    /// Parse packet from bytes, opcode first
    fn decode(data: &[u8]) -> PduResult<Self>;

    /// Serialize packet to bytes, opcode first
    fn encode(&self) -> Vec<u8>;
}

fn ensure_len(data: &[u8], needed: usize) -> PduResult<()> {
    match data.first() {
        None => Err(PduError::Empty),
        Some(&opcode) if data.len() < needed => Err(PduError::Truncated {
            opcode,
            needed,
            actual: data.len(),
        }),
        Some(_) => Ok(()),
    }
}

fn read_u16(data: &[u8], offset: usize) -> PduResult<u16> {
    ensure_len(data, offset + 2)?;
    let mut cursor = Cursor::new(&data[offset..]);
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| PduError::Truncated {
            opcode: data[0],
            needed: offset + 2,
            actual: data.len(),
        })
}

fn expect_opcode(data: &[u8], expected: u8) -> PduResult<()> {
    match data.first() {
        None => Err(PduError::Empty),
        Some(&actual) if actual != expected => Err(PduError::UnexpectedOpcode { expected, actual }),
        Some(_) => Ok(()),
    }
}

/// Attribute group type, 2 or 16 octets on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupType {
    /// 16-bit SIG-assigned UUID
    Uuid16(u16),
    /// Full 128-bit UUID, little-endian byte order
    Uuid128([u8; 16]),
}

impl GroupType {
    /// Primary Service declaration (0x2800)
    pub const PRIMARY_SERVICE: GroupType = GroupType::Uuid16(PRIMARY_SERVICE_UUID);

    /// Secondary Service declaration (0x2801)
    pub const SECONDARY_SERVICE: GroupType = GroupType::Uuid16(SECONDARY_SERVICE_UUID);

    /// Read a group type from its wire bytes
    pub fn from_bytes(bytes: &[u8]) -> PduResult<Self> {
        match bytes.len() {
            2 => Ok(GroupType::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Ok(GroupType::Uuid128(uuid))
            }
            len => Err(PduError::InvalidUuidLength(len)),
        }
    }

    /// Wire representation
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            GroupType::Uuid16(uuid) => uuid.to_le_bytes().to_vec(),
            GroupType::Uuid128(uuid) => uuid.to_vec(),
        }
    }

    /// Number of octets on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            GroupType::Uuid16(_) => 2,
            GroupType::Uuid128(_) => 16,
        }
    }
}

impl From<u16> for GroupType {
    fn from(uuid: u16) -> Self {
        GroupType::Uuid16(uuid)
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupType::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            GroupType::Uuid128(uuid) => write!(
                f,
                "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                uuid[15], uuid[14], uuid[13], uuid[12],
                uuid[11], uuid[10],
                uuid[9], uuid[8],
                uuid[7], uuid[6],
                uuid[5], uuid[4], uuid[3], uuid[2], uuid[1], uuid[0]
            ),
        }
    }
}

/// A request that expects exactly one response from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttRequest {
    /// Read the value of one attribute
    Read {
        /// Attribute handle
        handle: u16,
    },
    /// Write the value of one attribute and wait for the Write Response
    Write {
        /// Attribute handle
        handle: u16,
        /// New value
        value: Vec<u8>,
    },
    /// Read grouping attributes of a given type within a handle range
    ReadByGroupType {
        /// First requested handle
        start_handle: u16,
        /// Last requested handle
        end_handle: u16,
        /// Grouping attribute type
        group_type: GroupType,
    },
    /// Announce our receive MTU and learn the server's
    ExchangeMtu {
        /// Client Rx MTU
        client_mtu: u16,
    },
}

impl AttRequest {
    /// Read By Group Type across the whole handle space (0x0001-0xFFFF)
    pub fn read_by_group_type(group_type: impl Into<GroupType>) -> Self {
        AttRequest::ReadByGroupType {
            start_handle: ATT_HANDLE_MIN,
            end_handle: ATT_HANDLE_MAX,
            group_type: group_type.into(),
        }
    }

    /// Opcode of the response that completes this request successfully
    pub fn response_opcode(&self) -> u8 {
        match self {
            AttRequest::Read { .. } => ATT_READ_RSP,
            AttRequest::Write { .. } => ATT_WRITE_RSP,
            AttRequest::ReadByGroupType { .. } => ATT_READ_BY_GROUP_TYPE_RSP,
            AttRequest::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_RSP,
        }
    }

    /// Short human-readable name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            AttRequest::Read { .. } => "read request",
            AttRequest::Write { .. } => "write request",
            AttRequest::ReadByGroupType { .. } => "read by group type request",
            AttRequest::ExchangeMtu { .. } => "exchange mtu request",
        }
    }

    /// Decode the server's answer to this request.
    ///
    /// The expected success opcode yields `Ok(Ok(response))`. Any other opcode
    /// is read with the Error Response layout and yields `Ok(Err(error))`.
    /// Only byte sequences too short for the layout they are read with fail.
    pub fn decode_response(&self, data: &[u8]) -> PduResult<Result<AttResponse, ErrorResponse>> {
        let opcode = *data.first().ok_or(PduError::Empty)?;
        if opcode == self.response_opcode() {
            AttResponse::decode(data).map(Ok)
        } else {
            ErrorResponse::decode_any(data).map(Err)
        }
    }
}

impl AttPacket for AttRequest {
    fn opcode(&self) -> u8 {
        match self {
            AttRequest::Read { .. } => ATT_READ_REQ,
            AttRequest::Write { .. } => ATT_WRITE_REQ,
            AttRequest::ReadByGroupType { .. } => ATT_READ_BY_GROUP_TYPE_REQ,
            AttRequest::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_REQ,
        }
    }

    fn decode(data: &[u8]) -> PduResult<Self> {
        let opcode = *data.first().ok_or(PduError::Empty)?;
        match opcode {
            ATT_READ_REQ => Ok(AttRequest::Read {
                handle: read_u16(data, 1)?,
            }),
            ATT_WRITE_REQ => Ok(AttRequest::Write {
                handle: read_u16(data, 1)?,
                value: data[3..].to_vec(),
            }),
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let start_handle = read_u16(data, 1)?;
                let end_handle = read_u16(data, 3)?;
                // Opcode + two handles + at least a 16-bit UUID
                ensure_len(data, 7)?;
                let group_type = GroupType::from_bytes(&data[5..])?;

                Ok(AttRequest::ReadByGroupType {
                    start_handle,
                    end_handle,
                    group_type,
                })
            }
            ATT_EXCHANGE_MTU_REQ => Ok(AttRequest::ExchangeMtu {
                client_mtu: read_u16(data, 1)?,
            }),
            other => Err(PduError::UnknownOpcode(other)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            AttRequest::Read { handle } => {
                let mut packet = Vec::with_capacity(3);
                packet.push(self.opcode());
                packet.extend_from_slice(&handle.to_le_bytes());
                packet
            }
            AttRequest::Write { handle, value } => {
                let mut packet = Vec::with_capacity(3 + value.len());
                packet.push(self.opcode());
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.extend_from_slice(value);
                packet
            }
            AttRequest::ReadByGroupType {
                start_handle,
                end_handle,
                group_type,
            } => {
                let mut packet = Vec::with_capacity(5 + group_type.encoded_len());
                packet.push(self.opcode());
                packet.extend_from_slice(&start_handle.to_le_bytes());
                packet.extend_from_slice(&end_handle.to_le_bytes());
                packet.extend_from_slice(&group_type.to_bytes());
                packet
            }
            AttRequest::ExchangeMtu { client_mtu } => {
                let mut packet = Vec::with_capacity(EXCHANGE_MTU_LEN);
                packet.push(self.opcode());
                packet.extend_from_slice(&client_mtu.to_le_bytes());
                packet
            }
        }
    }
}

/// A PDU sent without any response correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttCommand {
    /// Write Command: the server never answers, not even with an error
    Write {
        /// Attribute handle
        handle: u16,
        /// New value
        value: Vec<u8>,
    },
    /// Handle Value Confirmation acknowledging an indication
    Confirmation,
}

impl AttPacket for AttCommand {
    fn opcode(&self) -> u8 {
        match self {
            AttCommand::Write { .. } => ATT_WRITE_CMD,
            AttCommand::Confirmation => ATT_HANDLE_VALUE_CONF,
        }
    }

    fn decode(data: &[u8]) -> PduResult<Self> {
        let opcode = *data.first().ok_or(PduError::Empty)?;
        match opcode {
            ATT_WRITE_CMD => Ok(AttCommand::Write {
                handle: read_u16(data, 1)?,
                value: data[3..].to_vec(),
            }),
            ATT_HANDLE_VALUE_CONF => Ok(AttCommand::Confirmation),
            other => Err(PduError::UnknownOpcode(other)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            AttCommand::Write { handle, value } => {
                let mut packet = Vec::with_capacity(3 + value.len());
                packet.push(self.opcode());
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.extend_from_slice(value);
                packet
            }
            AttCommand::Confirmation => vec![self.opcode()],
        }
    }
}

/// One entry of a Read By Group Type Response data list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    /// Attribute handle
    pub handle: u16,
    /// Group end handle
    pub end_group_handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Group Type Response, kept close to the wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    /// Size of each entry in the data list
    pub attribute_data_length: u8,
    /// Raw attribute data list
    pub attribute_data_list: Vec<u8>,
}

impl ReadByGroupTypeResponse {
    /// Split the raw data list into entries.
    ///
    /// Trailing bytes that do not make up a whole entry are ignored.
    pub fn entries(&self) -> PduResult<Vec<AttributeData>> {
        let length = self.attribute_data_length as usize;
        if length < GROUP_ENTRY_HEADER_LEN {
            return Err(PduError::Truncated {
                opcode: ATT_READ_BY_GROUP_TYPE_RSP,
                needed: GROUP_ENTRY_HEADER_LEN,
                actual: length,
            });
        }

        let mut entries = Vec::with_capacity(self.attribute_data_list.len() / length);
        for chunk in self.attribute_data_list.chunks_exact(length) {
            let mut cursor = Cursor::new(chunk);
            // chunks_exact guarantees at least GROUP_ENTRY_HEADER_LEN bytes
            let handle = cursor.read_u16::<LittleEndian>().unwrap_or_default();
            let end_group_handle = cursor.read_u16::<LittleEndian>().unwrap_or_default();

            entries.push(AttributeData {
                handle,
                end_group_handle,
                value: chunk[GROUP_ENTRY_HEADER_LEN..].to_vec(),
            });
        }

        Ok(entries)
    }
}

/// Successful answer to an [`AttRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttResponse {
    /// Read Response
    Read {
        /// Attribute value
        value: Vec<u8>,
    },
    /// Write Response
    Write,
    /// Read By Group Type Response
    ReadByGroupType(ReadByGroupTypeResponse),
    /// Exchange MTU Response
    ExchangeMtu {
        /// Server Rx MTU
        server_mtu: u16,
    },
}

impl AttPacket for AttResponse {
    fn opcode(&self) -> u8 {
        match self {
            AttResponse::Read { .. } => ATT_READ_RSP,
            AttResponse::Write => ATT_WRITE_RSP,
            AttResponse::ReadByGroupType(_) => ATT_READ_BY_GROUP_TYPE_RSP,
            AttResponse::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_RSP,
        }
    }

    fn decode(data: &[u8]) -> PduResult<Self> {
        let opcode = *data.first().ok_or(PduError::Empty)?;
        match opcode {
            ATT_READ_RSP => Ok(AttResponse::Read {
                value: data[1..].to_vec(),
            }),
            ATT_WRITE_RSP => Ok(AttResponse::Write),
            ATT_READ_BY_GROUP_TYPE_RSP => {
                ensure_len(data, READ_BY_GROUP_TYPE_RSP_HEADER_LEN)?;
                Ok(AttResponse::ReadByGroupType(ReadByGroupTypeResponse {
                    attribute_data_length: data[1],
                    attribute_data_list: data[READ_BY_GROUP_TYPE_RSP_HEADER_LEN..].to_vec(),
                }))
            }
            ATT_EXCHANGE_MTU_RSP => Ok(AttResponse::ExchangeMtu {
                server_mtu: read_u16(data, 1)?,
            }),
            other => Err(PduError::UnknownOpcode(other)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            AttResponse::Read { value } => {
                let mut packet = Vec::with_capacity(1 + value.len());
                packet.push(self.opcode());
                packet.extend_from_slice(value);
                packet
            }
            AttResponse::Write => vec![self.opcode()],
            AttResponse::ReadByGroupType(rsp) => {
                let mut packet = Vec::with_capacity(
                    READ_BY_GROUP_TYPE_RSP_HEADER_LEN + rsp.attribute_data_list.len(),
                );
                packet.push(self.opcode());
                packet.push(rsp.attribute_data_length);
                packet.extend_from_slice(&rsp.attribute_data_list);
                packet
            }
            AttResponse::ExchangeMtu { server_mtu } => {
                let mut packet = Vec::with_capacity(EXCHANGE_MTU_LEN);
                packet.push(self.opcode());
                packet.extend_from_slice(&server_mtu.to_le_bytes());
                packet
            }
        }
    }
}

/// Error Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode the PDU arrived with (0x01 for a genuine Error Response)
    pub opcode: u8,
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    /// Error code
    pub error_code: AttErrorCode,
}

impl ErrorResponse {
    /// Create a genuine Error Response
    pub fn new(request_opcode: u8, handle: u16, error_code: AttErrorCode) -> Self {
        Self {
            opcode: ATT_ERROR_RSP,
            request_opcode,
            handle,
            error_code,
        }
    }

    /// Read the Error Response layout regardless of the leading opcode
    pub fn decode_any(data: &[u8]) -> PduResult<Self> {
        ensure_len(data, ERROR_RSP_LEN)?;
        Ok(Self {
            opcode: data[0],
            request_opcode: data[1],
            handle: read_u16(data, 2)?,
            error_code: data[4].into(),
        })
    }
}

impl AttPacket for ErrorResponse {
    fn opcode(&self) -> u8 {
        self.opcode
    }

    fn decode(data: &[u8]) -> PduResult<Self> {
        expect_opcode(data, ATT_ERROR_RSP)?;
        Self::decode_any(data)
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ERROR_RSP_LEN);
        packet.push(self.opcode);
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

/// Attribute handle and value pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    /// Handle of the attribute
    pub handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl HandleValue {
    /// Create a new handle/value pair
    pub fn new(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            value: value.into(),
        }
    }

    fn decode_with(data: &[u8], opcode: u8) -> PduResult<Self> {
        expect_opcode(data, opcode)?;
        ensure_len(data, HANDLE_VALUE_HEADER_LEN)?;
        Ok(Self {
            handle: read_u16(data, 1)?,
            value: data[HANDLE_VALUE_HEADER_LEN..].to_vec(),
        })
    }

    fn encode_with(&self, opcode: u8) -> Vec<u8> {
        let mut packet = Vec::with_capacity(HANDLE_VALUE_HEADER_LEN + self.value.len());
        packet.push(opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }

    /// Encode as a Handle Value Notification
    pub fn to_notification(&self) -> Vec<u8> {
        self.encode_with(ATT_HANDLE_VALUE_NTF)
    }

    /// Encode as a Handle Value Indication
    pub fn to_indication(&self) -> Vec<u8> {
        self.encode_with(ATT_HANDLE_VALUE_IND)
    }
}

/// Classification of a PDU received on an inbound endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPdu<'a> {
    /// Answer to the pending request; decoded against it by the slot
    Response(&'a [u8]),
    /// Handle Value Indication
    Indication(HandleValue),
    /// Handle Value Notification
    Notification(HandleValue),
}

impl<'a> InboundPdu<'a> {
    /// Route an inbound PDU by its opcode
    pub fn parse(data: &'a [u8]) -> PduResult<Self> {
        let opcode = *data.first().ok_or(PduError::Empty)?;
        match opcode {
            ATT_HANDLE_VALUE_IND => Ok(InboundPdu::Indication(HandleValue::decode_with(
                data,
                ATT_HANDLE_VALUE_IND,
            )?)),
            ATT_HANDLE_VALUE_NTF => Ok(InboundPdu::Notification(HandleValue::decode_with(
                data,
                ATT_HANDLE_VALUE_NTF,
            )?)),
            op if ATT_RESPONSE_OPCODES.contains(&op) => Ok(InboundPdu::Response(data)),
            other => Err(PduError::UnknownOpcode(other)),
        }
    }
}
