//! Tests for the ATT codec and USB framing

#[cfg(test)]
mod tests {
    use super::super::constants::*;
    use super::super::error::*;
    use super::super::frame::*;
    use super::super::pdu::*;

    #[test]
    fn test_read_request_boundary_handles() {
        let lowest = AttRequest::Read {
            handle: ATT_HANDLE_MIN,
        };
        assert_eq!(lowest.encode(), vec![ATT_READ_REQ, 0x01, 0x00]);

        let highest = AttRequest::Read {
            handle: ATT_HANDLE_MAX,
        };
        assert_eq!(highest.encode(), vec![ATT_READ_REQ, 0xFF, 0xFF]);

        // Decode back
        assert_eq!(AttRequest::decode(&highest.encode()).unwrap(), highest);
    }

    #[test]
    fn test_write_request_layout() {
        let request = AttRequest::Write {
            handle: 0x0203,
            value: vec![0xAA, 0xBB],
        };

        let bytes = request.encode();
        assert_eq!(bytes, vec![ATT_WRITE_REQ, 0x03, 0x02, 0xAA, 0xBB]);
        assert_eq!(AttRequest::decode(&bytes).unwrap(), request);
        assert_eq!(request.response_opcode(), ATT_WRITE_RSP);
    }

    #[test]
    fn test_read_by_group_type_uuid16() {
        let request = AttRequest::read_by_group_type(GroupType::PRIMARY_SERVICE);

        let bytes = request.encode();
        assert_eq!(
            bytes,
            vec![ATT_READ_BY_GROUP_TYPE_REQ, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]
        );
        assert_eq!(AttRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_read_by_group_type_uuid128() {
        let mut uuid = [0u8; 16];
        for (i, byte) in uuid.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let request = AttRequest::ReadByGroupType {
            start_handle: 0x0010,
            end_handle: 0x0020,
            group_type: GroupType::Uuid128(uuid),
        };

        let bytes = request.encode();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[..5], &[ATT_READ_BY_GROUP_TYPE_REQ, 0x10, 0x00, 0x20, 0x00]);
        assert_eq!(&bytes[5..], &uuid);
        assert_eq!(AttRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_group_type_invalid_width() {
        assert_eq!(
            GroupType::from_bytes(&[0x00, 0x28, 0x00]),
            Err(PduError::InvalidUuidLength(3))
        );

        // Request carrying a 4-byte type
        let bytes = [ATT_READ_BY_GROUP_TYPE_REQ, 0x01, 0x00, 0xFF, 0xFF, 1, 2, 3, 4];
        assert_eq!(
            AttRequest::decode(&bytes),
            Err(PduError::InvalidUuidLength(4))
        );
    }

    #[test]
    fn test_exchange_mtu() {
        let request = AttRequest::ExchangeMtu { client_mtu: 247 };
        assert_eq!(request.encode(), vec![ATT_EXCHANGE_MTU_REQ, 0xF7, 0x00]);

        let response = request
            .decode_response(&[ATT_EXCHANGE_MTU_RSP, 0x00, 0x02])
            .unwrap()
            .unwrap();
        assert_eq!(response, AttResponse::ExchangeMtu { server_mtu: 512 });
    }

    #[test]
    fn test_commands() {
        let command = AttCommand::Write {
            handle: 0x0021,
            value: vec![0x01, 0x00],
        };
        let bytes = command.encode();
        assert_eq!(bytes, vec![ATT_WRITE_CMD, 0x21, 0x00, 0x01, 0x00]);
        assert_eq!(AttCommand::decode(&bytes).unwrap(), command);

        assert_eq!(AttCommand::Confirmation.encode(), vec![ATT_HANDLE_VALUE_CONF]);
        assert_eq!(
            AttCommand::decode(&[ATT_HANDLE_VALUE_CONF]).unwrap(),
            AttCommand::Confirmation
        );
    }

    #[test]
    fn test_read_by_group_type_response_scenario() {
        let request = AttRequest::read_by_group_type(PRIMARY_SERVICE_UUID);
        let data = [0x11, 0x06, 0x01, 0x00, 0x05, 0x00, 0x00, 0x18];

        let response = request.decode_response(&data).unwrap().unwrap();
        let rsp = match response {
            AttResponse::ReadByGroupType(rsp) => rsp,
            other => panic!("unexpected response {:?}", other),
        };

        assert_eq!(rsp.attribute_data_length, 6);
        assert_eq!(rsp.attribute_data_list, vec![0x01, 0x00, 0x05, 0x00, 0x00, 0x18]);

        let entries = rsp.entries().unwrap();
        assert_eq!(
            entries,
            vec![AttributeData {
                handle: 0x0001,
                end_group_handle: 0x0005,
                value: vec![0x00, 0x18],
            }]
        );
    }

    #[test]
    fn test_group_entries_ignore_partial_tail() {
        let rsp = ReadByGroupTypeResponse {
            attribute_data_length: 6,
            attribute_data_list: vec![
                0x01, 0x00, 0x05, 0x00, 0x00, 0x18, // Generic Access
                0x06, 0x00, 0x09, 0x00, 0x01, 0x18, // Generic Attribute
                0x0A, 0x00, // partial
            ],
        };

        let entries = rsp.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].handle, 0x0006);
        assert_eq!(entries[1].end_group_handle, 0x0009);
        assert_eq!(entries[1].value, vec![0x01, 0x18]);

        // Entry size smaller than its own header
        let bad = ReadByGroupTypeResponse {
            attribute_data_length: 3,
            attribute_data_list: vec![0; 6],
        };
        assert!(bad.entries().is_err());
    }

    #[test]
    fn test_error_response_decoding() {
        let request = AttRequest::Read { handle: 0x0042 };
        let data = [ATT_ERROR_RSP, ATT_READ_REQ, 0x42, 0x00, ATT_ERROR_READ_NOT_PERMITTED];

        let error = request.decode_response(&data).unwrap().unwrap_err();
        assert_eq!(error.opcode, ATT_ERROR_RSP);
        assert_eq!(error.request_opcode, ATT_READ_REQ);
        assert_eq!(error.handle, 0x0042);
        assert_eq!(error.error_code, AttErrorCode::ReadNotPermitted);

        // Encode back
        assert_eq!(error.encode(), data.to_vec());
        assert_eq!(ErrorResponse::decode(&data).unwrap(), error);
    }

    #[test]
    fn test_unexpected_opcode_uses_error_layout() {
        // A Write Response arriving for a Read is read with the error layout
        let request = AttRequest::Read { handle: 0x0001 };
        let data = [ATT_WRITE_RSP, 0x0A, 0x34, 0x12, 0x0A];

        let error = request.decode_response(&data).unwrap().unwrap_err();
        assert_eq!(error.opcode, ATT_WRITE_RSP);
        assert_eq!(error.request_opcode, 0x0A);
        assert_eq!(error.handle, 0x1234);
        assert_eq!(error.error_code, AttErrorCode::AttributeNotFound);
    }

    #[test]
    fn test_short_responses_are_malformed() {
        let request = AttRequest::Read { handle: 0x0001 };

        // Too short for the error layout
        assert_eq!(
            request.decode_response(&[ATT_ERROR_RSP, 0x0A, 0x01]),
            Err(PduError::Truncated {
                opcode: ATT_ERROR_RSP,
                needed: ERROR_RSP_LEN,
                actual: 3,
            })
        );
        assert_eq!(request.decode_response(&[]), Err(PduError::Empty));

        // MTU response missing its second byte
        let mtu = AttRequest::ExchangeMtu { client_mtu: 23 };
        assert!(mtu.decode_response(&[ATT_EXCHANGE_MTU_RSP, 0x17]).is_err());

        // Read By Group Type response without its length byte
        let rbgt = AttRequest::read_by_group_type(GroupType::PRIMARY_SERVICE);
        assert!(rbgt.decode_response(&[ATT_READ_BY_GROUP_TYPE_RSP]).is_err());
    }

    #[test]
    fn test_empty_read_response() {
        let request = AttRequest::Read { handle: 0x0003 };
        let response = request.decode_response(&[ATT_READ_RSP]).unwrap().unwrap();
        assert_eq!(response, AttResponse::Read { value: Vec::new() });
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(AttErrorCode::from(0x01), AttErrorCode::InvalidHandle);
        assert_eq!(AttErrorCode::from(0x13), AttErrorCode::ValueNotAllowed);
        assert_eq!(AttErrorCode::from(0x85), AttErrorCode::ApplicationError(0x85));
        assert_eq!(AttErrorCode::from(0xFD), AttErrorCode::CommonProfileError(0xFD));
        assert_eq!(AttErrorCode::from(0x42), AttErrorCode::Unknown(0x42));

        for code in 0u8..=0xFF {
            assert_eq!(u8::from(AttErrorCode::from(code)), code);
        }
    }

    #[test]
    fn test_inbound_classification() {
        let indication = HandleValue::new(0x000E, vec![0x01, 0x02]).to_indication();
        assert_eq!(indication, vec![ATT_HANDLE_VALUE_IND, 0x0E, 0x00, 0x01, 0x02]);
        assert_eq!(
            InboundPdu::parse(&indication).unwrap(),
            InboundPdu::Indication(HandleValue::new(0x000E, vec![0x01, 0x02]))
        );

        let notification = HandleValue::new(0xFFFF, Vec::new()).to_notification();
        assert_eq!(
            InboundPdu::parse(&notification).unwrap(),
            InboundPdu::Notification(HandleValue::new(0xFFFF, Vec::new()))
        );

        let error = [ATT_ERROR_RSP, 0x0A, 0x01, 0x00, 0x0A];
        assert_eq!(InboundPdu::parse(&error).unwrap(), InboundPdu::Response(&error));

        assert_eq!(InboundPdu::parse(&[0x7F]), Err(PduError::UnknownOpcode(0x7F)));
        assert_eq!(InboundPdu::parse(&[]), Err(PduError::Empty));

        // Notification without a full handle
        assert!(InboundPdu::parse(&[ATT_HANDLE_VALUE_NTF, 0x01]).is_err());
    }

    #[test]
    fn test_frame_layout() {
        let request = AttRequest::Read { handle: 0x0003 };
        let frame = UsbFrame::from_packet(0x09, &request).unwrap();

        assert_eq!(frame.report_id(), 0x09);
        assert_eq!(frame.opcode(), ATT_READ_REQ);
        assert_eq!(frame.to_bytes(), vec![0x09, 0x03, ATT_READ_REQ, 0x03, 0x00]);

        let parsed = UsbFrame::parse(&frame.to_bytes()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_frame_limits() {
        // 255-byte PDU still fits
        let largest = AttRequest::Write {
            handle: 0x0001,
            value: vec![0x55; 252],
        };
        let frame = UsbFrame::from_packet(DEFAULT_REPORT_ID, &largest).unwrap();
        assert_eq!(frame.to_bytes()[1], 0xFF);
        assert_eq!(frame.to_bytes().len(), 257);

        let too_large = AttRequest::Write {
            handle: 0x0001,
            value: vec![0x55; 253],
        };
        assert_eq!(
            UsbFrame::from_packet(DEFAULT_REPORT_ID, &too_large),
            Err(PduError::FrameTooLong(256))
        );

        assert_eq!(UsbFrame::new(0, Vec::new()), Err(PduError::Empty));
        assert_eq!(
            UsbFrame::parse(&[0x00, 0x05, ATT_READ_REQ, 0x01]),
            Err(PduError::LengthMismatch {
                declared: 5,
                actual: 2,
            })
        );
    }
}
