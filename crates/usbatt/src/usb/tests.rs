//! Tests for the USB device model and the mock backend

#[cfg(test)]
mod tests {
    use super::super::device::*;
    use super::super::mock::*;
    use super::super::transport::*;
    use crate::att::{AttPacket, AttRequest, UsbFrame};
    use crate::error::{ConnectorError, TransportError};
    use std::time::Duration;

    fn endpoint(address: u8, transfer_type: TransferType, direction: Direction) -> UsbEndpoint {
        UsbEndpoint::new(address, transfer_type, direction, 64)
    }

    #[test]
    fn test_endpoint_kinds() {
        assert_eq!(
            endpoint(0x81, TransferType::Bulk, Direction::In).kind(),
            EndpointKinds::BULK_IN
        );
        assert_eq!(
            endpoint(0x83, TransferType::Interrupt, Direction::In).kind(),
            EndpointKinds::INTERRUPT_IN
        );
        assert!(endpoint(0x00, TransferType::Control, Direction::Out)
            .kind()
            .is_empty());
    }

    #[test]
    fn test_resolve_dongle() {
        let device = MockHost::dongle("/dev/bus/usb/001/004");
        let map = EndpointMap::resolve(&device);

        assert_eq!(map.bulk_out.as_ref().unwrap().endpoint.address, MOCK_BULK_OUT);
        assert_eq!(map.bulk_in.as_ref().unwrap().endpoint.address, MOCK_BULK_IN);
        assert_eq!(map.interrupt_in.as_ref().unwrap().interface, 1);
        assert!(map.interrupt_out.is_none());

        assert_eq!(
            map.kinds(),
            EndpointKinds::BULK_IN | EndpointKinds::BULK_OUT | EndpointKinds::INTERRUPT_IN
        );
        assert!(map.require_input().is_ok());

        // Bulk out and bulk in share interface 0
        assert_eq!(map.interfaces_to_claim(), vec![0, 1]);
    }

    #[test]
    fn test_resolve_without_inbound_endpoint() {
        let device = UsbDevice {
            name: "out-only".into(),
            vendor_id: 0x1234,
            product_id: 0x0001,
            product_name: None,
            interfaces: vec![UsbInterface {
                number: 0,
                class: 0xFF,
                endpoints: vec![endpoint(0x02, TransferType::Bulk, Direction::Out)],
            }],
        };

        let map = EndpointMap::resolve(&device);
        assert_eq!(map.kinds(), EndpointKinds::BULK_OUT);
        assert!(matches!(
            map.require_input(),
            Err(ConnectorError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_interrupt_only() {
        let device = UsbDevice {
            name: "hid".into(),
            vendor_id: 0x1234,
            product_id: 0x0002,
            product_name: None,
            interfaces: vec![UsbInterface {
                number: 2,
                class: 0x03,
                endpoints: vec![endpoint(0x84, TransferType::Interrupt, Direction::In)],
            }],
        };

        let map = EndpointMap::resolve(&device);
        assert!(map.require_input().is_ok());
        assert!(map.bulk_out.is_none());
        assert_eq!(map.interfaces_to_claim(), vec![2]);
    }

    #[test]
    fn test_device_filter() {
        let device = MockHost::dongle("dongle");
        assert!(device.matches(None, None));
        assert!(device.matches(Some(0x0A12), None));
        assert!(device.matches(Some(0x0A12), Some(0x4010)));
        assert!(!device.matches(Some(0x0A12), Some(0x4011)));
        assert!(!device.matches(Some(0xFFFF), None));
    }

    #[test]
    fn test_mock_host_open_rules() {
        let device = MockHost::dongle("dongle");
        let host = MockHost::new();

        // Not attached
        assert!(matches!(
            host.open(&device),
            Err(TransportError::DeviceNotFound(_))
        ));

        host.attach(device.clone());
        assert!(!host.has_permission(&device));
        assert!(matches!(
            host.open(&device),
            Err(TransportError::PermissionDenied(_))
        ));

        host.request_permission(&device).unwrap();
        assert_eq!(host.permission_requests(), vec![device.clone()]);

        host.grant_permission(&device);
        assert!(host.open(&device).is_ok());

        host.set_available(false);
        assert_eq!(host.devices(), Err(TransportError::Unavailable));
    }

    #[test]
    fn test_mock_link_responder() {
        let device = MockHost::dongle("dongle");
        let host = MockHost::with_device(device.clone());
        let link = host.link();
        let connection = host.open(&device).unwrap();
        let bulk_out = endpoint(MOCK_BULK_OUT, TransferType::Bulk, Direction::Out);
        let bulk_in = endpoint(MOCK_BULK_IN, TransferType::Bulk, Direction::In);

        link.set_responder(|frame: &UsbFrame| vec![vec![frame.opcode() + 1]]);

        let frame = UsbFrame::from_packet(0, &AttRequest::Read { handle: 1 }).unwrap();
        let written = connection
            .bulk_write(&bulk_out, &frame.to_bytes(), Duration::from_millis(10))
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(link.frames(), vec![frame.clone()]);

        let reply = connection
            .bulk_read(&bulk_in, 64, Duration::from_millis(100))
            .unwrap();
        assert_eq!(reply, vec![AttRequest::Read { handle: 1 }.opcode() + 1]);

        // Nothing else queued
        assert_eq!(
            connection.bulk_read(&bulk_in, 64, Duration::from_millis(10)),
            Err(TransportError::Timeout)
        );
    }

    #[test]
    fn test_mock_link_failures_and_close() {
        let device = MockHost::dongle("dongle");
        let host = MockHost::with_device(device.clone());
        let link = host.link();
        let connection = host.open(&device).unwrap();
        let bulk_out = endpoint(MOCK_BULK_OUT, TransferType::Bulk, Direction::Out);
        let interrupt_in = endpoint(MOCK_INTERRUPT_IN, TransferType::Interrupt, Direction::In);

        link.fail_next_writes(1);
        assert!(connection
            .bulk_write(&bulk_out, &[0, 1, 0x1E], Duration::from_millis(10))
            .is_err());
        assert!(connection
            .bulk_write(&bulk_out, &[0, 1, 0x1E], Duration::from_millis(10))
            .is_ok());
        assert_eq!(link.writes().len(), 1);

        link.reject_interface(1);
        assert!(connection.claim_interface(0));
        assert!(!connection.claim_interface(1));
        assert_eq!(link.claimed_interfaces(), vec![0]);

        link.push_interrupt_in(vec![0x1B, 0x03, 0x00, 0x01]);
        assert_eq!(
            connection
                .interrupt_read(&interrupt_in, 64, Duration::from_millis(10))
                .unwrap(),
            vec![0x1B, 0x03, 0x00, 0x01]
        );

        connection.close();
        assert!(link.is_closed());
        assert_eq!(
            connection.interrupt_read(&interrupt_in, 64, Duration::from_millis(10)),
            Err(TransportError::Disconnected)
        );
    }
}
