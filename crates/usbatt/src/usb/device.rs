//! USB device model and endpoint resolution
use crate::error::{ConnectorError, ConnectorResult};
use bitflags::bitflags;
use std::fmt;

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

bitflags! {
    /// Set of endpoint kinds the connector cares about
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EndpointKinds: u8 {
        const BULK_IN = 0x01;
        const BULK_OUT = 0x02;
        const INTERRUPT_IN = 0x04;
        const INTERRUPT_OUT = 0x08;

        /// Either inbound endpoint is enough to receive PDUs
        const ANY_IN = Self::BULK_IN.bits() | Self::INTERRUPT_IN.bits();
    }
}

/// One endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbEndpoint {
    /// Endpoint address, direction bit included
    pub address: u8,
    /// Transfer type
    pub transfer_type: TransferType,
    /// Direction
    pub direction: Direction,
    /// Largest packet this endpoint moves in one transfer
    pub max_packet_size: u16,
}

impl UsbEndpoint {
    /// Create an endpoint descriptor
    pub fn new(
        address: u8,
        transfer_type: TransferType,
        direction: Direction,
        max_packet_size: u16,
    ) -> Self {
        Self {
            address,
            transfer_type,
            direction,
            max_packet_size,
        }
    }

    /// Kind flag for this endpoint, empty for control and isochronous endpoints
    pub fn kind(&self) -> EndpointKinds {
        match (self.transfer_type, self.direction) {
            (TransferType::Bulk, Direction::In) => EndpointKinds::BULK_IN,
            (TransferType::Bulk, Direction::Out) => EndpointKinds::BULK_OUT,
            (TransferType::Interrupt, Direction::In) => EndpointKinds::INTERRUPT_IN,
            (TransferType::Interrupt, Direction::Out) => EndpointKinds::INTERRUPT_OUT,
            _ => EndpointKinds::empty(),
        }
    }
}

/// One interface of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbInterface {
    /// Interface number
    pub number: u8,
    /// Interface class code
    pub class: u8,
    /// Endpoints of this interface
    pub endpoints: Vec<UsbEndpoint>,
}

/// A USB device as enumerated by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// Platform device name (e.g. a bus path); identifies the device
    pub name: String,
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Product string, when the platform exposes it
    pub product_name: Option<String>,
    /// Interfaces of the active configuration
    pub interfaces: Vec<UsbInterface>,
}

impl UsbDevice {
    /// Whether this device passes an optional vendor/product filter
    pub fn matches(&self, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
        vendor_id.map_or(true, |vid| vid == self.vendor_id)
            && product_id.map_or(true, |pid| pid == self.product_id)
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:04x}:{:04x}]", self.name, self.vendor_id, self.product_id)?;
        if let Some(product) = &self.product_name {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// An endpoint together with the interface that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Owning interface number
    pub interface: u8,
    /// Endpoint descriptor
    pub endpoint: UsbEndpoint,
}

/// Endpoints picked out of a device's descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMap {
    pub bulk_in: Option<ResolvedEndpoint>,
    pub bulk_out: Option<ResolvedEndpoint>,
    pub interrupt_in: Option<ResolvedEndpoint>,
    pub interrupt_out: Option<ResolvedEndpoint>,
}

impl EndpointMap {
    /// Walk every interface and endpoint of a device.
    ///
    /// When a device exposes several endpoints of the same kind, the last one
    /// enumerated is used.
    pub fn resolve(device: &UsbDevice) -> Self {
        let mut map = EndpointMap::default();

        for interface in &device.interfaces {
            for endpoint in &interface.endpoints {
                let slot = match endpoint.kind() {
                    EndpointKinds::BULK_IN => &mut map.bulk_in,
                    EndpointKinds::BULK_OUT => &mut map.bulk_out,
                    EndpointKinds::INTERRUPT_IN => &mut map.interrupt_in,
                    EndpointKinds::INTERRUPT_OUT => &mut map.interrupt_out,
                    _ => continue,
                };
                *slot = Some(ResolvedEndpoint {
                    interface: interface.number,
                    endpoint: endpoint.clone(),
                });
            }
        }

        map
    }

    /// Endpoint kinds present
    pub fn kinds(&self) -> EndpointKinds {
        let mut kinds = EndpointKinds::empty();
        kinds.set(EndpointKinds::BULK_IN, self.bulk_in.is_some());
        kinds.set(EndpointKinds::BULK_OUT, self.bulk_out.is_some());
        kinds.set(EndpointKinds::INTERRUPT_IN, self.interrupt_in.is_some());
        kinds.set(EndpointKinds::INTERRUPT_OUT, self.interrupt_out.is_some());
        kinds
    }

    /// Fail unless at least one inbound endpoint exists
    pub fn require_input(&self) -> ConnectorResult<()> {
        if self.kinds().intersects(EndpointKinds::ANY_IN) {
            Ok(())
        } else {
            Err(ConnectorError::EndpointNotFound("bulk in or interrupt in"))
        }
    }

    /// Interfaces to claim, in claim order (bulk out, interrupt in, bulk in),
    /// each listed once
    pub fn interfaces_to_claim(&self) -> Vec<u8> {
        let mut interfaces = Vec::with_capacity(3);
        for resolved in [&self.bulk_out, &self.interrupt_in, &self.bulk_in]
            .into_iter()
            .flatten()
        {
            if !interfaces.contains(&resolved.interface) {
                interfaces.push(resolved.interface);
            }
        }
        interfaces
    }
}
