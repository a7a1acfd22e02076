//! usbatt - Attribute Protocol client over USB bulk and interrupt transfers
//!
//! This library lets a host application discover, read and write the
//! attributes of a USB-attached peripheral that speaks ATT, the
//! request/response/indication/notification protocol underneath Bluetooth
//! GATT. It provides the ATT PDU codec and USB framing, a transport
//! abstraction over the platform's USB host service, and a connector engine
//! that serializes transactions, enforces the transaction timeout and routes
//! inbound PDUs to the right place.

pub mod att;
pub mod connector;
pub mod error;
pub mod usb;

// Re-export common types for convenience
pub use att::{
    AttCommand, AttErrorCode, AttRequest, AttResponse, GroupType, HandleValue, RequestError,
    UsbFrame,
};
pub use connector::{
    Command, ConnectionState, ConnectorConfig, DeviceStatus, Request, SubscriptionId,
    UsbConnector,
};
pub use error::{ConnectorError, ConnectorResult, TransportError};
pub use usb::{DeviceSignal, UsbConnection, UsbDevice, UsbHost};
