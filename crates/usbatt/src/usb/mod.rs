//! USB transport boundary
//!
//! The connector never talks to an OS USB stack directly. It consumes the
//! [`UsbHost`] / [`UsbConnection`] capability defined here, resolves endpoints
//! from the [`UsbDevice`] descriptors the host enumerates, and listens for
//! [`DeviceSignal`]s. [`mock`] provides an in-memory backend.

pub mod device;
pub mod mock;
pub mod transport;

#[cfg(test)]
mod tests;

pub use self::device::{
    Direction, EndpointKinds, EndpointMap, ResolvedEndpoint, TransferType, UsbDevice, UsbEndpoint,
    UsbInterface,
};
pub use self::mock::{MockConnection, MockHost, MockLink};
pub use self::transport::{DeviceSignal, UsbConnection, UsbHost};
