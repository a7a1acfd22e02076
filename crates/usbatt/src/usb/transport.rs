//! Transport capability consumed by the connector
//!
//! A platform layer implements [`UsbHost`] and [`UsbConnection`] on top of its
//! USB stack. Device permission results and detach events are pushed into the
//! connector as [`DeviceSignal`] values.
use super::device::{UsbDevice, UsbEndpoint};
use crate::error::TransportError;
use std::time::Duration;

/// Access to the platform's USB host service
pub trait UsbHost: Send + Sync + 'static {
    /// Connection type produced by [`UsbHost::open`]
    type Connection: UsbConnection;

    /// Enumerate attached devices.
    ///
    /// Returns `TransportError::Unavailable` when the host service itself is missing.
    fn devices(&self) -> Result<Vec<UsbDevice>, TransportError>;

    /// Whether the application already holds permission for a device
    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Ask the platform for permission; the answer arrives later as
    /// [`DeviceSignal::Permission`]
    fn request_permission(&self, device: &UsbDevice) -> Result<(), TransportError>;

    /// Open a device for I/O
    fn open(&self, device: &UsbDevice) -> Result<Self::Connection, TransportError>;
}

/// An open device
pub trait UsbConnection: Send + Sync + 'static {
    /// Claim an interface for exclusive use
    fn claim_interface(&self, interface: u8) -> bool;

    /// Write bytes to a bulk-out endpoint, returning the number written
    fn bulk_write(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Read at most `max_len` bytes from a bulk-in endpoint.
    ///
    /// Returns `TransportError::Timeout` when nothing arrives in time.
    fn bulk_read(
        &self,
        endpoint: &UsbEndpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Read at most `max_len` bytes from an interrupt-in endpoint
    fn interrupt_read(
        &self,
        endpoint: &UsbEndpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Release the device
    fn close(&self);
}

/// Asynchronous events from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
    /// Result of a permission request
    Permission {
        /// Device the request was made for
        device: UsbDevice,
        /// Whether the user granted access
        granted: bool,
    },
    /// A device was unplugged
    Detached {
        /// Device that went away
        device: UsbDevice,
    },
}
