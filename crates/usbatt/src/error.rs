//! Error types for the usbatt library
//!
//! Setup and lifecycle calls on the connector return [`ConnectorError`]
//! synchronously. [`TransportError`] is what a USB backend reports; it reaches
//! applications either wrapped in a lifecycle error or, for transfers made by
//! worker threads, inside a [`crate::att::RequestError`].

use thiserror::Error;

/// Errors reported by a USB backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("USB host service unavailable")]
    Unavailable,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer timed out")]
    Timeout,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Errors returned from connector lifecycle and send calls
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("USB host service unavailable")]
    NoUsbManager,

    #[error("No matching USB device found")]
    NoDeviceFound,

    #[error("Selected device has not been authorized")]
    DeviceNotAuthorized,

    #[error("Required endpoint not found: {0}")]
    EndpointNotFound(&'static str),

    #[error("Failed to claim interface {0}")]
    InterfaceClaimFailed(u8),

    #[error("Failed to open USB connection: {0}")]
    ConnectionOpenFailed(#[source] TransportError),

    #[error("USB connection has not been established")]
    ConnectionNotEstablished,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start worker thread: {0}")]
    WorkerSpawnFailed(#[source] std::io::Error),
}

/// Connector result type
pub type ConnectorResult<T> = Result<T, ConnectorError>;
