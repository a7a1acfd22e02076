//! Reader threads draining the inbound endpoints
use super::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::usb::{UsbConnection, UsbEndpoint};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which inbound endpoint a reader drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InboundEndpoint {
    Bulk,
    Interrupt,
}

impl InboundEndpoint {
    fn label(self) -> &'static str {
        match self {
            InboundEndpoint::Bulk => "bulk in",
            InboundEndpoint::Interrupt => "interrupt in",
        }
    }

    fn thread_name(self) -> &'static str {
        match self {
            InboundEndpoint::Bulk => "usbatt-bulk-in",
            InboundEndpoint::Interrupt => "usbatt-interrupt-in",
        }
    }
}

/// Loop reading one inbound endpoint until stopped
pub(crate) struct Reader<C: UsbConnection> {
    pub kind: InboundEndpoint,
    pub connection: Arc<C>,
    pub endpoint: UsbEndpoint,
    pub dispatcher: Arc<Dispatcher>,
    pub stop: Arc<AtomicBool>,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

impl<C: UsbConnection> Reader<C> {
    /// Start the reader on its own thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.kind.thread_name().to_string())
            .spawn(move || self.run())
    }

    fn read(&self) -> Result<Vec<u8>, TransportError> {
        let max_len = self.endpoint.max_packet_size as usize;
        match self.kind {
            InboundEndpoint::Bulk => {
                self.connection
                    .bulk_read(&self.endpoint, max_len, self.poll_interval)
            }
            InboundEndpoint::Interrupt => {
                self.connection
                    .interrupt_read(&self.endpoint, max_len, self.poll_interval)
            }
        }
    }

    fn run(self) {
        let label = self.kind.label();
        info!("Listening on {} endpoint 0x{:02X}", label, self.endpoint.address);

        while !self.stop.load(Ordering::SeqCst) {
            match self.read() {
                Ok(pdu) if pdu.is_empty() => {
                    debug!("Empty read on {}", label);
                    thread::sleep(self.error_backoff);
                }
                Ok(pdu) => {
                    debug!("{} ({} bytes): {}", label, pdu.len(), hex::encode(&pdu));
                    self.dispatcher.dispatch(&pdu);
                }
                Err(TransportError::Timeout) => {}
                Err(err) => {
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("Read on {} failed: {}", label, err);
                    thread::sleep(self.error_backoff);
                }
            }
        }

        info!("Stopped listening on {}", label);
    }
}
