//! Send pump: moves requests from the queue to the device one at a time
use super::executor::Job;
use super::queue::RequestQueue;
use super::request::{Command, QueuedRequest};
use super::slot::{Placement, SlotWait, TransactionSlot};
use crate::att::{RequestError, UsbFrame};
use crate::error::TransportError;
use crate::usb::{UsbConnection, UsbEndpoint};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The bulk-out endpoint, shared by the send pump and command workers.
///
/// Writes are serialized so frames never interleave on the wire.
pub(crate) struct BulkOut<C: UsbConnection> {
    connection: Arc<C>,
    endpoint: UsbEndpoint,
    timeout: Duration,
    lock: Mutex<()>,
}

impl<C: UsbConnection> BulkOut<C> {
    pub fn new(connection: Arc<C>, endpoint: UsbEndpoint, timeout: Duration) -> Self {
        Self {
            connection,
            endpoint,
            timeout,
            lock: Mutex::new(()),
        }
    }

    /// Write one whole frame
    pub fn write(&self, frame: &UsbFrame) -> Result<(), TransportError> {
        let bytes = frame.to_bytes();
        let written = {
            let _guard = self.lock.lock();
            self.connection.bulk_write(&self.endpoint, &bytes, self.timeout)?
        };

        if written != bytes.len() {
            return Err(TransportError::Transfer(format!(
                "short write: {} of {} bytes",
                written,
                bytes.len()
            )));
        }

        debug!("bulk out ({} bytes): {}", written, hex::encode(&bytes));
        Ok(())
    }
}

/// A command waiting for a command worker
pub(crate) struct CommandWrite<C: UsbConnection> {
    pub bulk_out: Arc<BulkOut<C>>,
    pub frame: UsbFrame,
    pub command: Command,
}

impl<C: UsbConnection> Job for CommandWrite<C> {
    fn run(self: Box<Self>) {
        if let Err(err) = self.bulk_out.write(&self.frame) {
            warn!("Failed to send command 0x{:02X}: {}", self.frame.opcode(), err);
            self.command.fail(err);
        }
    }

    fn discard(self: Box<Self>) {
        debug!("Command 0x{:02X} not sent, connector stopped", self.frame.opcode());
        self.command.fail(TransportError::Disconnected);
    }
}

/// Single-flight transaction loop
pub(crate) struct SendPump<C: UsbConnection> {
    pub queue: Arc<RequestQueue<QueuedRequest>>,
    pub slot: Arc<TransactionSlot>,
    pub bulk_out: Arc<BulkOut<C>>,
    pub stop: Arc<AtomicBool>,
    pub transaction_timeout: Duration,
}

impl<C: UsbConnection> SendPump<C> {
    /// Start the pump on its own thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("usbatt-send-pump".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        info!("Send pump started");
        while let Some(queued) = self.queue.pop() {
            if self.stop.load(Ordering::SeqCst) {
                queued.request.complete(Err(RequestError::Discarded));
                break;
            }
            if !self.transact(queued) {
                break;
            }
        }
        info!("Send pump stopped");
    }

    /// Run one transaction; false once the pump has been stopped
    fn transact(&self, queued: QueuedRequest) -> bool {
        let QueuedRequest { frame, mut request } = queued;
        let name = request.pdu().name();

        self.slot.arm();
        if let Err(err) = self.bulk_out.write(&frame) {
            self.slot.disarm();
            warn!("Failed to send {}: {}", name, err);
            request.complete(Err(RequestError::SendFailed(err)));
            return true;
        }

        let deadline = Instant::now() + self.transaction_timeout;
        request.notify_sent();

        match self.slot.occupy(request) {
            Placement::Pending => {}
            Placement::Answered(request, outcome) => {
                request.resolve(outcome);
                return true;
            }
        }

        match self.slot.wait(deadline) {
            SlotWait::Completed => true,
            SlotWait::TimedOut(request) => {
                // Nothing queued behind a stalled transaction is sent
                let discarded = self.queue.drain();
                warn!(
                    "No response to {} within {:?}, discarding {} queued request(s)",
                    name,
                    self.transaction_timeout,
                    discarded.len()
                );
                request.complete(Err(RequestError::ReceiveTimeout));
                for queued in discarded {
                    queued.request.complete(Err(RequestError::Discarded));
                }
                true
            }
            SlotWait::Cancelled(request) => {
                debug!("{} cancelled", name);
                request.complete(Err(RequestError::Cancelled));
                false
            }
            SlotWait::Stopped => false,
        }
    }
}
