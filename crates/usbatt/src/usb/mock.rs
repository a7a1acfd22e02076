//! In-memory USB backend
//!
//! [`MockHost`] enumerates a scripted set of devices and hands out
//! [`MockConnection`]s that all share one [`MockLink`]. The link records every
//! frame written to bulk-out, feeds inbound PDUs to the readers and can answer
//! writes through a responder closure, which is enough to stand in for an ATT
//! server in tests and demos.
use super::device::{Direction, TransferType, UsbDevice, UsbEndpoint, UsbInterface};
use super::transport::{UsbConnection, UsbHost};
use crate::att::UsbFrame;
use crate::error::TransportError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Bulk-out endpoint address of [`MockHost::dongle`]
pub const MOCK_BULK_OUT: u8 = 0x01;
/// Bulk-in endpoint address of [`MockHost::dongle`]
pub const MOCK_BULK_IN: u8 = 0x81;
/// Interrupt-in endpoint address of [`MockHost::dongle`]
pub const MOCK_INTERRUPT_IN: u8 = 0x82;

/// Answers one written frame with zero or more inbound PDUs (opcode first)
pub type Responder = Box<dyn FnMut(&UsbFrame) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct Inbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Inbox {
    fn push(&self, pdu: Vec<u8>) {
        self.queue.lock().push_back(pdu);
        self.ready.notify_all();
    }

    fn pop(&self, timeout: Duration, closed: &AtomicBool) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(pdu) = queue.pop_front() {
                return Ok(pdu);
            }
            if closed.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected);
            }
            if self.ready.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front().ok_or(TransportError::Timeout);
            }
        }
    }

    fn wake(&self) {
        let _queue = self.queue.lock();
        self.ready.notify_all();
    }
}

/// Shared state behind every [`MockConnection`] of one [`MockHost`]
#[derive(Default)]
pub struct MockLink {
    writes: Mutex<Vec<Vec<u8>>>,
    written: Condvar,
    bulk_in: Inbox,
    interrupt_in: Inbox,
    responder: Mutex<Option<Responder>>,
    failing_writes: AtomicUsize,
    rejected_interfaces: Mutex<Vec<u8>>,
    claimed_interfaces: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl MockLink {
    /// Answer every successfully written frame through `responder`
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&UsbFrame) -> Vec<Vec<u8>> + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Stop answering writes
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Queue a PDU for the bulk-in reader
    pub fn push_bulk_in(&self, pdu: impl Into<Vec<u8>>) {
        self.bulk_in.push(pdu.into());
    }

    /// Queue a PDU for the interrupt-in reader
    pub fn push_interrupt_in(&self, pdu: impl Into<Vec<u8>>) {
        self.interrupt_in.push(pdu.into());
    }

    /// Fail the next `count` bulk writes with a transfer error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make claiming `interface` fail
    pub fn reject_interface(&self, interface: u8) {
        self.rejected_interfaces.lock().push(interface);
    }

    /// Interfaces claimed so far, in claim order
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.claimed_interfaces.lock().clone()
    }

    /// Raw bytes of every successful bulk write
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Every successful bulk write parsed as a frame
    pub fn frames(&self) -> Vec<UsbFrame> {
        self.writes
            .lock()
            .iter()
            .filter_map(|bytes| UsbFrame::parse(bytes).ok())
            .collect()
    }

    /// Wait until at least `count` writes have been recorded or `timeout`
    /// passes, then return what was written
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut writes = self.writes.lock();
        while writes.len() < count {
            if self.written.wait_until(&mut writes, deadline).timed_out() {
                break;
            }
        }
        writes.clone()
    }

    /// Whether the current connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.claimed_interfaces.lock().clear();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bulk_in.wake();
        self.interrupt_in.wake();
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }

        let fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Transfer("simulated write failure".into()));
        }

        trace!("mock bulk out: {}", hex::encode(data));
        self.writes.lock().push(data.to_vec());
        self.written.notify_all();

        let replies = match UsbFrame::parse(data) {
            Ok(frame) => match self.responder.lock().as_mut() {
                Some(responder) => responder(&frame),
                None => Vec::new(),
            },
            Err(_) => Vec::new(),
        };
        for pdu in replies {
            self.bulk_in.push(pdu);
        }

        Ok(data.len())
    }
}

/// Scripted USB host service
#[derive(Clone)]
pub struct MockHost {
    devices: Arc<Mutex<Vec<UsbDevice>>>,
    permitted: Arc<Mutex<Vec<String>>>,
    permission_requests: Arc<Mutex<Vec<UsbDevice>>>,
    available: Arc<AtomicBool>,
    fail_open: Arc<AtomicBool>,
    link: Arc<MockLink>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// Host with no devices attached
    pub fn new() -> Self {
        Self {
            devices: Arc::new(Mutex::new(Vec::new())),
            permitted: Arc::new(Mutex::new(Vec::new())),
            permission_requests: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
            fail_open: Arc::new(AtomicBool::new(false)),
            link: Arc::new(MockLink::default()),
        }
    }

    /// Host with one attached device, permission already granted
    pub fn with_device(device: UsbDevice) -> Self {
        let host = Self::new();
        host.grant_permission(&device);
        host.attach(device);
        host
    }

    /// A dongle exposing bulk out/in on interface 0 and interrupt in on interface 1
    pub fn dongle(name: &str) -> UsbDevice {
        UsbDevice {
            name: name.to_string(),
            vendor_id: 0x0A12,
            product_id: 0x4010,
            product_name: Some("USB ATT bridge".to_string()),
            interfaces: vec![
                UsbInterface {
                    number: 0,
                    class: 0xFF,
                    endpoints: vec![
                        UsbEndpoint::new(MOCK_BULK_OUT, TransferType::Bulk, Direction::Out, 64),
                        UsbEndpoint::new(MOCK_BULK_IN, TransferType::Bulk, Direction::In, 64),
                    ],
                },
                UsbInterface {
                    number: 1,
                    class: 0x03,
                    endpoints: vec![UsbEndpoint::new(
                        MOCK_INTERRUPT_IN,
                        TransferType::Interrupt,
                        Direction::In,
                        64,
                    )],
                },
            ],
        }
    }

    /// Link shared by every connection this host opens
    pub fn link(&self) -> Arc<MockLink> {
        Arc::clone(&self.link)
    }

    /// Plug a device in
    pub fn attach(&self, device: UsbDevice) {
        self.devices.lock().push(device);
    }

    /// Unplug a device and close the link
    pub fn detach(&self, device: &UsbDevice) {
        self.devices.lock().retain(|d| d.name != device.name);
        self.link.close();
    }

    /// Grant permission for a device
    pub fn grant_permission(&self, device: &UsbDevice) {
        let mut permitted = self.permitted.lock();
        if !permitted.contains(&device.name) {
            permitted.push(device.name.clone());
        }
    }

    /// Devices permission was requested for
    pub fn permission_requests(&self) -> Vec<UsbDevice> {
        self.permission_requests.lock().clone()
    }

    /// Simulate a missing host service
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next opens fail
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

impl UsbHost for MockHost {
    type Connection = MockConnection;

    fn devices(&self) -> Result<Vec<UsbDevice>, TransportError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable);
        }
        Ok(self.devices.lock().clone())
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.permitted.lock().contains(&device.name)
    }

    fn request_permission(&self, device: &UsbDevice) -> Result<(), TransportError> {
        self.permission_requests.lock().push(device.clone());
        Ok(())
    }

    fn open(&self, device: &UsbDevice) -> Result<Self::Connection, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Transfer("simulated open failure".into()));
        }
        if !self.devices.lock().iter().any(|d| d.name == device.name) {
            return Err(TransportError::DeviceNotFound(device.name.clone()));
        }
        if !self.has_permission(device) {
            return Err(TransportError::PermissionDenied(device.name.clone()));
        }

        self.link.reopen();
        Ok(MockConnection {
            link: Arc::clone(&self.link),
        })
    }
}

/// Connection handed out by [`MockHost::open`]
pub struct MockConnection {
    link: Arc<MockLink>,
}

impl UsbConnection for MockConnection {
    fn claim_interface(&self, interface: u8) -> bool {
        if self.link.rejected_interfaces.lock().contains(&interface) {
            return false;
        }
        self.link.claimed_interfaces.lock().push(interface);
        true
    }

    fn bulk_write(
        &self,
        _endpoint: &UsbEndpoint,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.link.write(data)
    }

    fn bulk_read(
        &self,
        _endpoint: &UsbEndpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut pdu = self.link.bulk_in.pop(timeout, &self.link.closed)?;
        pdu.truncate(max_len);
        Ok(pdu)
    }

    fn interrupt_read(
        &self,
        _endpoint: &UsbEndpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut pdu = self.link.interrupt_in.pop(timeout, &self.link.closed)?;
        pdu.truncate(max_len);
        Ok(pdu)
    }

    fn close(&self) {
        self.link.close();
    }
}
