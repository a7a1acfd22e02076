//! ATT connector over a USB transport
//!
//! [`UsbConnector`] walks a device through
//! `Disconnected → DeviceSelected → Authorized → Configured → Connected` and,
//! once connected, runs the worker threads that carry ATT traffic:
//!
//! - the send pump, which writes queued requests one at a time and waits for
//!   each response (or the transaction timeout) before sending the next
//! - one reader per inbound endpoint, handing PDUs to the dispatcher
//! - the command executor, which writes commands without waiting for anything
//! - a signal watcher, which reacts to permission results and detach events
//!
//! Request outcomes are delivered through the handlers attached to each
//! [`Request`]; send calls only report whether the request was accepted.

pub mod config;
mod dispatch;
mod executor;
mod pump;
pub mod queue;
mod reader;
pub mod registry;
pub mod request;
mod slot;


pub use self::config::ConnectorConfig;
pub use self::registry::{
    CallbackList, CallbackRegistry, DeviceStatus, IndicationCallback, NotificationCallback,
    StatusCallback, SubscriptionId,
};
pub use self::request::{Command, Request};

use self::dispatch::Dispatcher;
use self::executor::CommandExecutor;
use self::pump::{BulkOut, CommandWrite, SendPump};
use self::queue::RequestQueue;
use self::reader::{InboundEndpoint, Reader};
use self::request::QueuedRequest;
use self::slot::TransactionSlot;
use crate::att::{AttRequest, AttResponse, HandleValue, RequestError, UsbFrame, ATT_DEFAULT_MTU};
use crate::error::{ConnectorError, ConnectorResult};
use crate::usb::{DeviceSignal, EndpointMap, UsbConnection, UsbDevice, UsbHost};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Where the connector is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device selected
    Disconnected,
    /// A device was found or supplied
    DeviceSelected,
    /// Permission for the device is held
    Authorized,
    /// Device opened and interfaces claimed
    Configured,
    /// Worker threads running
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::DeviceSelected => "device selected",
            ConnectionState::Authorized => "authorized",
            ConnectionState::Configured => "configured",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Join worker threads, skipping the calling thread
pub(crate) fn join_workers(handles: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            warn!("Thread {} panicked", name);
        }
    }
}

/// Worker threads and shared structures of one connection
struct Session<C: UsbConnection> {
    stop: Arc<AtomicBool>,
    queue: Arc<RequestQueue<QueuedRequest>>,
    slot: Arc<TransactionSlot>,
    bulk_out: Option<Arc<BulkOut<C>>>,
    executor: Option<CommandExecutor>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: UsbConnection> Session<C> {
    fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(RequestQueue::new()),
            slot: Arc::new(TransactionSlot::new()),
            bulk_out: None,
            executor: None,
            workers: Vec::new(),
        }
    }

    /// Stop the workers, release the connection and fail every request that
    /// never made it out
    fn shutdown(self, connection: Option<Arc<C>>) {
        self.stop.store(true, Ordering::SeqCst);
        let discarded = self.queue.close();
        self.slot.stop();

        if let Some(executor) = &self.executor {
            executor.shutdown();
        }
        if let Some(connection) = connection {
            connection.close();
        }
        join_workers(self.workers);

        if !discarded.is_empty() {
            debug!("Discarding {} queued request(s)", discarded.len());
        }
        for queued in discarded {
            queued.request.complete(Err(RequestError::Discarded));
        }
    }
}

struct EngineState<C: UsbConnection> {
    state: ConnectionState,
    device: Option<UsbDevice>,
    endpoints: EndpointMap,
    connection: Option<Arc<C>>,
    session: Option<Session<C>>,
}

impl<C: UsbConnection> EngineState<C> {
    /// Drop everything tied to the current device
    fn reset(&mut self) -> (Option<Session<C>>, Option<Arc<C>>) {
        self.state = ConnectionState::Disconnected;
        self.device = None;
        self.endpoints = EndpointMap::default();
        (self.session.take(), self.connection.take())
    }
}

struct Inner<H: UsbHost> {
    host: H,
    config: ConnectorConfig,
    callbacks: Arc<CallbackRegistry>,
    engine: Mutex<EngineState<H::Connection>>,
    mtu: Arc<AtomicU16>,
    signal_tx: Sender<DeviceSignal>,
}

impl<H: UsbHost> Inner<H> {
    fn teardown(&self) {
        let (previous, session, connection) = {
            let mut engine = self.engine.lock();
            let previous = engine.state;
            let (session, connection) = engine.reset();
            (previous, session, connection)
        };
        self.mtu.store(ATT_DEFAULT_MTU, Ordering::SeqCst);

        match session {
            Some(session) => session.shutdown(connection),
            None => {
                if let Some(connection) = connection {
                    connection.close();
                }
            }
        }

        if previous != ConnectionState::Disconnected {
            info!("Connector {} -> disconnected", previous);
        }
    }

    fn is_selected(&self, device: &UsbDevice) -> bool {
        self.engine
            .lock()
            .device
            .as_ref()
            .is_some_and(|selected| selected.name == device.name)
    }

    fn handle_signal(&self, signal: DeviceSignal) {
        match signal {
            DeviceSignal::Permission { device, granted } => {
                let accepted = {
                    let mut engine = self.engine.lock();
                    let awaiting = engine.state == ConnectionState::DeviceSelected
                        && engine
                            .device
                            .as_ref()
                            .is_some_and(|selected| selected.name == device.name);
                    if awaiting {
                        if granted {
                            engine.state = ConnectionState::Authorized;
                        } else {
                            engine.state = ConnectionState::Disconnected;
                            engine.device = None;
                        }
                    }
                    awaiting
                };

                if !accepted {
                    debug!("Ignoring permission result for {}", device);
                    return;
                }
                if granted {
                    info!("Permission granted for {}", device);
                } else {
                    warn!("Permission denied for {}", device);
                }
                self.callbacks
                    .status
                    .broadcast(&DeviceStatus::Authorization { granted });
            }
            DeviceSignal::Detached { device } => {
                if !self.is_selected(&device) {
                    debug!("Ignoring detach of {}", device);
                    return;
                }
                warn!("Device {} detached", device);
                self.teardown();
                self.callbacks.status.broadcast(&DeviceStatus::Detached);
            }
        }
    }
}

fn watch_signals<H: UsbHost>(
    inner: Weak<Inner<H>>,
    signals: Receiver<DeviceSignal>,
    shutdown: Receiver<()>,
) {
    loop {
        channel::select! {
            recv(signals) -> signal => match (signal, inner.upgrade()) {
                (Ok(signal), Some(inner)) => inner.handle_signal(signal),
                _ => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("Signal watcher stopped");
}

/// Client-side ATT engine over a USB bulk/interrupt transport
pub struct UsbConnector<H: UsbHost> {
    inner: Arc<Inner<H>>,
    watcher_shutdown: Option<Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl<H: UsbHost> UsbConnector<H> {
    /// Create a connector and start its signal watcher
    pub fn new(host: H, config: ConnectorConfig) -> ConnectorResult<Self> {
        let (signal_tx, signal_rx) = channel::unbounded();
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);

        let inner = Arc::new(Inner {
            host,
            config,
            callbacks: Arc::new(CallbackRegistry::default()),
            engine: Mutex::new(EngineState {
                state: ConnectionState::Disconnected,
                device: None,
                endpoints: EndpointMap::default(),
                connection: None,
                session: None,
            }),
            mtu: Arc::new(AtomicU16::new(ATT_DEFAULT_MTU)),
            signal_tx,
        });

        let weak = Arc::downgrade(&inner);
        let watcher = thread::Builder::new()
            .name("usbatt-signals".to_string())
            .spawn(move || watch_signals(weak, signal_rx, shutdown_rx))
            .map_err(ConnectorError::WorkerSpawnFailed)?;

        Ok(Self {
            inner,
            watcher_shutdown: Some(shutdown_tx),
            watcher: Some(watcher),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.engine.lock().state
    }

    /// Selected device, if any
    pub fn device(&self) -> Option<UsbDevice> {
        self.inner.engine.lock().device.clone()
    }

    /// ATT MTU in effect: the default until an Exchange MTU succeeds
    pub fn mtu(&self) -> u16 {
        self.inner.mtu.load(Ordering::SeqCst)
    }

    /// Whether the worker threads are running
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Sender the platform layer pushes permission and detach events into
    pub fn signal_sender(&self) -> Sender<DeviceSignal> {
        self.inner.signal_tx.clone()
    }

    fn ensure_unconfigured(state: ConnectionState) -> ConnectorResult<()> {
        match state {
            ConnectionState::Configured | ConnectionState::Connected => {
                Err(ConnectorError::InvalidArgument(format!(
                    "connector is {}, disconnect first",
                    state
                )))
            }
            _ => Ok(()),
        }
    }

    /// Find an attached device; `None` filters match any id
    pub fn search(
        &self,
        vendor_id: Option<u16>,
        product_id: Option<u16>,
    ) -> ConnectorResult<UsbDevice> {
        let mut engine = self.inner.engine.lock();
        Self::ensure_unconfigured(engine.state)?;

        let devices = self.inner.host.devices().map_err(|err| {
            error!("Cannot enumerate USB devices: {}", err);
            ConnectorError::NoUsbManager
        })?;

        let device = devices
            .into_iter()
            .find(|device| device.matches(vendor_id, product_id))
            .ok_or(ConnectorError::NoDeviceFound)?;

        info!("Selected {}", device);
        engine.device = Some(device.clone());
        engine.state = ConnectionState::DeviceSelected;
        Ok(device)
    }

    /// Use a device obtained elsewhere
    pub fn select_device(&self, device: UsbDevice) -> ConnectorResult<()> {
        let mut engine = self.inner.engine.lock();
        Self::ensure_unconfigured(engine.state)?;

        info!("Selected {}", device);
        engine.device = Some(device);
        engine.state = ConnectionState::DeviceSelected;
        Ok(())
    }

    /// Obtain permission for the selected device.
    ///
    /// Returns `true` if permission was already held. Otherwise the host is
    /// asked and `false` is returned; the answer is reported to status
    /// subscribers when it arrives as a [`DeviceSignal::Permission`].
    pub fn authorize(&self) -> ConnectorResult<bool> {
        let device = {
            let mut engine = self.inner.engine.lock();
            let device = engine.device.clone().ok_or(ConnectorError::NoDeviceFound)?;

            if !self.inner.host.has_permission(&device) {
                drop(engine);
                info!("Requesting permission for {}", device);
                self.inner.host.request_permission(&device).map_err(|err| {
                    warn!("Permission request for {} failed: {}", device, err);
                    ConnectorError::DeviceNotAuthorized
                })?;
                return Ok(false);
            }

            if engine.state == ConnectionState::DeviceSelected {
                engine.state = ConnectionState::Authorized;
            }
            device
        };

        info!("Permission held for {}", device);
        self.inner
            .callbacks
            .status
            .broadcast(&DeviceStatus::Authorization { granted: true });
        Ok(true)
    }

    /// Resolve endpoints, open the device and claim its interfaces
    pub fn configure(&self) -> ConnectorResult<()> {
        let mut engine = self.inner.engine.lock();
        match engine.state {
            ConnectionState::Configured | ConnectionState::Connected => return Ok(()),
            _ => {}
        }

        let device = engine.device.clone().ok_or(ConnectorError::NoDeviceFound)?;
        if !self.inner.host.has_permission(&device) {
            return Err(ConnectorError::DeviceNotAuthorized);
        }

        let endpoints = EndpointMap::resolve(&device);
        endpoints.require_input().map_err(|err| {
            error!("{} has no inbound endpoint", device);
            err
        })?;

        let connection = self.inner.host.open(&device).map_err(|err| {
            error!("Failed to open {}: {}", device, err);
            ConnectorError::ConnectionOpenFailed(err)
        })?;

        for interface in endpoints.interfaces_to_claim() {
            if !connection.claim_interface(interface) {
                error!("Failed to claim interface {} of {}", interface, device);
                connection.close();
                return Err(ConnectorError::InterfaceClaimFailed(interface));
            }
        }

        info!("Configured {} (endpoints: {:?})", device, endpoints.kinds());
        engine.endpoints = endpoints;
        engine.connection = Some(Arc::new(connection));
        engine.state = ConnectionState::Configured;
        Ok(())
    }

    /// Start the worker threads
    pub fn connect(&self) -> ConnectorResult<()> {
        let mut engine = self.inner.engine.lock();
        match engine.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Configured => {}
            _ => return Err(ConnectorError::ConnectionNotEstablished),
        }
        let connection = engine
            .connection
            .clone()
            .ok_or(ConnectorError::ConnectionNotEstablished)?;

        let mut session = Session::new();
        if let Err(err) = self.spawn_workers(&mut session, &connection, &engine.endpoints) {
            drop(engine);
            error!("Failed to start connector threads: {}", err);
            // The connection stays open so connect() can be retried
            session.shutdown(None);
            return Err(ConnectorError::WorkerSpawnFailed(err));
        }

        if session.bulk_out.is_none() {
            warn!("No bulk out endpoint, connector is receive-only");
        }
        self.inner.mtu.store(ATT_DEFAULT_MTU, Ordering::SeqCst);
        engine.session = Some(session);
        engine.state = ConnectionState::Connected;
        info!("Connector connected");
        Ok(())
    }

    fn spawn_workers(
        &self,
        session: &mut Session<H::Connection>,
        connection: &Arc<H::Connection>,
        endpoints: &EndpointMap,
    ) -> io::Result<()> {
        let config = &self.inner.config;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session.slot),
            Arc::clone(&self.inner.callbacks),
        ));

        let readers = [
            (InboundEndpoint::Bulk, &endpoints.bulk_in),
            (InboundEndpoint::Interrupt, &endpoints.interrupt_in),
        ];
        for (kind, resolved) in readers {
            let Some(resolved) = resolved else { continue };
            let reader = Reader {
                kind,
                connection: Arc::clone(connection),
                endpoint: resolved.endpoint.clone(),
                dispatcher: Arc::clone(&dispatcher),
                stop: Arc::clone(&session.stop),
                poll_interval: config.read_poll_interval,
                error_backoff: config.read_error_backoff,
            };
            session.workers.push(reader.spawn()?);
        }

        if let Some(resolved) = &endpoints.bulk_out {
            let bulk_out = Arc::new(BulkOut::new(
                Arc::clone(connection),
                resolved.endpoint.clone(),
                config.bulk_write_timeout,
            ));
            let pump = SendPump {
                queue: Arc::clone(&session.queue),
                slot: Arc::clone(&session.slot),
                bulk_out: Arc::clone(&bulk_out),
                stop: Arc::clone(&session.stop),
                transaction_timeout: config.transaction_timeout,
            };
            session.workers.push(pump.spawn()?);
            session.bulk_out = Some(bulk_out);
            session.executor = Some(CommandExecutor::new(
                config.command_workers,
                config.command_keep_alive,
            ));
        }

        Ok(())
    }

    /// Stop every worker, release the device and forget it.
    ///
    /// Safe to call from any thread, including from inside a handler running
    /// on one of the connector's workers.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    /// Queue a Read or Read By Group Type request
    pub fn send_read(&self, request: Request) -> ConnectorResult<()> {
        match request.pdu() {
            AttRequest::Read { .. } | AttRequest::ReadByGroupType { .. } => {
                self.send_request(request)
            }
            other => Err(Self::wrong_kind(other, "read")),
        }
    }

    /// Queue a Write request
    pub fn send_write(&self, request: Request) -> ConnectorResult<()> {
        match request.pdu() {
            AttRequest::Write { .. } => self.send_request(request),
            other => Err(Self::wrong_kind(other, "write")),
        }
    }

    /// Queue an Exchange MTU request
    pub fn send_exchange_mtu(&self, request: Request) -> ConnectorResult<()> {
        match request.pdu() {
            AttRequest::ExchangeMtu { .. } => self.send_request(request),
            other => Err(Self::wrong_kind(other, "exchange mtu")),
        }
    }

    /// Queue an Exchange MTU request announcing the configured client MTU
    pub fn exchange_mtu<F>(&self, on_complete: F) -> ConnectorResult<()>
    where
        F: FnOnce(Result<AttResponse, RequestError>) + Send + 'static,
    {
        let request = Request::exchange_mtu(self.inner.config.client_mtu).on_complete(on_complete);
        self.send_exchange_mtu(request)
    }

    fn wrong_kind(pdu: &AttRequest, expected: &str) -> ConnectorError {
        ConnectorError::InvalidArgument(format!("{} is not a {} request", pdu.name(), expected))
    }

    /// Queue any request
    pub fn send_request(&self, request: Request) -> ConnectorResult<()> {
        let engine = self.inner.engine.lock();
        let session = engine
            .session
            .as_ref()
            .filter(|session| session.bulk_out.is_some())
            .ok_or(ConnectorError::ConnectionNotEstablished)?;

        let frame = UsbFrame::from_packet(self.inner.config.report_id, request.pdu())
            .map_err(|err| ConnectorError::InvalidArgument(err.to_string()))?;

        let mut request = request;
        if let AttRequest::ExchangeMtu { client_mtu } = *request.pdu() {
            let mtu = Arc::clone(&self.inner.mtu);
            request = request.inspect_response(move |response| {
                if let AttResponse::ExchangeMtu { server_mtu } = response {
                    let negotiated = client_mtu.min(*server_mtu).max(ATT_DEFAULT_MTU);
                    mtu.store(negotiated, Ordering::SeqCst);
                    info!("ATT MTU is now {}", negotiated);
                }
            });
        }

        debug!("Queueing {}", request.pdu().name());
        session
            .queue
            .push(QueuedRequest { frame, request })
            .map_err(|_| ConnectorError::ConnectionNotEstablished)
    }

    /// Write a command without waiting for any response
    pub fn send_write_command(&self, command: Command) -> ConnectorResult<()> {
        let engine = self.inner.engine.lock();
        let session = engine
            .session
            .as_ref()
            .ok_or(ConnectorError::ConnectionNotEstablished)?;
        let (bulk_out, executor) = match (&session.bulk_out, &session.executor) {
            (Some(bulk_out), Some(executor)) => (Arc::clone(bulk_out), executor),
            _ => return Err(ConnectorError::ConnectionNotEstablished),
        };

        let frame = UsbFrame::from_packet(self.inner.config.report_id, command.pdu())
            .map_err(|err| ConnectorError::InvalidArgument(err.to_string()))?;

        executor
            .submit(Box::new(CommandWrite {
                bulk_out,
                frame,
                command,
            }))
            .map_err(|err| {
                warn!("Command rejected: {:?}", err);
                ConnectorError::ConnectionNotEstablished
            })
    }

    /// Subscribe to Handle Value Notifications
    pub fn add_notification_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HandleValue) + Send + Sync + 'static,
    {
        self.inner.callbacks.notifications.add(Arc::new(callback))
    }

    /// Unsubscribe from notifications
    pub fn remove_notification_callback(&self, id: SubscriptionId) -> bool {
        self.inner.callbacks.notifications.remove(id)
    }

    /// Subscribe to Handle Value Indications
    pub fn add_indication_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HandleValue) + Send + Sync + 'static,
    {
        self.inner.callbacks.indications.add(Arc::new(callback))
    }

    /// Unsubscribe from indications
    pub fn remove_indication_callback(&self, id: SubscriptionId) -> bool {
        self.inner.callbacks.indications.remove(id)
    }

    /// Subscribe to device status changes
    pub fn add_status_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.inner.callbacks.status.add(Arc::new(callback))
    }

    /// Unsubscribe from device status changes
    pub fn remove_status_callback(&self, id: SubscriptionId) -> bool {
        self.inner.callbacks.status.remove(id)
    }
}

impl<H: UsbHost> Drop for UsbConnector<H> {
    fn drop(&mut self) {
        self.inner.teardown();
        self.watcher_shutdown.take();
        if let Some(watcher) = self.watcher.take() {
            join_workers(vec![watcher]);
        }
    }
}
