//! Requests and commands as handed to the connector
use crate::att::{
    AttCommand, AttRequest, AttResponse, ErrorResponse, GroupType, RequestError, UsbFrame,
};
use crate::error::TransportError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Run an application handler, containing a panic to the handler itself so
/// the worker thread calling it keeps running
pub(crate) fn run_handler<F: FnOnce()>(what: &str, handler: F) {
    if panic::catch_unwind(AssertUnwindSafe(handler)).is_err() {
        error!("{} handler panicked", what);
    }
}

/// Called once the request has been written to the bulk-out endpoint
pub type SentHandler = Box<dyn FnOnce() + Send>;

/// Called exactly once with the outcome of the transaction
pub type CompletionHandler = Box<dyn FnOnce(Result<AttResponse, RequestError>) + Send>;

/// Called if a command could not be written
pub type CommandFailureHandler = Box<dyn FnOnce(TransportError) + Send>;

/// An ATT request together with its result sink
pub struct Request {
    pdu: AttRequest,
    on_sent: Option<SentHandler>,
    on_complete: Option<CompletionHandler>,
}

impl Request {
    /// Wrap a request PDU with no handlers attached
    pub fn new(pdu: AttRequest) -> Self {
        Self {
            pdu,
            on_sent: None,
            on_complete: None,
        }
    }

    /// Read Request for one handle
    pub fn read(handle: u16) -> Self {
        Self::new(AttRequest::Read { handle })
    }

    /// Write Request for one handle
    pub fn write(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self::new(AttRequest::Write {
            handle,
            value: value.into(),
        })
    }

    /// Read By Group Type Request across the whole handle range
    pub fn read_by_group_type(group_type: impl Into<GroupType>) -> Self {
        Self::new(AttRequest::read_by_group_type(group_type))
    }

    /// Exchange MTU Request
    pub fn exchange_mtu(client_mtu: u16) -> Self {
        Self::new(AttRequest::ExchangeMtu { client_mtu })
    }

    /// Attach the "sent" handler
    pub fn on_sent<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_sent = Some(Box::new(handler));
        self
    }

    /// Attach the completion handler
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Result<AttResponse, RequestError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }

    /// The request PDU
    pub fn pdu(&self) -> &AttRequest {
        &self.pdu
    }

    /// Run a hook on a successful response before the completion handler
    pub(crate) fn inspect_response<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&AttResponse) + Send + 'static,
    {
        let handler = self.on_complete.take();
        self.on_complete = Some(Box::new(move |result: Result<AttResponse, RequestError>| {
            if let Ok(response) = &result {
                hook(response);
            }
            if let Some(handler) = handler {
                handler(result);
            }
        }));
        self
    }

    pub(crate) fn notify_sent(&mut self) {
        if let Some(handler) = self.on_sent.take() {
            run_handler(self.pdu.name(), handler);
        }
    }

    pub(crate) fn complete(self, result: Result<AttResponse, RequestError>) {
        if let Some(handler) = self.on_complete {
            run_handler(self.pdu.name(), move || handler(result));
        }
    }

    /// Complete with a decoded server answer
    pub(crate) fn resolve(self, outcome: Result<AttResponse, ErrorResponse>) {
        let result = outcome.map_err(|error| RequestError::ServerError {
            response_opcode: error.opcode,
            request_opcode: error.request_opcode,
            handle: error.handle,
            error_code: error.error_code,
        });
        self.complete(result);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("pdu", &self.pdu)
            .field("on_sent", &self.on_sent.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// An ATT command together with its failure handler
pub struct Command {
    pdu: AttCommand,
    on_failure: Option<CommandFailureHandler>,
}

impl Command {
    /// Wrap a command PDU
    pub fn new(pdu: AttCommand) -> Self {
        Self {
            pdu,
            on_failure: None,
        }
    }

    /// Write Command
    pub fn write(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self::new(AttCommand::Write {
            handle,
            value: value.into(),
        })
    }

    /// Handle Value Confirmation
    pub fn confirmation() -> Self {
        Self::new(AttCommand::Confirmation)
    }

    /// Attach the failure handler
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(TransportError) + Send + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    /// The command PDU
    pub fn pdu(&self) -> &AttCommand {
        &self.pdu
    }

    pub(crate) fn fail(self, error: TransportError) {
        if let Some(handler) = self.on_failure {
            run_handler("Command failure", move || handler(error));
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("pdu", &self.pdu)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// A request waiting in the queue, already framed
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub frame: UsbFrame,
    pub request: Request,
}
