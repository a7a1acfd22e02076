//! Transaction slot: the one request allowed in flight
//!
//! The send pump arms the slot before writing a request, occupies it once the
//! write succeeded and then waits on it. The dispatcher hands every response
//! PDU to the slot. A response that beats the pump to the slot is kept until
//! the request is placed. Completion handlers always run outside the slot lock.
use super::request::Request;
use crate::att::{AttResponse, ErrorResponse, PduError};
use parking_lot::{Condvar, Mutex};
use std::time::Instant;
use tracing::warn;

/// Decoded server answer
pub(crate) type Outcome = Result<AttResponse, ErrorResponse>;

enum SlotState {
    /// No transaction
    Idle,
    /// Request being written; an early response is parked here
    Armed { early: Option<Vec<u8>> },
    /// Request written, waiting for its response
    Pending(Request),
    /// Dispatcher is running the completion handler
    Completing,
    /// Dispatcher finished; the pump has not noticed yet
    Completed,
}

struct SlotInner {
    state: SlotState,
    stopped: bool,
}

/// What became of a response PDU handed to the slot
pub(crate) enum Delivery {
    /// Matched the pending request; the caller completes it, then calls
    /// [`TransactionSlot::finish`]
    Answered(Request, Outcome),
    /// Arrived before the request was placed; kept for it
    Parked,
    /// Nothing in flight
    Unsolicited,
    /// Too short for the layout it was read with; the request stays pending
    Malformed(PduError),
}

/// Result of placing a request in the slot
pub(crate) enum Placement {
    /// Waiting for the response
    Pending,
    /// A parked response already answers it; the slot is idle again
    Answered(Request, Outcome),
}

/// Result of waiting on the slot
#[derive(Debug)]
pub(crate) enum SlotWait {
    /// The dispatcher completed the transaction
    Completed,
    /// The deadline passed; the request is handed back
    TimedOut(Request),
    /// The slot was stopped with the request still pending
    Cancelled(Request),
    /// The slot was stopped while the dispatcher was completing
    Stopped,
}

/// Single-request slot shared by the send pump and the dispatcher
pub(crate) struct TransactionSlot {
    inner: Mutex<SlotInner>,
    signal: Condvar,
}

impl TransactionSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Idle,
                stopped: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Reserve the slot before writing a request
    pub fn arm(&self) {
        self.inner.lock().state = SlotState::Armed { early: None };
    }

    /// Release a reservation after a failed write
    pub fn disarm(&self) {
        self.inner.lock().state = SlotState::Idle;
    }

    /// Place a written request
    pub fn occupy(&self, request: Request) -> Placement {
        let mut inner = self.inner.lock();
        let early = match std::mem::replace(&mut inner.state, SlotState::Idle) {
            SlotState::Armed { early } => early,
            _ => None,
        };

        if let Some(pdu) = early {
            match request.pdu().decode_response(&pdu) {
                Ok(outcome) => return Placement::Answered(request, outcome),
                Err(err) => {
                    warn!("Dropping malformed response {}: {}", hex::encode(&pdu), err);
                }
            }
        }

        inner.state = SlotState::Pending(request);
        Placement::Pending
    }

    /// Hand a response PDU to the slot
    pub fn deliver(&self, pdu: &[u8]) -> Delivery {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.state, SlotState::Idle) {
            SlotState::Pending(request) => match request.pdu().decode_response(pdu) {
                Ok(outcome) => {
                    inner.state = SlotState::Completing;
                    Delivery::Answered(request, outcome)
                }
                Err(err) => {
                    inner.state = SlotState::Pending(request);
                    Delivery::Malformed(err)
                }
            },
            SlotState::Armed { early: None } => {
                inner.state = SlotState::Armed {
                    early: Some(pdu.to_vec()),
                };
                Delivery::Parked
            }
            other => {
                // Armed with a parked response already, or nothing in flight
                inner.state = other;
                Delivery::Unsolicited
            }
        }
    }

    /// Mark a transaction answered through [`Delivery::Answered`] as done
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SlotState::Completing) {
            inner.state = SlotState::Completed;
        }
        self.signal.notify_all();
    }

    /// Wait for the pending transaction to end, at most until `deadline`
    pub fn wait(&self, deadline: Instant) -> SlotWait {
        let mut inner = self.inner.lock();
        loop {
            match std::mem::replace(&mut inner.state, SlotState::Idle) {
                SlotState::Pending(request) => {
                    if inner.stopped {
                        return SlotWait::Cancelled(request);
                    }
                    if Instant::now() >= deadline {
                        return SlotWait::TimedOut(request);
                    }
                    inner.state = SlotState::Pending(request);
                    self.signal.wait_until(&mut inner, deadline);
                }
                SlotState::Completing => {
                    inner.state = SlotState::Completing;
                    if inner.stopped {
                        return SlotWait::Stopped;
                    }
                    // The handler may run longer than the deadline
                    self.signal.wait(&mut inner);
                }
                SlotState::Completed | SlotState::Idle | SlotState::Armed { .. } => {
                    return SlotWait::Completed;
                }
            }
        }
    }

    /// Wake the waiter for good; a pending request comes back as cancelled
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        self.signal.notify_all();
    }

    /// Whether a request is in flight
    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        !matches!(self.inner.lock().state, SlotState::Idle | SlotState::Completed)
    }
}
