//! Routes inbound PDUs by opcode
use super::registry::CallbackRegistry;
use super::slot::{Delivery, TransactionSlot};
use crate::att::InboundPdu;
use std::sync::Arc;
use tracing::{debug, warn};

/// Releases the waiting send pump however the completion handler returns
struct FinishOnDrop<'a>(&'a TransactionSlot);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Fans inbound PDUs out to the transaction slot and the subscriber lists
pub(crate) struct Dispatcher {
    slot: Arc<TransactionSlot>,
    callbacks: Arc<CallbackRegistry>,
}

impl Dispatcher {
    pub fn new(slot: Arc<TransactionSlot>, callbacks: Arc<CallbackRegistry>) -> Self {
        Self { slot, callbacks }
    }

    /// Handle one PDU, opcode first
    pub fn dispatch(&self, pdu: &[u8]) {
        match InboundPdu::parse(pdu) {
            Ok(InboundPdu::Response(data)) => self.complete(data),
            Ok(InboundPdu::Indication(indication)) => {
                let delivered = self.callbacks.indications.broadcast(&indication);
                debug!(
                    "Indication on handle 0x{:04X} delivered to {} subscriber(s)",
                    indication.handle, delivered
                );
            }
            Ok(InboundPdu::Notification(notification)) => {
                let delivered = self.callbacks.notifications.broadcast(&notification);
                debug!(
                    "Notification on handle 0x{:04X} delivered to {} subscriber(s)",
                    notification.handle, delivered
                );
            }
            Err(err) => {
                warn!("Dropping inbound PDU {}: {}", hex::encode(pdu), err);
            }
        }
    }

    fn complete(&self, data: &[u8]) {
        match self.slot.deliver(data) {
            Delivery::Answered(request, outcome) => {
                debug!("Response 0x{:02X} completes {}", data[0], request.pdu().name());
                let _finish = FinishOnDrop(&self.slot);
                request.resolve(outcome);
            }
            Delivery::Parked => {
                debug!("Response 0x{:02X} arrived before its request was placed", data[0]);
            }
            Delivery::Unsolicited => {
                warn!("Dropping response with no request pending: {}", hex::encode(data));
            }
            Delivery::Malformed(err) => {
                warn!("Dropping malformed response {}: {}", hex::encode(data), err);
            }
        }
    }
}
