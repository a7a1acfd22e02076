//! Subscriber lists for server pushes and device status
//!
//! A broadcast clones the subscriber list under the read lock and calls each
//! subscriber after the lock is released, so a callback may add or remove
//! subscriptions (its own included) while it runs.
use super::request::run_handler;
use crate::att::HandleValue;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned on registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Device status change reported to status subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Result of authorization
    Authorization {
        /// Whether access was granted
        granted: bool,
    },
    /// The selected device was unplugged
    Detached,
}

/// Value notification callback
pub type NotificationCallback = Arc<dyn Fn(&HandleValue) + Send + Sync>;

/// Indication callback
pub type IndicationCallback = Arc<dyn Fn(&HandleValue) + Send + Sync>;

/// Device status callback
pub type StatusCallback = Arc<dyn Fn(&DeviceStatus) + Send + Sync>;

/// One kind of subscriber list
pub struct CallbackList<T: ?Sized> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn Fn(&T) + Send + Sync>)>>,
}

impl<T: ?Sized> Default for CallbackList<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> CallbackList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    pub fn add(&self, callback: Arc<dyn Fn(&T) + Send + Sync>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, callback));
        id
    }

    /// Unregister a subscriber; false if it was not registered
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Deliver an event to every subscriber registered when the broadcast
    /// started; returns how many were called
    pub fn broadcast(&self, event: &T) -> usize {
        let snapshot: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &snapshot {
            run_handler("Subscriber", || callback(event));
        }
        snapshot.len()
    }
}

/// All subscriber lists of one connector
#[derive(Default)]
pub struct CallbackRegistry {
    /// Handle Value Notification subscribers
    pub notifications: CallbackList<HandleValue>,
    /// Handle Value Indication subscribers
    pub indications: CallbackList<HandleValue>,
    /// Device status subscribers
    pub status: CallbackList<DeviceStatus>,
}
