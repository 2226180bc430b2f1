//! Subscription types.

use crate::error::BrokerError;
use crate::types::{BrokerSubId, Notification};
use std::fmt;
use std::sync::Arc;

/// Receiver of notifications for one caller.
///
/// Whatever context the caller needs is captured by the closure.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&Notification) + Send + Sync>);

impl Listener {
    pub fn new(f: impl Fn(&Notification) + Send + Sync + 'static) -> Self {
        Listener(Arc::new(f))
    }

    pub fn call(&self, notification: &Notification) {
        (self.0)(notification)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener(..)")
    }
}

/// What a caller wants to subscribe to.
#[derive(Clone, Debug)]
pub struct SubscriptionRequest {
    pub expression: String,
    pub key_names: Vec<String>,
    pub listener: Listener,
}

impl SubscriptionRequest {
    pub fn new(expression: impl Into<String>, listener: Listener) -> Self {
        Self {
            expression: expression.into(),
            key_names: Vec::new(),
            listener,
        }
    }

    pub fn with_keys(mut self, key_names: Vec<String>) -> Self {
        self.key_names = key_names;
        self
    }
}

/// Lifecycle of a registry entry. An entry that is done is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Has at least one caller.
    Active,
    /// Every caller has released it; waiting for the broker to forget it.
    PendingDelete,
}

/// Snapshot of one broker-side subscription, for diagnostics and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub expression: String,
    /// Keys sent to the broker: the ordered union of every caller's keys.
    pub key_names: Vec<String>,
    pub listeners: usize,
    pub state: SubscriptionState,
    /// Set once the broker has acknowledged the add.
    pub broker_id: Option<BrokerSubId>,
    /// A request is in flight.
    pub is_pending: bool,
    /// The broker refused the last request; no automatic retry until the
    /// next caller change or reconnect.
    pub rejected: bool,
}

/// A broker refusal worth telling the user about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub expression: String,
    pub error: BrokerError,
}
