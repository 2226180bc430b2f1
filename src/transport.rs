//! Boundary with the transport/event loop that owns the actual socket.
//!
//! Every request is fire-and-forget. Its outcome comes back later as a
//! [`TransportEvent`] that the host feeds to [`crate::Client::handle_event`],
//! carrying the [`RequestId`] or [`AttemptId`] it was issued with.

use crate::error::{BrokerError, TransportError};
use crate::keys::{KeyDelta, KeySet};
use crate::types::{AttemptId, BrokerHandle, BrokerSubId, Endpoint, Notification, RequestId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Changes to an existing broker subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Replacement expression, if it changed.
    pub expression: Option<String>,
    /// Key tuples to add and remove.
    pub keys: KeyDelta,
    /// New insecure-delivery flag, if it changed.
    pub accept_insecure: Option<bool>,
}

/// Requests the core issues to the broker connection.
pub trait Transport: Send {
    /// Check an expression against the broker's grammar without sending it.
    fn validate_expression(&self, expression: &str) -> Result<(), String>;

    /// Start connecting. Answered by [`TransportEvent::ConnectResult`].
    fn connect(&mut self, attempt: AttemptId, endpoint: &Endpoint);

    /// Arrange for [`TransportEvent::RetryTimer`] after `delay`.
    fn schedule_retry(&mut self, delay: Duration);

    /// Close an established connection.
    fn disconnect(&mut self, handle: BrokerHandle);

    /// Answered by [`TransportEvent::SubscriptionAdded`].
    fn add_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        expression: &str,
        keys: &KeySet,
        accept_insecure: bool,
    );

    /// Answered by [`TransportEvent::SubscriptionModified`].
    fn modify_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
        change: &SubscriptionChange,
    );

    /// Answered by [`TransportEvent::SubscriptionDeleted`].
    fn delete_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
    );

    /// Publish a notification. Answered by [`TransportEvent::NotifySent`].
    fn notify(
        &mut self,
        handle: BrokerHandle,
        notification: &Notification,
        keys: &KeySet,
        accept_insecure: bool,
    );
}

/// Completions and unsolicited events from the transport.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Outcome of a connect attempt.
    ConnectResult {
        attempt: AttemptId,
        result: Result<BrokerHandle, TransportError>,
    },
    /// A retry scheduled with [`Transport::schedule_retry`] is due.
    RetryTimer,
    /// An established connection failed.
    ConnectionLost(TransportError),
    SubscriptionAdded {
        request: RequestId,
        result: Result<BrokerSubId, BrokerError>,
    },
    SubscriptionModified {
        request: RequestId,
        result: Result<(), BrokerError>,
    },
    SubscriptionDeleted {
        request: RequestId,
        result: Result<(), BrokerError>,
    },
    /// A notification matched a subscription.
    Notification {
        subscription: BrokerSubId,
        notification: Notification,
    },
    NotifySent { result: Result<(), BrokerError> },
}

/// A request as seen by [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    Connect {
        attempt: AttemptId,
        endpoint: Endpoint,
    },
    ScheduleRetry(Duration),
    Disconnect(BrokerHandle),
    Add {
        handle: BrokerHandle,
        request: RequestId,
        expression: String,
        keys: KeySet,
        accept_insecure: bool,
    },
    Modify {
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
        change: SubscriptionChange,
    },
    Delete {
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
    },
    Notify {
        handle: BrokerHandle,
        notification: Notification,
        keys: KeySet,
        accept_insecure: bool,
    },
}

/// Transport that performs no I/O and records every request.
///
/// Useful for exercising a host's wiring without a broker. Expressions are
/// accepted when non-empty with balanced parentheses and double quotes.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests issued so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Drain the recorded requests.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

impl Transport for RecordingTransport {
    fn validate_expression(&self, expression: &str) -> Result<(), String> {
        if expression.trim().is_empty() {
            return Err("empty expression".to_string());
        }

        let mut depth = 0i32;
        let mut in_string = false;
        for c in expression.chars() {
            match c {
                '"' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("unbalanced ')'".to_string());
                    }
                }
                _ => {}
            }
        }

        if in_string {
            Err("unterminated string".to_string())
        } else if depth != 0 {
            Err("unbalanced '('".to_string())
        } else {
            Ok(())
        }
    }

    fn connect(&mut self, attempt: AttemptId, endpoint: &Endpoint) {
        self.record(TransportCall::Connect {
            attempt,
            endpoint: endpoint.clone(),
        });
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.record(TransportCall::ScheduleRetry(delay));
    }

    fn disconnect(&mut self, handle: BrokerHandle) {
        self.record(TransportCall::Disconnect(handle));
    }

    fn add_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        expression: &str,
        keys: &KeySet,
        accept_insecure: bool,
    ) {
        self.record(TransportCall::Add {
            handle,
            request,
            expression: expression.to_string(),
            keys: keys.clone(),
            accept_insecure,
        });
    }

    fn modify_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
        change: &SubscriptionChange,
    ) {
        self.record(TransportCall::Modify {
            handle,
            request,
            subscription,
            change: change.clone(),
        });
    }

    fn delete_subscription(
        &mut self,
        handle: BrokerHandle,
        request: RequestId,
        subscription: BrokerSubId,
    ) {
        self.record(TransportCall::Delete {
            handle,
            request,
            subscription,
        });
    }

    fn notify(
        &mut self,
        handle: BrokerHandle,
        notification: &Notification,
        keys: &KeySet,
        accept_insecure: bool,
    ) {
        self.record(TransportCall::Notify {
            handle,
            notification: notification.clone(),
            keys: keys.clone(),
            accept_insecure,
        });
    }
}
