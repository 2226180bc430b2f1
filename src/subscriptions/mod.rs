//! Broker subscriptions shared by expression and kept across reconnects.
//!
//! The registry supports:
//! - One broker subscription per distinct expression, fanned out to every caller
//! - In-place updates that keep the broker-side id when only metadata changes
//! - Key changes pushed as minimal modify requests
//! - Resubmission of everything after a reconnect
//!
//! # Example
//!
//! ```ignore
//! let mut registry = SubscriptionRegistry::default();
//! let mut link = BrokerLink { transport: &mut transport, handle: Some(handle) };
//!
//! let request = SubscriptionRequest::new(
//!     "TICKERTAPE == \"Chat\"",
//!     Listener::new(|notification| println!("{:?}", notification)),
//! );
//! let sub = registry.subscribe(request, &mut link)?;
//!
//! // Later, when the broker answers:
//! registry.on_ack(request_id, Ack::Added(Ok(broker_id)), &mut link);
//! ```

mod registry;
mod types;

pub use registry::{Ack, BrokerLink, SubscriptionRegistry};
pub use types::{
    Listener, Rejection, SubscriptionInfo, SubscriptionRequest, SubscriptionState,
};
