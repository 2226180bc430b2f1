//! # Tickertape
//!
//! Broker connection and subscription management for a scrolling-ticker
//! pub/sub client.
//!
//! ## Core Concepts
//!
//! - **Connection**: One outbound broker connection with bounded exponential
//!   backoff and automatic resubscription
//! - **Subscriptions**: Callers sharing an expression share one broker
//!   subscription; updates become minimal modify requests
//! - **Keys**: Named keys turned into broker key sets and diffed on change
//! - **Transport**: Fire-and-forget requests; completions are fed back as
//!   events, so the crate does no I/O of its own
//!
//! ## Example
//!
//! ```ignore
//! use tickertape::{Client, ClientConfig, Listener, SubscriptionRequest};
//!
//! let client = Client::new(ClientConfig::new("elvin://broker"), transport)?;
//! client.start();
//!
//! let chat = client.subscribe(SubscriptionRequest::new(
//!     "TICKERTAPE == \"Chat\"",
//!     Listener::new(|n| println!("{:?}", n)),
//! ))?;
//!
//! // In the host event loop:
//! client.handle_event(event);
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod groups;
pub mod keys;
pub mod message;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use client::{Client, ClientEvent};
pub use config::{ClientConfig, GroupRecord, KeyRecord};
pub use connection::{Backoff, ConnectionEvent, ConnectionManager};
pub use error::{BrokerError, Result, TickerError, TransportError};
pub use groups::{GroupDelivery, GroupReloadResult, GroupSubscriptions};
pub use keys::{
    diff, key_set, KeyData, KeyDelta, KeyEntry, KeyMaterial, KeyRole, KeyScheme, KeySet,
    KeySnapshot, KeyTable, KeyTuple, KeyUsage,
};
pub use message::TickerMessage;
pub use subscriptions::{
    Ack, BrokerLink, Listener, Rejection, SubscriptionInfo, SubscriptionRegistry,
    SubscriptionRequest, SubscriptionState,
};
pub use transport::{
    RecordingTransport, SubscriptionChange, Transport, TransportCall, TransportEvent,
};
pub use types::*;
