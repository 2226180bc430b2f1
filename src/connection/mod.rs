//! Connection to the notification broker.
//!
//! The manager never blocks: it issues connect requests through the
//! [`Transport`](crate::transport::Transport) and reacts to their results.
//! Failures are retried forever with a delay that doubles up to a ceiling.

mod backoff;
mod manager;

pub use backoff::Backoff;
pub use manager::{ConnectionEvent, ConnectionManager};
