//! Error types for the ticker core.

use crate::types::SubscriptionHandle;
use std::fmt;
use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid subscription expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Unknown subscription: {0:?}")]
    UnknownSubscription(SubscriptionHandle),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Client is disconnected")]
    Disconnected,
}

impl From<serde_json::Error> for TickerError {
    fn from(e: serde_json::Error) -> Self {
        TickerError::Serialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, TickerError>;

/// A failure reported by the transport while connecting or on an
/// established connection.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The broker refused a single subscription request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct BrokerError {
    pub code: i32,
    pub message: String,
}

impl BrokerError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker rejected request ({}): {}", self.code, self.message)
    }
}
