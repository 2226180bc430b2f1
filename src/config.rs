//! Client configuration and the records handed over by the file parsers.

use crate::error::{Result, TickerError};
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
///
/// ```ignore
/// let config = ClientConfig::new("elvin://ticker.example.com")
///     .with_initial_retry_delay_ms(500)
///     .with_max_retry_delay_ms(60_000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker to connect to.
    pub endpoint: Endpoint,

    /// Delay before the first reconnect attempt.
    /// Default: 1000ms
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Ceiling for the reconnect delay.
    /// Default: 300000ms (5 minutes)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Growth factor applied to the delay after each failed attempt.
    /// Default: 2
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    5 * 60 * 1000
}

fn default_backoff_factor() -> u32 {
    2
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(endpoint),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_initial_retry_delay_ms(mut self, ms: u64) -> Self {
        self.initial_retry_delay_ms = ms;
        self
    }

    pub fn with_max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.max_retry_delay_ms = ms;
        self
    }

    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Check that the backoff parameters describe a growing, bounded delay.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.as_str().is_empty() {
            return Err(TickerError::Config("endpoint must not be empty".into()));
        }
        if self.initial_retry_delay_ms == 0 {
            return Err(TickerError::Config(
                "initial_retry_delay_ms must be positive".into(),
            ));
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(TickerError::Config(format!(
                "max_retry_delay_ms ({}) is below initial_retry_delay_ms ({})",
                self.max_retry_delay_ms, self.initial_retry_delay_ms
            )));
        }
        if self.backoff_factor < 2 {
            return Err(TickerError::Config(
                "backoff_factor must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// One group from the groups file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Name shown in the menu and on messages.
    pub name: String,
    /// Broker subscription expression.
    pub expression: String,
    /// Whether the group appears in the control panel's group menu.
    pub in_menu: bool,
    /// Whether attachments should be opened without asking.
    pub auto_mime: bool,
    /// Minimum display time in minutes.
    pub min_time: u32,
    /// Maximum display time in minutes.
    pub max_time: u32,
    /// Keys restricting which notifications are accepted.
    #[serde(default)]
    pub key_names: Vec<String>,
}

impl GroupRecord {
    /// A group subscribed to the conventional `TICKERTAPE == "<name>"`
    /// expression, in the menu, with 1..60 minute display times.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            expression: format!("TICKERTAPE == \"{}\"", name),
            name,
            in_menu: true,
            auto_mime: false,
            min_time: 1,
            max_time: 60,
            key_names: Vec::new(),
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn with_keys(mut self, key_names: Vec<String>) -> Self {
        self.key_names = key_names;
        self
    }
}

/// One key from the keys file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub name: String,
    pub is_private: bool,
    /// Raw secret for a private key, hash for a public key.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("name", &self.name)
            .field("is_private", &self.is_private)
            .field("len", &self.data.len())
            .finish()
    }
}
