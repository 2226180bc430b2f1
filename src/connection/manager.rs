//! Broker connection state machine.

use super::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::{AttemptId, BrokerHandle, ConnectionState, Endpoint};
use std::time::Duration;
use tracing::{debug, info, warn};

/// User-visible connection status changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful connection.
    Connected,
    /// Connection restored after a loss or failure.
    Reconnected,
    /// A connect attempt failed. Only reported for the first failure in a run.
    ConnectFailed { reason: String },
    /// An established connection was lost; reconnecting.
    Disconnected { reason: String },
}

/// Owns the single outbound connection and its reconnect loop.
pub struct ConnectionManager {
    endpoint: Endpoint,
    state: ConnectionState,
    /// Present iff `state == Connected`.
    handle: Option<BrokerHandle>,
    backoff: Backoff,
    has_connected: bool,
    /// Whether the current run of failures has been reported.
    failure_reported: bool,
    next_attempt: u64,
    in_flight: Option<AttemptId>,
}

impl ConnectionManager {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            state: ConnectionState::NeverConnected,
            handle: None,
            backoff: Backoff::new(
                config.initial_retry_delay(),
                config.max_retry_delay(),
                config.backoff_factor,
            ),
            has_connected: false,
            failure_reported: false,
            next_attempt: 1,
            in_flight: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> Option<BrokerHandle> {
        self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Delay the next failed attempt will wait before retrying.
    pub fn retry_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Start a connect attempt unless connected, shut down, or one is
    /// already outstanding.
    pub fn connect(&mut self, transport: &mut dyn Transport) {
        match self.state {
            ConnectionState::Disconnected => {
                debug!("connect ignored after shutdown");
                return;
            }
            ConnectionState::Connected => return,
            _ => {}
        }
        if self.in_flight.is_some() {
            return;
        }

        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        self.in_flight = Some(attempt);

        info!(endpoint = %self.endpoint, attempt = attempt.0, "connecting to broker");
        transport.connect(attempt, &self.endpoint);
    }

    /// Handle the outcome of a connect attempt.
    pub fn on_connect_result(
        &mut self,
        transport: &mut dyn Transport,
        attempt: AttemptId,
        result: Result<BrokerHandle, TransportError>,
    ) -> Option<ConnectionEvent> {
        if self.in_flight != Some(attempt) {
            debug!(attempt = attempt.0, "ignoring stale connect result");
            if let Ok(handle) = result {
                transport.disconnect(handle);
            }
            return None;
        }
        self.in_flight = None;

        match result {
            Ok(handle) => {
                let first = !self.has_connected;
                self.state = ConnectionState::Connected;
                self.handle = Some(handle);
                self.backoff.reset();
                self.has_connected = true;
                self.failure_reported = false;

                info!(endpoint = %self.endpoint, ?handle, "connected to broker");
                Some(if first {
                    ConnectionEvent::Connected
                } else {
                    ConnectionEvent::Reconnected
                })
            }
            Err(err) => {
                self.state = if self.has_connected {
                    ConnectionState::ReconnectFailed
                } else {
                    ConnectionState::NeverConnected
                };

                let event = if self.failure_reported {
                    None
                } else {
                    self.failure_reported = true;
                    Some(ConnectionEvent::ConnectFailed {
                        reason: err.to_string(),
                    })
                };

                let delay = self.backoff.advance();
                warn!(
                    endpoint = %self.endpoint,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "connect failed"
                );
                transport.schedule_retry(delay);
                event
            }
        }
    }

    /// A scheduled retry is due.
    pub fn on_retry_timer(&mut self, transport: &mut dyn Transport) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Disconnected => {
                debug!(state = ?self.state, "retry timer ignored");
            }
            _ => self.connect(transport),
        }
    }

    /// An established connection failed. Protocol errors and socket loss
    /// are handled the same way.
    pub fn on_connection_lost(
        &mut self,
        transport: &mut dyn Transport,
        error: TransportError,
    ) -> Option<ConnectionEvent> {
        if self.state != ConnectionState::Connected {
            debug!(error = %error, state = ?self.state, "connection error while not connected");
            return None;
        }

        self.handle = None;
        self.state = ConnectionState::LostConnection;
        // The loss itself is the user-visible report for this outage.
        self.failure_reported = true;
        warn!(endpoint = %self.endpoint, error = %error, "lost connection to broker");

        let event = ConnectionEvent::Disconnected {
            reason: error.to_string(),
        };
        self.connect(transport);
        Some(event)
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&mut self, transport: &mut dyn Transport) {
        if let Some(handle) = self.handle.take() {
            info!(endpoint = %self.endpoint, "disconnecting from broker");
            transport.disconnect(handle);
        }
        self.in_flight = None;
        self.state = ConnectionState::Disconnected;
    }
}
