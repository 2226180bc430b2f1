//! Client tying the connection and subscription registry together.

use crate::config::{ClientConfig, KeyRecord};
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::error::Result;
use crate::keys::{key_set, KeyTable, KeyUsage};
use crate::subscriptions::{
    Ack, BrokerLink, Listener, Rejection, SubscriptionInfo, SubscriptionRegistry,
    SubscriptionRequest,
};
use crate::transport::{Transport, TransportEvent};
use crate::types::{ConnectionState, Notification, SubscriptionHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status changes for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Reconnected,
    /// Could not connect; retrying in the background.
    ConnectFailed { reason: String },
    /// Lost the connection; reconnecting.
    Disconnected { reason: String },
    /// The broker refused a subscription.
    SubscriptionRejected { expression: String, reason: String },
}

impl From<ConnectionEvent> for ClientEvent {
    fn from(event: ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Connected => ClientEvent::Connected,
            ConnectionEvent::Reconnected => ClientEvent::Reconnected,
            ConnectionEvent::ConnectFailed { reason } => ClientEvent::ConnectFailed { reason },
            ConnectionEvent::Disconnected { reason } => ClientEvent::Disconnected { reason },
        }
    }
}

impl From<Rejection> for ClientEvent {
    fn from(rejection: Rejection) -> Self {
        ClientEvent::SubscriptionRejected {
            expression: rejection.expression,
            reason: rejection.error.to_string(),
        }
    }
}

struct Inner {
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    transport: Box<dyn Transport>,
}

impl Inner {
    fn link(&mut self) -> (&mut SubscriptionRegistry, BrokerLink<'_>) {
        let link = BrokerLink {
            transport: self.transport.as_mut(),
            handle: self.connection.handle(),
        };
        (&mut self.registry, link)
    }
}

/// Broker client.
///
/// The client is a reactor: it never blocks and never spawns threads. The
/// host event loop calls [`Client::handle_event`] with every completion from
/// the transport. All state lives behind a single mutex, so the client may
/// be shared across threads; listeners are called after the lock is
/// released and may call back into the client.
pub struct Client {
    inner: Mutex<Inner>,
    events_tx: Sender<ClientEvent>,
    events_rx: Receiver<ClientEvent>,
}

impl Client {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = unbounded();

        Ok(Self {
            inner: Mutex::new(Inner {
                connection: ConnectionManager::new(&config),
                registry: SubscriptionRegistry::default(),
                transport: Box::new(transport),
            }),
            events_tx,
            events_rx,
        })
    }

    /// Receiver for status events.
    pub fn events(&self) -> Receiver<ClientEvent> {
        self.events_rx.clone()
    }

    /// Begin connecting.
    pub fn start(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.connection.connect(inner.transport.as_mut());
    }

    /// Feed a transport completion or broker event.
    pub fn handle_event(&self, event: TransportEvent) {
        let mut deliver: Option<(Vec<Listener>, Notification)> = None;

        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            match event {
                TransportEvent::ConnectResult { attempt, result } => {
                    let event =
                        inner
                            .connection
                            .on_connect_result(inner.transport.as_mut(), attempt, result);
                    let connected = matches!(
                        event,
                        Some(ConnectionEvent::Connected | ConnectionEvent::Reconnected)
                    );
                    self.emit(event);
                    if connected {
                        let (registry, mut link) = inner.link();
                        registry.on_reconnect(&mut link);
                    }
                }
                TransportEvent::RetryTimer => {
                    inner.connection.on_retry_timer(inner.transport.as_mut());
                }
                TransportEvent::ConnectionLost(error) => {
                    let event = inner
                        .connection
                        .on_connection_lost(inner.transport.as_mut(), error);
                    if event.is_some() {
                        inner.registry.on_disconnect();
                    }
                    self.emit(event);
                }
                TransportEvent::SubscriptionAdded { request, result } => {
                    let (registry, mut link) = inner.link();
                    self.emit(registry.on_ack(request, Ack::Added(result), &mut link));
                }
                TransportEvent::SubscriptionModified { request, result } => {
                    let (registry, mut link) = inner.link();
                    self.emit(registry.on_ack(request, Ack::Modified(result), &mut link));
                }
                TransportEvent::SubscriptionDeleted { request, result } => {
                    let (registry, mut link) = inner.link();
                    self.emit(registry.on_ack(request, Ack::Deleted(result), &mut link));
                }
                TransportEvent::Notification {
                    subscription,
                    notification,
                } => {
                    let listeners = inner.registry.listeners_for(subscription);
                    if listeners.is_empty() {
                        debug!(%subscription, "notification for unknown subscription");
                    } else {
                        deliver = Some((listeners, notification));
                    }
                }
                TransportEvent::NotifySent { result } => {
                    if let Err(error) = result {
                        warn!(%error, "notification not sent");
                    }
                }
            }
        }

        if let Some((listeners, notification)) = deliver {
            for listener in listeners {
                listener.call(&notification);
            }
        }
    }

    /// Subscribe. Fails at once if the expression does not parse.
    pub fn subscribe(&self, request: SubscriptionRequest) -> Result<SubscriptionHandle> {
        let mut guard = self.inner.lock();
        let (registry, mut link) = guard.link();
        registry.subscribe(request, &mut link)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let mut guard = self.inner.lock();
        let (registry, mut link) = guard.link();
        registry.unsubscribe(handle, &mut link)
    }

    /// Replace a subscription's expression, keys and listener in place.
    pub fn update_from(&self, target: SubscriptionHandle, source: SubscriptionRequest) -> Result<()> {
        let mut guard = self.inner.lock();
        let (registry, mut link) = guard.link();
        registry.update_from(target, source, &mut link)
    }

    /// Publish a notification signed with `key_names`.
    ///
    /// Returns false without queueing when not connected.
    pub fn send(&self, notification: &Notification, key_names: &[String]) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(handle) = inner.connection.handle() else {
            debug!("not connected, dropping notification");
            return false;
        };

        let keys = key_set(inner.registry.key_table(), key_names, KeyUsage::Notification);
        inner
            .transport
            .notify(handle, notification, &keys, keys.is_empty());
        true
    }

    /// Replace the key table and push key changes to affected subscriptions.
    pub fn reload_keys(&self, records: Vec<KeyRecord>) -> Result<()> {
        let table = Arc::new(KeyTable::from_records(records)?);
        info!(keys = table.len(), "reloading keys");

        let mut guard = self.inner.lock();
        let (registry, mut link) = guard.link();
        registry.set_key_table(table, &mut link);
        Ok(())
    }

    pub fn key_table(&self) -> Arc<KeyTable> {
        Arc::clone(self.inner.lock().registry.key_table())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().connection.state()
    }

    /// Delay the next failed connect attempt will wait.
    pub fn retry_delay(&self) -> Duration {
        self.inner.lock().connection.retry_delay()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.lock().registry.subscriptions()
    }

    pub fn subscription_info(&self, handle: SubscriptionHandle) -> Option<SubscriptionInfo> {
        self.inner.lock().registry.info(handle)
    }

    /// Close the connection. Subscriptions are kept locally but the client
    /// will not reconnect.
    pub fn disconnect(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.connection.disconnect(inner.transport.as_mut());
        inner.registry.on_disconnect();
    }

    /// Unsubscribe everything, then disconnect.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        {
            let (registry, mut link) = inner.link();
            registry.unsubscribe_all(&mut link);
        }
        inner.connection.disconnect(inner.transport.as_mut());
        inner.registry.on_disconnect();
        info!("client shut down");
    }

    fn emit(&self, event: Option<impl Into<ClientEvent>>) {
        if let Some(event) = event {
            // The client holds a receiver, so this cannot fail.
            let _ = self.events_tx.send(event.into());
        }
    }
}
