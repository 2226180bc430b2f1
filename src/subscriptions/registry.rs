//! Registry of broker subscriptions, shared by expression.
//!
//! Each distinct expression maps to one entry, and every caller that
//! subscribes to it becomes a listener on that entry. An entry keeps a
//! record of what the broker has acknowledged and brings the broker in line
//! with the callers' wishes one request at a time, so acknowledgments for an
//! entry always arrive in the order they were requested.

use super::types::{
    Listener, Rejection, SubscriptionInfo, SubscriptionRequest, SubscriptionState,
};
use crate::error::{BrokerError, Result, TickerError};
use crate::keys::{diff, key_set, KeySet, KeySnapshot, KeyTable, KeyUsage};
use crate::transport::{SubscriptionChange, Transport};
use crate::types::{BrokerHandle, BrokerSubId, RequestId, SubscriptionHandle};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transport access for the duration of one call.
///
/// `handle` is `Some` only while connected. The registry never keeps it.
pub struct BrokerLink<'a> {
    pub transport: &'a mut dyn Transport,
    pub handle: Option<BrokerHandle>,
}

/// Acknowledgment of a subscription request.
#[derive(Clone, Debug)]
pub enum Ack {
    Added(std::result::Result<BrokerSubId, BrokerError>),
    Modified(std::result::Result<(), BrokerError>),
    Deleted(std::result::Result<(), BrokerError>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EntryId(u64);

/// One caller of an entry.
struct Slot {
    handle: SubscriptionHandle,
    key_names: Vec<String>,
    listener: Listener,
}

/// What the broker holds (or will hold once a request completes).
#[derive(Clone)]
struct BrokerView {
    expression: String,
    key_names: Vec<String>,
    keys: Arc<KeyTable>,
    accept_insecure: bool,
}

struct Acked {
    id: BrokerSubId,
    view: BrokerView,
}

enum PendingOp {
    Add(BrokerView),
    Modify(BrokerView),
    Delete,
}

struct Pending {
    request: RequestId,
    op: PendingOp,
}

struct Entry {
    expression: String,
    /// Ordered union of the slots' key names.
    key_names: Vec<String>,
    slots: Vec<Slot>,
    state: SubscriptionState,
    broker: Option<Acked>,
    pending: Option<Pending>,
    rejected: bool,
}

impl Entry {
    fn new(expression: String) -> Self {
        Self {
            expression,
            key_names: Vec::new(),
            slots: Vec::new(),
            state: SubscriptionState::Active,
            broker: None,
            pending: None,
            rejected: false,
        }
    }

    /// Recompute the merged key names. Returns true if they changed.
    fn refresh_key_names(&mut self) -> bool {
        let mut seen = HashSet::new();
        let merged: Vec<String> = self
            .slots
            .iter()
            .flat_map(|slot| slot.key_names.iter())
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect();

        if merged == self.key_names {
            return false;
        }
        self.key_names = merged;
        self.rejected = false;
        true
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            expression: self.expression.clone(),
            key_names: self.key_names.clone(),
            listeners: self.slots.len(),
            state: self.state,
            broker_id: self.broker.as_ref().map(|acked| acked.id),
            is_pending: self.pending.is_some(),
            rejected: self.rejected,
        }
    }
}

/// Next request needed to bring an entry in line with the broker.
enum Action {
    Nothing,
    Finalize,
    Refresh(BrokerView),
    Add(BrokerView, KeySet),
    Modify(BrokerSubId, BrokerView, SubscriptionChange),
    Delete(BrokerSubId),
}

/// Maps caller subscriptions onto deduplicated broker subscriptions.
pub struct SubscriptionRegistry {
    entries: HashMap<EntryId, Entry>,
    by_expression: HashMap<String, EntryId>,
    by_broker_id: HashMap<BrokerSubId, EntryId>,
    handles: HashMap<SubscriptionHandle, EntryId>,
    requests: HashMap<RequestId, EntryId>,
    keys: Arc<KeyTable>,
    next_entry: u64,
    next_handle: u64,
    next_request: u64,
}

impl SubscriptionRegistry {
    pub fn new(keys: Arc<KeyTable>) -> Self {
        Self {
            entries: HashMap::new(),
            by_expression: HashMap::new(),
            by_broker_id: HashMap::new(),
            handles: HashMap::new(),
            requests: HashMap::new(),
            keys,
            next_entry: 1,
            next_handle: 1,
            next_request: 1,
        }
    }

    /// Register a caller. Callers with identical expressions share one
    /// broker subscription.
    pub fn subscribe(
        &mut self,
        request: SubscriptionRequest,
        link: &mut BrokerLink<'_>,
    ) -> Result<SubscriptionHandle> {
        validate(link, &request.expression)?;

        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;

        let id = match self.by_expression.get(&request.expression) {
            Some(&id) => id,
            None => self.create_entry(request.expression.clone()),
        };
        info!(expression = %request.expression, ?handle, "subscribe");

        self.attach(
            id,
            Slot {
                handle,
                key_names: request.key_names,
                listener: request.listener,
            },
        );
        self.reconcile(id, link);
        Ok(handle)
    }

    /// Release a caller. The broker subscription is deleted once no caller
    /// remains; if a request is still in flight the delete waits for it.
    pub fn unsubscribe(
        &mut self,
        handle: SubscriptionHandle,
        link: &mut BrokerLink<'_>,
    ) -> Result<()> {
        let id = *self
            .handles
            .get(&handle)
            .ok_or(TickerError::UnknownSubscription(handle))?;
        info!(?handle, "unsubscribe");

        self.detach(id, handle);
        self.reconcile(id, link);
        Ok(())
    }

    /// Update a caller in place from a freshly built request.
    ///
    /// Matching expressions keep the existing broker subscription; only a
    /// change of keys or expression reaches the broker, as a modify.
    pub fn update_from(
        &mut self,
        target: SubscriptionHandle,
        source: SubscriptionRequest,
        link: &mut BrokerLink<'_>,
    ) -> Result<()> {
        let id = *self
            .handles
            .get(&target)
            .ok_or(TickerError::UnknownSubscription(target))?;
        let entry = self
            .entries
            .get(&id)
            .ok_or(TickerError::UnknownSubscription(target))?;

        let same_expression = entry.expression == source.expression;
        let sole_caller = entry.slots.len() == 1;
        if !same_expression {
            validate(link, &source.expression)?;
        }

        let slot = Slot {
            handle: target,
            key_names: source.key_names,
            listener: source.listener,
        };

        if same_expression {
            self.replace_slot(id, slot);
            self.reconcile(id, link);
            return Ok(());
        }

        match self.by_expression.get(&source.expression).copied() {
            Some(other) => {
                debug!(?target, expression = %source.expression, "moving to existing subscription");
                self.detach(id, target);
                self.attach(other, slot);
                self.reconcile(id, link);
                self.reconcile(other, link);
            }
            None if sole_caller => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    debug!(from = %entry.expression, to = %source.expression, "changing expression");
                    self.by_expression.remove(&entry.expression);
                    entry.expression = source.expression.clone();
                    entry.rejected = false;
                    self.by_expression.insert(source.expression, id);
                }
                self.replace_slot(id, slot);
                self.reconcile(id, link);
            }
            None => {
                self.detach(id, target);
                let other = self.create_entry(source.expression);
                self.attach(other, slot);
                self.reconcile(id, link);
                self.reconcile(other, link);
            }
        }
        Ok(())
    }

    /// Handle the broker's answer to a request issued by this registry.
    pub fn on_ack(
        &mut self,
        request: RequestId,
        ack: Ack,
        link: &mut BrokerLink<'_>,
    ) -> Option<Rejection> {
        let Some(id) = self.requests.remove(&request) else {
            debug!(?request, "acknowledgment for unknown request");
            return None;
        };
        let entry = self.entries.get_mut(&id)?;

        let pending = match entry.pending.take() {
            Some(pending) if pending.request == request => pending,
            other => {
                warn!(?request, "acknowledgment out of order");
                entry.pending = other;
                return None;
            }
        };

        let mut rejection = None;
        match (pending.op, ack) {
            (PendingOp::Add(view), Ack::Added(Ok(sub_id))) => {
                debug!(expression = %view.expression, %sub_id, "subscription added");
                self.by_broker_id.insert(sub_id, id);
                entry.broker = Some(Acked { id: sub_id, view });
            }
            (PendingOp::Modify(view), Ack::Modified(Ok(()))) => {
                debug!(expression = %view.expression, "subscription modified");
                if let Some(acked) = entry.broker.as_mut() {
                    acked.view = view;
                }
            }
            (PendingOp::Add(view), Ack::Added(Err(error)))
            | (PendingOp::Modify(view), Ack::Modified(Err(error))) => {
                warn!(expression = %view.expression, %error, "subscription rejected");
                entry.rejected = true;
                if entry.state == SubscriptionState::Active {
                    rejection = Some(Rejection {
                        expression: view.expression,
                        error,
                    });
                }
            }
            (PendingOp::Delete, Ack::Deleted(result)) => {
                if let Err(error) = result {
                    warn!(expression = %entry.expression, %error, "delete refused, forgetting subscription");
                }
                if let Some(acked) = entry.broker.take() {
                    self.by_broker_id.remove(&acked.id);
                }
            }
            (_, ack) => {
                warn!(?request, ?ack, "acknowledgment does not match the pending request");
            }
        }

        self.reconcile(id, link);
        rejection
    }

    /// The connection is gone and the broker has forgotten everything.
    pub fn on_disconnect(&mut self) {
        self.requests.clear();
        self.by_broker_id.clear();

        let mut done = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            entry.broker = None;
            entry.pending = None;
            entry.rejected = false;
            if entry.state == SubscriptionState::PendingDelete {
                done.push(*id);
            }
        }
        for id in done {
            self.finalize(id);
        }
    }

    /// Submit every live subscription on a fresh connection. Returns the
    /// number of add requests issued.
    pub fn on_reconnect(&mut self, link: &mut BrokerLink<'_>) -> usize {
        self.on_disconnect();

        let mut ids: Vec<EntryId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.reconcile(id, link);
        }

        let issued = self
            .entries
            .values()
            .filter(|entry| matches!(entry.pending, Some(Pending { op: PendingOp::Add(_), .. })))
            .count();
        info!(subscriptions = issued, "resubscribed");
        issued
    }

    /// Swap in a new key table and push the resulting key changes.
    pub fn set_key_table(&mut self, keys: Arc<KeyTable>, link: &mut BrokerLink<'_>) {
        self.keys = keys;

        let mut ids: Vec<EntryId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.reconcile(id, link);
        }
    }

    /// Release every caller.
    pub fn unsubscribe_all(&mut self, link: &mut BrokerLink<'_>) {
        let mut handles: Vec<SubscriptionHandle> = self.handles.keys().copied().collect();
        handles.sort_unstable_by_key(|handle| handle.0);
        for handle in handles {
            // Handles come from the map, so this cannot miss.
            let _ = self.unsubscribe(handle, link);
        }
    }

    pub fn key_table(&self) -> &Arc<KeyTable> {
        &self.keys
    }

    /// Listeners to call for a notification on `subscription`.
    pub fn listeners_for(&self, subscription: BrokerSubId) -> Vec<Listener> {
        self.by_broker_id
            .get(&subscription)
            .and_then(|id| self.entries.get(id))
            .filter(|entry| entry.state == SubscriptionState::Active)
            .map(|entry| entry.slots.iter().map(|slot| slot.listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn info(&self, handle: SubscriptionHandle) -> Option<SubscriptionInfo> {
        self.handles
            .get(&handle)
            .and_then(|id| self.entries.get(id))
            .map(Entry::info)
    }

    /// All entries, sorted by expression.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self.entries.values().map(Entry::info).collect();
        infos.sort_by(|a, b| a.expression.cmp(&b.expression));
        infos
    }

    /// Number of broker-side subscriptions tracked, including ones waiting
    /// to be deleted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- Internals ---

    fn create_entry(&mut self, expression: String) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.by_expression.insert(expression.clone(), id);
        self.entries.insert(id, Entry::new(expression));
        id
    }

    fn attach(&mut self, id: EntryId, slot: Slot) {
        if let Some(entry) = self.entries.get_mut(&id) {
            self.handles.insert(slot.handle, id);
            entry.slots.push(slot);
            entry.state = SubscriptionState::Active;
            entry.rejected = false;
            entry.refresh_key_names();
        }
    }

    fn detach(&mut self, id: EntryId, handle: SubscriptionHandle) {
        self.handles.remove(&handle);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.slots.retain(|slot| slot.handle != handle);
            if entry.slots.is_empty() {
                debug!(expression = %entry.expression, "last caller released");
                entry.state = SubscriptionState::PendingDelete;
            } else {
                entry.refresh_key_names();
            }
        }
    }

    fn replace_slot(&mut self, id: EntryId, slot: Slot) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(existing) = entry.slots.iter_mut().find(|s| s.handle == slot.handle) {
                *existing = slot;
            }
            entry.refresh_key_names();
        }
    }

    fn finalize(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            debug!(expression = %entry.expression, "subscription done");
            if self.by_expression.get(&entry.expression) == Some(&id) {
                self.by_expression.remove(&entry.expression);
            }
            if let Some(acked) = entry.broker {
                self.by_broker_id.remove(&acked.id);
            }
        }
    }

    fn plan(&self, id: EntryId, connected: bool) -> Action {
        let Some(entry) = self.entries.get(&id) else {
            return Action::Nothing;
        };
        if entry.pending.is_some() {
            return Action::Nothing;
        }

        if entry.state == SubscriptionState::PendingDelete {
            return match &entry.broker {
                None => Action::Finalize,
                Some(acked) if connected => Action::Delete(acked.id),
                Some(_) => Action::Nothing,
            };
        }
        if !connected || entry.rejected {
            return Action::Nothing;
        }

        let keys = key_set(&self.keys, &entry.key_names, KeyUsage::Subscription);
        let target = BrokerView {
            expression: entry.expression.clone(),
            key_names: entry.key_names.clone(),
            keys: Arc::clone(&self.keys),
            accept_insecure: keys.is_empty(),
        };

        let Some(acked) = &entry.broker else {
            return Action::Add(target, keys);
        };

        let delta = diff(
            KeySnapshot::new(&acked.view.keys, &acked.view.key_names),
            KeySnapshot::new(&target.keys, &target.key_names),
            KeyUsage::Subscription,
        );
        let expression = (acked.view.expression != target.expression)
            .then(|| target.expression.clone());
        let accept_insecure =
            (acked.view.accept_insecure != target.accept_insecure).then_some(target.accept_insecure);

        if expression.is_none() && delta.is_empty() && accept_insecure.is_none() {
            return Action::Refresh(target);
        }
        Action::Modify(
            acked.id,
            target,
            SubscriptionChange {
                expression,
                keys: delta,
                accept_insecure,
            },
        )
    }

    /// Issue whatever request the entry needs next, if any.
    fn reconcile(&mut self, id: EntryId, link: &mut BrokerLink<'_>) {
        let action = self.plan(id, link.handle.is_some());

        let (request, op) = match (action, link.handle) {
            (Action::Nothing, _) => return,
            (Action::Finalize, _) => {
                self.finalize(id);
                return;
            }
            (Action::Refresh(view), _) => {
                if let Some(acked) = self.entries.get_mut(&id).and_then(|e| e.broker.as_mut()) {
                    acked.view = view;
                }
                return;
            }
            (_, None) => return,
            (Action::Add(view, keys), Some(handle)) => {
                let request = self.next_request_id();
                debug!(expression = %view.expression, ?request, keys = keys.len(), "add subscription");
                link.transport.add_subscription(
                    handle,
                    request,
                    &view.expression,
                    &keys,
                    view.accept_insecure,
                );
                (request, PendingOp::Add(view))
            }
            (Action::Modify(sub_id, view, change), Some(handle)) => {
                let request = self.next_request_id();
                debug!(
                    %sub_id,
                    ?request,
                    adding = change.keys.to_add.len(),
                    removing = change.keys.to_remove.len(),
                    "modify subscription"
                );
                link.transport
                    .modify_subscription(handle, request, sub_id, &change);
                (request, PendingOp::Modify(view))
            }
            (Action::Delete(sub_id), Some(handle)) => {
                let request = self.next_request_id();
                debug!(%sub_id, ?request, "delete subscription");
                link.transport.delete_subscription(handle, request, sub_id);
                (request, PendingOp::Delete)
            }
        };

        self.requests.insert(request, id);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.pending = Some(Pending { request, op });
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        request
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(KeyTable::new()))
    }
}

fn validate(link: &BrokerLink<'_>, expression: &str) -> Result<()> {
    link.transport
        .validate_expression(expression)
        .map_err(|reason| TickerError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        })
}
