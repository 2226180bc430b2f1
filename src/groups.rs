//! Group subscriptions built from the configured group list.
//!
//! Each group is one subscription whose listener decodes ticker messages and
//! forwards them to a channel. Reloading the group list keeps broker
//! subscriptions for groups whose expression did not change.

use crate::client::Client;
use crate::config::GroupRecord;
use crate::message::TickerMessage;
use crate::subscriptions::{Listener, SubscriptionRequest};
use crate::types::SubscriptionHandle;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

/// A decoded message for one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupDelivery {
    pub message: TickerMessage,
    /// Open the message's attachment without asking.
    pub auto_mime: bool,
}

/// Result of a reload.
#[derive(Clone, Debug, Default)]
pub struct GroupReloadResult {
    /// Groups that kept their subscription.
    pub updated: Vec<String>,
    /// Groups subscribed for the first time.
    pub added: Vec<String>,
    /// Groups no longer configured.
    pub removed: Vec<String>,
    /// Groups that could not be subscribed, with the reason.
    pub errors: Vec<(String, String)>,
}

struct GroupSlot {
    record: GroupRecord,
    handle: SubscriptionHandle,
}

/// The live set of group subscriptions, in menu order.
pub struct GroupSubscriptions {
    groups: Vec<GroupSlot>,
    sender: Sender<GroupDelivery>,
}

impl GroupSubscriptions {
    pub fn new() -> (Self, Receiver<GroupDelivery>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                groups: Vec::new(),
                sender,
            },
            receiver,
        )
    }

    /// Replace the group list.
    ///
    /// A group whose expression matches an existing group takes over that
    /// subscription through [`Client::update_from`]. New groups are
    /// subscribed and groups no longer listed are unsubscribed. The new list
    /// order is kept.
    pub fn reload(&mut self, client: &Client, records: Vec<GroupRecord>) -> GroupReloadResult {
        let mut result = GroupReloadResult::default();
        let mut old = std::mem::take(&mut self.groups);
        let mut next = Vec::with_capacity(records.len());

        for record in records {
            let request = self.request_for(&record);

            if let Some(pos) = old
                .iter()
                .position(|slot| slot.record.expression == record.expression)
            {
                let slot = old.remove(pos);
                match client.update_from(slot.handle, request) {
                    Ok(()) => {
                        result.updated.push(record.name.clone());
                        next.push(GroupSlot {
                            record,
                            handle: slot.handle,
                        });
                    }
                    Err(e) => {
                        warn!(group = %record.name, error = %e, "group update failed");
                        result.errors.push((record.name, e.to_string()));
                    }
                }
                continue;
            }

            match client.subscribe(request) {
                Ok(handle) => {
                    result.added.push(record.name.clone());
                    next.push(GroupSlot { record, handle });
                }
                Err(e) => {
                    warn!(group = %record.name, error = %e, "group subscribe failed");
                    result.errors.push((record.name, e.to_string()));
                }
            }
        }

        for slot in old {
            if let Err(e) = client.unsubscribe(slot.handle) {
                warn!(group = %slot.record.name, error = %e, "group unsubscribe failed");
            }
            result.removed.push(slot.record.name);
        }

        self.groups = next;
        info!(
            groups = self.groups.len(),
            added = result.added.len(),
            removed = result.removed.len(),
            "groups reloaded"
        );
        result
    }

    /// Unsubscribe every group.
    pub fn clear(&mut self, client: &Client) {
        for slot in self.groups.drain(..) {
            if let Err(e) = client.unsubscribe(slot.handle) {
                warn!(group = %slot.record.name, error = %e, "group unsubscribe failed");
            }
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupRecord> {
        self.groups.iter().map(|slot| &slot.record)
    }

    /// Names of the groups shown in the send menu, in order.
    pub fn menu(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|slot| slot.record.in_menu)
            .map(|slot| slot.record.name.as_str())
            .collect()
    }

    pub fn handle(&self, name: &str) -> Option<SubscriptionHandle> {
        self.groups
            .iter()
            .find(|slot| slot.record.name == name)
            .map(|slot| slot.handle)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn request_for(&self, record: &GroupRecord) -> SubscriptionRequest {
        let group = record.clone();
        let sender = self.sender.clone();
        let listener = Listener::new(move |notification| {
            if let Some(message) = TickerMessage::decode(notification, &group) {
                // Nobody listening is not an error.
                let _ = sender.send(GroupDelivery {
                    message,
                    auto_mime: group.auto_mime,
                });
            }
        });
        SubscriptionRequest::new(record.expression.clone(), listener)
            .with_keys(record.key_names.clone())
    }
}
