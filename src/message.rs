//! Ticker messages carried in broker notifications.

use crate::config::GroupRecord;
use crate::types::{Notification, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Attribute names used by ticker notifications.
pub mod fields {
    pub const GROUP: &str = "TICKERTAPE";
    pub const USER: &str = "USER";
    pub const TEXT: &str = "TICKERTEXT";
    /// Display time in minutes.
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const MIME_TYPE: &str = "MIME_TYPE";
    pub const MIME_ARGS: &str = "MIME_ARGS";
    pub const MESSAGE_ID: &str = "Message-Id";
    pub const IN_REPLY_TO: &str = "In-Reply-To";
    pub const THREAD_ID: &str = "Thread-Id";
}

const ANONYMOUS: &str = "anonymous";

/// A message as shown in the scroller and history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMessage {
    pub group: String,
    pub user: String,
    pub text: String,
    /// Display time in minutes.
    pub timeout: u32,
    pub mime_type: Option<String>,
    pub mime_args: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub thread_id: Option<String>,
}

impl TickerMessage {
    pub fn new(
        group: impl Into<String>,
        user: impl Into<String>,
        text: impl Into<String>,
        timeout: u32,
    ) -> Self {
        Self {
            group: group.into(),
            user: user.into(),
            text: text.into(),
            timeout,
            mime_type: None,
            mime_args: None,
            message_id: None,
            in_reply_to: None,
            thread_id: None,
        }
    }

    /// Attach a MIME attachment description.
    pub fn with_mime(mut self, mime_type: impl Into<String>, mime_args: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self.mime_args = Some(mime_args.into());
        self
    }

    /// Give the message a fresh id derived from its content and the clock.
    pub fn with_generated_id(mut self) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(self.group.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        hasher.update(nanos.to_be_bytes());
        self.message_id = Some(hex::encode(&hasher.finalize()[..16]));
        self
    }

    /// Start a reply in the same group and thread.
    pub fn reply(&self, user: impl Into<String>, text: impl Into<String>) -> Self {
        let mut reply = TickerMessage::new(self.group.clone(), user, text, self.timeout);
        reply.in_reply_to = self.message_id.clone();
        reply.thread_id = self.thread_id.clone().or_else(|| self.message_id.clone());
        reply
    }

    /// Decode a notification delivered for `group`.
    ///
    /// Returns `None` when there is no text to show. The display time is
    /// clamped to the group's limits.
    pub fn decode(notification: &Notification, group: &GroupRecord) -> Option<Self> {
        let Some(text) = notification.get_str(fields::TEXT) else {
            debug!(group = %group.name, "notification without text, ignoring");
            return None;
        };

        let requested = match notification.get(fields::TIMEOUT) {
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            Some(value) => value.as_i64(),
            None => None,
        };
        let timeout = clamp_timeout(requested, group.min_time, group.max_time);

        let optional = |name: &str| notification.get_str(name).map(str::to_string);

        Some(Self {
            group: notification
                .get_str(fields::GROUP)
                .unwrap_or(group.name.as_str())
                .to_string(),
            user: notification
                .get_str(fields::USER)
                .unwrap_or(ANONYMOUS)
                .to_string(),
            text: text.to_string(),
            timeout,
            mime_type: optional(fields::MIME_TYPE),
            mime_args: optional(fields::MIME_ARGS),
            message_id: optional(fields::MESSAGE_ID),
            in_reply_to: optional(fields::IN_REPLY_TO),
            thread_id: optional(fields::THREAD_ID),
        })
    }

    /// Encode for publishing.
    pub fn to_notification(&self) -> Notification {
        let mut n = Notification::new()
            .with(fields::GROUP, self.group.as_str())
            .with(fields::USER, self.user.as_str())
            .with(fields::TEXT, self.text.as_str())
            .with(fields::TIMEOUT, i32::try_from(self.timeout).unwrap_or(i32::MAX));

        let optional = [
            (fields::MIME_TYPE, &self.mime_type),
            (fields::MIME_ARGS, &self.mime_args),
            (fields::MESSAGE_ID, &self.message_id),
            (fields::IN_REPLY_TO, &self.in_reply_to),
            (fields::THREAD_ID, &self.thread_id),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                n.insert(name, value.as_str());
            }
        }
        n
    }
}

fn clamp_timeout(requested: Option<i64>, min_time: u32, max_time: u32) -> u32 {
    let max_time = max_time.max(min_time);
    match requested {
        Some(minutes) => minutes.clamp(i64::from(min_time), i64::from(max_time)) as u32,
        None => min_time,
    }
}
