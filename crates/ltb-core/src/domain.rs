use std::fmt;

use chrono::{DateTime, Utc};

use crate::{errors::Error, Result};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Opaque tracked-link id.
///
/// Doubles as the storage key and as the callback data carried by the counter button,
/// so it must stay within Telegram's 64-byte callback data limit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(String);

impl LinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id (32 hex chars).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A URL registered for click counting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedLink {
    pub id: LinkId,
    pub url: String,
    pub clicks: u64,
    pub chat_id: ChatId,
    /// Unset until the counter message has been sent and attached.
    pub message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

impl TrackedLink {
    pub fn new(id: LinkId, url: impl Into<String>, chat_id: ChatId) -> Self {
        Self {
            id,
            url: url.into(),
            clicks: 0,
            chat_id,
            message_id: None,
            created_at: Utc::now(),
        }
    }

    /// Where the counter button lives, if the message was ever attached.
    pub fn message_ref(&self) -> Option<MessageRef> {
        self.message_id.map(|message_id| MessageRef {
            chat_id: self.chat_id,
            message_id,
        })
    }

    /// Apply a partial update in place.
    ///
    /// Rejects patches that would lower `clicks` or replace an attached message id.
    pub fn apply(&mut self, patch: &LinkPatch) -> Result<()> {
        if let Some(clicks) = patch.clicks {
            if clicks < self.clicks {
                return Err(Error::Storage(format!(
                    "clicks for {} cannot go from {} to {clicks}",
                    self.id, self.clicks
                )));
            }
        }
        if let (Some(current), Some(next)) = (self.message_id, patch.message_id) {
            if current != next {
                return Err(Error::Storage(format!(
                    "message id for {} is already attached",
                    self.id
                )));
            }
        }

        if let Some(clicks) = patch.clicks {
            self.clicks = clicks;
        }
        if let Some(message_id) = patch.message_id {
            self.message_id = Some(message_id);
        }
        Ok(())
    }
}

/// Merge-style partial update of a [`TrackedLink`]; `None` leaves a field untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkPatch {
    pub clicks: Option<u64>,
    pub message_id: Option<MessageId>,
}

impl LinkPatch {
    pub fn clicks(clicks: u64) -> Self {
        Self {
            clicks: Some(clicks),
            ..Self::default()
        }
    }

    pub fn message_id(message_id: MessageId) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clicks.is_none() && self.message_id.is_none()
    }
}
