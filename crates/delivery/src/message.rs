use chrono::{DateTime, Utc};
use dripline_core::types::ChannelKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One addressee of an outbound message: the ledger entry that made them
/// eligible plus their person alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecipient {
    pub recipient_id: Uuid,
    pub person: String,
}

/// A fully-built communication handed to the transport.
///
/// Exactly one of `sent_at` / `future_send_at` is set when the message
/// leaves the builder: `sent_at` for now-or-past send times, `future_send_at`
/// when the transport's own scheduler should hold it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub channel: ChannelKind,
    pub subject: String,
    pub body: String,
    pub audience: Vec<MessageRecipient>,
    pub sent_at: Option<DateTime<Utc>>,
    pub future_send_at: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    /// Actual-or-scheduled send time; `None` means the transport has not
    /// stamped the message yet.
    pub fn effective_send_time(&self) -> Option<DateTime<Utc>> {
        self.sent_at.or(self.future_send_at)
    }

    /// The time this message reached (or will have reached) its audience,
    /// if that already happened by `now`.
    pub fn delivered_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.effective_send_time().filter(|t| *t <= now)
    }

    pub fn is_immediate(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn addresses(&self, person: &str) -> bool {
        self.audience.iter().any(|r| r.person == person)
    }
}
