//! Recipient ledger — per-instance record of who may still be messaged.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a recipient stopped being eligible for further communications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    UnsubscribedFromFlow,
    LastCommunicationSent,
    OpenedCommunication,
    ClickedCommunication,
    ConversionGoalMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RecipientStatus {
    Active,
    Inactive { reason: InactiveReason },
}

/// One person's membership in a flow instance.
///
/// Created once when the instance's first communication materializes its
/// audience; transitions Active -> Inactive at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub person: String,
    pub status: RecipientStatus,
    /// The person already satisfied the conversion goal when the instance
    /// started; their later evidence is never attributed to this campaign.
    pub goal_pre_met: bool,
    pub added_at: DateTime<Utc>,
}

impl Recipient {
    pub fn new(person: impl Into<String>, goal_pre_met: bool, added_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            person: person.into(),
            status: RecipientStatus::Active,
            goal_pre_met,
            added_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecipientStatus::Active
    }

    /// Deactivates the recipient. Returns `true` only for the
    /// Active -> Inactive transition; an already-inactive recipient keeps
    /// its original reason untouched.
    pub fn deactivate(&mut self, reason: InactiveReason) -> bool {
        if self.is_active() {
            self.status = RecipientStatus::Inactive { reason };
            true
        } else {
            false
        }
    }
}

/// Deactivates every active ledger entry whose person is in `people`.
/// Returns how many entries actually flipped.
pub fn deactivate_people(
    recipients: &mut [Recipient],
    people: &HashSet<String>,
    reason: InactiveReason,
) -> usize {
    recipients
        .iter_mut()
        .filter(|r| people.contains(&r.person))
        .map(|r| r.deactivate(reason))
        .filter(|&flipped| flipped)
        .count()
}

/// Deactivates every remaining active ledger entry.
pub fn deactivate_all_active(recipients: &mut [Recipient], reason: InactiveReason) -> usize {
    recipients
        .iter_mut()
        .map(|r| r.deactivate(reason))
        .filter(|&flipped| flipped)
        .count()
}
