//! Recurrence schedules and occurrence evaluation for flow triggers.

pub mod evaluator;

pub use evaluator::{CalendarScheduleEvaluator, ScheduleEvaluator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When and how often a flow produces new instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceSchedule {
    /// First occurrence.
    pub start_at: DateTime<Utc>,
    pub cadence: Cadence,
    /// No occurrences strictly after this point.
    pub until: Option<DateTime<Utc>>,
}

impl RecurrenceSchedule {
    pub fn once(start_at: DateTime<Utc>) -> Self {
        Self {
            start_at,
            cadence: Cadence::Once,
            until: None,
        }
    }
}

/// Spacing between occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Cadence {
    Once,
    Daily { every_days: u32 },
    Weekly { every_weeks: u32 },
    Monthly { every_months: u32 },
}
