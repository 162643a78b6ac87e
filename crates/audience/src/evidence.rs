use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use dripline_core::types::TimeWindow;
use dripline_core::FlowResult;
use serde::{Deserialize, Serialize};

/// A timestamped piece of goal evidence for one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub person: String,
    pub at: DateTime<Utc>,
}

/// Date-granularity evidence, for sources that record no time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceDate {
    pub person: String,
    pub on: NaiveDate,
}

/// Port for goal-specific evidence queries.
///
/// Every query is restricted to the given person set and window; callers
/// pass the people who actually received a communication, so implementations
/// can push the filter down into a set-based store query.
pub trait ConversionEvidenceSource: Send + Sync {
    fn form_completions(
        &self,
        form_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>>;

    /// Current membership snapshot, used to pre-mark people who were already
    /// in the data view when an instance starts.
    fn dataview_members(&self, dataview_id: &str) -> FlowResult<HashSet<String>>;

    fn dataview_entries(
        &self,
        dataview_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>>;

    fn group_joins(
        &self,
        group_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>>;

    fn group_type_joins(
        &self,
        group_type_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>>;

    fn registrations(
        &self,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>>;

    fn steps_taken(
        &self,
        step_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceDate>>;
}
