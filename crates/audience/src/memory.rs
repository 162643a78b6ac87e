//! In-memory engagement store backed by DashMap.
//!
//! Production: replace with the relational store's set-based queries. This
//! provides the same API surface for development and testing.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dripline_core::types::TimeWindow;
use dripline_core::{FlowError, FlowResult};
use parking_lot::RwLock;
use tracing::debug;

use crate::evidence::{ConversionEvidenceSource, EvidenceDate, EvidenceEvent};
use crate::resolver::{AudienceResolver, AudienceSelector};

/// Thread-safe in-memory directory of audience membership and engagement
/// events, serving both the resolver and evidence ports.
#[derive(Default)]
pub struct InMemoryEngagement {
    dataview_members: DashMap<String, HashSet<String>>,
    dataview_entries: DashMap<String, Vec<EvidenceEvent>>,
    group_members: DashMap<String, Vec<String>>,
    group_joins: DashMap<String, Vec<EvidenceEvent>>,
    group_type_joins: DashMap<String, Vec<EvidenceEvent>>,
    form_completions: DashMap<String, Vec<EvidenceEvent>>,
    registrations: RwLock<Vec<EvidenceEvent>>,
    steps: DashMap<String, Vec<EvidenceDate>>,
}

impl InMemoryEngagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dataview_member(&self, dataview_id: &str, person: &str) {
        self.dataview_members
            .entry(dataview_id.to_string())
            .or_default()
            .insert(person.to_string());
    }

    /// Records a person entering a data view and adds them to the current
    /// membership snapshot.
    pub fn record_dataview_entry(&self, dataview_id: &str, person: &str, at: DateTime<Utc>) {
        self.dataview_entries
            .entry(dataview_id.to_string())
            .or_default()
            .push(EvidenceEvent {
                person: person.to_string(),
                at,
            });
        self.add_dataview_member(dataview_id, person);
    }

    pub fn add_group_member(&self, group_id: &str, person: &str) {
        self.group_members
            .entry(group_id.to_string())
            .or_default()
            .push(person.to_string());
    }

    pub fn record_group_join(&self, group_id: &str, person: &str, at: DateTime<Utc>) {
        self.group_joins
            .entry(group_id.to_string())
            .or_default()
            .push(EvidenceEvent {
                person: person.to_string(),
                at,
            });
        self.add_group_member(group_id, person);
    }

    pub fn record_group_type_join(&self, group_type_id: &str, person: &str, at: DateTime<Utc>) {
        self.group_type_joins
            .entry(group_type_id.to_string())
            .or_default()
            .push(EvidenceEvent {
                person: person.to_string(),
                at,
            });
    }

    pub fn record_form_completion(&self, form_id: &str, person: &str, at: DateTime<Utc>) {
        self.form_completions
            .entry(form_id.to_string())
            .or_default()
            .push(EvidenceEvent {
                person: person.to_string(),
                at,
            });
    }

    pub fn record_registration(&self, person: &str, at: DateTime<Utc>) {
        self.registrations.write().push(EvidenceEvent {
            person: person.to_string(),
            at,
        });
    }

    pub fn record_step(&self, step_id: &str, person: &str, on: NaiveDate) {
        self.steps
            .entry(step_id.to_string())
            .or_default()
            .push(EvidenceDate {
                person: person.to_string(),
                on,
            });
    }

    fn filter_events(
        events: Option<&Vec<EvidenceEvent>>,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> Vec<EvidenceEvent> {
        events
            .map(|evts| {
                evts.iter()
                    .filter(|e| people.contains(&e.person) && window.contains(e.at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AudienceResolver for InMemoryEngagement {
    fn resolve(&self, selector: &AudienceSelector) -> FlowResult<Vec<String>> {
        let aliases = match selector {
            AudienceSelector::DataView { dataview_id } => self
                .dataview_members
                .get(dataview_id)
                .map(|members| {
                    let mut list: Vec<String> = members.iter().cloned().collect();
                    list.sort();
                    list
                })
                .ok_or_else(|| {
                    FlowError::Audience(format!("unknown data view {dataview_id}"))
                })?,
            AudienceSelector::Group { group_id } => self
                .group_members
                .get(group_id)
                .map(|members| members.clone())
                .ok_or_else(|| FlowError::Audience(format!("unknown group {group_id}")))?,
            AudienceSelector::Static { aliases } => aliases.clone(),
        };

        debug!(count = aliases.len(), "Resolved audience selector");
        Ok(aliases)
    }
}

impl ConversionEvidenceSource for InMemoryEngagement {
    fn form_completions(
        &self,
        form_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>> {
        Ok(Self::filter_events(
            self.form_completions.get(form_id).as_deref(),
            people,
            window,
        ))
    }

    fn dataview_members(&self, dataview_id: &str) -> FlowResult<HashSet<String>> {
        Ok(self
            .dataview_members
            .get(dataview_id)
            .map(|members| members.clone())
            .unwrap_or_default())
    }

    fn dataview_entries(
        &self,
        dataview_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>> {
        Ok(Self::filter_events(
            self.dataview_entries.get(dataview_id).as_deref(),
            people,
            window,
        ))
    }

    fn group_joins(
        &self,
        group_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>> {
        Ok(Self::filter_events(
            self.group_joins.get(group_id).as_deref(),
            people,
            window,
        ))
    }

    fn group_type_joins(
        &self,
        group_type_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>> {
        Ok(Self::filter_events(
            self.group_type_joins.get(group_type_id).as_deref(),
            people,
            window,
        ))
    }

    fn registrations(
        &self,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceEvent>> {
        Ok(self
            .registrations
            .read()
            .iter()
            .filter(|e| people.contains(&e.person) && window.contains(e.at))
            .cloned()
            .collect())
    }

    fn steps_taken(
        &self,
        step_id: &str,
        people: &HashSet<String>,
        window: TimeWindow,
    ) -> FlowResult<Vec<EvidenceDate>> {
        Ok(self
            .steps
            .get(step_id)
            .map(|steps| {
                steps
                    .iter()
                    .filter(|s| people.contains(&s.person) && window.contains_date(s.on))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn people(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_resolve_static_and_dataview() {
        let store = InMemoryEngagement::new();
        store.add_dataview_member("dv-leads", "ada");
        store.add_dataview_member("dv-leads", "grace");

        let selector = AudienceSelector::DataView {
            dataview_id: "dv-leads".into(),
        };
        let resolved = store.resolve(&selector).unwrap();
        assert_eq!(resolved, vec!["ada".to_string(), "grace".to_string()]);

        let selector = AudienceSelector::Static {
            aliases: vec!["lin".into()],
        };
        assert_eq!(store.resolve(&selector).unwrap(), vec!["lin".to_string()]);
    }

    #[test]
    fn test_unknown_group_is_an_error() {
        let store = InMemoryEngagement::new();
        let selector = AudienceSelector::Group {
            group_id: "missing".into(),
        };
        assert!(store.resolve(&selector).is_err());
    }

    #[test]
    fn test_evidence_is_window_and_people_scoped() {
        let store = InMemoryEngagement::new();
        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let window = TimeWindow::for_days(start, 7);

        store.record_form_completion(
            "form-1",
            "ada",
            Utc.with_ymd_and_hms(2025, 4, 3, 10, 0, 0).unwrap(),
        );
        store.record_form_completion(
            "form-1",
            "grace",
            Utc.with_ymd_and_hms(2025, 4, 3, 10, 0, 0).unwrap(),
        );
        // Outside the window.
        store.record_form_completion(
            "form-1",
            "ada",
            Utc.with_ymd_and_hms(2025, 4, 20, 10, 0, 0).unwrap(),
        );

        let events = store
            .form_completions("form-1", &people(&["ada"]), window)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].person, "ada");
    }

    #[test]
    fn test_steps_filter_by_date() {
        let store = InMemoryEngagement::new();
        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let window = TimeWindow::for_days(start, 7);

        store.record_step("step-1", "ada", NaiveDate::from_ymd_opt(2025, 4, 5).unwrap());
        store.record_step("step-1", "ada", NaiveDate::from_ymd_opt(2025, 4, 7).unwrap());

        let events = store
            .steps_taken("step-1", &people(&["ada"]), window)
            .unwrap();
        assert_eq!(events.len(), 2);

        let tight = TimeWindow::for_days(start, 4);
        let events = store.steps_taken("step-1", &people(&["ada"]), tight).unwrap();
        assert_eq!(events.len(), 1);
    }
}
