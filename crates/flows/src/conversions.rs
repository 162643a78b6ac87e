//! Conversion goal processors — one strategy per goal type.
//!
//! Every strategy shares the same skeleton: gather who actually received a
//! communication, query goal evidence inside the instance's conversion
//! window, attribute each piece of evidence to the most recent communication
//! sent at or before it, then attach whatever the composite-key check has
//! not seen yet. Detection is pure in-memory mutation; nothing commits here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use dripline_audience::{ConversionEvidenceSource, EvidenceEvent};
use dripline_core::types::TimeWindow;
use tracing::debug;
use uuid::Uuid;

use crate::types::{Conversion, ConversionGoal, ConversionGoalType, FlowInstance};

/// Result of one detection pass over an instance.
#[derive(Debug, Default, Clone)]
pub struct ConversionOutcome {
    pub added: Vec<Conversion>,
}

impl ConversionOutcome {
    pub fn modified(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Strategy contract for detecting conversions.
///
/// `pre_met` runs once, when the instance's recipient ledger materializes,
/// so that people who already satisfy the goal are never credited later.
/// `add_conversions` is safe to re-run over the same data.
pub trait ConversionGoalProcessor: Send + Sync {
    fn pre_met(&self, _people: &[String]) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome>;
}

/// Null-object strategy for flows without a goal: reports no conversions
/// and no modification, so call sites never branch.
pub struct NoGoal;

impl ConversionGoalProcessor for NoGoal {
    fn add_conversions(
        &self,
        _instance: &mut FlowInstance,
        _now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        Ok(ConversionOutcome::default())
    }
}

/// Selects the strategy for a flow's configured goal.
pub fn goal_processor(
    goal: Option<&ConversionGoal>,
    evidence: Arc<dyn ConversionEvidenceSource>,
) -> Box<dyn ConversionGoalProcessor> {
    let Some(goal) = goal else {
        return Box::new(NoGoal);
    };
    let days = goal.timeframe_days;
    match &goal.goal_type {
        ConversionGoalType::CompletedForm { form_id } => Box::new(CompletedFormGoal {
            form_id: form_id.clone(),
            timeframe_days: days,
            evidence,
        }),
        ConversionGoalType::EnteredDataView { dataview_id } => Box::new(EnteredDataViewGoal {
            dataview_id: dataview_id.clone(),
            timeframe_days: days,
            evidence,
        }),
        ConversionGoalType::JoinedGroup { group_id } => Box::new(JoinedGroupGoal {
            group_id: group_id.clone(),
            timeframe_days: days,
            evidence,
        }),
        ConversionGoalType::JoinedGroupType { group_type_id } => Box::new(JoinedGroupTypeGoal {
            group_type_id: group_type_id.clone(),
            timeframe_days: days,
            evidence,
        }),
        ConversionGoalType::Registered => Box::new(RegisteredGoal {
            timeframe_days: days,
            evidence,
        }),
        ConversionGoalType::TookStep { step_id } => Box::new(TookStepGoal {
            step_id: step_id.clone(),
            timeframe_days: days,
            evidence,
        }),
    }
}

// ------------------------------------------------------------------
// Shared attribution machinery
// ------------------------------------------------------------------

/// A communication one person actually received, with the ledger entry it
/// addressed.
#[derive(Debug, Clone, Copy)]
struct ReceivedMessage {
    comm_ix: usize,
    recipient_id: Uuid,
    blueprint_order: u32,
    sent_at: DateTime<Utc>,
}

/// Per person: communications that reached them by `now`, most recent
/// blueprint first, then latest send first.
fn received_by_person(
    instance: &FlowInstance,
    now: DateTime<Utc>,
) -> HashMap<String, Vec<ReceivedMessage>> {
    let mut map: HashMap<String, Vec<ReceivedMessage>> = HashMap::new();
    for (comm_ix, comm) in instance.communications.iter().enumerate() {
        let Some(sent_at) = comm.message.delivered_at(now) else {
            continue;
        };
        for addressee in &comm.message.audience {
            map.entry(addressee.person.clone())
                .or_default()
                .push(ReceivedMessage {
                    comm_ix,
                    recipient_id: addressee.recipient_id,
                    blueprint_order: comm.blueprint_order,
                    sent_at,
                });
        }
    }
    for messages in map.values_mut() {
        messages.sort_by(|a, b| {
            b.blueprint_order
                .cmp(&a.blueprint_order)
                .then(b.sent_at.cmp(&a.sent_at))
        });
    }
    map
}

/// Attributes each event to the most recent communication sent at or before
/// it, drops events with no match or from pre-met recipients, de-duplicates
/// against existing conversions by (communication, recipient), and attaches
/// the rest.
fn attach(
    instance: &mut FlowInstance,
    received: &HashMap<String, Vec<ReceivedMessage>>,
    events: Vec<EvidenceEvent>,
    date_only: bool,
) -> ConversionOutcome {
    let mut outcome = ConversionOutcome::default();
    for event in events {
        if instance
            .recipient_for(&event.person)
            .is_some_and(|r| r.goal_pre_met)
        {
            continue;
        }
        let Some(messages) = received.get(&event.person) else {
            continue;
        };
        let hit = messages.iter().find(|m| {
            if date_only {
                m.sent_at.date_naive() <= event.at.date_naive()
            } else {
                m.sent_at <= event.at
            }
        });
        let Some(hit) = hit else {
            continue;
        };

        let communication = &mut instance.communications[hit.comm_ix];
        if communication.has_conversion_for(hit.recipient_id) {
            continue;
        }
        let conversion = Conversion {
            id: Uuid::new_v4(),
            person: event.person,
            converted_at: event.at,
            recipient_id: hit.recipient_id,
        };
        communication.conversions.push(conversion.clone());
        outcome.added.push(conversion);
    }

    if outcome.modified() {
        debug!(
            instance_id = %instance.id,
            added = outcome.added.len(),
            "Attached new conversions"
        );
    }
    outcome
}

fn detect(
    instance: &mut FlowInstance,
    now: DateTime<Utc>,
    timeframe_days: u32,
    date_only: bool,
    query: impl FnOnce(
        &HashSet<String>,
        TimeWindow,
    ) -> dripline_core::FlowResult<Vec<EvidenceEvent>>,
) -> Result<ConversionOutcome> {
    let received = received_by_person(instance, now);
    if received.is_empty() {
        return Ok(ConversionOutcome::default());
    }
    let people: HashSet<String> = received.keys().cloned().collect();
    let window = TimeWindow::for_days(instance.start_date, timeframe_days);
    let events = query(&people, window)?;
    Ok(attach(instance, &received, events, date_only))
}

// ------------------------------------------------------------------
// Concrete strategies
// ------------------------------------------------------------------

struct CompletedFormGoal {
    form_id: String,
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for CompletedFormGoal {
    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        detect(instance, now, self.timeframe_days, false, |people, window| {
            self.evidence.form_completions(&self.form_id, people, window)
        })
    }
}

struct EnteredDataViewGoal {
    dataview_id: String,
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for EnteredDataViewGoal {
    /// People already in the data view when the instance starts must not be
    /// credited with a conversion for entering it.
    fn pre_met(&self, people: &[String]) -> Result<HashSet<String>> {
        let members = self.evidence.dataview_members(&self.dataview_id)?;
        Ok(people
            .iter()
            .filter(|p| members.contains(p.as_str()))
            .cloned()
            .collect())
    }

    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        detect(instance, now, self.timeframe_days, false, |people, window| {
            self.evidence
                .dataview_entries(&self.dataview_id, people, window)
        })
    }
}

struct JoinedGroupGoal {
    group_id: String,
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for JoinedGroupGoal {
    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        detect(instance, now, self.timeframe_days, false, |people, window| {
            self.evidence.group_joins(&self.group_id, people, window)
        })
    }
}

struct JoinedGroupTypeGoal {
    group_type_id: String,
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for JoinedGroupTypeGoal {
    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        detect(instance, now, self.timeframe_days, false, |people, window| {
            self.evidence
                .group_type_joins(&self.group_type_id, people, window)
        })
    }
}

struct RegisteredGoal {
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for RegisteredGoal {
    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        detect(instance, now, self.timeframe_days, false, |people, window| {
            self.evidence.registrations(people, window)
        })
    }
}

struct TookStepGoal {
    step_id: String,
    timeframe_days: u32,
    evidence: Arc<dyn ConversionEvidenceSource>,
}

impl ConversionGoalProcessor for TookStepGoal {
    fn add_conversions(
        &self,
        instance: &mut FlowInstance,
        now: DateTime<Utc>,
    ) -> Result<ConversionOutcome> {
        // Step evidence carries no time of day; attribution compares dates.
        detect(instance, now, self.timeframe_days, true, |people, window| {
            let dates = self.evidence.steps_taken(&self.step_id, people, window)?;
            Ok(dates
                .into_iter()
                .map(|d| EvidenceEvent {
                    person: d.person,
                    at: Utc.from_utc_datetime(
                        &d.on.and_hms_opt(0, 0, 0).unwrap_or_default(),
                    ),
                })
                .collect())
        })
    }
}
