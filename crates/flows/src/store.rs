//! Flow persistence port and the in-memory development store.
//!
//! Production: replace with a relational store loading each flow's nested
//! collections in one read and committing per flow atomically. This
//! provides the same API surface for development and testing.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dripline_audience::AudienceSelector;
use dripline_core::types::ChannelKind;
use dripline_core::{FlowError, FlowResult};
use dripline_schedule::{Cadence, RecurrenceSchedule};
use tracing::info;
use uuid::Uuid;

use crate::types::{
    Blueprint, ConversionGoal, ConversionGoalType, ExitConditionType, Flow, TriggerType,
};

/// Per-flow unit of work: flows load with their full graph and commit as a
/// whole. A pipeline failure before `commit` leaves the stored graph
/// untouched.
pub trait FlowStore: Send + Sync {
    /// Active flows whose messaging or conversion tracking is still open.
    fn load_open_flows(&self) -> FlowResult<Vec<Flow>>;

    /// Atomically replaces the stored flow with the processed graph.
    fn commit(&self, flow: &Flow) -> FlowResult<()>;
}

/// Thread-safe in-memory flow store backed by DashMap.
#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<Uuid, Flow>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow: Flow) {
        self.flows.insert(flow.id, flow);
    }

    pub fn get(&self, id: &Uuid) -> Option<Flow> {
        self.flows.get(id).map(|f| f.clone())
    }

    pub fn list(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self.flows.iter().map(|f| f.value().clone()).collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        flows
    }

    /// Seeds representative demo flows so the runner works end-to-end out
    /// of the box.
    pub fn seed_demo_flows(&self, now: DateTime<Utc>) {
        info!("Seeding demo flows");

        let email = |order: u32, days_to_wait: u32, hour: u32, subject: &str, body: &str| {
            Blueprint {
                id: Uuid::new_v4(),
                order,
                days_to_wait,
                time_to_send: chrono::NaiveTime::from_hms_opt(hour, 0, 0)
                    .unwrap_or_default(),
                channel: ChannelKind::Email,
                subject: subject.to_string(),
                body: body.to_string(),
            }
        };

        // ---- 1. Welcome Series (one-time email sequence) ----
        let welcome = Flow {
            id: Uuid::new_v4(),
            name: "Welcome Series".to_string(),
            is_active: true,
            trigger_type: TriggerType::OneTime,
            schedule: Some(RecurrenceSchedule::once(now)),
            conversion_goal: Some(ConversionGoal {
                goal_type: ConversionGoalType::CompletedForm {
                    form_id: "onboarding-survey".to_string(),
                },
                timeframe_days: 14,
            }),
            exit_condition: ExitConditionType::ConversionAchieved,
            audience: AudienceSelector::Static {
                aliases: vec![
                    "demo-ada".to_string(),
                    "demo-grace".to_string(),
                    "demo-lin".to_string(),
                ],
            },
            blueprints: vec![
                email(1, 0, 9, "Welcome aboard", "Thanks for signing up."),
                email(2, 2, 9, "Getting started tips", "Three things to try this week."),
                email(3, 3, 10, "Tell us how it went", "Two minutes, five questions."),
            ],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: now,
            updated_at: now,
        };

        // ---- 2. Weekly Digest (recurring single email) ----
        let digest = Flow {
            id: Uuid::new_v4(),
            name: "Weekly Digest".to_string(),
            is_active: true,
            trigger_type: TriggerType::Recurring,
            schedule: Some(RecurrenceSchedule {
                start_at: now,
                cadence: Cadence::Weekly { every_weeks: 1 },
                until: Some(now + Duration::days(90)),
            }),
            conversion_goal: None,
            exit_condition: ExitConditionType::AnyEmailClickedThrough,
            audience: AudienceSelector::DataView {
                dataview_id: "dv-active-subscribers".to_string(),
            },
            blueprints: vec![email(1, 0, 8, "Your weekly digest", "What happened this week.")],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: now,
            updated_at: now,
        };

        // ---- 3. Win-back (on-demand, lifecycle driven externally) ----
        let winback = Flow {
            id: Uuid::new_v4(),
            name: "Win-back".to_string(),
            is_active: true,
            trigger_type: TriggerType::OnDemand,
            schedule: None,
            conversion_goal: Some(ConversionGoal {
                goal_type: ConversionGoalType::EnteredDataView {
                    dataview_id: "dv-reactivated".to_string(),
                },
                timeframe_days: 7,
            }),
            exit_condition: ExitConditionType::AnyEmailOpened,
            audience: AudienceSelector::Group {
                group_id: "grp-dormant".to_string(),
            },
            blueprints: vec![
                email(1, 0, 11, "We miss you", "Here is what you have been missing."),
                email(2, 4, 11, "One more thing", "A small incentive to come back."),
            ],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: now,
            updated_at: now,
        };

        self.insert(welcome);
        self.insert(digest);
        self.insert(winback);
        info!("Seeded 3 demo flows");
    }
}

impl FlowStore for InMemoryFlowStore {
    fn load_open_flows(&self) -> FlowResult<Vec<Flow>> {
        let mut flows: Vec<Flow> = self
            .flows
            .iter()
            .filter(|f| f.value().needs_processing())
            .map(|f| f.value().clone())
            .collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(flows)
    }

    fn commit(&self, flow: &Flow) -> FlowResult<()> {
        if !self.flows.contains_key(&flow.id) {
            return Err(FlowError::Store(format!("unknown flow {}", flow.id)));
        }
        self.flows.insert(flow.id, flow.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_open_skips_retired_flows() {
        let store = InMemoryFlowStore::new();
        store.seed_demo_flows(Utc::now());

        let mut flows = store.load_open_flows().unwrap();
        assert_eq!(flows.len(), 3);

        let mut retired = flows.remove(0);
        retired.messaging_closed = true;
        retired.conversion_tracking_closed = true;
        store.commit(&retired).unwrap();

        assert_eq!(store.load_open_flows().unwrap().len(), 2);
    }

    #[test]
    fn test_commit_requires_known_flow() {
        let store = InMemoryFlowStore::new();
        store.seed_demo_flows(Utc::now());

        let mut stray = store.list().remove(0);
        stray.id = Uuid::new_v4();
        assert!(store.commit(&stray).is_err());
    }

    #[test]
    fn test_commit_replaces_whole_graph() {
        let store = InMemoryFlowStore::new();
        store.seed_demo_flows(Utc::now());

        let mut flow = store.list().remove(0);
        let id = flow.id;
        flow.instances.push(crate::types::FlowInstance::new(
            id,
            Utc::now().date_naive(),
            Utc::now(),
        ));
        store.commit(&flow).unwrap();

        assert_eq!(store.get(&id).unwrap().instances.len(), 1);
    }
}
