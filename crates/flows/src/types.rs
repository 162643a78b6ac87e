use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use dripline_audience::AudienceSelector;
use dripline_core::types::ChannelKind;
use dripline_delivery::OutboundMessage;
use dripline_schedule::RecurrenceSchedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recipients::{InactiveReason, Recipient, RecipientStatus};

/// A campaign definition: how instances come into being, who they target,
/// what counts as success, and the ordered message templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub trigger_type: TriggerType,
    pub schedule: Option<RecurrenceSchedule>,
    pub conversion_goal: Option<ConversionGoal>,
    pub exit_condition: ExitConditionType,
    pub audience: AudienceSelector,
    pub blueprints: Vec<Blueprint>,
    /// No further instances or communications will be produced.
    pub messaging_closed: bool,
    /// No further conversions will be recorded.
    pub conversion_tracking_closed: bool,
    pub instances: Vec<FlowInstance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How new instances of a flow come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    OneTime,
    Recurring,
    OnDemand,
}

/// The flow-wide rule that removes a recipient from further messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitConditionType {
    LastMessageSent,
    AnyEmailOpened,
    AnyEmailClickedThrough,
    ConversionAchieved,
}

/// Success condition for a flow, tracked for a bounded number of days after
/// each instance starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionGoal {
    pub goal_type: ConversionGoalType,
    pub timeframe_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ConversionGoalType {
    CompletedForm { form_id: String },
    EnteredDataView { dataview_id: String },
    JoinedGroup { group_id: String },
    JoinedGroupType { group_type_id: String },
    Registered,
    /// Date-granularity evidence; attribution compares dates, not times.
    TookStep { step_id: String },
}

/// One step's template: wait time relative to the previous step, time of
/// day to send, channel, and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: Uuid,
    pub order: u32,
    pub days_to_wait: u32,
    pub time_to_send: NaiveTime,
    pub channel: ChannelKind,
    pub subject: String,
    pub body: String,
}

/// One temporal run of a flow, pinned to a start date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInstance {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub start_date: NaiveDate,
    pub messaging_completed: bool,
    pub recipients: Vec<Recipient>,
    pub communications: Vec<InstanceCommunication>,
    pub created_at: DateTime<Utc>,
}

/// Links an instance, a blueprint, and the concrete outbound message that
/// was generated for it. At most one per blueprint per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCommunication {
    pub id: Uuid,
    pub blueprint_id: Uuid,
    pub blueprint_order: u32,
    pub message: OutboundMessage,
    pub conversions: Vec<Conversion>,
    pub created_at: DateTime<Utc>,
}

/// Evidence that one recipient met the flow's goal after being sent a
/// specific communication. Unique per (communication, recipient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    pub person: String,
    pub converted_at: DateTime<Utc>,
    /// Ledger entry of the triggering outbound message's addressee.
    pub recipient_id: Uuid,
}

impl Flow {
    pub fn needs_processing(&self) -> bool {
        self.is_active && (!self.messaging_closed || !self.conversion_tracking_closed)
    }

    /// Blueprints in ascending send order.
    pub fn ordered_blueprints(&self) -> Vec<&Blueprint> {
        let mut blueprints: Vec<&Blueprint> = self.blueprints.iter().collect();
        blueprints.sort_by_key(|b| b.order);
        blueprints
    }

    /// The lowest-order blueprint the given instance has not sent yet.
    pub fn next_unsent_blueprint(&self, instance: &FlowInstance) -> Option<&Blueprint> {
        self.ordered_blueprints()
            .into_iter()
            .find(|b| !instance.has_blueprint(b.id))
    }

    pub fn last_instance_start(&self) -> Option<NaiveDate> {
        self.instances.iter().map(|i| i.start_date).max()
    }

    pub fn all_instances_complete(&self) -> bool {
        self.instances.iter().all(|i| i.messaging_completed)
    }

    /// People who unsubscribed from this flow in any instance other than
    /// `instance_id`. Unsubscribe is flow-scoped, not instance-scoped.
    pub fn unsubscribed_outside(&self, instance_id: Uuid) -> HashSet<String> {
        self.instances
            .iter()
            .filter(|i| i.id != instance_id)
            .flat_map(|i| i.recipients.iter())
            .filter(|r| {
                r.status
                    == RecipientStatus::Inactive {
                        reason: InactiveReason::UnsubscribedFromFlow,
                    }
            })
            .map(|r| r.person.clone())
            .collect()
    }
}

impl FlowInstance {
    pub fn new(flow_id: Uuid, start_date: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            start_date,
            messaging_completed: false,
            recipients: Vec::new(),
            communications: Vec::new(),
            created_at,
        }
    }

    pub fn has_blueprint(&self, blueprint_id: Uuid) -> bool {
        self.communications
            .iter()
            .any(|c| c.blueprint_id == blueprint_id)
    }

    /// The most recently created communication, if any. Communications are
    /// appended in blueprint order, so this is also the highest order.
    pub fn last_communication(&self) -> Option<&InstanceCommunication> {
        self.communications.last()
    }

    pub fn active_recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter().filter(|r| r.is_active())
    }

    pub fn active_people(&self) -> HashSet<String> {
        self.active_recipients().map(|r| r.person.clone()).collect()
    }

    pub fn message_ids(&self) -> Vec<Uuid> {
        self.communications.iter().map(|c| c.message.id).collect()
    }

    /// People with at least one conversion anywhere in this instance.
    pub fn converted_people(&self) -> HashSet<String> {
        self.communications
            .iter()
            .flat_map(|c| c.conversions.iter())
            .map(|c| c.person.clone())
            .collect()
    }

    pub fn recipient_for(&self, person: &str) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.person == person)
    }
}

impl InstanceCommunication {
    pub fn has_conversion_for(&self, recipient_id: Uuid) -> bool {
        self.conversions.iter().any(|c| c.recipient_id == recipient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_unsent_blueprint_respects_order() {
        let now = Utc::now();
        let bp = |order: u32| Blueprint {
            id: Uuid::new_v4(),
            order,
            days_to_wait: 0,
            time_to_send: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            channel: ChannelKind::Email,
            subject: format!("step {order}"),
            body: String::new(),
        };

        let mut flow = Flow {
            id: Uuid::new_v4(),
            name: "test".into(),
            is_active: true,
            trigger_type: TriggerType::OneTime,
            schedule: None,
            conversion_goal: None,
            exit_condition: ExitConditionType::LastMessageSent,
            audience: AudienceSelector::Static { aliases: vec![] },
            // Deliberately stored out of order.
            blueprints: vec![bp(2), bp(1), bp(3)],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: now,
            updated_at: now,
        };
        let instance = FlowInstance::new(flow.id, now.date_naive(), now);
        flow.instances.push(instance);

        let next = flow.next_unsent_blueprint(&flow.instances[0]).unwrap();
        assert_eq!(next.order, 1);
    }

    #[test]
    fn test_unsubscribed_outside_is_flow_scoped() {
        let now = Utc::now();
        let flow_id = Uuid::new_v4();
        let mut a = FlowInstance::new(flow_id, now.date_naive(), now);
        let mut b = FlowInstance::new(flow_id, now.date_naive(), now);

        let mut ada = Recipient::new("ada", false, now);
        ada.deactivate(InactiveReason::UnsubscribedFromFlow);
        let mut grace = Recipient::new("grace", false, now);
        grace.deactivate(InactiveReason::OpenedCommunication);
        a.recipients.push(ada);
        a.recipients.push(grace);
        b.recipients.push(Recipient::new("ada", false, now));

        let flow = Flow {
            id: flow_id,
            name: "test".into(),
            is_active: true,
            trigger_type: TriggerType::Recurring,
            schedule: None,
            conversion_goal: None,
            exit_condition: ExitConditionType::LastMessageSent,
            audience: AudienceSelector::Static { aliases: vec![] },
            blueprints: vec![],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![a, b.clone()],
            created_at: now,
            updated_at: now,
        };

        let unsubscribed = flow.unsubscribed_outside(b.id);
        assert!(unsubscribed.contains("ada"));
        // Only the unsubscribe reason propagates across instances.
        assert!(!unsubscribed.contains("grace"));
    }
}
