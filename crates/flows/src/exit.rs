//! Exit condition evaluation — who stops receiving this flow's messages.

use std::sync::Arc;

use anyhow::Result;
use dripline_delivery::InteractionLog;
use tracing::debug;

use crate::recipients::{deactivate_all_active, deactivate_people, InactiveReason};
use crate::types::{ExitConditionType, Flow};

/// Counts from one pruning pass over an instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct PruneOutcome {
    pub unsubscribed: usize,
    pub exited: usize,
}

impl PruneOutcome {
    pub fn modified(&self) -> bool {
        self.unsubscribed + self.exited > 0
    }

    pub fn deactivated(&self) -> usize {
        self.unsubscribed + self.exited
    }
}

/// Applies unsubscribe propagation and the flow's single exit rule to an
/// instance. All deactivations go through the ledger's idempotent
/// transition, so re-running a rule never changes an already-inactive entry.
pub struct ExitConditionEvaluator {
    interactions: Arc<dyn InteractionLog>,
}

impl ExitConditionEvaluator {
    pub fn new(interactions: Arc<dyn InteractionLog>) -> Self {
        Self { interactions }
    }

    /// Unsubscribe is flow-scoped: someone who unsubscribed in any other
    /// instance of this flow is deactivated here too. Returns how many
    /// ledger entries flipped.
    pub fn propagate_unsubscribes(&self, flow: &mut Flow, instance_ix: usize) -> usize {
        let instance_id = flow.instances[instance_ix].id;
        let unsubscribed = flow.unsubscribed_outside(instance_id);
        if unsubscribed.is_empty() {
            return 0;
        }
        let flipped = deactivate_people(
            &mut flow.instances[instance_ix].recipients,
            &unsubscribed,
            InactiveReason::UnsubscribedFromFlow,
        );
        if flipped > 0 {
            debug!(
                flow_id = %flow.id,
                instance_id = %instance_id,
                count = flipped,
                "Propagated unsubscribes across instances"
            );
        }
        flipped
    }

    /// Unsubscribe propagation followed by the flow's exit rule.
    pub fn prune_recipients(&self, flow: &mut Flow, instance_ix: usize) -> Result<PruneOutcome> {
        let unsubscribed = self.propagate_unsubscribes(flow, instance_ix);
        let exit_condition = flow.exit_condition;
        let instance = &mut flow.instances[instance_ix];

        let exited = match exit_condition {
            ExitConditionType::LastMessageSent => {
                if instance.messaging_completed {
                    deactivate_all_active(
                        &mut instance.recipients,
                        InactiveReason::LastCommunicationSent,
                    )
                } else {
                    0
                }
            }
            ExitConditionType::AnyEmailOpened => {
                let message_ids = instance.message_ids();
                let people = instance.active_people();
                if message_ids.is_empty() || people.is_empty() {
                    0
                } else {
                    let openers = self.interactions.openers(&message_ids, &people)?;
                    deactivate_people(
                        &mut instance.recipients,
                        &openers,
                        InactiveReason::OpenedCommunication,
                    )
                }
            }
            ExitConditionType::AnyEmailClickedThrough => {
                let message_ids = instance.message_ids();
                let people = instance.active_people();
                if message_ids.is_empty() || people.is_empty() {
                    0
                } else {
                    let clickers = self.interactions.clickers(&message_ids, &people)?;
                    deactivate_people(
                        &mut instance.recipients,
                        &clickers,
                        InactiveReason::ClickedCommunication,
                    )
                }
            }
            ExitConditionType::ConversionAchieved => {
                let converted = instance.converted_people();
                deactivate_people(
                    &mut instance.recipients,
                    &converted,
                    InactiveReason::ConversionGoalMet,
                )
            }
        };

        Ok(PruneOutcome {
            unsubscribed,
            exited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dripline_audience::AudienceSelector;
    use dripline_core::types::ChannelKind;
    use dripline_delivery::{
        InMemoryInteractions, MessageRecipient, NoInteractions, OutboundMessage,
    };
    use uuid::Uuid;

    use crate::recipients::{Recipient, RecipientStatus};
    use crate::types::{Conversion, FlowInstance, InstanceCommunication, TriggerType};

    fn make_flow(exit_condition: ExitConditionType) -> Flow {
        let now = Utc::now();
        Flow {
            id: Uuid::new_v4(),
            name: "exit-tests".into(),
            is_active: true,
            trigger_type: TriggerType::Recurring,
            schedule: None,
            conversion_goal: None,
            exit_condition,
            audience: AudienceSelector::Static { aliases: vec![] },
            blueprints: vec![],
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn instance_with(people: &[&str]) -> (FlowInstance, Vec<Uuid>) {
        let now = Utc::now();
        let mut instance = FlowInstance::new(Uuid::new_v4(), now.date_naive(), now);
        let mut ids = Vec::new();
        for person in people {
            let r = Recipient::new(*person, false, now);
            ids.push(r.id);
            instance.recipients.push(r);
        }
        (instance, ids)
    }

    fn add_sent_communication(instance: &mut FlowInstance) -> Uuid {
        let now = Utc::now();
        let message_id = Uuid::new_v4();
        let audience: Vec<MessageRecipient> = instance
            .recipients
            .iter()
            .map(|r| MessageRecipient {
                recipient_id: r.id,
                person: r.person.clone(),
            })
            .collect();
        instance.communications.push(InstanceCommunication {
            id: Uuid::new_v4(),
            blueprint_id: Uuid::new_v4(),
            blueprint_order: 1,
            message: OutboundMessage {
                id: message_id,
                channel: ChannelKind::Email,
                subject: "s".into(),
                body: String::new(),
                audience,
                sent_at: Some(now),
                future_send_at: None,
            },
            conversions: Vec::new(),
            created_at: now,
        });
        message_id
    }

    #[test]
    fn test_unsubscribe_propagates_to_sibling_instances() {
        let mut flow = make_flow(ExitConditionType::LastMessageSent);
        let (mut a, _) = instance_with(&["ada", "grace"]);
        a.recipients[0].deactivate(InactiveReason::UnsubscribedFromFlow);
        let (b, _) = instance_with(&["ada", "grace"]);
        flow.instances.push(a);
        flow.instances.push(b);

        let evaluator = ExitConditionEvaluator::new(Arc::new(NoInteractions));
        let flipped = evaluator.propagate_unsubscribes(&mut flow, 1);
        assert_eq!(flipped, 1);
        assert_eq!(
            flow.instances[1].recipients[0].status,
            RecipientStatus::Inactive {
                reason: InactiveReason::UnsubscribedFromFlow
            }
        );
        assert!(flow.instances[1].recipients[1].is_active());

        // Second pass finds nothing new.
        assert_eq!(evaluator.propagate_unsubscribes(&mut flow, 1), 0);
    }

    #[test]
    fn test_opened_rule_deactivates_openers_only() {
        let mut flow = make_flow(ExitConditionType::AnyEmailOpened);
        let (mut instance, _) = instance_with(&["ada", "grace"]);
        let message_id = add_sent_communication(&mut instance);
        flow.instances.push(instance);

        let log = Arc::new(InMemoryInteractions::new());
        log.record_open(message_id, "ada");

        let evaluator = ExitConditionEvaluator::new(log);
        let outcome = evaluator.prune_recipients(&mut flow, 0).unwrap();
        assert_eq!(outcome.exited, 1);
        assert_eq!(
            flow.instances[0].recipients[0].status,
            RecipientStatus::Inactive {
                reason: InactiveReason::OpenedCommunication
            }
        );
        assert!(flow.instances[0].recipients[1].is_active());
    }

    #[test]
    fn test_last_message_rule_waits_for_completion() {
        let mut flow = make_flow(ExitConditionType::LastMessageSent);
        let (instance, _) = instance_with(&["ada"]);
        flow.instances.push(instance);

        let evaluator = ExitConditionEvaluator::new(Arc::new(NoInteractions));
        let outcome = evaluator.prune_recipients(&mut flow, 0).unwrap();
        assert!(!outcome.modified());

        flow.instances[0].messaging_completed = true;
        let outcome = evaluator.prune_recipients(&mut flow, 0).unwrap();
        assert_eq!(outcome.exited, 1);
        assert_eq!(
            flow.instances[0].recipients[0].status,
            RecipientStatus::Inactive {
                reason: InactiveReason::LastCommunicationSent
            }
        );
    }

    #[test]
    fn test_conversion_rule_uses_instance_conversions() {
        let mut flow = make_flow(ExitConditionType::ConversionAchieved);
        let (mut instance, recipient_ids) = instance_with(&["ada", "grace"]);
        add_sent_communication(&mut instance);
        instance.communications[0].conversions.push(Conversion {
            id: Uuid::new_v4(),
            person: "ada".into(),
            converted_at: Utc::now(),
            recipient_id: recipient_ids[0],
        });
        flow.instances.push(instance);

        let evaluator = ExitConditionEvaluator::new(Arc::new(NoInteractions));
        let outcome = evaluator.prune_recipients(&mut flow, 0).unwrap();
        assert_eq!(outcome.exited, 1);
        assert!(flow.instances[0].recipients[1].is_active());
    }
}
