//! Instance communication builder — decides which blueprint goes out next,
//! when, and to whom.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use dripline_audience::AudienceResolver;
use dripline_delivery::{MessageRecipient, OutboundMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversions::ConversionGoalProcessor;
use crate::recipients::Recipient;
use crate::types::{Flow, InstanceCommunication};

/// Result of one builder pass over an instance.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub modified: bool,
    /// The freshly built message, for post-commit dispatch.
    pub message: Option<OutboundMessage>,
}

impl BuildOutcome {
    fn unchanged() -> Self {
        Self {
            modified: false,
            message: None,
        }
    }
}

fn send_timestamp(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Builds the next unsent communication for an instance. Processing happens
/// exactly once, on the day a communication is due, so the recipient
/// snapshot taken at build time is fresh. Pure in-memory mutation; the
/// orchestrator commits.
pub struct CommunicationBuilder {
    audience: Arc<dyn AudienceResolver>,
}

impl CommunicationBuilder {
    pub fn new(audience: Arc<dyn AudienceResolver>) -> Self {
        Self { audience }
    }

    pub fn create_next_communication(
        &self,
        flow: &mut Flow,
        instance_ix: usize,
        goal: &dyn ConversionGoalProcessor,
        now: DateTime<Utc>,
    ) -> Result<BuildOutcome> {
        let today = now.date_naive();
        let flow_id = flow.id;
        let selector = flow.audience.clone();
        let next_blueprint = flow
            .next_unsent_blueprint(&flow.instances[instance_ix])
            .cloned();
        let instance = &mut flow.instances[instance_ix];

        // No blueprint left: the campaign has run its course.
        let Some(blueprint) = next_blueprint else {
            instance.messaging_completed = true;
            info!(
                flow_id = %flow_id,
                instance_id = %instance.id,
                "All blueprints sent, instance messaging complete"
            );
            return Ok(BuildOutcome {
                modified: true,
                message: None,
            });
        };

        // Target send time: relative to the instance start for the first
        // step, otherwise to the prior step's actual-or-scheduled send.
        let wait = Duration::days(i64::from(blueprint.days_to_wait));
        let send_at = match instance.last_communication() {
            None => send_timestamp(instance.start_date + wait, blueprint.time_to_send),
            Some(prior) => match prior.message.effective_send_time() {
                Some(base) => send_timestamp(base.date_naive() + wait, blueprint.time_to_send),
                None => {
                    // The transport never stamped the prior message; a
                    // projection would invent state, so defer loudly.
                    warn!(
                        flow_id = %flow_id,
                        instance_id = %instance.id,
                        blueprint_order = blueprint.order,
                        "Prior communication has no send time; deferring next step"
                    );
                    metrics::counter!("flows.builder_stalled").increment(1);
                    return Ok(BuildOutcome::unchanged());
                }
            },
        };

        if send_at.date_naive() != today {
            debug!(
                flow_id = %flow_id,
                instance_id = %instance.id,
                target = %send_at,
                "Next communication not due today"
            );
            return Ok(BuildOutcome::unchanged());
        }

        // First communication: lazily materialize the recipient ledger,
        // flagging people who already satisfy the conversion goal.
        if instance.recipients.is_empty() && instance.communications.is_empty() {
            let resolved = self.audience.resolve(&selector)?;
            let mut seen = HashSet::new();
            let aliases: Vec<String> = resolved
                .into_iter()
                .filter(|a| seen.insert(a.clone()))
                .collect();
            if aliases.is_empty() {
                info!(
                    flow_id = %flow_id,
                    instance_id = %instance.id,
                    "Audience resolved to nobody; skipping first communication"
                );
                return Ok(BuildOutcome::unchanged());
            }
            let pre_met = goal.pre_met(&aliases)?;
            for alias in &aliases {
                instance
                    .recipients
                    .push(Recipient::new(alias.clone(), pre_met.contains(alias), now));
            }
            info!(
                flow_id = %flow_id,
                instance_id = %instance.id,
                recipients = instance.recipients.len(),
                pre_met = pre_met.len(),
                "Materialized recipient ledger"
            );
        }

        let audience: Vec<MessageRecipient> = instance
            .active_recipients()
            .map(|r| MessageRecipient {
                recipient_id: r.id,
                person: r.person.clone(),
            })
            .collect();
        if audience.is_empty() {
            instance.messaging_completed = true;
            info!(
                flow_id = %flow_id,
                instance_id = %instance.id,
                "No active recipients remain, instance messaging complete"
            );
            return Ok(BuildOutcome {
                modified: true,
                message: None,
            });
        }

        let (sent_at, future_send_at) = if send_at > now {
            (None, Some(send_at))
        } else {
            (Some(send_at), None)
        };
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            channel: blueprint.channel,
            subject: blueprint.subject.clone(),
            body: blueprint.body.clone(),
            audience,
            sent_at,
            future_send_at,
        };

        instance.communications.push(InstanceCommunication {
            id: Uuid::new_v4(),
            blueprint_id: blueprint.id,
            blueprint_order: blueprint.order,
            message: message.clone(),
            conversions: Vec::new(),
            created_at: now,
        });

        metrics::counter!(
            "flows.communications_created",
            "channel" => format!("{:?}", blueprint.channel)
        )
        .increment(1);
        info!(
            flow_id = %flow_id,
            instance_id = %instance.id,
            blueprint_order = blueprint.order,
            recipients = message.audience.len(),
            scheduled = message.future_send_at.is_some(),
            "Created next instance communication"
        );

        Ok(BuildOutcome {
            modified: true,
            message: Some(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripline_audience::{AudienceSelector, InMemoryEngagement};
    use dripline_core::types::ChannelKind;

    use crate::conversions::{goal_processor, NoGoal};
    use crate::types::{
        Blueprint, ConversionGoal, ConversionGoalType, ExitConditionType, FlowInstance,
        TriggerType,
    };

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn bp(order: u32, days_to_wait: u32, hour: u32) -> Blueprint {
        Blueprint {
            id: Uuid::new_v4(),
            order,
            days_to_wait,
            time_to_send: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            channel: ChannelKind::Email,
            subject: format!("step {order}"),
            body: "hello".into(),
        }
    }

    fn make_flow(aliases: &[&str], blueprints: Vec<Blueprint>, start: DateTime<Utc>) -> Flow {
        let mut flow = Flow {
            id: Uuid::new_v4(),
            name: "builder-tests".into(),
            is_active: true,
            trigger_type: TriggerType::OneTime,
            schedule: None,
            conversion_goal: None,
            exit_condition: ExitConditionType::LastMessageSent,
            audience: AudienceSelector::Static {
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            },
            blueprints,
            messaging_closed: false,
            conversion_tracking_closed: false,
            instances: vec![],
            created_at: start,
            updated_at: start,
        };
        flow.instances
            .push(FlowInstance::new(flow.id, start.date_naive(), start));
        flow
    }

    fn builder() -> CommunicationBuilder {
        CommunicationBuilder::new(Arc::new(InMemoryEngagement::new()))
    }

    #[test]
    fn test_first_communication_sends_on_due_day_and_materializes_ledger() {
        let start = at(2025, 6, 1, 8);
        let mut flow = make_flow(&["ada", "grace"], vec![bp(1, 0, 9)], start);

        // Due at 09:00 on the start date; at 10:00 it goes out immediately.
        let outcome = builder()
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        assert!(outcome.modified);
        let message = outcome.message.unwrap();
        assert!(message.is_immediate());
        assert_eq!(message.audience.len(), 2);
        assert_eq!(flow.instances[0].recipients.len(), 2);
        assert_eq!(flow.instances[0].communications.len(), 1);
    }

    #[test]
    fn test_send_later_today_is_future_scheduled() {
        let start = at(2025, 6, 1, 8);
        let mut flow = make_flow(&["ada"], vec![bp(1, 0, 18)], start);

        let outcome = builder()
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        let message = outcome.message.unwrap();
        assert!(!message.is_immediate());
        assert_eq!(message.future_send_at, Some(at(2025, 6, 1, 18)));
    }

    #[test]
    fn test_follow_up_waits_relative_to_prior_send() {
        // Blueprint #1 went out two days ago; #2 waits 2 days after it, so
        // it is due today and not a day earlier.
        let start = at(2025, 6, 1, 8);
        let blueprints = vec![bp(1, 0, 9), bp(2, 2, 9)];
        let mut flow = make_flow(&["ada"], blueprints, start);

        let b = builder();
        b.create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        assert_eq!(flow.instances[0].communications.len(), 1);

        // One day early: nothing happens.
        let outcome = b
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 2, 10))
            .unwrap();
        assert!(!outcome.modified);
        assert_eq!(flow.instances[0].communications.len(), 1);

        // On the due day the follow-up goes out.
        let outcome = b
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 3, 10))
            .unwrap();
        assert!(outcome.modified);
        assert_eq!(flow.instances[0].communications.len(), 2);
        assert_eq!(flow.instances[0].communications[1].blueprint_order, 2);
    }

    #[test]
    fn test_blueprint_order_never_skips() {
        let start = at(2025, 6, 1, 8);
        let blueprints = vec![bp(1, 0, 9), bp(2, 1, 9), bp(3, 1, 9)];
        let mut flow = make_flow(&["ada"], blueprints, start);

        let b = builder();
        for day in 1..=4 {
            b.create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, day, 10))
                .unwrap();
        }

        let orders: Vec<u32> = flow.instances[0]
            .communications
            .iter()
            .map(|c| c.blueprint_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3]);
        // Day 4 had nothing left to send; the instance completed instead.
        assert!(flow.instances[0].messaging_completed);
    }

    #[test]
    fn test_prior_without_send_time_defers() {
        let start = at(2025, 6, 1, 8);
        let blueprints = vec![bp(1, 0, 9), bp(2, 0, 9)];
        let mut flow = make_flow(&["ada"], blueprints, start);

        let b = builder();
        b.create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        // Simulate a transport that lost the stamp.
        flow.instances[0].communications[0].message.sent_at = None;
        flow.instances[0].communications[0].message.future_send_at = None;

        let outcome = b
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 11))
            .unwrap();
        assert!(!outcome.modified);
        assert_eq!(flow.instances[0].communications.len(), 1);
    }

    #[test]
    fn test_empty_audience_aborts_without_creating() {
        let start = at(2025, 6, 1, 8);
        let mut flow = make_flow(&[], vec![bp(1, 0, 9)], start);

        let outcome = builder()
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        assert!(!outcome.modified);
        assert!(flow.instances[0].recipients.is_empty());
        assert!(flow.instances[0].communications.is_empty());
        assert!(!flow.instances[0].messaging_completed);
    }

    #[test]
    fn test_no_active_recipients_completes_messaging() {
        let start = at(2025, 6, 1, 8);
        let blueprints = vec![bp(1, 0, 9), bp(2, 1, 9)];
        let mut flow = make_flow(&["ada"], blueprints, start);

        let b = builder();
        b.create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 1, 10))
            .unwrap();
        for r in &mut flow.instances[0].recipients {
            r.deactivate(crate::recipients::InactiveReason::UnsubscribedFromFlow);
        }

        let outcome = b
            .create_next_communication(&mut flow, 0, &NoGoal, at(2025, 6, 2, 10))
            .unwrap();
        assert!(outcome.modified);
        assert!(outcome.message.is_none());
        assert!(flow.instances[0].messaging_completed);
        assert_eq!(flow.instances[0].communications.len(), 1);
    }

    #[test]
    fn test_materialization_flags_pre_met_recipients() {
        let engagement = Arc::new(InMemoryEngagement::new());
        engagement.add_dataview_member("dv-1", "ada");

        let start = at(2025, 6, 1, 8);
        let mut flow = make_flow(&["ada", "grace"], vec![bp(1, 0, 9)], start);
        flow.conversion_goal = Some(ConversionGoal {
            goal_type: ConversionGoalType::EnteredDataView {
                dataview_id: "dv-1".into(),
            },
            timeframe_days: 7,
        });

        let goal = goal_processor(flow.conversion_goal.as_ref(), engagement.clone());
        let b = CommunicationBuilder::new(engagement);
        b.create_next_communication(&mut flow, 0, goal.as_ref(), at(2025, 6, 1, 10))
            .unwrap();

        let instance = &flow.instances[0];
        assert!(instance.recipient_for("ada").unwrap().goal_pre_met);
        assert!(!instance.recipient_for("grace").unwrap().goal_pre_met);
    }
}
