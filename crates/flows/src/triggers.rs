//! Trigger type processors — how flow instances come into existence.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dripline_schedule::{RecurrenceSchedule, ScheduleEvaluator};
use tracing::{info, warn};

use crate::types::{Flow, FlowInstance, TriggerType};

/// Strategy contract for a flow's instance lifecycle.
///
/// Both operations are re-runnable: `ensure_latest_instance` creates at most
/// the one instance that is due today, and `close_messaging_if_warranted`
/// flips the flow's messaging flag at most once.
pub trait TriggerProcessor: Send + Sync {
    fn ensure_latest_instance(&self, flow: &mut Flow, now: DateTime<Utc>) -> Result<bool>;
    fn close_messaging_if_warranted(&self, flow: &mut Flow, now: DateTime<Utc>) -> Result<bool>;
}

/// Selects the strategy for a flow's trigger type.
pub fn trigger_processor(
    kind: TriggerType,
    schedules: Arc<dyn ScheduleEvaluator>,
) -> Box<dyn TriggerProcessor> {
    match kind {
        TriggerType::OneTime => Box::new(OneTimeTrigger { schedules }),
        TriggerType::Recurring => Box::new(RecurringTrigger { schedules }),
        TriggerType::OnDemand => Box::new(OnDemandTrigger),
    }
}

/// Occurrence timestamps carry the schedule's time of day; an instance only
/// pins the date. Rebuild the timestamp to walk the schedule from it.
fn occurrence_anchor(date: NaiveDate, schedule: &RecurrenceSchedule) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(schedule.start_at.time()))
}

// ------------------------------------------------------------------
// One-time
// ------------------------------------------------------------------

struct OneTimeTrigger {
    schedules: Arc<dyn ScheduleEvaluator>,
}

impl TriggerProcessor for OneTimeTrigger {
    fn ensure_latest_instance(&self, flow: &mut Flow, now: DateTime<Utc>) -> Result<bool> {
        if !flow.instances.is_empty() {
            return Ok(false);
        }
        let Some(schedule) = &flow.schedule else {
            warn!(flow_id = %flow.id, "One-time flow has no schedule; skipping trigger");
            return Ok(false);
        };
        let Some(first) = self.schedules.first_start(schedule) else {
            warn!(flow_id = %flow.id, "Schedule yields no start time; skipping trigger");
            return Ok(false);
        };

        let start_date = first.date_naive();
        if start_date > now.date_naive() {
            return Ok(false);
        }

        info!(flow_id = %flow.id, start = %start_date, "Creating one-time flow instance");
        flow.instances.push(FlowInstance::new(flow.id, start_date, now));
        Ok(true)
    }

    fn close_messaging_if_warranted(&self, flow: &mut Flow, _now: DateTime<Utc>) -> Result<bool> {
        if flow.messaging_closed || flow.instances.is_empty() || !flow.all_instances_complete() {
            return Ok(false);
        }
        info!(flow_id = %flow.id, "One-time flow messaging closed");
        flow.messaging_closed = true;
        Ok(true)
    }
}

// ------------------------------------------------------------------
// Recurring
// ------------------------------------------------------------------

struct RecurringTrigger {
    schedules: Arc<dyn ScheduleEvaluator>,
}

impl TriggerProcessor for RecurringTrigger {
    fn ensure_latest_instance(&self, flow: &mut Flow, now: DateTime<Utc>) -> Result<bool> {
        let Some(schedule) = flow.schedule.clone() else {
            warn!(flow_id = %flow.id, "Recurring flow has no schedule; skipping trigger");
            return Ok(false);
        };
        let today = now.date_naive();

        // Walk forward from the last materialized occurrence (or the
        // schedule's first start), collecting the latest occurrence that has
        // already arrived. Occurrences missed on earlier days are skipped,
        // never back-filled.
        let mut latest_due: Option<DateTime<Utc>> = None;
        let mut cursor = match flow.last_instance_start() {
            Some(last) => occurrence_anchor(last, &schedule),
            None => {
                let Some(first) = self.schedules.first_start(&schedule) else {
                    return Ok(false);
                };
                if first.date_naive() > today {
                    return Ok(false);
                }
                latest_due = Some(first);
                first
            }
        };

        while let Some(candidate) = self.schedules.next_after(&schedule, cursor) {
            if candidate <= cursor {
                warn!(
                    flow_id = %flow.id,
                    "Recurrence schedule failed to advance; skipping trigger"
                );
                return Ok(false);
            }
            if candidate.date_naive() > today {
                break;
            }
            latest_due = Some(candidate);
            cursor = candidate;
        }

        match latest_due {
            Some(due) if due.date_naive() == today => {
                info!(flow_id = %flow.id, start = %today, "Creating recurring flow instance");
                flow.instances.push(FlowInstance::new(flow.id, today, now));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn close_messaging_if_warranted(&self, flow: &mut Flow, now: DateTime<Utc>) -> Result<bool> {
        if flow.messaging_closed || !flow.all_instances_complete() {
            return Ok(false);
        }

        let future = flow
            .schedule
            .as_ref()
            .and_then(|s| self.schedules.next_after(s, now));
        match future {
            None => {
                info!(flow_id = %flow.id, "Recurring flow messaging closed, schedule exhausted");
                flow.messaging_closed = true;
                Ok(true)
            }
            Some(next) if next <= now => {
                warn!(
                    flow_id = %flow.id,
                    "Recurrence schedule failed to advance; leaving messaging open"
                );
                Ok(false)
            }
            Some(_) => Ok(false),
        }
    }
}

// ------------------------------------------------------------------
// On-demand
// ------------------------------------------------------------------

/// Instance lifecycle for on-demand flows is driven externally; the batch
/// never creates or closes anything for them.
struct OnDemandTrigger;

impl TriggerProcessor for OnDemandTrigger {
    fn ensure_latest_instance(&self, _flow: &mut Flow, _now: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }

    fn close_messaging_if_warranted(&self, _flow: &mut Flow, _now: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }
}
