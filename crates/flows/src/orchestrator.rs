//! Flow orchestrator — the top-level batch loop.
//!
//! One pass per cycle: for every open flow, run the trigger processor, then
//! for each instance propagate unsubscribes, detect conversions, prune
//! recipients, and build the next communication; finally run the close
//! checks and commit the whole graph at once. Messages are handed to the
//! transport only after their flow's commit succeeds, so a dispatch failure
//! can never roll back committed state. One flow's failure is logged and
//! counted; the remaining flows still process.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dripline_audience::{AudienceResolver, ConversionEvidenceSource};
use dripline_core::types::TimeWindow;
use dripline_delivery::{InteractionLog, OutboundMessage, TransportDispatcher};
use dripline_schedule::ScheduleEvaluator;
use serde::Serialize;
use tracing::{error, info};

use crate::builder::CommunicationBuilder;
use crate::conversions::goal_processor;
use crate::exit::ExitConditionEvaluator;
use crate::store::FlowStore;
use crate::triggers::trigger_processor;
use crate::types::Flow;

/// Per-run counts for operational status reporting.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub flows_processed: u64,
    pub flows_failed: u64,
    pub instances_created: u64,
    pub unsubscribes_propagated: u64,
    pub conversions_recorded: u64,
    pub recipients_deactivated: u64,
    pub communications_created: u64,
    pub communications_dispatched: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} flows processed ({} failed): {} instances created, \
             {} communications created, {} dispatched, {} conversions, \
             {} unsubscribes propagated, {} recipients deactivated",
            self.flows_processed,
            self.flows_failed,
            self.instances_created,
            self.communications_created,
            self.communications_dispatched,
            self.conversions_recorded,
            self.unsubscribes_propagated,
            self.recipients_deactivated,
        )
    }
}

/// Drives the full pipeline over every open flow, sequentially, with one
/// commit per flow.
pub struct FlowOrchestrator {
    store: Arc<dyn FlowStore>,
    audience: Arc<dyn AudienceResolver>,
    evidence: Arc<dyn ConversionEvidenceSource>,
    interactions: Arc<dyn InteractionLog>,
    dispatcher: Arc<dyn TransportDispatcher>,
    schedules: Arc<dyn ScheduleEvaluator>,
}

impl FlowOrchestrator {
    pub fn new(
        store: Arc<dyn FlowStore>,
        audience: Arc<dyn AudienceResolver>,
        evidence: Arc<dyn ConversionEvidenceSource>,
        interactions: Arc<dyn InteractionLog>,
        dispatcher: Arc<dyn TransportDispatcher>,
        schedules: Arc<dyn ScheduleEvaluator>,
    ) -> Self {
        Self {
            store,
            audience,
            evidence,
            interactions,
            dispatcher,
            schedules,
        }
    }

    /// Runs one processing pass. Always returns a summary, even when
    /// individual flows fail.
    pub fn run_once(&self, now: DateTime<Utc>) -> RunSummary {
        let mut summary = RunSummary::default();
        let flows = match self.store.load_open_flows() {
            Ok(flows) => flows,
            Err(e) => {
                error!(error = %e, "Failed to load open flows; skipping pass");
                return summary;
            }
        };
        info!(flows = flows.len(), "Starting flow processing pass");

        for mut flow in flows {
            let flow_id = flow.id;
            let flow_name = flow.name.clone();
            match self.process_flow(&mut flow, now, &mut summary) {
                Ok(pending) => {
                    summary.flows_processed += 1;
                    // Dispatch strictly after the flow's commit.
                    for message in pending {
                        self.dispatcher.enqueue(&message);
                        summary.communications_dispatched += 1;
                    }
                }
                Err(e) => {
                    metrics::counter!("flows.failed").increment(1);
                    error!(
                        flow_id = %flow_id,
                        flow = %flow_name,
                        error = %e,
                        "Flow processing failed; continuing with remaining flows"
                    );
                    summary.flows_failed += 1;
                }
            }
        }

        info!(%summary, "Flow processing pass complete");
        summary
    }

    /// The per-flow pipeline. Mutates the in-memory graph only; a single
    /// commit at the end makes the whole pass durable, and the built
    /// messages are returned for post-commit dispatch.
    fn process_flow(
        &self,
        flow: &mut Flow,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> Result<Vec<OutboundMessage>> {
        let trigger = trigger_processor(flow.trigger_type, self.schedules.clone());
        let goal = goal_processor(flow.conversion_goal.as_ref(), self.evidence.clone());
        let exit = ExitConditionEvaluator::new(self.interactions.clone());
        let builder = CommunicationBuilder::new(self.audience.clone());

        if !flow.messaging_closed && trigger.ensure_latest_instance(flow, now)? {
            summary.instances_created += 1;
        }

        let mut pending = Vec::new();
        for ix in 0..flow.instances.len() {
            let flipped = exit.propagate_unsubscribes(flow, ix);
            summary.unsubscribes_propagated += flipped as u64;
            summary.recipients_deactivated += flipped as u64;

            if !flow.conversion_tracking_closed {
                let outcome = goal.add_conversions(&mut flow.instances[ix], now)?;
                summary.conversions_recorded += outcome.added.len() as u64;
            }

            let prune = exit.prune_recipients(flow, ix)?;
            summary.recipients_deactivated += prune.deactivated() as u64;

            if !flow.instances[ix].messaging_completed {
                let built = builder.create_next_communication(flow, ix, goal.as_ref(), now)?;
                if let Some(message) = built.message {
                    summary.communications_created += 1;
                    pending.push(message);
                }
                // The builder may have just completed the instance; give the
                // exit rule a chance to retire the remaining recipients in
                // this same pass instead of leaving them dangling.
                if built.modified && flow.instances[ix].messaging_completed {
                    let prune = exit.prune_recipients(flow, ix)?;
                    summary.recipients_deactivated += prune.deactivated() as u64;
                }
            }
        }

        trigger.close_messaging_if_warranted(flow, now)?;
        close_conversion_tracking_if_warranted(flow, now);

        flow.updated_at = now;
        self.store.commit(flow)?;
        Ok(pending)
    }
}

/// Conversion tracking outlives messaging by each instance's conversion
/// window; once messaging is closed and every window has elapsed (or no
/// goal exists), the flow retires from processing entirely.
fn close_conversion_tracking_if_warranted(flow: &mut Flow, now: DateTime<Utc>) -> bool {
    if flow.conversion_tracking_closed || !flow.messaging_closed {
        return false;
    }
    let elapsed = match &flow.conversion_goal {
        None => true,
        Some(goal) => flow
            .instances
            .iter()
            .all(|i| TimeWindow::for_days(i.start_date, goal.timeframe_days).to <= now),
    };
    if elapsed {
        info!(flow_id = %flow.id, "Conversion tracking closed");
        flow.conversion_tracking_closed = true;
    }
    elapsed
}
