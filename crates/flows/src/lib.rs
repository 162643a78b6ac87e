//! Drip-campaign flow processing engine.
//!
//! A [`types::Flow`] owns dated [`types::FlowInstance`]s; each instance owns
//! a recipient ledger and an ordered chain of sent communications. The
//! [`orchestrator::FlowOrchestrator`] drives one pass per cycle: trigger
//! evaluation, unsubscribe propagation, conversion detection, exit-condition
//! pruning, next-communication creation, then a single commit per flow and
//! post-commit dispatch. Every stage is safe to re-run.

pub mod builder;
pub mod conversions;
pub mod exit;
pub mod orchestrator;
pub mod recipients;
pub mod store;
pub mod triggers;
pub mod types;

pub use builder::{BuildOutcome, CommunicationBuilder};
pub use conversions::{goal_processor, ConversionGoalProcessor, ConversionOutcome};
pub use exit::{ExitConditionEvaluator, PruneOutcome};
pub use orchestrator::{FlowOrchestrator, RunSummary};
pub use recipients::{InactiveReason, Recipient, RecipientStatus};
pub use store::{FlowStore, InMemoryFlowStore};
pub use triggers::{trigger_processor, TriggerProcessor};
pub use types::{
    Blueprint, Conversion, ConversionGoal, ConversionGoalType, ExitConditionType, Flow,
    FlowInstance, InstanceCommunication, TriggerType,
};
