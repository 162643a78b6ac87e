//! Dripline — batch engine for drip-style communication flows.
//!
//! Main entry point: loads configuration, wires the collaborators, and runs
//! processing passes once or on an interval.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use dripline_audience::InMemoryEngagement;
use dripline_core::config::AppConfig;
use dripline_delivery::{InMemoryInteractions, LoggingDispatcher};
use dripline_flows::{FlowOrchestrator, InMemoryFlowStore};
use dripline_schedule::CalendarScheduleEvaluator;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dripline-runner")]
#[command(about = "Batch engine for drip-style communication flows")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DRIPLINE__NODE_ID")]
    node_id: Option<String>,

    /// Seconds between processing passes (overrides config)
    #[arg(long, env = "DRIPLINE__ENGINE__RUN_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Run a single processing pass and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Skip demo data seeding
    #[arg(long, default_value_t = false)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dripline=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Dripline starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(secs) = cli.interval_secs {
        config.engine.run_interval_secs = secs;
    }
    if cli.no_seed {
        config.engine.seed_demo_data = false;
    }

    info!(
        node_id = %config.node_id,
        interval_secs = config.engine.run_interval_secs,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryFlowStore::new());
    let engagement = Arc::new(InMemoryEngagement::new());
    let interactions = Arc::new(InMemoryInteractions::new());
    let dispatcher = Arc::new(LoggingDispatcher::new(config.delivery.clone()));

    if config.engine.seed_demo_data {
        store.seed_demo_flows(Utc::now());
        seed_demo_engagement(&engagement);
    }

    let orchestrator = FlowOrchestrator::new(
        store,
        engagement.clone(),
        engagement,
        interactions,
        dispatcher,
        Arc::new(CalendarScheduleEvaluator::new()),
    );

    if cli.once {
        orchestrator.run_once(Utc::now());
        return Ok(());
    }

    info!("Dripline is ready, entering processing loop");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.engine.run_interval_secs,
    ));
    loop {
        interval.tick().await;
        orchestrator.run_once(Utc::now());
    }
}

/// Audience membership matching the seeded demo flows.
fn seed_demo_engagement(engagement: &InMemoryEngagement) {
    for person in ["demo-ada", "demo-grace", "demo-lin", "demo-mei"] {
        engagement.add_dataview_member("dv-active-subscribers", person);
    }
    engagement.add_group_member("grp-dormant", "demo-rex");
    engagement.add_group_member("grp-dormant", "demo-ivy");
}
