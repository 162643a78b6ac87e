use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DRIPLINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Batch-engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between processing passes when running as a daemon.
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,
    /// Seed demo flows into the in-memory store on startup.
    #[serde(default = "default_seed_demo_data")]
    pub seed_demo_data: bool,
}

/// Sender identities stamped onto outbound messages.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_sms_sender")]
    pub sms_sender: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_run_interval_secs() -> u64 {
    300
}
fn default_seed_demo_data() -> bool {
    true
}
fn default_from_email() -> String {
    "noreply@dripline.dev".to_string()
}
fn default_from_name() -> String {
    "Dripline".to_string()
}
fn default_sms_sender() -> String {
    "DRIPLINE".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: default_run_interval_secs(),
            seed_demo_data: default_seed_demo_data(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
            sms_sender: default_sms_sender(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            engine: EngineConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DRIPLINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
