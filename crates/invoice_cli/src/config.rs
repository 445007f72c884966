//! CLI configuration

use serde::Deserialize;

/// CLI configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Log level
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl CliConfig {
    /// Loads configuration from `INVOICE_CLI_*` environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("log_level", "info")?
            .add_source(config::Environment::with_prefix("INVOICE_CLI").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
