//! Engine configuration

use std::time::Duration;

use serde::Deserialize;

use core_kernel::CoreError;

/// Invoicing engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single plugin call
    pub plugin_timeout_ms: u64,
    /// How long a pass waits for the account lock; 0 fails immediately
    pub lock_wait_ms: u64,
    /// Capacity of the invoice event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugin_timeout_ms: 5_000,
            lock_wait_ms: 0,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `INVOICE_*` environment variables, falling
    /// back to the defaults
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("plugin_timeout_ms", defaults.plugin_timeout_ms as i64)?
            .set_default("lock_wait_ms", defaults.lock_wait_ms as i64)?
            .set_default("event_capacity", defaults.event_capacity as i64)?
            .add_source(config::Environment::with_prefix("INVOICE").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Rejects values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.plugin_timeout_ms == 0 {
            return Err(CoreError::configuration("plugin_timeout_ms must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(CoreError::configuration("event_capacity must be positive"));
        }
        Ok(())
    }
}
