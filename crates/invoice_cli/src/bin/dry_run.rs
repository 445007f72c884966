//! Invoicing dry-run binary
//!
//! Replays a JSON scenario and prints the resulting invoices and the
//! dry-run projection as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin invoice-dry-run -- crates/invoice_cli/scenarios/pistol_upgrade.json
//!
//! # Shorter plugin timeout, debug logs as JSON
//! INVOICE_PLUGIN_TIMEOUT_MS=500 INVOICE_CLI_LOG_LEVEL=debug INVOICE_CLI_JSON_LOGS=true \
//!     cargo run --bin invoice-dry-run -- scenario.json
//! ```
//!
//! # Environment Variables
//!
//! * `INVOICE_CLI_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)
//! * `INVOICE_CLI_JSON_LOGS` - Emit logs as JSON lines (default: false)
//! * `INVOICE_PLUGIN_TIMEOUT_MS` - Upper bound on one plugin call (default: 5000)
//! * `INVOICE_LOCK_WAIT_MS` - How long a pass waits for the account lock (default: 0)

use anyhow::Context;
use domain_invoice::EngineConfig;
use invoice_cli::{CliConfig, Scenario};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = CliConfig::from_env().unwrap_or_default();
    init_tracing(&config);

    let path = std::env::args()
        .nth(1)
        .context("usage: invoice-dry-run <scenario.json>")?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading scenario {}", path))?;
    let scenario = Scenario::from_json(&raw).with_context(|| format!("parsing scenario {}", path))?;
    let engine_config = EngineConfig::from_env().context("loading engine configuration")?;

    tracing::info!(path = %path, steps = scenario.steps.len(), target_date = %scenario.target_date, "Running scenario");
    let report = scenario.run(engine_config).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Initializes the tracing subscriber on stderr
fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
