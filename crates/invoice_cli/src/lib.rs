//! Invoicing dry-run tool
//!
//! Replays a JSON scenario (account, catalog and a list of steps) against an
//! in-memory invoicing engine and reports the committed invoices together
//! with a dry-run projection at the scenario's target date.

pub mod config;
pub mod scenario;

pub use config::CliConfig;
pub use scenario::{Scenario, ScenarioError, ScenarioReport, ScenarioStep};
