//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! invoicing test suite.
//!
//! # Modules
//!
//! - `fixtures`: The sporting goods catalog, plan phases and dates
//! - `builders`: Builders for accounts and subscription event scripts
//! - `plugins`: Scriptable invoice plugins (tax, failing, slow)
//! - `harness`: In-memory engine wired with a settable clock
//! - `assertions`: Invoice item assertions with readable failures
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod plugins;
pub mod harness;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use plugins::*;
pub use harness::*;
pub use assertions::*;
pub use generators::*;
