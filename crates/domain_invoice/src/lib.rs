//! Invoicing Domain
//!
//! This crate turns an account's billing event timeline into invoices and
//! keeps already committed invoices consistent when that timeline changes
//! retroactively.
//!
//! # Invoicing Pass
//!
//! ```text
//! billing events -> expected items -> reconcile vs committed -> merge into draft
//!                                                                  |
//!           commit / save draft / dry-run projection <- CBA <- plugin items
//! ```
//!
//! - **Generator**: FIXED and RECURRING items from plan phases, prorated on
//!   the bill cycle day
//! - **Repair**: committed items are never modified; changes are reversed
//!   with REPAIR_ADJ items
//! - **Plugins**: TAX and EXTERNAL_CHARGE items upserted by id
//! - **Credit**: account credit booked and consumed through CBA_ADJ items
//! - **Draft policy**: invoices either commit immediately or collect in an
//!   open draft
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_invoice::{InvoiceEngine, DryRunMode, InMemoryInvoiceStore, InMemoryCatalog};
//!
//! let engine = InvoiceEngine::builder(store, catalog)
//!     .plugin(tax_plugin)
//!     .build()?;
//!
//! let outcome = engine.generate(account_id, target_date, DryRunMode::None).await?;
//! ```

pub mod account;
pub mod catalog;
pub mod config;
pub mod credit;
pub mod draft;
pub mod engine;
pub mod error;
pub mod events;
pub mod generator;
pub mod invoice;
pub mod item;
pub mod lock;
pub mod plugin;
pub mod repair;
pub mod store;
pub mod timeline;
pub mod timeline_view;

pub use account::{AccountSettings, AutoInvoicingMode, DraftPolicy};
pub use catalog::{BillingPeriod, Catalog, InMemoryCatalog, PhasePrice, PhaseType, PlanPhase};
pub use config::EngineConfig;
pub use credit::AccountCreditLedger;
pub use draft::{MergeSummary, PassMode};
pub use engine::{
    DryRunMode, ExternalChargeRequest, GenerationOutcome, InvoiceEngine, InvoiceEngineBuilder, RejectedSubscription,
};
pub use error::InvoiceError;
pub use events::InvoiceEvent;
pub use generator::{resolve_bill_cycle_day, BillingSegment, ItemGenerator};
pub use invoice::{Invoice, InvoicePayment, InvoiceStatus};
pub use item::{InvoiceItem, InvoiceItemKind};
pub use lock::{AccountGuard, AccountLocks};
pub use plugin::{ExternalItemAdapter, ExternalItemBatch, InvoicePluginApi, PluginProperty};
pub use repair::{reconcile, LiveCharge, Reconciliation};
pub use store::{InMemoryInvoiceStore, InvoiceStore};
pub use timeline::{BillingActionPolicy, BillingEvent, BillingEventTimeline, TransitionKind};
pub use timeline_view::{AccountTimeline, InvoiceSummary, PaymentSummary};
