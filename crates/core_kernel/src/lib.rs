//! Core Kernel - Foundational types shared by the invoicing crates
//!
//! This crate provides the building blocks used across the workspace:
//! - Money types with precise decimal arithmetic
//! - Service periods, day-count conventions and clocks
//! - Typed identifiers for accounts, invoices, items and subscriptions
//! - Port error and marker types for collaborator adapters

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;
pub mod error;

pub use money::{Money, Currency, MoneyError};
pub use temporal::{
    ServicePeriod, DayCountConvention, Timezone, Clock, SystemClock, FixedClock,
    TemporalError,
};
pub use identifiers::{
    AccountId, BundleId, SubscriptionId, BillingEventId, InvoiceId, InvoiceItemId,
    PaymentId,
};
pub use ports::{PortError, DomainPort};
pub use error::CoreError;
