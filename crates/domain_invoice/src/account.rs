//! Account billing settings
//!
//! The engine only needs a narrow view of an account: its currency, the
//! timezone its calendar days are taken in, the bill cycle day, and the two
//! switches that control how invoices are produced.

use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, Currency, DayCountConvention, Timezone};

/// Whether event-driven generation produces invoices for the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoInvoicingMode {
    /// Invoices are generated as billing events arrive
    #[default]
    On,
    /// Generation is suppressed; events accumulate until switched back on
    Off,
}

/// What a generation pass produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftPolicy {
    /// Every pass produces a committed invoice
    #[default]
    Commit,
    /// Passes accumulate into a single open draft until it is committed
    Draft,
}

/// Billing settings for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub id: AccountId,
    pub currency: Currency,
    #[serde(default)]
    pub timezone: Timezone,
    /// Day of month recurring items align to; derived from the first
    /// recurring billing event when unset
    pub bill_cycle_day: Option<u32>,
    #[serde(default)]
    pub day_count: DayCountConvention,
    #[serde(default)]
    pub auto_invoicing: AutoInvoicingMode,
    #[serde(default)]
    pub draft_policy: DraftPolicy,
}

impl AccountSettings {
    /// Creates settings with defaults: UTC, derived BCD, actual days,
    /// auto-invoicing on, commit policy
    pub fn new(id: AccountId, currency: Currency) -> Self {
        Self {
            id,
            currency,
            timezone: Timezone::default(),
            bill_cycle_day: None,
            day_count: DayCountConvention::default(),
            auto_invoicing: AutoInvoicingMode::default(),
            draft_policy: DraftPolicy::default(),
        }
    }

    pub fn with_bill_cycle_day(mut self, day: u32) -> Self {
        self.bill_cycle_day = Some(day);
        self
    }

    pub fn with_timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_day_count(mut self, day_count: DayCountConvention) -> Self {
        self.day_count = day_count;
        self
    }

    pub fn with_draft_policy(mut self, policy: DraftPolicy) -> Self {
        self.draft_policy = policy;
        self
    }

    pub fn with_auto_invoicing(mut self, mode: AutoInvoicingMode) -> Self {
        self.auto_invoicing = mode;
        self
    }

    /// Returns true if event-driven generation is suppressed
    pub fn is_suppressed(&self) -> bool {
        self.auto_invoicing == AutoInvoicingMode::Off
    }
}
