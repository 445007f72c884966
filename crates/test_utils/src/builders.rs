//! Test Data Builders
//!
//! Provides builder patterns for constructing test data with sensible defaults.
//! These builders allow tests to specify only the relevant fields while using
//! defaults for everything else.

use chrono::NaiveDate;
use core_kernel::{AccountId, BundleId, Currency, DayCountConvention, SubscriptionId, Timezone};
use domain_invoice::{
    AccountSettings, AutoInvoicingMode, BillingActionPolicy, BillingEvent, DraftPolicy, PlanPhase,
};

/// Builder for constructing test accounts
pub struct TestAccountBuilder {
    account: AccountSettings,
}

impl Default for TestAccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAccountBuilder {
    /// USD account in UTC with auto-invoicing on and COMMIT policy
    pub fn new() -> Self {
        Self {
            account: AccountSettings::new(AccountId::new(), Currency::USD),
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.account.currency = currency;
        self
    }

    pub fn with_bill_cycle_day(mut self, day: u32) -> Self {
        self.account = self.account.with_bill_cycle_day(day);
        self
    }

    pub fn with_timezone(mut self, timezone: Timezone) -> Self {
        self.account = self.account.with_timezone(timezone);
        self
    }

    pub fn with_day_count(mut self, day_count: DayCountConvention) -> Self {
        self.account = self.account.with_day_count(day_count);
        self
    }

    /// Keeps generated invoices as drafts
    pub fn draft_policy(mut self) -> Self {
        self.account = self.account.with_draft_policy(DraftPolicy::Draft);
        self
    }

    /// Starts with auto-invoicing suppressed
    pub fn suppressed(mut self) -> Self {
        self.account = self.account.with_auto_invoicing(AutoInvoicingMode::Off);
        self
    }

    pub fn build(self) -> AccountSettings {
        self.account
    }
}

/// One subscription of a test account; produces its billing events
#[derive(Debug, Clone, Copy)]
pub struct TestSubscription {
    pub account_id: AccountId,
    pub bundle_id: BundleId,
    pub subscription_id: SubscriptionId,
}

impl TestSubscription {
    /// A base subscription on a new bundle
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            bundle_id: BundleId::new(),
            subscription_id: SubscriptionId::new(),
        }
    }

    /// An add-on subscription on the same bundle
    pub fn add_on(&self) -> Self {
        Self {
            account_id: self.account_id,
            bundle_id: self.bundle_id,
            subscription_id: SubscriptionId::new(),
        }
    }

    pub fn create(&self, date: NaiveDate, plan_phase: PlanPhase) -> BillingEvent {
        BillingEvent::create(self.account_id, self.bundle_id, self.subscription_id, date, plan_phase)
    }

    pub fn phase(&self, date: NaiveDate, plan_phase: PlanPhase) -> BillingEvent {
        BillingEvent::phase(self.account_id, self.bundle_id, self.subscription_id, date, plan_phase)
    }

    /// Immediate plan change
    pub fn change(&self, date: NaiveDate, plan_phase: PlanPhase) -> BillingEvent {
        self.change_with_policy(date, plan_phase, BillingActionPolicy::Immediate)
    }

    pub fn change_with_policy(
        &self,
        date: NaiveDate,
        plan_phase: PlanPhase,
        policy: BillingActionPolicy,
    ) -> BillingEvent {
        BillingEvent::change(self.account_id, self.bundle_id, self.subscription_id, date, plan_phase, policy)
    }

    /// Immediate cancellation
    pub fn cancel(&self, date: NaiveDate) -> BillingEvent {
        self.cancel_with_policy(date, BillingActionPolicy::Immediate)
    }

    pub fn cancel_with_policy(&self, date: NaiveDate, policy: BillingActionPolicy) -> BillingEvent {
        BillingEvent::cancel(self.account_id, self.bundle_id, self.subscription_id, date, policy)
    }
}
