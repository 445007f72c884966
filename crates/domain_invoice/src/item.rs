//! Invoice items
//!
//! Every line on an invoice is an `InvoiceItem`. The kind decides who may
//! produce it:
//!
//! | Kind              | Produced by                   | Sign |
//! |-------------------|-------------------------------|------|
//! | `Fixed`           | generator                     | ≥ 0  |
//! | `Recurring`       | generator                     | ≥ 0  |
//! | `RepairAdj`       | repair reconciler             | ≤ 0  |
//! | `Tax`             | invoice plugins               | any  |
//! | `ExternalCharge`  | plugins or external callers   | any  |
//! | `CbaAdj`          | credit ledger                 | any  |
//! | `CreditAdj`       | credit insertion              | < 0  |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BundleId, Currency, InvoiceId, InvoiceItemId, Money, ServicePeriod, SubscriptionId};

use crate::catalog::{PhaseType, PlanPhase};

/// Kind of invoice item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceItemKind {
    Fixed,
    Recurring,
    RepairAdj,
    Tax,
    ExternalCharge,
    CbaAdj,
    CreditAdj,
}

impl InvoiceItemKind {
    /// Items the generator and repair reconciler own
    pub fn is_generated(&self) -> bool {
        matches!(
            self,
            InvoiceItemKind::Fixed | InvoiceItemKind::Recurring | InvoiceItemKind::RepairAdj
        )
    }

    /// Items a plugin may contribute
    pub fn is_plugin_kind(&self) -> bool {
        matches!(self, InvoiceItemKind::Tax | InvoiceItemKind::ExternalCharge)
    }

    /// Items that move account credit rather than charge for service
    pub fn is_credit(&self) -> bool {
        matches!(self, InvoiceItemKind::CbaAdj | InvoiceItemKind::CreditAdj)
    }
}

/// A single line on an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub kind: InvoiceItemKind,
    /// Set once the item is placed on an invoice
    pub invoice_id: Option<InvoiceId>,
    pub account_id: AccountId,
    pub bundle_id: Option<BundleId>,
    pub subscription_id: Option<SubscriptionId>,
    pub plan_name: Option<String>,
    pub phase: Option<PhaseType>,
    pub period: ServicePeriod,
    pub amount: Money,
    /// Full-period price for recurring items
    pub rate: Option<Money>,
    /// Item this one adjusts (repairs)
    pub linked_item_id: Option<InvoiceItemId>,
    pub description: String,
}

impl InvoiceItem {
    fn build(kind: InvoiceItemKind, account_id: AccountId, period: ServicePeriod, amount: Money) -> Self {
        Self {
            id: InvoiceItemId::new_v7(),
            kind,
            invoice_id: None,
            account_id,
            bundle_id: None,
            subscription_id: None,
            plan_name: None,
            phase: None,
            period,
            amount,
            rate: None,
            linked_item_id: None,
            description: String::new(),
        }
    }

    /// One-off charge at the start of a phase
    pub fn fixed(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        plan_phase: &PlanPhase,
        date: NaiveDate,
        amount: Money,
    ) -> Self {
        let mut item = Self::build(InvoiceItemKind::Fixed, account_id, ServicePeriod::starting(date), amount);
        item.bundle_id = Some(bundle_id);
        item.subscription_id = Some(subscription_id);
        item.plan_name = Some(plan_phase.plan.clone());
        item.phase = Some(plan_phase.phase);
        item.description = format!("{} (fixed price)", plan_phase.phase_name());
        item
    }

    /// Charge for one (possibly partial) billing period
    pub fn recurring(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        plan_phase: &PlanPhase,
        period: ServicePeriod,
        amount: Money,
        rate: Money,
    ) -> Self {
        let mut item = Self::build(InvoiceItemKind::Recurring, account_id, period, amount);
        item.bundle_id = Some(bundle_id);
        item.subscription_id = Some(subscription_id);
        item.plan_name = Some(plan_phase.plan.clone());
        item.phase = Some(plan_phase.phase);
        item.rate = Some(rate);
        item.description = plan_phase.phase_name();
        item
    }

    /// Reversal of (part of) a previously committed charge
    pub fn repair(original: &InvoiceItem, period: ServicePeriod, amount: Money) -> Self {
        let mut item = Self::build(InvoiceItemKind::RepairAdj, original.account_id, period, amount);
        item.bundle_id = original.bundle_id;
        item.subscription_id = original.subscription_id;
        item.plan_name = original.plan_name.clone();
        item.phase = original.phase;
        item.rate = original.rate;
        item.linked_item_id = Some(original.id);
        item.description = format!("Adjustment of {}", original.description);
        item
    }

    /// Tax line, normally contributed by a plugin
    pub fn tax(
        account_id: AccountId,
        bundle_id: Option<BundleId>,
        date: NaiveDate,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        let mut item = Self::build(InvoiceItemKind::Tax, account_id, ServicePeriod::starting(date), amount);
        item.bundle_id = bundle_id;
        item.description = description.into();
        item
    }

    /// Ad hoc charge not derived from billing events
    pub fn external_charge(
        account_id: AccountId,
        bundle_id: Option<BundleId>,
        date: NaiveDate,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        let mut item = Self::build(
            InvoiceItemKind::ExternalCharge,
            account_id,
            ServicePeriod::starting(date),
            amount,
        );
        item.bundle_id = bundle_id;
        item.description = description.into();
        item
    }

    /// Account credit booked (positive) or consumed (negative)
    pub fn cba_adjustment(account_id: AccountId, date: NaiveDate, amount: Money) -> Self {
        let mut item = Self::build(InvoiceItemKind::CbaAdj, account_id, ServicePeriod::single_day(date), amount);
        item.description = if amount.is_negative() {
            "Account credit used".to_string()
        } else {
            "Account credit generated".to_string()
        };
        item
    }

    /// Credit granted to the account; always negative
    pub fn credit_adjustment(account_id: AccountId, date: NaiveDate, amount: Money) -> Self {
        let mut item = Self::build(InvoiceItemKind::CreditAdj, account_id, ServicePeriod::single_day(date), amount);
        item.description = "Credit adjustment".to_string();
        item
    }

    /// Replaces the generated id, e.g. to keep a draft item's identity
    pub fn with_id(mut self, id: InvoiceItemId) -> Self {
        self.id = id;
        self
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// Returns true if both items describe the same charge, ignoring ids
    pub fn same_charge(&self, other: &InvoiceItem) -> bool {
        self.kind == other.kind
            && self.subscription_id == other.subscription_id
            && self.plan_name == other.plan_name
            && self.phase == other.phase
            && self.period == other.period
            && self.amount == other.amount
            && self.rate == other.rate
            && self.linked_item_id == other.linked_item_id
    }
}
