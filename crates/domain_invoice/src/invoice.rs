//! Invoice aggregate
//!
//! An invoice is either an open `Draft`, whose items may still be replaced,
//! or `Committed`, after which its item set is frozen and only payments can
//! be recorded against it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BundleId, Currency, InvoiceId, InvoiceItemId, Money, PaymentId};

use crate::error::InvoiceError;
use crate::item::{InvoiceItem, InvoiceItemKind};

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Items may still change
    Draft,
    /// Numbered and immutable
    Committed,
}

/// A payment recorded against a committed invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: PaymentId,
    pub amount: Money,
    pub recorded_at: DateTime<Utc>,
}

/// An invoice for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Owning account
    pub account_id: AccountId,
    /// Sequential number, assigned on commit
    pub invoice_number: Option<u64>,
    /// Day the invoice was produced, in the account timezone
    pub invoice_date: NaiveDate,
    /// Billing horizon the invoice was generated for
    pub target_date: NaiveDate,
    /// Currency of every item
    pub currency: Currency,
    /// Status
    pub status: InvoiceStatus,
    items: Vec<InvoiceItem>,
    payments: Vec<InvoicePayment>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates an empty draft
    ///
    /// # Arguments
    ///
    /// * `account_id` - Account being invoiced
    /// * `currency` - Account currency
    /// * `invoice_date` - Today in the account timezone
    /// * `target_date` - Generation horizon
    /// * `now` - Creation instant
    pub fn new_draft(
        account_id: AccountId,
        currency: Currency,
        invoice_date: NaiveDate,
        target_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvoiceId::new_v7(),
            account_id,
            invoice_number: None,
            invoice_date,
            target_date,
            currency,
            status: InvoiceStatus::Draft,
            items: Vec::new(),
            payments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn payments(&self) -> &[InvoicePayment] {
        &self.payments
    }

    pub fn item(&self, id: InvoiceItemId) -> Option<&InvoiceItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn is_draft(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }

    pub fn is_committed(&self) -> bool {
        self.status == InvoiceStatus::Committed
    }

    /// Items of the given kind, in invoice order
    pub fn items_of(&self, kind: InvoiceItemKind) -> impl Iterator<Item = &InvoiceItem> {
        self.items.iter().filter(move |item| item.kind == kind)
    }

    /// Returns true if any generator-owned item is on the invoice
    pub fn has_generated_items(&self) -> bool {
        self.items.iter().any(|item| item.kind.is_generated())
    }

    /// Adds an item, stamping it with this invoice's id
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` on a committed invoice and `Validation` on a
    /// currency or account mismatch.
    pub fn add_item(&mut self, mut item: InvoiceItem) -> Result<(), InvoiceError> {
        self.ensure_draft("add items to")?;
        self.ensure_compatible(&item)?;
        item.invoice_id = Some(self.id);
        self.items.push(item);
        Ok(())
    }

    /// Inserts an item or replaces the item with the same id in place
    ///
    /// Returns true if an existing item was replaced.
    pub fn upsert_item(&mut self, mut item: InvoiceItem) -> Result<bool, InvoiceError> {
        self.ensure_draft("modify items of")?;
        self.ensure_compatible(&item)?;
        item.invoice_id = Some(self.id);
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                *existing = item;
                Ok(true)
            }
            None => {
                self.items.push(item);
                Ok(false)
            }
        }
    }

    /// Replaces all generator-owned items, keeping every other item
    ///
    /// Generated items are placed ahead of plugin and external items.
    pub fn replace_generated_items(&mut self, items: Vec<InvoiceItem>) -> Result<(), InvoiceError> {
        self.ensure_draft("regenerate")?;
        for item in &items {
            self.ensure_compatible(item)?;
        }
        let id = self.id;
        let kept: Vec<InvoiceItem> = self
            .items
            .drain(..)
            .filter(|item| !item.kind.is_generated())
            .collect();
        self.items = items
            .into_iter()
            .map(|mut item| {
                item.invoice_id = Some(id);
                item
            })
            .chain(kept)
            .collect();
        Ok(())
    }

    /// Removes every item of the given kind, returning how many were dropped
    pub fn remove_items_of(&mut self, kind: InvoiceItemKind) -> Result<usize, InvoiceError> {
        self.ensure_draft("modify items of")?;
        let before = self.items.len();
        self.items.retain(|item| item.kind != kind);
        Ok(before - self.items.len())
    }

    /// Sum of all items
    pub fn amount(&self) -> Result<Money, InvoiceError> {
        Ok(Money::sum(self.currency, self.items.iter().map(|item| &item.amount))?)
    }

    /// Sum of items that charge for service or external goods
    pub fn charged_amount(&self) -> Result<Money, InvoiceError> {
        Ok(Money::sum(
            self.currency,
            self.items
                .iter()
                .filter(|item| !item.kind.is_credit())
                .map(|item| &item.amount),
        )?)
    }

    /// Credit granted on this invoice, as a positive amount
    pub fn credited_amount(&self) -> Result<Money, InvoiceError> {
        let credit = Money::sum(
            self.currency,
            self.items_of(InvoiceItemKind::CreditAdj).map(|item| &item.amount),
        )?;
        Ok(credit.abs())
    }

    /// Net account credit movement on this invoice
    pub fn cba_amount(&self) -> Result<Money, InvoiceError> {
        Ok(Money::sum(
            self.currency,
            self.items_of(InvoiceItemKind::CbaAdj).map(|item| &item.amount),
        )?)
    }

    pub fn amount_paid(&self) -> Result<Money, InvoiceError> {
        Ok(Money::sum(self.currency, self.payments.iter().map(|p| &p.amount))?)
    }

    /// Amount still owed: sum of items minus payments
    pub fn balance(&self) -> Result<Money, InvoiceError> {
        Ok(self.amount()?.checked_sub(&self.amount_paid()?)?)
    }

    /// Bundles referenced by the invoice's items
    pub fn bundle_ids(&self) -> Vec<BundleId> {
        let mut ids: Vec<BundleId> = Vec::new();
        for id in self.items.iter().filter_map(|item| item.bundle_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Freezes the invoice under the given number
    pub fn commit(&mut self, invoice_number: u64, now: DateTime<Utc>) -> Result<(), InvoiceError> {
        self.ensure_draft("commit")?;
        self.status = InvoiceStatus::Committed;
        self.invoice_number = Some(invoice_number);
        self.updated_at = now;
        Ok(())
    }

    /// Records a payment against a committed invoice
    pub fn record_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<PaymentId, InvoiceError> {
        if !self.is_committed() {
            return Err(InvoiceError::InvalidState(format!(
                "cannot record a payment against draft invoice {}",
                self.id
            )));
        }
        if amount.currency() != self.currency {
            return Err(InvoiceError::validation(format!(
                "payment currency {} does not match invoice currency {}",
                amount.currency(),
                self.currency
            )));
        }
        if !amount.is_positive() {
            return Err(InvoiceError::validation("payment amount must be positive"));
        }
        let id = PaymentId::new_v7();
        self.payments.push(InvoicePayment {
            id,
            amount,
            recorded_at: now,
        });
        self.updated_at = now;
        Ok(id)
    }

    fn ensure_draft(&self, action: &str) -> Result<(), InvoiceError> {
        if self.is_committed() {
            return Err(InvoiceError::InvalidState(format!(
                "cannot {} committed invoice {}",
                action, self.id
            )));
        }
        Ok(())
    }

    fn ensure_compatible(&self, item: &InvoiceItem) -> Result<(), InvoiceError> {
        if item.account_id != self.account_id {
            return Err(InvoiceError::validation(format!(
                "item {} belongs to account {}, not {}",
                item.id, item.account_id, self.account_id
            )));
        }
        if item.currency() != self.currency {
            return Err(InvoiceError::validation(format!(
                "item {} is in {}, invoice is in {}",
                item.id,
                item.currency(),
                self.currency
            )));
        }
        Ok(())
    }
}
