//! Invoice store port
//!
//! The engine reads accounts, billing timelines and invoices through
//! `InvoiceStore` and writes the result of a pass with a single `persist`
//! call, so an adapter can make each pass atomic.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_invoice::store::{InvoiceStore, InMemoryInvoiceStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryInvoiceStore::new());
//! store.put_account(account).await;
//! store.append_event(event).await?;
//!
//! let engine = InvoiceEngine::builder(store, catalog).build()?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use core_kernel::{AccountId, DomainPort, InvoiceId, PortError};

use crate::account::{AccountSettings, AutoInvoicingMode};
use crate::invoice::Invoice;
use crate::timeline::{BillingEvent, BillingEventTimeline};

/// Persistence port for the invoicing engine
#[async_trait]
pub trait InvoiceStore: DomainPort {
    /// Retrieves account billing settings
    ///
    /// # Returns
    ///
    /// The settings if found, or `PortError::NotFound`
    async fn account(&self, account_id: AccountId) -> Result<AccountSettings, PortError>;

    /// Sets the auto-invoicing mode, returning the previous mode
    async fn set_auto_invoicing(
        &self,
        account_id: AccountId,
        mode: AutoInvoicingMode,
    ) -> Result<AutoInvoicingMode, PortError>;

    /// Fixes the bill cycle day of an account that has none yet
    ///
    /// Returns the day now in effect: `day`, or the one already set.
    async fn fix_bill_cycle_day(&self, account_id: AccountId, day: u32) -> Result<u32, PortError>;

    /// Retrieves the account's billing event timeline (empty if none)
    async fn billing_events(&self, account_id: AccountId) -> Result<BillingEventTimeline, PortError>;

    /// Retrieves all invoices of an account, committed ones in number order
    /// followed by any draft
    async fn invoices(&self, account_id: AccountId) -> Result<Vec<Invoice>, PortError>;

    /// Retrieves one invoice
    async fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, PortError>;

    /// Allocates the next invoice number; numbers are never reused
    async fn next_invoice_number(&self) -> Result<u64, PortError>;

    /// Inserts or replaces invoices atomically
    ///
    /// # Errors
    ///
    /// Returns `PortError::Conflict` if any invoice would change the items of
    /// an already committed invoice or turn it back into a draft; in that
    /// case nothing is written.
    async fn persist(&self, invoices: Vec<Invoice>) -> Result<(), PortError>;
}

/// In-memory store used by tests, dry-run tooling and the CLI
#[derive(Debug)]
pub struct InMemoryInvoiceStore {
    accounts: RwLock<HashMap<AccountId, AccountSettings>>,
    timelines: RwLock<HashMap<AccountId, BillingEventTimeline>>,
    invoices: RwLock<HashMap<AccountId, Vec<Invoice>>>,
    next_number: AtomicU64,
}

impl Default for InMemoryInvoiceStore {
    fn default() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            timelines: RwLock::new(HashMap::new()),
            invoices: RwLock::new(HashMap::new()),
            next_number: AtomicU64::new(1),
        }
    }
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an account
    pub async fn put_account(&self, account: AccountSettings) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Replaces an account's settings in place
    pub async fn update_account<F>(&self, account_id: AccountId, update: F) -> Result<AccountSettings, PortError>
    where
        F: FnOnce(&mut AccountSettings),
    {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| PortError::not_found("Account", account_id))?;
        update(account);
        Ok(account.clone())
    }

    /// Records a billing event on its account's timeline
    pub async fn append_event(&self, event: BillingEvent) -> Result<BillingEvent, PortError> {
        let account_id = event.account_id;
        if !self.accounts.read().await.contains_key(&account_id) {
            return Err(PortError::not_found("Account", account_id));
        }
        let mut timelines = self.timelines.write().await;
        let timeline = timelines
            .entry(account_id)
            .or_insert_with(|| BillingEventTimeline::new(account_id));
        let recorded = timeline
            .append(event)
            .map_err(|e| PortError::validation(e.to_string()))?
            .clone();
        debug!(
            account_id = %account_id,
            subscription_id = %recorded.subscription_id,
            sequence = recorded.sequence,
            "Recorded billing event"
        );
        Ok(recorded)
    }
}

impl DomainPort for InMemoryInvoiceStore {}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn account(&self, account_id: AccountId) -> Result<AccountSettings, PortError> {
        self.accounts
            .read()
            .await
            .get(&account_id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Account", account_id))
    }

    #[instrument(skip(self), fields(account_id = %account_id, mode = ?mode))]
    async fn set_auto_invoicing(
        &self,
        account_id: AccountId,
        mode: AutoInvoicingMode,
    ) -> Result<AutoInvoicingMode, PortError> {
        let mut previous = mode;
        self.update_account(account_id, |account| {
            previous = account.auto_invoicing;
            account.auto_invoicing = mode;
        })
        .await?;
        Ok(previous)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn fix_bill_cycle_day(&self, account_id: AccountId, day: u32) -> Result<u32, PortError> {
        let account = self
            .update_account(account_id, |account| {
                account.bill_cycle_day.get_or_insert(day);
            })
            .await?;
        let fixed = account.bill_cycle_day.unwrap_or(day);
        debug!(bill_cycle_day = fixed, "Bill cycle day fixed");
        Ok(fixed)
    }

    async fn billing_events(&self, account_id: AccountId) -> Result<BillingEventTimeline, PortError> {
        Ok(self
            .timelines
            .read()
            .await
            .get(&account_id)
            .cloned()
            .unwrap_or_else(|| BillingEventTimeline::new(account_id)))
    }

    async fn invoices(&self, account_id: AccountId) -> Result<Vec<Invoice>, PortError> {
        let mut invoices = self
            .invoices
            .read()
            .await
            .get(&account_id)
            .cloned()
            .unwrap_or_default();
        invoices.sort_by_key(|invoice| (invoice.is_draft(), invoice.invoice_number));
        Ok(invoices)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, PortError> {
        self.invoices
            .read()
            .await
            .values()
            .flatten()
            .find(|invoice| invoice.id == invoice_id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Invoice", invoice_id))
    }

    async fn next_invoice_number(&self) -> Result<u64, PortError> {
        Ok(self.next_number.fetch_add(1, Ordering::SeqCst))
    }

    #[instrument(skip(self, batch), fields(count = batch.len()))]
    async fn persist(&self, batch: Vec<Invoice>) -> Result<(), PortError> {
        let mut invoices = self.invoices.write().await;

        for incoming in &batch {
            let existing = invoices
                .get(&incoming.account_id)
                .and_then(|list| list.iter().find(|invoice| invoice.id == incoming.id));
            if let Some(existing) = existing.filter(|existing| existing.is_committed()) {
                if !incoming.is_committed() || incoming.items() != existing.items() {
                    return Err(PortError::conflict(format!(
                        "invoice {} is committed and cannot be modified",
                        existing.id
                    )));
                }
            }
        }

        for incoming in batch {
            let list = invoices.entry(incoming.account_id).or_default();
            match list.iter_mut().find(|invoice| invoice.id == incoming.id) {
                Some(slot) => *slot = incoming,
                None => list.push(incoming),
            }
        }
        debug!("Invoices persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::InvoiceItem;
    use chrono::{NaiveDate, Utc};
    use core_kernel::{Currency, Money};
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_account_not_found() {
        let store = InMemoryInvoiceStore::new();
        let err = store.account(AccountId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_bill_cycle_day_is_fixed_once() {
        let store = InMemoryInvoiceStore::new();
        let account = AccountSettings::new(AccountId::new(), Currency::USD);
        let account_id = account.id;
        store.put_account(account).await;

        assert_eq!(store.fix_bill_cycle_day(account_id, 10).await.unwrap(), 10);
        assert_eq!(store.fix_bill_cycle_day(account_id, 5).await.unwrap(), 10);
        assert_eq!(store.account(account_id).await.unwrap().bill_cycle_day, Some(10));
    }

    #[tokio::test]
    async fn test_numbers_are_sequential() {
        let store = InMemoryInvoiceStore::new();
        assert_eq!(store.next_invoice_number().await.unwrap(), 1);
        assert_eq!(store.next_invoice_number().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_committed_invoice_cannot_be_rewritten() {
        let store = InMemoryInvoiceStore::new();
        let account = AccountId::new();
        let mut invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        invoice
            .add_item(InvoiceItem::tax(account, None, d(5, 1), Money::new(dec!(1), Currency::USD), "tax"))
            .unwrap();
        invoice.commit(1, Utc::now()).unwrap();
        store.persist(vec![invoice.clone()]).await.unwrap();

        let mut rewritten = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        rewritten.id = invoice.id;
        let other = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());

        let err = store.persist(vec![other.clone(), rewritten]).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict { .. }));
        // the batch is all-or-nothing
        assert!(store.invoice(other.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_payment_on_committed_invoice_is_persisted() {
        let store = InMemoryInvoiceStore::new();
        let account = AccountId::new();
        let mut invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        invoice.commit(1, Utc::now()).unwrap();
        store.persist(vec![invoice.clone()]).await.unwrap();

        invoice.record_payment(Money::new(dec!(5), Currency::USD), Utc::now()).unwrap();
        store.persist(vec![invoice.clone()]).await.unwrap();
        assert_eq!(store.invoice(invoice.id).await.unwrap().payments().len(), 1);
    }

    #[tokio::test]
    async fn test_drafts_listed_after_committed() {
        let store = InMemoryInvoiceStore::new();
        let account = AccountId::new();
        let draft = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        let mut committed = Invoice::new_draft(account, Currency::USD, d(4, 1), d(4, 1), Utc::now());
        committed.commit(1, Utc::now()).unwrap();
        store.persist(vec![draft.clone(), committed.clone()]).await.unwrap();

        let invoices = store.invoices(account).await.unwrap();
        assert_eq!(invoices[0].id, committed.id);
        assert_eq!(invoices[1].id, draft.id);
    }
}
