//! Scriptable Invoice Plugins
//!
//! Test doubles for `InvoicePluginApi`. The tax plugin hands out queued
//! TAX items once and then forgets them, so every pass that should carry a
//! tax item needs its own `add_tax_item` call.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use core_kernel::{BundleId, DomainPort, InvoiceId, InvoiceItemId, Money, PortError};
use domain_invoice::{Invoice, InvoiceItem, InvoicePluginApi, PluginProperty};

#[derive(Debug, Clone)]
struct PendingTax {
    id: InvoiceItemId,
    bundle_id: Option<BundleId>,
    date: NaiveDate,
    amount: Money,
}

/// What a plugin was shown on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCall {
    pub invoice_id: InvoiceId,
    pub is_dry_run: bool,
    pub item_count: usize,
    pub properties: Vec<PluginProperty>,
}

/// Returns queued TAX items on the next call, then clears the queue
#[derive(Debug, Default)]
pub struct TestTaxPlugin {
    pending: Mutex<Vec<PendingTax>>,
    calls: Mutex<Vec<PluginCall>>,
}

impl TestTaxPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a tax item; queuing an id again replaces the queued amount
    pub fn add_tax_item(&self, id: InvoiceItemId, date: NaiveDate, amount: Money) {
        self.queue(PendingTax {
            id,
            bundle_id: None,
            date,
            amount,
        });
    }

    pub fn add_bundle_tax_item(&self, id: InvoiceItemId, bundle_id: BundleId, date: NaiveDate, amount: Money) {
        self.queue(PendingTax {
            id,
            bundle_id: Some(bundle_id),
            date,
            amount,
        });
    }

    pub fn reset(&self) {
        self.pending.lock().unwrap().clear();
        self.calls.lock().unwrap().clear();
    }

    /// Calls received so far, oldest first
    pub fn calls(&self) -> Vec<PluginCall> {
        self.calls.lock().unwrap().clone()
    }

    fn queue(&self, tax: PendingTax) {
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|queued| queued.id != tax.id);
        pending.push(tax);
    }
}

impl DomainPort for TestTaxPlugin {}

#[async_trait]
impl InvoicePluginApi for TestTaxPlugin {
    fn name(&self) -> &str {
        "TaxInvoicePluginApi"
    }

    async fn get_additional_items(
        &self,
        invoice: &Invoice,
        is_dry_run: bool,
        properties: &[PluginProperty],
    ) -> Result<Vec<InvoiceItem>, PortError> {
        self.calls.lock().unwrap().push(PluginCall {
            invoice_id: invoice.id,
            is_dry_run,
            item_count: invoice.items().len(),
            properties: properties.to_vec(),
        });

        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        Ok(pending
            .into_iter()
            .map(|tax| {
                InvoiceItem::tax(invoice.account_id, tax.bundle_id, tax.date, tax.amount, "Tax Item").with_id(tax.id)
            })
            .collect())
    }
}

/// Always returns the same items
#[derive(Debug, Clone)]
pub struct StaticItemsPlugin {
    items: Vec<InvoiceItem>,
}

impl StaticItemsPlugin {
    pub fn new(items: Vec<InvoiceItem>) -> Self {
        Self { items }
    }
}

impl DomainPort for StaticItemsPlugin {}

#[async_trait]
impl InvoicePluginApi for StaticItemsPlugin {
    fn name(&self) -> &str {
        "static-items"
    }

    async fn get_additional_items(
        &self,
        _invoice: &Invoice,
        _is_dry_run: bool,
        _properties: &[PluginProperty],
    ) -> Result<Vec<InvoiceItem>, PortError> {
        Ok(self.items.clone())
    }
}

/// Fails every call as if its backend were down
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPlugin;

impl DomainPort for FailingPlugin {}

#[async_trait]
impl InvoicePluginApi for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get_additional_items(
        &self,
        _invoice: &Invoice,
        _is_dry_run: bool,
        _properties: &[PluginProperty],
    ) -> Result<Vec<InvoiceItem>, PortError> {
        Err(PortError::ServiceUnavailable {
            service: "tax-backend".to_string(),
        })
    }
}

/// Sleeps before answering with no items
#[derive(Debug, Clone, Copy)]
pub struct SlowPlugin {
    delay: Duration,
}

impl SlowPlugin {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl DomainPort for SlowPlugin {}

#[async_trait]
impl InvoicePluginApi for SlowPlugin {
    fn name(&self) -> &str {
        "slow"
    }

    async fn get_additional_items(
        &self,
        _invoice: &Invoice,
        _is_dry_run: bool,
        _properties: &[PluginProperty],
    ) -> Result<Vec<InvoiceItem>, PortError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}
