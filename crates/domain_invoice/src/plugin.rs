//! Invoice plugins
//!
//! Plugins see a candidate invoice before it is persisted and may contribute
//! `TAX` and `EXTERNAL_CHARGE` items. Plugin items are keyed by id: a plugin
//! that returns an id it returned before *updates* that item instead of
//! adding a second one, so a tax recomputation on a draft replaces the old
//! tax line.
//!
//! Plugins run in registration order. Each call is bounded by a timeout; a
//! plugin that errors or times out fails the whole pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use core_kernel::{DomainPort, InvoiceItemId, PortError};

use crate::error::InvoiceError;
use crate::invoice::Invoice;
use crate::item::InvoiceItem;

/// Free-form key/value passed through to plugins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginProperty {
    pub key: String,
    pub value: String,
}

impl PluginProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Contract for invoice plugins
#[async_trait]
pub trait InvoicePluginApi: DomainPort {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Returns items to add to (or update on) the candidate invoice
    ///
    /// # Arguments
    ///
    /// * `invoice` - The candidate invoice, including generated items
    /// * `is_dry_run` - True when the result will not be persisted
    /// * `properties` - Caller-supplied properties
    async fn get_additional_items(
        &self,
        invoice: &Invoice,
        is_dry_run: bool,
        properties: &[PluginProperty],
    ) -> Result<Vec<InvoiceItem>, PortError>;
}

/// Plugin items of one pass, deduplicated by id
///
/// Later writes of the same id replace earlier ones; iteration order is the
/// order in which each id was first seen.
#[derive(Debug, Clone, Default)]
pub struct ExternalItemBatch {
    order: Vec<InvoiceItemId>,
    items: HashMap<InvoiceItemId, InvoiceItem>,
}

impl ExternalItemBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an item; returns true if it replaced one
    pub fn upsert(&mut self, item: InvoiceItem) -> bool {
        let id = item.id;
        let replaced = self.items.insert(id, item).is_some();
        if !replaced {
            self.order.push(id);
        }
        replaced
    }

    pub fn into_items(mut self) -> Vec<InvoiceItem> {
        self.order
            .iter()
            .filter_map(|id| self.items.remove(id))
            .collect()
    }
}

/// Calls registered plugins and folds their items into an invoice
#[derive(Clone)]
pub struct ExternalItemAdapter {
    plugins: Vec<Arc<dyn InvoicePluginApi>>,
    timeout: Duration,
}

impl ExternalItemAdapter {
    pub fn new(plugins: Vec<Arc<dyn InvoicePluginApi>>, timeout: Duration) -> Self {
        Self { plugins, timeout }
    }

    /// Asks every plugin for items, in registration order
    ///
    /// # Errors
    ///
    /// Returns `Plugin` if a plugin fails, exceeds the timeout, or returns an
    /// item of the wrong kind, currency or account.
    pub async fn collect(
        &self,
        invoice: &Invoice,
        is_dry_run: bool,
        properties: &[PluginProperty],
    ) -> Result<ExternalItemBatch, InvoiceError> {
        let mut batch = ExternalItemBatch::new();
        for plugin in &self.plugins {
            let call = plugin.get_additional_items(invoice, is_dry_run, properties);
            let items = match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!(plugin = plugin.name(), invoice_id = %invoice.id, error = %e, "Invoice plugin failed");
                    return Err(InvoiceError::plugin(plugin.name(), e));
                }
                Err(_) => {
                    let duration_ms = self.timeout.as_millis() as u64;
                    warn!(plugin = plugin.name(), invoice_id = %invoice.id, duration_ms, "Invoice plugin timed out");
                    return Err(InvoiceError::plugin(
                        plugin.name(),
                        PortError::Timeout {
                            operation: "get_additional_items".to_string(),
                            duration_ms,
                        },
                    ));
                }
            };

            debug!(plugin = plugin.name(), items = items.len(), is_dry_run, "Invoice plugin returned items");
            for item in items {
                validate_item(plugin.name(), invoice, &item)?;
                batch.upsert(item);
            }
        }
        Ok(batch)
    }

    /// Upserts a batch onto the invoice
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if a plugin reuses the id of an item that
    /// already sits on a committed invoice.
    pub fn apply(
        &self,
        batch: ExternalItemBatch,
        invoice: &mut Invoice,
        committed_item_ids: &HashSet<InvoiceItemId>,
    ) -> Result<usize, InvoiceError> {
        let mut applied = 0;
        for item in batch.into_items() {
            if committed_item_ids.contains(&item.id) {
                return Err(InvoiceError::invariant(format!(
                    "plugin item {} is already on a committed invoice",
                    item.id
                )));
            }
            invoice.upsert_item(item)?;
            applied += 1;
        }
        Ok(applied)
    }
}

fn validate_item(plugin: &str, invoice: &Invoice, item: &InvoiceItem) -> Result<(), InvoiceError> {
    let problem = if !item.kind.is_plugin_kind() {
        Some(format!("item {} has kind {:?}; only TAX and EXTERNAL_CHARGE are allowed", item.id, item.kind))
    } else if item.currency() != invoice.currency {
        Some(format!("item {} is in {}, invoice is in {}", item.id, item.currency(), invoice.currency))
    } else if item.account_id != invoice.account_id {
        Some(format!("item {} belongs to account {}", item.id, item.account_id))
    } else {
        None
    };
    match problem {
        Some(message) => Err(InvoiceError::plugin(plugin, PortError::validation(message))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use core_kernel::{AccountId, Currency, Money};
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    struct FixedItems {
        items: Vec<InvoiceItem>,
    }

    impl DomainPort for FixedItems {}

    #[async_trait]
    impl InvoicePluginApi for FixedItems {
        fn name(&self) -> &str {
            "fixed-items"
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

    struct Stalled;

    impl DomainPort for Stalled {}

    #[async_trait]
    impl InvoicePluginApi for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn get_additional_items(
            &self,
            _invoice: &Invoice,
            _is_dry_run: bool,
            _properties: &[PluginProperty],
        ) -> Result<Vec<InvoiceItem>, PortError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn tax(account: AccountId, amount: rust_decimal::Decimal) -> InvoiceItem {
        InvoiceItem::tax(account, None, d(5, 1), Money::new(amount, Currency::USD), "Tax X")
    }

    #[test]
    fn test_batch_last_write_wins() {
        let account = AccountId::new();
        let first = tax(account, dec!(1.00));
        let mut second = first.clone();
        second.amount = Money::new(dec!(12.45), Currency::USD);

        let mut batch = ExternalItemBatch::new();
        assert!(!batch.upsert(first.clone()));
        assert!(batch.upsert(second));
        let items = batch.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount.amount(), dec!(12.45));
    }

    #[tokio::test]
    async fn test_two_plugins_same_id_yield_one_item() {
        let account = AccountId::new();
        let first = tax(account, dec!(1.00));
        let mut second = first.clone();
        second.amount = Money::new(dec!(2.00), Currency::USD);

        let adapter = ExternalItemAdapter::new(
            vec![
                Arc::new(FixedItems { items: vec![first] }),
                Arc::new(FixedItems { items: vec![second] }),
            ],
            Duration::from_secs(1),
        );
        let mut invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        let batch = adapter.collect(&invoice, false, &[]).await.unwrap();
        adapter.apply(batch, &mut invoice, &HashSet::new()).unwrap();

        assert_eq!(invoice.items().len(), 1);
        assert_eq!(invoice.items()[0].amount.amount(), dec!(2.00));
    }

    #[tokio::test]
    async fn test_wrong_kind_is_rejected() {
        let account = AccountId::new();
        let cba = InvoiceItem::cba_adjustment(account, d(5, 1), Money::new(dec!(5), Currency::USD));
        let adapter = ExternalItemAdapter::new(
            vec![Arc::new(FixedItems { items: vec![cba] })],
            Duration::from_secs(1),
        );
        let invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());

        let err = adapter.collect(&invoice, false, &[]).await.unwrap_err();
        assert!(matches!(err, InvoiceError::Plugin { .. }));
    }

    #[tokio::test]
    async fn test_timeout_fails_the_pass() {
        let account = AccountId::new();
        let adapter = ExternalItemAdapter::new(vec![Arc::new(Stalled)], Duration::from_millis(50));
        let invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());

        let err = adapter.collect(&invoice, false, &[]).await.unwrap_err();
        match err {
            InvoiceError::Plugin { plugin, source } => {
                assert_eq!(plugin, "stalled");
                assert!(source.is_transient());
            }
            other => panic!("expected plugin error, got {:?}", other),
        }
    }

    #[test]
    fn test_committed_id_is_rejected() {
        let account = AccountId::new();
        let item = tax(account, dec!(1.00));
        let committed: HashSet<_> = [item.id].into_iter().collect();
        let mut batch = ExternalItemBatch::new();
        batch.upsert(item);

        let adapter = ExternalItemAdapter::new(Vec::new(), Duration::from_secs(1));
        let mut invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        let err = adapter.apply(batch, &mut invoice, &committed).unwrap_err();
        assert!(matches!(err, InvoiceError::InvariantViolation(_)));
    }
}
