//! Engine Test Harness
//!
//! Wires an `InvoiceEngine` to an in-memory store, the sporting goods
//! catalog, a settable clock and a `TestTaxPlugin`, and creates the account
//! under test.

use std::sync::Arc;

use chrono::NaiveDate;
use core_kernel::{AccountId, FixedClock};
use domain_invoice::{
    AccountSettings, BillingEvent, EngineConfig, InMemoryInvoiceStore, Invoice, InvoiceEngine, InvoicePluginApi,
    InvoiceStore,
};

use crate::builders::{TestAccountBuilder, TestSubscription};
use crate::fixtures::CatalogFixtures;
use crate::plugins::TestTaxPlugin;

/// An engine plus handles on everything it talks to
pub struct TestHarness {
    pub engine: InvoiceEngine,
    pub store: Arc<InMemoryInvoiceStore>,
    pub clock: Arc<FixedClock>,
    pub tax: Arc<TestTaxPlugin>,
    pub account: AccountSettings,
}

impl TestHarness {
    /// Default USD account, clock set to `today`
    pub async fn start(today: NaiveDate) -> Self {
        Self::with_account(TestAccountBuilder::new().build(), today).await
    }

    pub async fn with_account(account: AccountSettings, today: NaiveDate) -> Self {
        TestHarnessBuilder::new(account, today).build().await
    }

    pub fn builder(account: AccountSettings, today: NaiveDate) -> TestHarnessBuilder {
        TestHarnessBuilder::new(account, today)
    }

    pub fn account_id(&self) -> AccountId {
        self.account.id
    }

    /// A new base subscription on the test account
    pub fn subscription(&self) -> TestSubscription {
        TestSubscription::new(self.account.id)
    }

    /// Records billing events in order
    pub async fn record(&self, events: impl IntoIterator<Item = BillingEvent>) {
        for event in events {
            self.store.append_event(event).await.expect("billing event recorded");
        }
    }

    /// Committed invoices in number order followed by drafts
    pub async fn invoices(&self) -> Vec<Invoice> {
        self.store.invoices(self.account.id).await.expect("invoices loaded")
    }

    /// The committed invoice with the given number
    pub async fn invoice_number(&self, number: u64) -> Invoice {
        self.invoices()
            .await
            .into_iter()
            .find(|invoice| invoice.invoice_number == Some(number))
            .unwrap_or_else(|| panic!("no invoice number {}", number))
    }

    /// Changes account settings behind the engine's back
    pub async fn update_account(&mut self, update: impl FnOnce(&mut AccountSettings)) {
        self.account = self
            .store
            .update_account(self.account.id, update)
            .await
            .expect("account updated");
    }
}

/// Adds extra plugins or configuration to a harness
pub struct TestHarnessBuilder {
    account: AccountSettings,
    today: NaiveDate,
    plugins: Vec<Arc<dyn InvoicePluginApi>>,
    config: EngineConfig,
    with_tax: bool,
}

impl TestHarnessBuilder {
    fn new(account: AccountSettings, today: NaiveDate) -> Self {
        Self {
            account,
            today,
            plugins: Vec::new(),
            config: EngineConfig::default(),
            with_tax: true,
        }
    }

    /// Registers a plugin after the tax plugin
    pub fn plugin(mut self, plugin: Arc<dyn InvoicePluginApi>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Leaves the tax plugin unregistered
    pub fn without_tax(mut self) -> Self {
        self.with_tax = false;
        self
    }

    pub async fn build(self) -> TestHarness {
        let store = Arc::new(InMemoryInvoiceStore::new());
        store.put_account(self.account.clone()).await;
        let clock = Arc::new(FixedClock::at_day(self.today));
        let tax = Arc::new(TestTaxPlugin::new());

        let mut builder = InvoiceEngine::builder(store.clone(), Arc::new(CatalogFixtures::sporting_goods()))
            .clock(clock.clone())
            .config(self.config);
        if self.with_tax {
            builder = builder.plugin(tax.clone());
        }
        for plugin in self.plugins {
            builder = builder.plugin(plugin);
        }

        TestHarness {
            engine: builder.build().expect("engine configuration is valid"),
            store,
            clock,
            tax,
            account: self.account,
        }
    }
}
