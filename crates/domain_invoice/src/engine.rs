//! Invoice generation engine
//!
//! Orchestrates one invoicing pass per account:
//!
//! 1. Acquire the account lock
//! 2. Skip the pass if auto-invoicing is suppressed (dry runs always run)
//! 3. Generate the expected FIXED/RECURRING items per subscription
//! 4. Reconcile them against committed items, producing repairs
//! 5. Merge into the open draft or a new invoice
//! 6. Ask the invoice plugins for TAX/EXTERNAL_CHARGE items
//! 7. Apply account credit and commit, save the draft, or return the
//!    projection untouched

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use core_kernel::{AccountId, BundleId, Clock, InvoiceId, InvoiceItemId, Money, PaymentId, SubscriptionId, SystemClock};

use crate::account::{AccountSettings, AutoInvoicingMode};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::credit::AccountCreditLedger;
use crate::draft::{merge_generated, open_draft, prepare_target, PassMode};
use crate::error::InvoiceError;
use crate::events::InvoiceEvent;
use crate::generator::{resolve_bill_cycle_day, ItemGenerator};
use crate::invoice::Invoice;
use crate::item::{InvoiceItem, InvoiceItemKind};
use crate::lock::{AccountGuard, AccountLocks};
use crate::plugin::{ExternalItemAdapter, InvoicePluginApi, PluginProperty};
use crate::repair::reconcile;
use crate::store::InvoiceStore;
use crate::timeline::{BillingEvent, BillingEventTimeline};
use crate::timeline_view::AccountTimeline;

/// How a generation pass treats its result
#[derive(Debug, Clone, Default)]
pub enum DryRunMode {
    /// Real pass: the invoice is committed or saved as a draft
    #[default]
    None,
    /// Compute what would be invoiced at the target date
    TargetDate,
    /// Compute the invoice as if the given subscription change had happened
    SubscriptionAction(Box<BillingEvent>),
}

impl DryRunMode {
    pub fn is_dry_run(&self) -> bool {
        !matches!(self, DryRunMode::None)
    }
}

/// A subscription skipped by a pass because its billing data is inconsistent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSubscription {
    pub subscription_id: SubscriptionId,
    pub reason: String,
}

/// Result of a generation pass
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    /// The committed invoice, saved draft, or dry-run projection; `None`
    /// when there was nothing to invoice
    pub invoice: Option<Invoice>,
    /// Subscriptions left out of this pass
    pub rejected: Vec<RejectedSubscription>,
    /// True if the pass was skipped because auto-invoicing is off
    pub suppressed: bool,
}

impl GenerationOutcome {
    fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }
}

/// Ad hoc charge to bill on the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChargeRequest {
    pub bundle_id: Option<BundleId>,
    pub date: NaiveDate,
    pub amount: Money,
    pub description: String,
}

impl ExternalChargeRequest {
    pub fn new(date: NaiveDate, amount: Money, description: impl Into<String>) -> Self {
        Self {
            bundle_id: None,
            date,
            amount,
            description: description.into(),
        }
    }

    pub fn for_bundle(mut self, bundle_id: BundleId) -> Self {
        self.bundle_id = Some(bundle_id);
        self
    }
}

/// Builder for [`InvoiceEngine`]
pub struct InvoiceEngineBuilder {
    store: Arc<dyn InvoiceStore>,
    catalog: Arc<dyn Catalog>,
    plugins: Vec<Arc<dyn InvoicePluginApi>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl InvoiceEngineBuilder {
    /// Registers a plugin; plugins are called in registration order
    pub fn plugin(mut self, plugin: Arc<dyn InvoicePluginApi>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is unusable.
    pub fn build(self) -> Result<InvoiceEngine, InvoiceError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(self.config.event_capacity);
        Ok(InvoiceEngine {
            store: self.store,
            catalog: self.catalog,
            plugins: ExternalItemAdapter::new(self.plugins, self.config.plugin_timeout()),
            clock: self.clock,
            locks: AccountLocks::new(self.config.lock_wait()),
            events,
            config: self.config,
        })
    }
}

/// Invoice generation and reconciliation engine
pub struct InvoiceEngine {
    store: Arc<dyn InvoiceStore>,
    catalog: Arc<dyn Catalog>,
    plugins: ExternalItemAdapter,
    clock: Arc<dyn Clock>,
    locks: AccountLocks,
    events: broadcast::Sender<InvoiceEvent>,
    config: EngineConfig,
}

impl InvoiceEngine {
    pub fn builder(store: Arc<dyn InvoiceStore>, catalog: Arc<dyn Catalog>) -> InvoiceEngineBuilder {
        InvoiceEngineBuilder {
            store,
            catalog,
            plugins: Vec::new(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribes to invoice events published after each persisted change
    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
        self.events.subscribe()
    }

    /// Runs a generation pass with no plugin properties
    pub async fn generate(
        &self,
        account_id: AccountId,
        target_date: NaiveDate,
        dry_run: DryRunMode,
    ) -> Result<GenerationOutcome, InvoiceError> {
        self.generate_with_properties(account_id, target_date, dry_run, &[]).await
    }

    /// Runs a generation pass for the account up to `target_date`
    ///
    /// # Arguments
    ///
    /// * `account_id` - Account to invoice
    /// * `target_date` - Bill everything whose service starts on or before this date
    /// * `dry_run` - Whether to persist the result
    /// * `properties` - Opaque key/values handed to every plugin
    ///
    /// # Errors
    ///
    /// * `Concurrency` if another pass holds the account
    /// * `Plugin` if a plugin fails or times out; nothing is persisted
    /// * `InvariantViolation` if the result would break a ledger invariant
    /// * `InvalidState` if a COMMIT-policy account has a generated draft
    #[instrument(skip(self, dry_run, properties), fields(account_id = %account_id, target_date = %target_date))]
    pub async fn generate_with_properties(
        &self,
        account_id: AccountId,
        target_date: NaiveDate,
        dry_run: DryRunMode,
        properties: &[PluginProperty],
    ) -> Result<GenerationOutcome, InvoiceError> {
        let guard = self.locks.acquire(account_id).await?;
        self.run_pass(&guard, account_id, target_date, dry_run, properties).await
    }

    /// Body of a generation pass; the caller holds the account lock
    async fn run_pass(
        &self,
        _guard: &AccountGuard,
        account_id: AccountId,
        target_date: NaiveDate,
        dry_run: DryRunMode,
        properties: &[PluginProperty],
    ) -> Result<GenerationOutcome, InvoiceError> {
        let account = self.store.account(account_id).await?;
        let is_dry_run = dry_run.is_dry_run();

        if account.is_suppressed() && !is_dry_run {
            info!("Auto-invoicing is off; pass suppressed");
            return Ok(GenerationOutcome::suppressed());
        }

        let mut timeline = self.store.billing_events(account_id).await?;
        if let DryRunMode::SubscriptionAction(event) = dry_run {
            timeline = timeline.with_hypothetical(*event)?;
        }

        let invoices = self.store.invoices(account_id).await?;
        let now = self.clock.now();
        let today = self.clock.today(&account.timezone);
        let mode = PassMode::for_account(&account, is_dry_run);
        let draft = open_draft(&invoices)?;

        let bill_cycle_day = resolve_bill_cycle_day(&account, &timeline, self.catalog.as_ref())?;
        let (generated, rejected) = self.expected_items(&account, bill_cycle_day, &timeline, &invoices, target_date)?;

        let mut invoice = prepare_target(mode, &account, draft, today, target_date, now)?;
        let merge = merge_generated(&mut invoice, generated)?;
        debug!(kept = merge.kept, added = merge.added, dropped = merge.dropped, "Merged generated items");

        if invoice.items().is_empty() {
            info!(rejected = rejected.len(), "Nothing to invoice");
            return Ok(GenerationOutcome {
                invoice: None,
                rejected,
                suppressed: false,
            });
        }

        let batch = self.plugins.collect(&invoice, is_dry_run, properties).await?;
        let plugin_items = self.plugins.apply(batch, &mut invoice, &committed_item_ids(&invoices))?;
        debug!(plugin_items, "Applied plugin items");

        match mode {
            PassMode::DryRun => {
                let mut ledger = AccountCreditLedger::from_invoices(account_id, account.currency, &invoices)?;
                ledger.apply_to(&mut invoice, today)?;
                info!(invoice_id = %invoice.id, items = invoice.items().len(), "Dry run computed");
            }
            PassMode::Draft => {
                self.store.persist(vec![invoice.clone()]).await?;
                info!(invoice_id = %invoice.id, items = invoice.items().len(), "Draft invoice saved");
                self.publish(InvoiceEvent::DraftInvoiceSaved {
                    account_id,
                    invoice_id: invoice.id,
                    item_count: invoice.items().len(),
                    timestamp: now,
                });
                self.fix_bill_cycle_day(&account, bill_cycle_day, &invoice).await?;
            }
            PassMode::Commit => {
                let mut ledger = AccountCreditLedger::from_invoices(account_id, account.currency, &invoices)?;
                self.finalize(&mut ledger, &mut invoice, today).await?;
                self.store.persist(vec![invoice.clone()]).await?;
                self.publish_committed(&invoice)?;
                self.fix_bill_cycle_day(&account, bill_cycle_day, &invoice).await?;
            }
        }

        Ok(GenerationOutcome {
            invoice: Some(invoice),
            rejected,
            suppressed: false,
        })
    }

    /// Commits an open draft
    ///
    /// Account credit is applied at commit time; plugins are not consulted
    /// again.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invoice does not belong to the account and
    /// `InvalidState` if it is already committed.
    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id))]
    pub async fn commit(&self, account_id: AccountId, invoice_id: InvoiceId) -> Result<Invoice, InvoiceError> {
        let _guard = self.locks.acquire(account_id).await?;
        let account = self.store.account(account_id).await?;
        let mut invoice = self.owned_invoice(account_id, invoice_id).await?;
        if invoice.is_committed() {
            return Err(InvoiceError::InvalidState(format!(
                "invoice {} is already committed",
                invoice_id
            )));
        }

        let invoices = self.store.invoices(account_id).await?;
        let mut ledger = AccountCreditLedger::from_invoices(account_id, account.currency, &invoices)?;
        let today = self.clock.today(&account.timezone);
        self.finalize(&mut ledger, &mut invoice, today).await?;
        self.store.persist(vec![invoice.clone()]).await?;
        self.publish_committed(&invoice)?;
        Ok(invoice)
    }

    /// Bills ad hoc charges
    ///
    /// With `auto_commit` the charges go on a new invoice that is committed
    /// immediately; otherwise they are added to the open draft (or a new
    /// one). Plugins see the invoice in both cases.
    #[instrument(skip(self, charges), fields(account_id = %account_id, charges = charges.len()))]
    pub async fn insert_external_charges(
        &self,
        account_id: AccountId,
        charges: Vec<ExternalChargeRequest>,
        auto_commit: bool,
    ) -> Result<Invoice, InvoiceError> {
        let _guard = self.locks.acquire(account_id).await?;
        let account = self.store.account(account_id).await?;
        if charges.is_empty() {
            return Err(InvoiceError::validation("no external charges given"));
        }

        let invoices = self.store.invoices(account_id).await?;
        let now = self.clock.now();
        let today = self.clock.today(&account.timezone);
        let mut invoice = match open_draft(&invoices)? {
            Some(draft) if !auto_commit => draft.clone(),
            _ => Invoice::new_draft(account_id, account.currency, today, today, now),
        };

        for charge in charges {
            if charge.amount.currency() != account.currency {
                return Err(InvoiceError::validation(format!(
                    "charge '{}' is in {}, account {} bills in {}",
                    charge.description,
                    charge.amount.currency(),
                    account_id,
                    account.currency
                )));
            }
            invoice.add_item(InvoiceItem::external_charge(
                account_id,
                charge.bundle_id,
                charge.date,
                charge.amount,
                charge.description,
            ))?;
        }
        invoice.updated_at = now;

        let batch = self.plugins.collect(&invoice, false, &[]).await?;
        self.plugins.apply(batch, &mut invoice, &committed_item_ids(&invoices))?;

        if auto_commit {
            let mut ledger = AccountCreditLedger::from_invoices(account_id, account.currency, &invoices)?;
            self.finalize(&mut ledger, &mut invoice, today).await?;
            self.store.persist(vec![invoice.clone()]).await?;
            self.publish_committed(&invoice)?;
        } else {
            self.store.persist(vec![invoice.clone()]).await?;
            info!(invoice_id = %invoice.id, "External charges saved on draft");
            self.publish(InvoiceEvent::DraftInvoiceSaved {
                account_id,
                invoice_id: invoice.id,
                item_count: invoice.items().len(),
                timestamp: now,
            });
        }
        Ok(invoice)
    }

    /// Grants account credit on a new committed invoice
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount is not positive or not in the
    /// account currency.
    #[instrument(skip(self), fields(account_id = %account_id, amount = %amount))]
    pub async fn insert_credit(
        &self,
        account_id: AccountId,
        amount: Money,
        effective_date: NaiveDate,
    ) -> Result<Invoice, InvoiceError> {
        let _guard = self.locks.acquire(account_id).await?;
        let account = self.store.account(account_id).await?;
        if amount.currency() != account.currency {
            return Err(InvoiceError::validation(format!(
                "credit is in {}, account {} bills in {}",
                amount.currency(),
                account_id,
                account.currency
            )));
        }

        let (cba, adjustment) = AccountCreditLedger::credit_items(account_id, amount, effective_date)?;
        let now = self.clock.now();
        let today = self.clock.today(&account.timezone);
        let mut invoice = Invoice::new_draft(account_id, account.currency, today, effective_date, now);
        invoice.add_item(cba)?;
        invoice.add_item(adjustment)?;

        let number = self.store.next_invoice_number().await?;
        invoice.commit(number, now)?;
        self.store.persist(vec![invoice.clone()]).await?;

        info!(invoice_id = %invoice.id, invoice_number = number, "Account credit inserted");
        self.publish(InvoiceEvent::CreditInserted {
            account_id,
            invoice_id: invoice.id,
            amount,
            timestamp: now,
        });
        self.publish_committed(&invoice)?;
        Ok(invoice)
    }

    /// Switches auto-invoicing; turning it back on runs a pass at
    /// `target_date` to catch up on everything suppressed meanwhile
    #[instrument(skip(self), fields(account_id = %account_id, mode = ?mode))]
    pub async fn set_auto_invoicing(
        &self,
        account_id: AccountId,
        mode: AutoInvoicingMode,
        target_date: NaiveDate,
    ) -> Result<Option<GenerationOutcome>, InvoiceError> {
        let guard = self.locks.acquire(account_id).await?;
        let previous = self.store.set_auto_invoicing(account_id, mode).await?;
        info!(previous = ?previous, "Auto-invoicing mode changed");

        if previous == AutoInvoicingMode::Off && mode == AutoInvoicingMode::On {
            let outcome = self
                .run_pass(&guard, account_id, target_date, DryRunMode::None, &[])
                .await?;
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    /// Records a payment against a committed invoice
    #[instrument(skip(self), fields(account_id = %account_id, invoice_id = %invoice_id, amount = %amount))]
    pub async fn record_payment(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
        amount: Money,
    ) -> Result<PaymentId, InvoiceError> {
        let _guard = self.locks.acquire(account_id).await?;
        let mut invoice = self.owned_invoice(account_id, invoice_id).await?;
        let now = self.clock.now();
        let payment_id = invoice.record_payment(amount, now)?;
        self.store.persist(vec![invoice.clone()]).await?;

        let balance = invoice.balance()?;
        info!(payment_id = %payment_id, balance = %balance, "Payment recorded");
        self.publish(InvoiceEvent::PaymentRecorded {
            account_id,
            invoice_id,
            payment_id,
            amount,
            balance,
            timestamp: now,
        });
        Ok(payment_id)
    }

    /// Returns every invoice of the account with running totals
    pub async fn account_timeline(&self, account_id: AccountId) -> Result<AccountTimeline, InvoiceError> {
        let account = self.store.account(account_id).await?;
        let invoices = self.store.invoices(account_id).await?;
        AccountTimeline::build(account_id, account.currency, &invoices)
    }

    /// Generates and reconciles the items every subscription should carry
    ///
    /// Subscriptions with inconsistent events or prices are rejected and
    /// skipped; the rest of the account is still invoiced.
    fn expected_items(
        &self,
        account: &AccountSettings,
        bill_cycle_day: u32,
        timeline: &BillingEventTimeline,
        invoices: &[Invoice],
        target_date: NaiveDate,
    ) -> Result<(Vec<InvoiceItem>, Vec<RejectedSubscription>), InvoiceError> {
        let generator = ItemGenerator::new(account, self.catalog.as_ref(), bill_cycle_day);

        // store returns committed invoices in number order
        let committed: Vec<&InvoiceItem> = invoices
            .iter()
            .filter(|invoice| invoice.is_committed())
            .flat_map(|invoice| invoice.items())
            .collect();

        let mut items = Vec::new();
        let mut rejected = Vec::new();
        for subscription_id in timeline.subscriptions() {
            let events = timeline.events_for(subscription_id);
            let billed: Vec<&InvoiceItem> = committed
                .iter()
                .copied()
                .filter(|item| item.subscription_id == Some(subscription_id))
                .collect();

            // regenerate up to the last billed slice so advance billing can be repaired
            let horizon = billed
                .iter()
                .filter(|item| item.kind == InvoiceItemKind::Recurring)
                .map(|item| item.period.start)
                .max()
                .map_or(target_date, |latest| latest.max(target_date));

            let candidates = match generator.generate(subscription_id, &events, horizon) {
                Ok(candidates) => candidates,
                Err(InvoiceError::Validation { message, .. }) => {
                    warn!(subscription_id = %subscription_id, reason = %message, "Subscription rejected");
                    rejected.push(RejectedSubscription {
                        subscription_id,
                        reason: message,
                    });
                    continue;
                }
                Err(other) => return Err(other),
            };

            let mut reconciliation = reconcile(candidates, &billed)?;
            reconciliation.charges.retain(|item| item.period.start <= target_date);
            debug!(
                subscription_id = %subscription_id,
                charges = reconciliation.charges.len(),
                repairs = reconciliation.repairs.len(),
                unchanged = reconciliation.unchanged,
                "Reconciled subscription"
            );
            items.extend(reconciliation.into_items());
        }
        Ok((items, rejected))
    }

    /// Keeps the derived bill cycle day once recurring items have been billed
    /// with it, so later subscriptions cannot move existing slices
    async fn fix_bill_cycle_day(
        &self,
        account: &AccountSettings,
        bill_cycle_day: u32,
        invoice: &Invoice,
    ) -> Result<(), InvoiceError> {
        if account.bill_cycle_day.is_some() || invoice.items_of(InvoiceItemKind::Recurring).next().is_none() {
            return Ok(());
        }
        let fixed = self.store.fix_bill_cycle_day(account.id, bill_cycle_day).await?;
        info!(account_id = %account.id, bill_cycle_day = fixed, "Bill cycle day fixed");
        Ok(())
    }

    async fn finalize(
        &self,
        ledger: &mut AccountCreditLedger,
        invoice: &mut Invoice,
        today: NaiveDate,
    ) -> Result<(), InvoiceError> {
        ledger.apply_to(invoice, today)?;
        let number = self.store.next_invoice_number().await?;
        invoice.commit(number, self.clock.now())
    }

    async fn owned_invoice(&self, account_id: AccountId, invoice_id: InvoiceId) -> Result<Invoice, InvoiceError> {
        let invoice = self.store.invoice(invoice_id).await?;
        if invoice.account_id != account_id {
            return Err(InvoiceError::NotFound(format!(
                "Invoice {} on account {}",
                invoice_id, account_id
            )));
        }
        Ok(invoice)
    }

    fn publish_committed(&self, invoice: &Invoice) -> Result<(), InvoiceError> {
        let invoice_number = invoice
            .invoice_number
            .ok_or_else(|| InvoiceError::invariant(format!("committed invoice {} has no number", invoice.id)))?;
        let balance = invoice.balance()?;
        info!(
            invoice_id = %invoice.id,
            invoice_number,
            balance = %balance,
            items = invoice.items().len(),
            "Invoice committed"
        );
        self.publish(InvoiceEvent::InvoiceCommitted {
            account_id: invoice.account_id,
            invoice_id: invoice.id,
            invoice_number,
            balance,
            payment_required: balance.is_positive(),
            timestamp: invoice.updated_at,
        });
        Ok(())
    }

    fn publish(&self, event: InvoiceEvent) {
        let event_type = event.event_type();
        if self.events.send(event).is_err() {
            debug!(event_type, "No subscribers for invoice event");
        }
    }
}

fn committed_item_ids(invoices: &[Invoice]) -> HashSet<InvoiceItemId> {
    invoices
        .iter()
        .filter(|invoice| invoice.is_committed())
        .flat_map(|invoice| invoice.items().iter().map(|item| item.id))
        .collect()
}
