//! JSON scenarios
//!
//! A scenario describes an account, its catalog and an ordered list of
//! steps: billing events to record, real invoicing passes and credits. After
//! the steps run, a dry run at `target_date` shows what the next pass would
//! invoice.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use core_kernel::{AccountId, BundleId, Currency, DayCountConvention, FixedClock, Money, SubscriptionId, Timezone};
use domain_invoice::{
    AccountSettings, AccountTimeline, BillingActionPolicy, BillingEvent, DraftPolicy, DryRunMode, EngineConfig,
    InMemoryCatalog, InMemoryInvoiceStore, Invoice, InvoiceEngine, InvoiceError, PhasePrice, PhaseType, PlanPhase,
    TransitionKind,
};

/// Scenario loading and replay errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step {step}: {message}")]
    Step { step: usize, message: String },

    #[error(transparent)]
    Invoice(#[from] InvoiceError),
}

/// Account settings; the id is generated on each run
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAccount {
    pub currency: Currency,
    #[serde(default)]
    pub timezone: Timezone,
    #[serde(default)]
    pub bill_cycle_day: Option<u32>,
    #[serde(default)]
    pub day_count: DayCountConvention,
    #[serde(default)]
    pub draft_policy: DraftPolicy,
}

/// Prices of one plan phase
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub plan: String,
    pub phase: PhaseType,
    #[serde(default)]
    pub fixed: Option<Money>,
    #[serde(default)]
    pub recurring: Option<Money>,
}

/// A billing event; subscriptions and bundles are named by label
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEvent {
    pub subscription: String,
    pub bundle: String,
    pub transition: TransitionKind,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub plan_phase: Option<PlanPhase>,
    #[serde(default)]
    pub policy: BillingActionPolicy,
}

/// One step of a scenario
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Record a billing event
    Record(ScenarioEvent),
    /// Run a committing pass with the clock set to `date`
    Invoice { date: NaiveDate },
    /// Grant account credit
    Credit { date: NaiveDate, amount: Money },
}

/// A full scenario file
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub account: ScenarioAccount,
    pub catalog: Vec<CatalogEntry>,
    pub steps: Vec<ScenarioStep>,
    pub target_date: NaiveDate,
    /// Day the dry run happens on; defaults to the target date
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

/// What a scenario produced
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub account_id: AccountId,
    /// Committed invoices with account totals
    pub timeline: AccountTimeline,
    /// Dry-run invoice at the target date, if anything is due
    pub projection: Option<Invoice>,
    /// Subscriptions skipped by any pass, with the reason
    pub rejected: Vec<String>,
}

/// Maps scenario labels to generated ids
#[derive(Default)]
struct Labels {
    bundles: HashMap<String, BundleId>,
    subscriptions: HashMap<String, SubscriptionId>,
}

impl Labels {
    fn bundle(&mut self, label: &str) -> BundleId {
        *self.bundles.entry(label.to_string()).or_insert_with(BundleId::new)
    }

    fn subscription(&mut self, label: &str) -> SubscriptionId {
        *self
            .subscriptions
            .entry(label.to_string())
            .or_insert_with(SubscriptionId::new)
    }
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn catalog(&self) -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        for entry in &self.catalog {
            catalog.insert(
                entry.plan.clone(),
                entry.phase,
                PhasePrice {
                    fixed: entry.fixed,
                    recurring: entry.recurring,
                },
            );
        }
        catalog
    }

    fn settings(&self) -> AccountSettings {
        let mut account = AccountSettings::new(AccountId::new(), self.account.currency)
            .with_timezone(self.account.timezone)
            .with_day_count(self.account.day_count)
            .with_draft_policy(self.account.draft_policy);
        account.bill_cycle_day = self.account.bill_cycle_day;
        account
    }

    /// Runs every step, then a dry run at the target date
    ///
    /// # Errors
    ///
    /// Returns `Step` for an event that cannot be recorded and `Invoice` for
    /// any engine failure.
    pub async fn run(&self, config: EngineConfig) -> Result<ScenarioReport, ScenarioError> {
        let account = self.settings();
        let account_id = account.id;
        let store = Arc::new(InMemoryInvoiceStore::new());
        store.put_account(account).await;

        let clock = Arc::new(FixedClock::at_day(self.today.unwrap_or(self.target_date)));
        let engine = InvoiceEngine::builder(store.clone(), Arc::new(self.catalog()))
            .clock(clock.clone())
            .config(config)
            .build()?;

        let mut labels = Labels::default();
        let mut rejected = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            let step_number = index + 1;
            match step {
                ScenarioStep::Record(event) => {
                    let event = to_billing_event(account_id, event, &mut labels).ok_or_else(|| {
                        ScenarioError::Step {
                            step: step_number,
                            message: format!("{:?} needs a plan_phase", event.transition),
                        }
                    })?;
                    store
                        .append_event(event)
                        .await
                        .map_err(|e| ScenarioError::Step {
                            step: step_number,
                            message: e.to_string(),
                        })?;
                }
                ScenarioStep::Invoice { date } => {
                    clock.set_day(*date);
                    let outcome = engine.generate(account_id, *date, DryRunMode::None).await?;
                    info!(
                        step = step_number,
                        date = %date,
                        invoiced = outcome.invoice.is_some(),
                        "Scenario pass complete"
                    );
                    rejected.extend(
                        outcome
                            .rejected
                            .into_iter()
                            .map(|r| format!("{} on {}: {}", r.subscription_id, date, r.reason)),
                    );
                }
                ScenarioStep::Credit { date, amount } => {
                    clock.set_day(*date);
                    engine.insert_credit(account_id, *amount, *date).await?;
                }
            }
        }

        clock.set_day(self.today.unwrap_or(self.target_date));
        let projection = engine
            .generate(account_id, self.target_date, DryRunMode::TargetDate)
            .await?;
        rejected.extend(
            projection
                .rejected
                .into_iter()
                .map(|r| format!("{} on {}: {}", r.subscription_id, self.target_date, r.reason)),
        );

        Ok(ScenarioReport {
            account_id,
            timeline: engine.account_timeline(account_id).await?,
            projection: projection.invoice,
            rejected,
        })
    }
}

/// Returns `None` when a CREATE, PHASE or CHANGE carries no plan
fn to_billing_event(account_id: AccountId, event: &ScenarioEvent, labels: &mut Labels) -> Option<BillingEvent> {
    let bundle_id = labels.bundle(&event.bundle);
    let subscription_id = labels.subscription(&event.subscription);
    let date = event.effective_date;
    let built = match event.transition {
        TransitionKind::Create => {
            BillingEvent::create(account_id, bundle_id, subscription_id, date, event.plan_phase.clone()?)
        }
        TransitionKind::Phase => {
            BillingEvent::phase(account_id, bundle_id, subscription_id, date, event.plan_phase.clone()?)
        }
        TransitionKind::Change => BillingEvent::change(
            account_id,
            bundle_id,
            subscription_id,
            date,
            event.plan_phase.clone()?,
            event.policy,
        ),
        TransitionKind::Cancel => BillingEvent::cancel(account_id, bundle_id, subscription_id, date, event.policy),
    };
    Some(built)
}
