//! Plan catalog
//!
//! Billing events name a plan and phase; the catalog turns that into the
//! fixed and recurring prices the generator bills.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use core_kernel::{DomainPort, Money, PortError};

/// Length of one recurring billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Annual,
    /// One-off phases that only carry a fixed price
    NoBillingPeriod,
}

impl BillingPeriod {
    /// Number of months in one period, if recurring
    pub fn months(&self) -> Option<u32> {
        match self {
            BillingPeriod::Monthly => Some(1),
            BillingPeriod::Quarterly => Some(3),
            BillingPeriod::Annual => Some(12),
            BillingPeriod::NoBillingPeriod => None,
        }
    }
}

/// Phase of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseType {
    Trial,
    Discount,
    FixedTerm,
    Evergreen,
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PhaseType::Trial => "trial",
            PhaseType::Discount => "discount",
            PhaseType::FixedTerm => "fixedterm",
            PhaseType::Evergreen => "evergreen",
        };
        f.write_str(name)
    }
}

/// The plan and phase a subscription is on after a billing event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanPhase {
    pub plan: String,
    pub phase: PhaseType,
    pub billing_period: BillingPeriod,
}

impl PlanPhase {
    pub fn new(plan: impl Into<String>, phase: PhaseType, billing_period: BillingPeriod) -> Self {
        Self {
            plan: plan.into(),
            phase,
            billing_period,
        }
    }

    /// Phase name as shown on invoice items, e.g. `pistol-monthly-evergreen`
    pub fn phase_name(&self) -> String {
        format!("{}-{}", self.plan, self.phase)
    }
}

/// Prices of a single plan phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePrice {
    /// Charged once when the phase starts
    pub fixed: Option<Money>,
    /// Charged per billing period
    pub recurring: Option<Money>,
}

impl PhasePrice {
    pub fn fixed(amount: Money) -> Self {
        Self {
            fixed: Some(amount),
            recurring: None,
        }
    }

    pub fn recurring(amount: Money) -> Self {
        Self {
            fixed: None,
            recurring: Some(amount),
        }
    }
}

/// Price lookup for plan phases
pub trait Catalog: DomainPort {
    /// Returns the prices of a plan phase
    ///
    /// # Errors
    ///
    /// Returns `PortError::NotFound` for an unknown plan or phase.
    fn price(&self, plan_phase: &PlanPhase) -> Result<PhasePrice, PortError>;
}

/// Catalog held in memory, keyed by plan name and phase
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    prices: HashMap<(String, PhaseType), PhasePrice>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the prices of a phase
    pub fn with_phase(mut self, plan: impl Into<String>, phase: PhaseType, price: PhasePrice) -> Self {
        self.insert(plan, phase, price);
        self
    }

    pub fn insert(&mut self, plan: impl Into<String>, phase: PhaseType, price: PhasePrice) {
        self.prices.insert((plan.into(), phase), price);
    }
}

impl DomainPort for InMemoryCatalog {}

impl Catalog for InMemoryCatalog {
    fn price(&self, plan_phase: &PlanPhase) -> Result<PhasePrice, PortError> {
        self.prices
            .get(&(plan_phase.plan.clone(), plan_phase.phase))
            .copied()
            .ok_or_else(|| PortError::not_found("PlanPhase", plan_phase.phase_name()))
    }
}
