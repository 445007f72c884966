//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for the invoicing tests. The catalog is
//! the sporting goods catalog used throughout the scenarios: a Pistol base
//! plan with a free trial, two upgrades, and a Cleaning add-on.

use chrono::NaiveDate;
use core_kernel::{Currency, Money};
use domain_invoice::{BillingPeriod, InMemoryCatalog, PhasePrice, PhaseType, PlanPhase};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const PISTOL: &str = "pistol-monthly";
pub const SHOTGUN: &str = "shotgun-monthly";
pub const ASSAULT_RIFLE: &str = "assault-rifle-monthly";
pub const CLEANING: &str = "cleaning-monthly";
pub const BLOWDART: &str = "blowdart-quarterly";

static SPORTING_GOODS: Lazy<InMemoryCatalog> = Lazy::new(|| {
    InMemoryCatalog::new()
        .with_phase(PISTOL, PhaseType::Trial, PhasePrice::fixed(MoneyFixtures::usd(dec!(0))))
        .with_phase(PISTOL, PhaseType::Evergreen, PhasePrice::recurring(MoneyFixtures::usd(dec!(29.95))))
        .with_phase(SHOTGUN, PhaseType::Evergreen, PhasePrice::recurring(MoneyFixtures::usd(dec!(249.95))))
        .with_phase(ASSAULT_RIFLE, PhaseType::Evergreen, PhasePrice::recurring(MoneyFixtures::usd(dec!(599.95))))
        .with_phase(CLEANING, PhaseType::Evergreen, PhasePrice::recurring(MoneyFixtures::usd(dec!(2.95))))
        .with_phase(BLOWDART, PhaseType::Evergreen, PhasePrice::recurring(MoneyFixtures::usd(dec!(104.85))))
});

/// Fixture for the catalog
pub struct CatalogFixtures;

impl CatalogFixtures {
    /// Pistol, Shotgun, Assault-Rifle, Cleaning and a quarterly Blowdart
    pub fn sporting_goods() -> InMemoryCatalog {
        SPORTING_GOODS.clone()
    }
}

/// Fixture for plan phases
pub struct PlanFixtures;

impl PlanFixtures {
    /// Thirty day free trial, FIXED 0
    pub fn pistol_trial() -> PlanPhase {
        PlanPhase::new(PISTOL, PhaseType::Trial, BillingPeriod::NoBillingPeriod)
    }

    /// 29.95 per month
    pub fn pistol_evergreen() -> PlanPhase {
        PlanPhase::new(PISTOL, PhaseType::Evergreen, BillingPeriod::Monthly)
    }

    /// 249.95 per month
    pub fn shotgun_evergreen() -> PlanPhase {
        PlanPhase::new(SHOTGUN, PhaseType::Evergreen, BillingPeriod::Monthly)
    }

    /// 599.95 per month
    pub fn assault_rifle_evergreen() -> PlanPhase {
        PlanPhase::new(ASSAULT_RIFLE, PhaseType::Evergreen, BillingPeriod::Monthly)
    }

    /// Add-on, 2.95 per month
    pub fn cleaning_evergreen() -> PlanPhase {
        PlanPhase::new(CLEANING, PhaseType::Evergreen, BillingPeriod::Monthly)
    }

    /// 104.85 per quarter
    pub fn blowdart_evergreen() -> PlanPhase {
        PlanPhase::new(BLOWDART, PhaseType::Evergreen, BillingPeriod::Quarterly)
    }

    /// Not in the catalog
    pub fn unknown() -> PlanPhase {
        PlanPhase::new("crossbow-monthly", PhaseType::Evergreen, BillingPeriod::Monthly)
    }
}

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    /// Tax item amount used by the scenarios
    pub fn usd_tax() -> Money {
        Self::usd(dec!(1.00))
    }

    /// Creates a EUR amount for currency mismatch tests
    pub fn eur(amount: Decimal) -> Money {
        Money::new(amount, Currency::EUR)
    }
}

/// Fixture for dates
pub struct DateFixtures;

impl DateFixtures {
    /// A day of 2012; April is used as the start month because it has 30 days
    pub fn day(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, month, day).expect("valid 2012 date")
    }

    /// Account creation day of every scenario
    pub fn start() -> NaiveDate {
        Self::day(4, 1)
    }

    /// End of the Pistol trial
    pub fn trial_end() -> NaiveDate {
        Self::day(5, 1)
    }
}
