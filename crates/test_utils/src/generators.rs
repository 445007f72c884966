//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating random test data
//! that maintains domain invariants.

use chrono::{Duration, NaiveDate};
use core_kernel::{Currency, Money};
use domain_invoice::PlanPhase;
use proptest::prelude::*;

use crate::fixtures::{DateFixtures, PlanFixtures};

/// Strategy for generating positive USD amounts between 0.01 and 1000.00
pub fn usd_price_strategy() -> impl Strategy<Value = Money> {
    (1i64..100_000i64).prop_map(|cents| Money::from_minor(cents, Currency::USD))
}

/// Strategy for generating a day of 2012 on or after April 1st
pub fn day_2012_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..240i64).prop_map(|days| DateFixtures::start() + Duration::days(days))
}

/// Strategy for generating bill cycle days, including the ones that clamp
pub fn bill_cycle_day_strategy() -> impl Strategy<Value = u32> {
    1u32..=31u32
}

/// Strategy for generating recurring plan phases from the test catalog
pub fn recurring_plan_strategy() -> impl Strategy<Value = PlanPhase> {
    prop_oneof![
        Just(PlanFixtures::pistol_evergreen()),
        Just(PlanFixtures::shotgun_evergreen()),
        Just(PlanFixtures::assault_rifle_evergreen()),
        Just(PlanFixtures::blowdart_evergreen()),
    ]
}

/// What happens at one step of a generated subscription history
#[derive(Debug, Clone)]
pub enum ScriptAction {
    /// Immediate change to another plan
    Change(PlanPhase),
    /// Immediate cancellation; later changes are dropped
    Cancel,
    /// Run a committing generation pass at this date
    Invoice,
}

/// One step of a generated history
#[derive(Debug, Clone)]
pub struct ScriptStep {
    /// Days since the previous step
    pub gap_days: i64,
    pub action: ScriptAction,
}

/// Strategy for generating a single history step
pub fn script_step_strategy() -> impl Strategy<Value = ScriptStep> {
    let action = prop_oneof![
        3 => recurring_plan_strategy().prop_map(ScriptAction::Change),
        1 => Just(ScriptAction::Cancel),
        4 => Just(ScriptAction::Invoice),
    ];
    (0i64..45i64, action).prop_map(|(gap_days, action)| ScriptStep { gap_days, action })
}

/// Strategy for generating a subscription history of up to ten steps
pub fn script_strategy() -> impl Strategy<Value = Vec<ScriptStep>> {
    proptest::collection::vec(script_step_strategy(), 1..10)
}
