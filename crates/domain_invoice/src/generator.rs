//! Item generator
//!
//! Turns the billing events of one subscription into the FIXED and RECURRING
//! items that should exist up to a horizon date, assuming nothing has been
//! invoiced yet. Reconciling against what was already committed is the
//! repair reconciler's job.
//!
//! # Segments and slices
//!
//! Consecutive events cut the subscription's life into segments, each on a
//! single plan phase. A segment with a recurring price is billed in advance
//! in slices aligned to the bill cycle day (BCD):
//!
//! ```text
//!   BCD = 1, monthly, segment [04-15, 06-10)
//!
//!   03-01        04-01        05-01        06-01        07-01
//!     |            |  [----)  |  [------)  |  [---)      |
//!                     04-15      05-01        06-01 06-10
//!                     partial    full         partial
//! ```
//!
//! Partial slices are prorated against the full billing period that contains
//! them, using the account's day-count convention.

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use core_kernel::temporal::{bill_cycle_date, shift_month};
use core_kernel::{Money, ServicePeriod, SubscriptionId};

use crate::account::AccountSettings;
use crate::catalog::{Catalog, PhasePrice, PlanPhase};
use crate::error::InvoiceError;
use crate::item::InvoiceItem;
use crate::timeline::{BillingActionPolicy, BillingEvent, BillingEventTimeline, TransitionKind};

/// A stretch of time a subscription spends on one plan phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSegment {
    pub plan_phase: PlanPhase,
    pub start: NaiveDate,
    /// Exclusive; `None` while the phase is still open
    pub end: Option<NaiveDate>,
}

impl BillingSegment {
    /// Same-day transitions leave empty segments behind; they bill nothing
    pub fn is_empty(&self) -> bool {
        self.end.map_or(false, |end| end <= self.start)
    }
}

/// One billable slice of a recurring segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slice {
    start: NaiveDate,
    end: NaiveDate,
    full_start: NaiveDate,
    full_end: NaiveDate,
}

/// Resolves the bill cycle day for an account
///
/// The account setting wins. Otherwise the BCD is the day of month of the
/// first billing event that starts a phase with a recurring price, and 1 if
/// there is none yet.
pub fn resolve_bill_cycle_day(
    account: &AccountSettings,
    timeline: &BillingEventTimeline,
    catalog: &dyn Catalog,
) -> Result<u32, InvoiceError> {
    if let Some(day) = account.bill_cycle_day {
        if !(1..=31).contains(&day) {
            return Err(InvoiceError::validation(format!("invalid bill cycle day {}", day)));
        }
        return Ok(day);
    }
    let derived = timeline
        .events()
        .iter()
        .filter_map(|event| event.plan_phase.as_ref().map(|phase| (event, phase)))
        .find(|(_, phase)| {
            phase.billing_period.months().is_some()
                && matches!(catalog.price(phase), Ok(PhasePrice { recurring: Some(_), .. }))
        })
        .map(|(event, _)| event.effective_date.day())
        .unwrap_or(1);
    Ok(derived)
}

/// Computes the items a subscription should carry up to a horizon
pub struct ItemGenerator<'a> {
    account: &'a AccountSettings,
    catalog: &'a dyn Catalog,
    bill_cycle_day: u32,
}

impl<'a> ItemGenerator<'a> {
    pub fn new(account: &'a AccountSettings, catalog: &'a dyn Catalog, bill_cycle_day: u32) -> Self {
        Self {
            account,
            catalog,
            bill_cycle_day,
        }
    }

    /// Splits a subscription's events into plan-phase segments
    ///
    /// # Errors
    ///
    /// Returns `Validation` for the subscription when the first event is not
    /// a CREATE, when a second CREATE appears, when anything follows a
    /// cancellation, or when an event takes effect before the phase it ends.
    pub fn segments(
        &self,
        subscription_id: SubscriptionId,
        events: &[&BillingEvent],
    ) -> Result<Vec<BillingSegment>, InvoiceError> {
        let Some(first) = events.first() else {
            return Ok(Vec::new());
        };
        if first.transition != TransitionKind::Create {
            return Err(InvoiceError::subscription(
                subscription_id,
                format!("first billing event is {:?}, expected CREATE", first.transition),
            ));
        }

        let mut segments: Vec<BillingSegment> = Vec::new();
        let mut cancelled_on: Option<NaiveDate> = None;

        for (index, event) in events.iter().enumerate() {
            if index > 0 && event.transition == TransitionKind::Create {
                return Err(InvoiceError::subscription(subscription_id, "duplicate CREATE event"));
            }
            if let Some(cancelled) = cancelled_on {
                return Err(InvoiceError::subscription(
                    subscription_id,
                    format!(
                        "{:?} event on {} after cancellation on {}",
                        event.transition, event.effective_date, cancelled
                    ),
                ));
            }

            let effective = match event.policy {
                BillingActionPolicy::Immediate => event.effective_date,
                BillingActionPolicy::EndOfTerm => self.end_of_term(segments.last(), event.effective_date)?,
            };

            if let Some(current) = segments.last_mut() {
                if effective < current.start {
                    return Err(InvoiceError::subscription(
                        subscription_id,
                        format!(
                            "{:?} effective {} precedes current phase start {}",
                            event.transition, effective, current.start
                        ),
                    ));
                }
                current.end = Some(effective);
            }

            match (&event.transition, &event.plan_phase) {
                (TransitionKind::Cancel, _) => cancelled_on = Some(effective),
                (_, Some(plan_phase)) => segments.push(BillingSegment {
                    plan_phase: plan_phase.clone(),
                    start: effective,
                    end: None,
                }),
                (kind, None) => {
                    return Err(InvoiceError::subscription(
                        subscription_id,
                        format!("{:?} event carries no plan", kind),
                    ));
                }
            }
        }

        Ok(segments)
    }

    /// Generates the FIXED and RECURRING items of one subscription whose
    /// service starts on or before `horizon`
    pub fn generate(
        &self,
        subscription_id: SubscriptionId,
        events: &[&BillingEvent],
        horizon: NaiveDate,
    ) -> Result<Vec<InvoiceItem>, InvoiceError> {
        let segments = self.segments(subscription_id, events)?;
        let Some(first) = events.first() else {
            return Ok(Vec::new());
        };
        let (account_id, bundle_id) = (first.account_id, first.bundle_id);

        let mut items = Vec::new();
        for segment in segments.iter().filter(|segment| !segment.is_empty()) {
            if segment.start > horizon {
                break;
            }
            let price = self.catalog.price(&segment.plan_phase).map_err(|e| {
                InvoiceError::subscription(subscription_id, format!("no price: {}", e))
            })?;

            if let Some(fixed) = price.fixed {
                self.check_price(subscription_id, &fixed)?;
                items.push(InvoiceItem::fixed(
                    account_id,
                    bundle_id,
                    subscription_id,
                    &segment.plan_phase,
                    segment.start,
                    fixed.round_to_currency(),
                ));
            }

            if let Some(rate) = price.recurring {
                self.check_price(subscription_id, &rate)?;
                let months = segment.plan_phase.billing_period.months().ok_or_else(|| {
                    InvoiceError::subscription(
                        subscription_id,
                        format!("{} has a recurring price but no billing period", segment.plan_phase.phase_name()),
                    )
                })?;
                for slice in self.slices(segment.start, segment.end, months, horizon)? {
                    let amount = self.slice_amount(subscription_id, &rate, &slice)?;
                    items.push(InvoiceItem::recurring(
                        account_id,
                        bundle_id,
                        subscription_id,
                        &segment.plan_phase,
                        ServicePeriod::bounded(slice.start, slice.end)?,
                        amount,
                        rate,
                    ));
                }
            }
        }

        debug!(
            subscription_id = %subscription_id,
            segments = segments.len(),
            items = items.len(),
            horizon = %horizon,
            "Generated candidate items"
        );
        Ok(items)
    }

    fn check_price(&self, subscription_id: SubscriptionId, price: &Money) -> Result<(), InvoiceError> {
        if price.currency() != self.account.currency {
            return Err(InvoiceError::subscription(
                subscription_id,
                format!(
                    "catalog price in {} but account bills in {}",
                    price.currency(),
                    self.account.currency
                ),
            ));
        }
        if price.is_negative() {
            return Err(InvoiceError::subscription(subscription_id, "negative catalog price"));
        }
        Ok(())
    }

    fn slice_amount(
        &self,
        subscription_id: SubscriptionId,
        rate: &Money,
        slice: &Slice,
    ) -> Result<Money, InvoiceError> {
        if slice.start == slice.full_start && slice.end == slice.full_end {
            return Ok(rate.round_to_currency());
        }
        let day_count = self.account.day_count;
        let days = day_count.days_between(slice.start, slice.end);
        let full = day_count.days_between(slice.full_start, slice.full_end);
        rate.prorate(days, full).map_err(|e| {
            InvoiceError::subscription(
                subscription_id,
                format!("cannot prorate [{}, {}): {}", slice.start, slice.end, e),
            )
        })
    }

    /// First BCD-aligned boundary on or after `start`, with its (year, month)
    fn first_boundary(&self, start: NaiveDate) -> Result<(i32, u32, NaiveDate), InvoiceError> {
        let (mut year, mut month) = (start.year(), start.month());
        let mut boundary = bill_cycle_date(year, month, self.bill_cycle_day)?;
        if boundary < start {
            (year, month) = shift_month(year, month, 1);
            boundary = bill_cycle_date(year, month, self.bill_cycle_day)?;
        }
        Ok((year, month, boundary))
    }

    /// Slices of `[start, end)` starting on or before `horizon`
    fn slices(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        months: u32,
        horizon: NaiveDate,
    ) -> Result<Vec<Slice>, InvoiceError> {
        let step = months as i32;
        let bcd = self.bill_cycle_day;
        let (mut year, mut month, first) = self.first_boundary(start)?;

        let (mut full_start, mut full_end) = if start < first {
            let (py, pm) = shift_month(year, month, -step);
            (bill_cycle_date(py, pm, bcd)?, first)
        } else {
            (year, month) = shift_month(year, month, step);
            (first, bill_cycle_date(year, month, bcd)?)
        };

        let mut slices = Vec::new();
        let mut cursor = start;
        while cursor <= horizon && end.map_or(true, |end| cursor < end) {
            let slice_end = end.map_or(full_end, |end| end.min(full_end));
            slices.push(Slice {
                start: cursor,
                end: slice_end,
                full_start,
                full_end,
            });
            cursor = full_end;
            full_start = full_end;
            (year, month) = shift_month(year, month, step);
            full_end = bill_cycle_date(year, month, bcd)?;
        }
        Ok(slices)
    }

    /// Date an END_OF_TERM transition requested on `requested` takes effect:
    /// the first billing boundary of the current phase on or after it
    fn end_of_term(
        &self,
        current: Option<&BillingSegment>,
        requested: NaiveDate,
    ) -> Result<NaiveDate, InvoiceError> {
        let Some(current) = current else {
            return Ok(requested);
        };
        let Some(months) = current.plan_phase.billing_period.months() else {
            return Ok(requested);
        };
        let recurring = matches!(
            self.catalog.price(&current.plan_phase),
            Ok(PhasePrice { recurring: Some(_), .. })
        );
        if !recurring {
            return Ok(requested);
        }

        let (mut year, mut month, mut boundary) = self.first_boundary(current.start)?;
        while boundary < requested {
            (year, month) = shift_month(year, month, months as i32);
            boundary = bill_cycle_date(year, month, self.bill_cycle_day)?;
        }
        Ok(boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BillingPeriod, InMemoryCatalog, PhaseType};
    use crate::item::InvoiceItemKind;
    use core_kernel::{AccountId, BundleId, Currency, DayCountConvention};
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_phase("pistol-monthly", PhaseType::Trial, PhasePrice::fixed(usd(dec!(0))))
            .with_phase("pistol-monthly", PhaseType::Evergreen, PhasePrice::recurring(usd(dec!(29.95))))
            .with_phase("pistol-quarterly", PhaseType::Evergreen, PhasePrice::recurring(usd(dec!(69.95))))
    }

    fn pistol(phase: PhaseType) -> PlanPhase {
        PlanPhase::new("pistol-monthly", phase, BillingPeriod::Monthly)
    }

    struct Fixture {
        account: AccountSettings,
        timeline: BillingEventTimeline,
        bundle: BundleId,
        sub: SubscriptionId,
    }

    impl Fixture {
        fn new() -> Self {
            let account = AccountSettings::new(AccountId::new(), Currency::USD);
            let timeline = BillingEventTimeline::new(account.id);
            Self {
                account,
                timeline,
                bundle: BundleId::new(),
                sub: SubscriptionId::new(),
            }
        }

        fn create(&mut self, date: NaiveDate, phase: PlanPhase) {
            let e = BillingEvent::create(self.account.id, self.bundle, self.sub, date, phase);
            self.timeline.append(e).unwrap();
        }

        fn phase(&mut self, date: NaiveDate, phase: PlanPhase) {
            let e = BillingEvent::phase(self.account.id, self.bundle, self.sub, date, phase);
            self.timeline.append(e).unwrap();
        }

        fn cancel(&mut self, date: NaiveDate, policy: BillingActionPolicy) {
            let e = BillingEvent::cancel(self.account.id, self.bundle, self.sub, date, policy);
            self.timeline.append(e).unwrap();
        }

        fn generate(&self, catalog: &InMemoryCatalog, horizon: NaiveDate) -> Result<Vec<InvoiceItem>, InvoiceError> {
            let bcd = resolve_bill_cycle_day(&self.account, &self.timeline, catalog).unwrap();
            let generator = ItemGenerator::new(&self.account, catalog, bcd);
            generator.generate(self.sub, &self.timeline.events_for(self.sub), horizon)
        }
    }

    #[test]
    fn test_trial_then_evergreen_billed_in_advance() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(4, 1), pistol(PhaseType::Trial));
        f.phase(d(5, 1), pistol(PhaseType::Evergreen));

        let at_trial = f.generate(&catalog, d(4, 1)).unwrap();
        assert_eq!(at_trial.len(), 1);
        assert_eq!(at_trial[0].kind, InvoiceItemKind::Fixed);
        assert!(at_trial[0].amount.is_zero());

        let at_phase = f.generate(&catalog, d(5, 1)).unwrap();
        assert_eq!(at_phase.len(), 2);
        let recurring = &at_phase[1];
        assert_eq!(recurring.kind, InvoiceItemKind::Recurring);
        assert_eq!(recurring.period, ServicePeriod::bounded(d(5, 1), d(6, 1)).unwrap());
        assert_eq!(recurring.amount, usd(dec!(29.95)));
    }

    #[test]
    fn test_horizon_covers_every_started_slice() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(5, 1), pistol(PhaseType::Evergreen));

        let items = f.generate(&catalog, d(7, 1)).unwrap();
        let starts: Vec<_> = items.iter().map(|i| i.period.start).collect();
        assert_eq!(starts, vec![d(5, 1), d(6, 1), d(7, 1)]);
    }

    #[test]
    fn test_immediate_cancel_prorates_last_slice() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(5, 1), pistol(PhaseType::Evergreen));
        f.cancel(d(5, 15), BillingActionPolicy::Immediate);

        let items = f.generate(&catalog, d(6, 1)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].period, ServicePeriod::bounded(d(5, 1), d(5, 15)).unwrap());
        // 29.95 * 14 / 31
        assert_eq!(items[0].amount, usd(dec!(13.53)));
    }

    #[test]
    fn test_end_of_term_cancel_waits_for_boundary() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(5, 1), pistol(PhaseType::Evergreen));
        f.cancel(d(5, 15), BillingActionPolicy::EndOfTerm);

        let items = f.generate(&catalog, d(6, 15)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].period, ServicePeriod::bounded(d(5, 1), d(6, 1)).unwrap());
        assert_eq!(items[0].amount, usd(dec!(29.95)));
    }

    #[test]
    fn test_bill_cycle_day_31_clamps_in_short_months() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.account = f.account.clone().with_bill_cycle_day(31);
        f.create(d(1, 31), pistol(PhaseType::Evergreen));

        let items = f.generate(&catalog, d(3, 31)).unwrap();
        let periods: Vec<_> = items.iter().map(|i| (i.period.start, i.period.end.unwrap())).collect();
        assert_eq!(
            periods,
            vec![(d(1, 31), d(2, 29)), (d(2, 29), d(3, 31)), (d(3, 31), d(4, 30))]
        );
        assert!(items.iter().all(|i| i.amount == usd(dec!(29.95))));
    }

    #[test]
    fn test_leading_partial_slice_against_account_bcd() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.account = f.account.clone().with_bill_cycle_day(1);
        f.create(d(4, 16), pistol(PhaseType::Evergreen));

        let items = f.generate(&catalog, d(4, 16)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].period, ServicePeriod::bounded(d(4, 16), d(5, 1)).unwrap());
        // 29.95 * 15 / 30
        assert_eq!(items[0].amount, usd(dec!(14.98)));
    }

    #[test]
    fn test_quarterly_thirty_360() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.account = f
            .account
            .clone()
            .with_bill_cycle_day(1)
            .with_day_count(DayCountConvention::Thirty360);
        f.create(d(5, 1), PlanPhase::new("pistol-quarterly", PhaseType::Evergreen, BillingPeriod::Quarterly));
        f.cancel(d(6, 16), BillingActionPolicy::Immediate);

        let items = f.generate(&catalog, d(6, 16)).unwrap();
        assert_eq!(items.len(), 1);
        // 45 of 90 days
        assert_eq!(items[0].amount, usd(dec!(34.98)));
    }

    #[test]
    fn test_missing_create_is_rejected() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.phase(d(5, 1), pistol(PhaseType::Evergreen));

        let err = f.generate(&catalog, d(5, 1)).unwrap_err();
        assert!(matches!(err, InvoiceError::Validation { subscription_id: Some(_), .. }));
    }

    #[test]
    fn test_event_after_cancel_is_rejected() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(4, 1), pistol(PhaseType::Trial));
        f.cancel(d(4, 10), BillingActionPolicy::Immediate);
        f.phase(d(5, 1), pistol(PhaseType::Evergreen));

        assert!(f.generate(&catalog, d(5, 1)).is_err());
    }

    #[test]
    fn test_unknown_plan_is_rejected() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(5, 1), PlanPhase::new("crossbow-monthly", PhaseType::Evergreen, BillingPeriod::Monthly));

        assert!(f.generate(&catalog, d(5, 1)).is_err());
    }

    #[test]
    fn test_bcd_derived_from_first_recurring_event() {
        let catalog = catalog();
        let mut f = Fixture::new();
        f.create(d(4, 10), pistol(PhaseType::Trial));
        f.phase(d(5, 10), pistol(PhaseType::Evergreen));

        let bcd = resolve_bill_cycle_day(&f.account, &f.timeline, &catalog).unwrap();
        assert_eq!(bcd, 10);
    }
}
