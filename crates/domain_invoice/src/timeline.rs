//! Billing event timeline
//!
//! The subscription system records every transition that affects billing
//! (creation, phase change, plan change, cancellation) as a `BillingEvent`.
//! The timeline is append-only: events are never edited, and generation
//! always recomputes from the full history.
//!
//! Events are ordered by effective date, then by the sequence number the
//! timeline assigns on append, so two events on the same day keep the order
//! in which they were recorded.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BillingEventId, BundleId, SubscriptionId};

use crate::catalog::PlanPhase;
use crate::error::InvoiceError;

/// Kind of subscription transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Create,
    Phase,
    Change,
    Cancel,
}

/// When a change or cancellation takes effect relative to its requested date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingActionPolicy {
    /// On the requested date, prorating the current period
    #[default]
    Immediate,
    /// At the end of the billing period containing the requested date
    EndOfTerm,
}

/// A single billing-relevant subscription transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: BillingEventId,
    pub account_id: AccountId,
    pub bundle_id: BundleId,
    pub subscription_id: SubscriptionId,
    pub effective_date: NaiveDate,
    /// Assigned by the timeline on append
    pub sequence: u64,
    pub transition: TransitionKind,
    /// Plan and phase in effect after the transition; `None` for cancellations
    pub plan_phase: Option<PlanPhase>,
    #[serde(default)]
    pub policy: BillingActionPolicy,
}

impl BillingEvent {
    fn build(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        effective_date: NaiveDate,
        transition: TransitionKind,
        plan_phase: Option<PlanPhase>,
        policy: BillingActionPolicy,
    ) -> Self {
        Self {
            id: BillingEventId::new_v7(),
            account_id,
            bundle_id,
            subscription_id,
            effective_date,
            sequence: 0,
            transition,
            plan_phase,
            policy,
        }
    }

    /// Subscription creation on `plan_phase`
    pub fn create(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        effective_date: NaiveDate,
        plan_phase: PlanPhase,
    ) -> Self {
        Self::build(
            account_id,
            bundle_id,
            subscription_id,
            effective_date,
            TransitionKind::Create,
            Some(plan_phase),
            BillingActionPolicy::Immediate,
        )
    }

    /// Scheduled move to the next phase of the current plan
    pub fn phase(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        effective_date: NaiveDate,
        plan_phase: PlanPhase,
    ) -> Self {
        Self::build(
            account_id,
            bundle_id,
            subscription_id,
            effective_date,
            TransitionKind::Phase,
            Some(plan_phase),
            BillingActionPolicy::Immediate,
        )
    }

    /// Plan change requested on `effective_date`
    pub fn change(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        effective_date: NaiveDate,
        plan_phase: PlanPhase,
        policy: BillingActionPolicy,
    ) -> Self {
        Self::build(
            account_id,
            bundle_id,
            subscription_id,
            effective_date,
            TransitionKind::Change,
            Some(plan_phase),
            policy,
        )
    }

    /// Cancellation requested on `effective_date`
    pub fn cancel(
        account_id: AccountId,
        bundle_id: BundleId,
        subscription_id: SubscriptionId,
        effective_date: NaiveDate,
        policy: BillingActionPolicy,
    ) -> Self {
        Self::build(
            account_id,
            bundle_id,
            subscription_id,
            effective_date,
            TransitionKind::Cancel,
            None,
            policy,
        )
    }

    fn sort_key(&self) -> (NaiveDate, u64) {
        (self.effective_date, self.sequence)
    }
}

/// Ordered, append-only history of billing events for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEventTimeline {
    account_id: AccountId,
    events: Vec<BillingEvent>,
    next_sequence: u64,
}

impl BillingEventTimeline {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            events: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Records an event, assigning its sequence number
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the event belongs to another account, when a
    /// non-cancel event carries no plan, or when a cancel event carries one.
    pub fn append(&mut self, mut event: BillingEvent) -> Result<&BillingEvent, InvoiceError> {
        if event.account_id != self.account_id {
            return Err(InvoiceError::validation(format!(
                "event for account {} appended to timeline of {}",
                event.account_id, self.account_id
            )));
        }
        match (event.transition, &event.plan_phase) {
            (TransitionKind::Cancel, Some(_)) => {
                return Err(InvoiceError::subscription(
                    event.subscription_id,
                    "cancel event must not carry a plan",
                ));
            }
            (TransitionKind::Cancel, None) => {}
            (kind, None) => {
                return Err(InvoiceError::subscription(
                    event.subscription_id,
                    format!("{:?} event requires a plan", kind),
                ));
            }
            _ => {}
        }

        event.sequence = self.next_sequence;
        self.next_sequence += 1;

        let position = self
            .events
            .partition_point(|existing| existing.sort_key() <= event.sort_key());
        self.events.insert(position, event);
        Ok(&self.events[position])
    }

    /// Returns a copy of this timeline with one more event, leaving the
    /// recorded history untouched
    pub fn with_hypothetical(&self, event: BillingEvent) -> Result<Self, InvoiceError> {
        let mut projected = self.clone();
        projected.append(event)?;
        Ok(projected)
    }

    /// All events in billing order
    pub fn events(&self) -> &[BillingEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Subscriptions in the order their first event was recorded
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        let mut first_seen: HashMap<SubscriptionId, u64> = HashMap::new();
        for event in &self.events {
            first_seen
                .entry(event.subscription_id)
                .and_modify(|seq| *seq = (*seq).min(event.sequence))
                .or_insert(event.sequence);
        }
        let mut subscriptions: Vec<_> = first_seen.into_iter().collect();
        subscriptions.sort_by_key(|(_, seq)| *seq);
        subscriptions.into_iter().map(|(id, _)| id).collect()
    }

    /// Events of one subscription in billing order
    pub fn events_for(&self, subscription_id: SubscriptionId) -> Vec<&BillingEvent> {
        self.events
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BillingPeriod, PhaseType};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    fn pistol(phase: PhaseType) -> PlanPhase {
        PlanPhase::new("pistol-monthly", phase, BillingPeriod::Monthly)
    }

    #[test]
    fn test_same_day_events_keep_append_order() {
        let account = AccountId::new();
        let bundle = BundleId::new();
        let sub = SubscriptionId::new();
        let mut timeline = BillingEventTimeline::new(account);

        timeline
            .append(BillingEvent::create(account, bundle, sub, d(4, 1), pistol(PhaseType::Trial)))
            .unwrap();
        timeline
            .append(BillingEvent::phase(account, bundle, sub, d(5, 1), pistol(PhaseType::Evergreen)))
            .unwrap();
        let shotgun = PlanPhase::new("shotgun-monthly", PhaseType::Evergreen, BillingPeriod::Monthly);
        timeline
            .append(BillingEvent::change(account, bundle, sub, d(5, 1), shotgun, BillingActionPolicy::Immediate))
            .unwrap();

        let kinds: Vec<_> = timeline.events().iter().map(|e| e.transition).collect();
        assert_eq!(
            kinds,
            vec![TransitionKind::Create, TransitionKind::Phase, TransitionKind::Change]
        );
    }

    #[test]
    fn test_late_append_sorts_by_date() {
        let account = AccountId::new();
        let bundle = BundleId::new();
        let sub = SubscriptionId::new();
        let mut timeline = BillingEventTimeline::new(account);

        timeline
            .append(BillingEvent::phase(account, bundle, sub, d(5, 1), pistol(PhaseType::Evergreen)))
            .unwrap();
        timeline
            .append(BillingEvent::create(account, bundle, sub, d(4, 1), pistol(PhaseType::Trial)))
            .unwrap();

        assert_eq!(timeline.events()[0].transition, TransitionKind::Create);
        assert_eq!(timeline.events()[0].sequence, 2);
    }

    #[test]
    fn test_rejects_foreign_account() {
        let mut timeline = BillingEventTimeline::new(AccountId::new());
        let event = BillingEvent::create(
            AccountId::new(),
            BundleId::new(),
            SubscriptionId::new(),
            d(4, 1),
            pistol(PhaseType::Trial),
        );
        assert!(timeline.append(event).is_err());
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_hypothetical_leaves_original_untouched() {
        let account = AccountId::new();
        let timeline = BillingEventTimeline::new(account);
        let event = BillingEvent::create(
            account,
            BundleId::new(),
            SubscriptionId::new(),
            d(4, 1),
            pistol(PhaseType::Trial),
        );
        let projected = timeline.with_hypothetical(event).unwrap();
        assert_eq!(projected.len(), 1);
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_subscriptions_in_first_seen_order() {
        let account = AccountId::new();
        let bundle = BundleId::new();
        let (bp, ao) = (SubscriptionId::new(), SubscriptionId::new());
        let mut timeline = BillingEventTimeline::new(account);
        timeline
            .append(BillingEvent::create(account, bundle, bp, d(4, 1), pistol(PhaseType::Trial)))
            .unwrap();
        let cleaning = PlanPhase::new("cleaning-monthly", PhaseType::Evergreen, BillingPeriod::Monthly);
        timeline
            .append(BillingEvent::create(account, bundle, ao, d(5, 1), cleaning))
            .unwrap();
        assert_eq!(timeline.subscriptions(), vec![bp, ao]);
    }
}
