//! Repair reconciler
//!
//! Compares what the generator says a subscription should have been billed
//! with what committed invoices actually billed, and produces the difference:
//! new charges for service not yet invoiced and `REPAIR_ADJ` items reversing
//! service that is no longer owed.
//!
//! Committed items are never edited. A charge's *live* portion is what is
//! left after the repairs already linked to it:
//!
//! ```text
//!   RECURRING [05-01, 06-01)  29.95
//!   REPAIR_ADJ [05-15, 06-01) -16.42   linked to the charge above
//!   ----------------------------------
//!   live      [05-01, 05-15)  13.53
//! ```
//!
//! Repairs always link to the original charge, never to another repair, and
//! a repair's magnitude never exceeds the live amount it reverses.

use chrono::NaiveDate;
use tracing::debug;

use core_kernel::{Money, ServicePeriod};

use crate::error::InvoiceError;
use crate::item::{InvoiceItem, InvoiceItemKind};

/// A committed charge and what repairs have left of it
#[derive(Debug, Clone)]
pub struct LiveCharge<'a> {
    pub item: &'a InvoiceItem,
    /// End of the still-billed span; `None` for fixed charges
    pub live_end: Option<NaiveDate>,
    /// Original amount plus every linked repair
    pub live_amount: Money,
    /// True once any part of the charge has been reversed
    pub repaired: bool,
}

impl<'a> LiveCharge<'a> {
    /// Returns true if nothing of the charge remains billed
    pub fn is_fully_repaired(&self) -> bool {
        match self.item.kind {
            InvoiceItemKind::Recurring => self.live_end.map_or(false, |end| end <= self.item.period.start),
            _ => self.repaired,
        }
    }

    fn matches(&self, candidate: &InvoiceItem) -> bool {
        let item = self.item;
        if candidate.kind != item.kind
            || candidate.subscription_id != item.subscription_id
            || candidate.plan_name != item.plan_name
            || candidate.phase != item.phase
            || candidate.period.start != item.period.start
        {
            return false;
        }
        match item.kind {
            InvoiceItemKind::Recurring => candidate.rate == item.rate,
            _ => candidate.amount == item.amount,
        }
    }
}

/// Outcome of reconciling one subscription
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Charges not yet on any committed invoice, in generation order
    pub charges: Vec<InvoiceItem>,
    /// Reversals of committed charges, in commit order
    pub repairs: Vec<InvoiceItem>,
    /// Candidates already billed exactly as committed
    pub unchanged: usize,
}

impl Reconciliation {
    /// All items to place on the invoice: new charges first, then repairs
    pub fn into_items(self) -> Vec<InvoiceItem> {
        let mut items = self.charges;
        items.extend(self.repairs);
        items
    }

    pub fn is_empty(&self) -> bool {
        self.charges.is_empty() && self.repairs.is_empty()
    }
}

/// Computes the live portion of every committed FIXED and RECURRING item
///
/// `committed` must hold the committed items of a single subscription in
/// commit order.
///
/// # Errors
///
/// Returns `InvariantViolation` if repairs already exceed their charge.
pub fn live_charges<'a>(committed: &[&'a InvoiceItem]) -> Result<Vec<LiveCharge<'a>>, InvoiceError> {
    let mut charges = Vec::new();
    for item in committed
        .iter()
        .copied()
        .filter(|item| matches!(item.kind, InvoiceItemKind::Fixed | InvoiceItemKind::Recurring))
    {
        let repairs: Vec<&InvoiceItem> = committed
            .iter()
            .copied()
            .filter(|r| r.kind == InvoiceItemKind::RepairAdj && r.linked_item_id == Some(item.id))
            .collect();

        let repaired_amount = Money::sum(item.currency(), repairs.iter().map(|r| &r.amount))?;
        let live_amount = item.amount.checked_add(&repaired_amount)?;
        if live_amount.is_negative() || repaired_amount.is_positive() {
            return Err(InvoiceError::invariant(format!(
                "repairs of item {} total {} against a charge of {}",
                item.id, repaired_amount, item.amount
            )));
        }

        let live_end = match item.kind {
            InvoiceItemKind::Recurring => {
                let repaired_from = repairs.iter().map(|r| r.period.start).min();
                match (item.period.end, repaired_from) {
                    (Some(end), Some(from)) => Some(end.min(from)),
                    (end, None) => end,
                    (None, from) => from,
                }
            }
            _ => None,
        };

        charges.push(LiveCharge {
            item,
            live_end,
            live_amount,
            repaired: !repairs.is_empty(),
        });
    }
    Ok(charges)
}

/// Reconciles generated candidates for one subscription against its
/// committed items
///
/// # Arguments
///
/// * `candidates` - Items the generator produced for the subscription
/// * `committed` - Committed items of the same subscription, in commit order
///
/// # Errors
///
/// Returns `InvariantViolation` if a repair would exceed the live amount of
/// the charge it reverses.
pub fn reconcile(
    candidates: Vec<InvoiceItem>,
    committed: &[&InvoiceItem],
) -> Result<Reconciliation, InvoiceError> {
    let live = live_charges(committed)?;
    let mut remaining: Vec<Option<InvoiceItem>> = candidates.into_iter().map(Some).collect();
    let mut result = Reconciliation::default();

    for charge in live.iter().filter(|charge| !charge.is_fully_repaired()) {
        let matched = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().map_or(false, |candidate| charge.matches(candidate)))
            .and_then(Option::take);

        match (charge.item.kind, matched) {
            (InvoiceItemKind::Fixed, Some(_)) => result.unchanged += 1,
            (InvoiceItemKind::Recurring, Some(candidate)) => {
                reconcile_recurring(charge, candidate, &mut result)?;
            }
            (_, None) => {
                let span = match charge.item.kind {
                    InvoiceItemKind::Recurring => ServicePeriod::new(charge.item.period.start, charge.live_end)?,
                    _ => charge.item.period,
                };
                push_repair(charge, span, -charge.live_amount, &mut result)?;
            }
            (_, Some(_)) => {}
        }
    }

    let mut charges: Vec<InvoiceItem> = remaining.into_iter().flatten().collect();
    charges.append(&mut result.charges);
    result.charges = charges;

    debug!(
        charges = result.charges.len(),
        repairs = result.repairs.len(),
        unchanged = result.unchanged,
        "Reconciled subscription"
    );
    Ok(result)
}

fn reconcile_recurring(
    charge: &LiveCharge<'_>,
    candidate: InvoiceItem,
    result: &mut Reconciliation,
) -> Result<(), InvoiceError> {
    let (Some(live_end), Some(candidate_end)) = (charge.live_end, candidate.period.end) else {
        return Err(InvoiceError::invariant(format!(
            "recurring item {} has an open service period",
            charge.item.id
        )));
    };

    if candidate_end == live_end {
        result.unchanged += 1;
    } else if candidate_end < live_end {
        // Keep exactly what the shorter slice costs; reverse the rest
        let repair = candidate.amount.checked_sub(&charge.live_amount)?;
        let span = ServicePeriod::bounded(candidate_end, live_end)?;
        push_repair(charge, span, repair, result)?;
    } else {
        let extension = candidate.amount.checked_sub(&charge.live_amount)?;
        if extension.is_negative() {
            return Err(InvoiceError::invariant(format!(
                "extension of item {} to {} would be negative ({})",
                charge.item.id, candidate_end, extension
            )));
        }
        let mut item = candidate;
        item.period = ServicePeriod::bounded(live_end, candidate_end)?;
        item.amount = extension;
        result.charges.push(item);
    }
    Ok(())
}

fn push_repair(
    charge: &LiveCharge<'_>,
    span: ServicePeriod,
    amount: Money,
    result: &mut Reconciliation,
) -> Result<(), InvoiceError> {
    if amount.is_zero() {
        return Ok(());
    }
    if amount.is_positive() || amount.abs().amount() > charge.live_amount.amount() {
        return Err(InvoiceError::invariant(format!(
            "repair of {} against item {} with live amount {}",
            amount, charge.item.id, charge.live_amount
        )));
    }
    result.repairs.push(InvoiceItem::repair(charge.item, span, amount));
    Ok(())
}
