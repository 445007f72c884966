//! Draft and commit lifecycle
//!
//! ```text
//!   (none) ──generate, DRAFT policy──▶ Draft ──generate / plugin update──▶ Draft
//!     │                                  │
//!     └──generate, COMMIT policy──┐      └──commit──▶ Committed
//!                                 ▼
//!                             Committed
//! ```
//!
//! An account has at most one open draft. Regenerating into a draft replaces
//! its generated items but keeps the ids of items that are still valid, so
//! callers holding an item id across passes keep seeing the same item.

use chrono::{DateTime, NaiveDate, Utc};

use crate::account::{AccountSettings, DraftPolicy};
use crate::error::InvoiceError;
use crate::invoice::Invoice;
use crate::item::InvoiceItem;

/// How the outcome of a generation pass is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Nothing is persisted
    DryRun,
    /// Items accumulate on the open draft
    Draft,
    /// A new invoice is committed immediately
    Commit,
}

impl PassMode {
    pub fn for_account(account: &AccountSettings, is_dry_run: bool) -> Self {
        match (is_dry_run, account.draft_policy) {
            (true, _) => PassMode::DryRun,
            (false, DraftPolicy::Draft) => PassMode::Draft,
            (false, DraftPolicy::Commit) => PassMode::Commit,
        }
    }
}

/// What a draft merge did to the generated items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Items whose id survived from the previous draft
    pub kept: usize,
    /// Items new to the draft
    pub added: usize,
    /// Previous generated items no longer valid
    pub dropped: usize,
}

/// Finds the account's open draft
///
/// # Errors
///
/// Returns `InvariantViolation` if more than one draft is open.
pub fn open_draft(invoices: &[Invoice]) -> Result<Option<&Invoice>, InvoiceError> {
    let mut drafts = invoices.iter().filter(|invoice| invoice.is_draft());
    let first = drafts.next();
    if let (Some(first), Some(second)) = (first, drafts.next()) {
        return Err(InvoiceError::invariant(format!(
            "account {} has more than one open draft ({} and {})",
            first.account_id, first.id, second.id
        )));
    }
    Ok(first)
}

/// Picks the invoice a pass writes into
///
/// # Arguments
///
/// * `mode` - How the pass result is handled
/// * `account` - Account settings
/// * `draft` - The account's open draft, if any
/// * `invoice_date` - Today in the account timezone
/// * `target_date` - Generation horizon
/// * `now` - Current instant
///
/// # Errors
///
/// Returns `InvalidState` when a COMMIT-policy account still has a draft
/// holding generated items; committing a second invoice for the same service
/// would bill it twice.
pub fn prepare_target(
    mode: PassMode,
    account: &AccountSettings,
    draft: Option<&Invoice>,
    invoice_date: NaiveDate,
    target_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Invoice, InvoiceError> {
    let fresh = || Invoice::new_draft(account.id, account.currency, invoice_date, target_date, now);
    match (mode, draft) {
        (PassMode::Commit, Some(draft)) if draft.has_generated_items() => Err(InvoiceError::InvalidState(format!(
            "account {} uses COMMIT policy but draft {} holds generated items; commit it first",
            account.id, draft.id
        ))),
        (PassMode::Draft, Some(draft)) => {
            let mut invoice = draft.clone();
            invoice.invoice_date = invoice_date;
            invoice.target_date = invoice.target_date.max(target_date);
            invoice.updated_at = now;
            Ok(invoice)
        }
        (PassMode::DryRun, Some(draft)) if account.draft_policy == DraftPolicy::Draft => {
            let mut projection = draft.clone();
            projection.invoice_date = invoice_date;
            projection.target_date = projection.target_date.max(target_date);
            Ok(projection)
        }
        _ => Ok(fresh()),
    }
}

/// Replaces the generated items of `invoice`, reusing the ids of previous
/// items that describe the same charge
pub fn merge_generated(invoice: &mut Invoice, generated: Vec<InvoiceItem>) -> Result<MergeSummary, InvoiceError> {
    let mut previous: Vec<Option<&InvoiceItem>> = invoice
        .items()
        .iter()
        .filter(|item| item.kind.is_generated())
        .map(Some)
        .collect();

    let mut summary = MergeSummary::default();
    let mut merged = Vec::with_capacity(generated.len());
    for item in generated {
        let reused = previous
            .iter_mut()
            .find(|slot| slot.map_or(false, |old| old.same_charge(&item)))
            .and_then(Option::take)
            .map(|old| old.id);
        match reused {
            Some(id) => {
                summary.kept += 1;
                merged.push(item.with_id(id));
            }
            None => {
                summary.added += 1;
                merged.push(item);
            }
        }
    }
    summary.dropped = previous.iter().filter(|slot| slot.is_some()).count();

    invoice.replace_generated_items(merged)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BillingPeriod, PhaseType, PlanPhase};
    use crate::item::InvoiceItemKind;
    use core_kernel::{AccountId, BundleId, Currency, Money, ServicePeriod, SubscriptionId};
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    fn recurring(account: AccountId, sub: SubscriptionId, start: NaiveDate, end: NaiveDate) -> InvoiceItem {
        let price = Money::new(dec!(29.95), Currency::USD);
        InvoiceItem::recurring(
            account,
            BundleId::new(),
            sub,
            &PlanPhase::new("pistol-monthly", PhaseType::Evergreen, BillingPeriod::Monthly),
            ServicePeriod::bounded(start, end).unwrap(),
            price,
            price,
        )
    }

    #[test]
    fn test_pass_mode() {
        let account = AccountSettings::new(AccountId::new(), Currency::USD);
        assert_eq!(PassMode::for_account(&account, false), PassMode::Commit);
        assert_eq!(PassMode::for_account(&account, true), PassMode::DryRun);
        let account = account.with_draft_policy(DraftPolicy::Draft);
        assert_eq!(PassMode::for_account(&account, false), PassMode::Draft);
    }

    #[test]
    fn test_merge_keeps_ids_of_valid_items() {
        let account = AccountId::new();
        let sub = SubscriptionId::new();
        let mut draft = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        let may = recurring(account, sub, d(5, 1), d(6, 1));
        let may_id = may.id;
        merge_generated(&mut draft, vec![may]).unwrap();
        draft
            .add_item(InvoiceItem::tax(account, None, d(5, 1), Money::new(dec!(1), Currency::USD), "tax"))
            .unwrap();

        let regenerated = vec![
            recurring(account, sub, d(5, 1), d(6, 1)),
            recurring(account, sub, d(6, 1), d(7, 1)),
        ];
        let summary = merge_generated(&mut draft, regenerated).unwrap();

        assert_eq!(summary, MergeSummary { kept: 1, added: 1, dropped: 0 });
        assert_eq!(draft.items()[0].id, may_id);
        assert_eq!(draft.items().len(), 3);
        assert_eq!(draft.items()[2].kind, InvoiceItemKind::Tax);
    }

    #[test]
    fn test_merge_drops_invalidated_items() {
        let account = AccountId::new();
        let sub = SubscriptionId::new();
        let mut draft = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        merge_generated(&mut draft, vec![recurring(account, sub, d(5, 1), d(6, 1))]).unwrap();

        let summary = merge_generated(&mut draft, vec![recurring(account, sub, d(5, 1), d(5, 15))]).unwrap();
        assert_eq!(summary, MergeSummary { kept: 0, added: 1, dropped: 1 });
        assert_eq!(draft.items().len(), 1);
    }

    #[test]
    fn test_commit_policy_rejects_generated_draft() {
        let account = AccountSettings::new(AccountId::new(), Currency::USD);
        let mut draft = Invoice::new_draft(account.id, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        merge_generated(&mut draft, vec![recurring(account.id, SubscriptionId::new(), d(5, 1), d(6, 1))]).unwrap();

        let err = prepare_target(PassMode::Commit, &account, Some(&draft), d(5, 1), d(5, 1), Utc::now()).unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidState(_)));
    }

    #[test]
    fn test_draft_mode_reuses_open_draft() {
        let account = AccountSettings::new(AccountId::new(), Currency::USD).with_draft_policy(DraftPolicy::Draft);
        let draft = Invoice::new_draft(account.id, Currency::USD, d(4, 1), d(4, 1), Utc::now());

        let target = prepare_target(PassMode::Draft, &account, Some(&draft), d(5, 1), d(5, 1), Utc::now()).unwrap();
        assert_eq!(target.id, draft.id);
        assert_eq!(target.invoice_date, d(5, 1));
    }

    #[test]
    fn test_two_open_drafts_is_an_invariant_violation() {
        let account = AccountId::new();
        let invoices = vec![
            Invoice::new_draft(account, Currency::USD, d(4, 1), d(4, 1), Utc::now()),
            Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now()),
        ];
        assert!(matches!(open_draft(&invoices), Err(InvoiceError::InvariantViolation(_))));
    }
}
