//! Account invoice timeline
//!
//! Read model summarising every invoice of an account: what it charged,
//! what credit it granted or consumed, what was paid, and what is owed.
//! Payments are also listed on their own, oldest first.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BundleId, Currency, InvoiceId, Money, PaymentId};

use crate::error::InvoiceError;
use crate::invoice::{Invoice, InvoiceStatus};

/// One invoice as shown on the account timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice_id: InvoiceId,
    pub invoice_number: Option<u64>,
    pub invoice_date: NaiveDate,
    pub target_date: NaiveDate,
    pub status: InvoiceStatus,
    pub amount: Money,
    pub amount_charged: Money,
    pub amount_credited: Money,
    pub cba: Money,
    pub amount_paid: Money,
    pub balance: Money,
    pub bundle_ids: Vec<BundleId>,
}

impl InvoiceSummary {
    pub fn from_invoice(invoice: &Invoice) -> Result<Self, InvoiceError> {
        Ok(Self {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            invoice_date: invoice.invoice_date,
            target_date: invoice.target_date,
            status: invoice.status,
            amount: invoice.amount()?,
            amount_charged: invoice.charged_amount()?,
            amount_credited: invoice.credited_amount()?,
            cba: invoice.cba_amount()?,
            amount_paid: invoice.amount_paid()?,
            balance: invoice.balance()?,
            bundle_ids: invoice.bundle_ids(),
        })
    }
}

/// One payment as shown on the account timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub recorded_at: DateTime<Utc>,
    /// Bundles billed on the paid invoice
    pub bundle_ids: Vec<BundleId>,
}

/// All invoices of an account with running totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTimeline {
    pub account_id: AccountId,
    pub currency: Currency,
    pub invoices: Vec<InvoiceSummary>,
    pub payments: Vec<PaymentSummary>,
    /// Sum of committed balances
    pub account_balance: Money,
    /// Unused account credit
    pub account_credit: Money,
}

impl AccountTimeline {
    /// Builds the timeline; drafts are listed but excluded from totals
    pub fn build(account_id: AccountId, currency: Currency, invoices: &[Invoice]) -> Result<Self, InvoiceError> {
        let summaries = invoices
            .iter()
            .map(InvoiceSummary::from_invoice)
            .collect::<Result<Vec<_>, _>>()?;

        let mut payments: Vec<PaymentSummary> = invoices
            .iter()
            .flat_map(|invoice| {
                invoice.payments().iter().map(|payment| PaymentSummary {
                    payment_id: payment.id,
                    invoice_id: invoice.id,
                    amount: payment.amount,
                    recorded_at: payment.recorded_at,
                    bundle_ids: invoice.bundle_ids(),
                })
            })
            .collect();
        payments.sort_by_key(|payment| payment.recorded_at);

        let committed = summaries.iter().filter(|s| s.status == InvoiceStatus::Committed);
        let account_balance = Money::sum(currency, committed.clone().map(|s| &s.balance))?;
        let account_credit = Money::sum(currency, committed.map(|s| &s.cba))?;

        Ok(Self {
            account_id,
            currency,
            invoices: summaries,
            payments,
            account_balance,
            account_credit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::AccountCreditLedger;
    use crate::item::InvoiceItem;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, m, day).unwrap()
    }

    #[test]
    fn test_totals_skip_drafts() {
        let account = AccountId::new();
        let usd = |v| Money::new(v, Currency::USD);

        let mut credit = Invoice::new_draft(account, Currency::USD, d(4, 1), d(4, 1), Utc::now());
        let (cba, adj) = AccountCreditLedger::credit_items(account, usd(dec!(100)), d(4, 1)).unwrap();
        credit.add_item(cba).unwrap();
        credit.add_item(adj).unwrap();
        credit.commit(1, Utc::now()).unwrap();

        let mut draft = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        draft
            .add_item(InvoiceItem::external_charge(account, None, d(5, 1), usd(dec!(33.80)), "charge"))
            .unwrap();

        let timeline = AccountTimeline::build(account, Currency::USD, &[credit, draft]).unwrap();
        assert_eq!(timeline.invoices.len(), 2);
        assert_eq!(timeline.account_credit, usd(dec!(100)));
        assert!(timeline.account_balance.is_zero());
        assert_eq!(timeline.invoices[0].amount_credited, usd(dec!(100)));
        assert_eq!(timeline.invoices[1].balance, usd(dec!(33.80)));
        assert!(timeline.payments.is_empty());
    }

    #[test]
    fn test_payments_listed_oldest_first() {
        let account = AccountId::new();
        let usd = |v| Money::new(v, Currency::USD);
        let mut invoice = Invoice::new_draft(account, Currency::USD, d(5, 1), d(5, 1), Utc::now());
        invoice
            .add_item(InvoiceItem::external_charge(account, None, d(5, 1), usd(dec!(30)), "charge"))
            .unwrap();
        invoice.commit(1, Utc::now()).unwrap();

        let first = invoice.record_payment(usd(dec!(10)), Utc::now()).unwrap();
        let second = invoice
            .record_payment(usd(dec!(5)), Utc::now() + chrono::Duration::seconds(1))
            .unwrap();

        let timeline = AccountTimeline::build(account, Currency::USD, &[invoice.clone()]).unwrap();
        let ids: Vec<_> = timeline.payments.iter().map(|p| p.payment_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(timeline.payments.iter().all(|p| p.invoice_id == invoice.id));
        assert_eq!(timeline.account_balance, usd(dec!(15)));
    }
}
