//! Account credit (CBA) ledger
//!
//! Account credit is never stored as a separate balance: it is the sum of
//! the `CBA_ADJ` items on the account's committed invoices. Positive CBA
//! items book credit, negative ones consume it. The ledger is rebuilt from
//! committed invoices at the start of every pass, so drafts and dry runs
//! never move it.

use chrono::NaiveDate;
use tracing::debug;

use core_kernel::{AccountId, Currency, Money};

use crate::error::InvoiceError;
use crate::invoice::Invoice;
use crate::item::{InvoiceItem, InvoiceItemKind};

/// Running credit balance of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCreditLedger {
    account_id: AccountId,
    balance: Money,
}

impl AccountCreditLedger {
    /// Rebuilds the ledger from the account's invoices; drafts are ignored
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if committed CBA items sum to a negative
    /// balance, and `Money` on a currency mismatch.
    pub fn from_invoices<'a, I>(account_id: AccountId, currency: Currency, invoices: I) -> Result<Self, InvoiceError>
    where
        I: IntoIterator<Item = &'a Invoice>,
    {
        let mut balance = Money::zero(currency);
        for invoice in invoices.into_iter().filter(|invoice| invoice.is_committed()) {
            balance = balance.checked_add(&invoice.cba_amount()?)?;
        }
        if balance.is_negative() {
            return Err(InvoiceError::invariant(format!(
                "account {} has negative credit balance {}",
                account_id, balance
            )));
        }
        Ok(Self { account_id, balance })
    }

    /// Credit available for consumption
    pub fn balance(&self) -> Money {
        self.balance
    }

    /// Adds the CBA item an invoice needs before it is committed
    ///
    /// A positive balance consumes up to the available credit; a negative
    /// balance (repairs outweighing charges) is turned into credit. Returns
    /// the CBA amount added, if any.
    pub fn apply_to(&mut self, invoice: &mut Invoice, date: NaiveDate) -> Result<Option<Money>, InvoiceError> {
        if invoice.items_of(InvoiceItemKind::CbaAdj).next().is_some() {
            return Err(InvoiceError::invariant(format!(
                "invoice {} already carries account credit items",
                invoice.id
            )));
        }

        let owed = invoice.balance()?;
        let cba = if owed.is_negative() {
            -owed
        } else if owed.is_positive() && self.balance.is_positive() {
            -self.balance.min(&owed)?
        } else {
            return Ok(None);
        };

        let next = self.balance.checked_add(&cba)?;
        if next.is_negative() {
            return Err(InvoiceError::invariant(format!(
                "consuming {} would overdraw credit of {}",
                cba, self.balance
            )));
        }

        invoice.add_item(InvoiceItem::cba_adjustment(self.account_id, date, cba))?;
        debug!(
            account_id = %self.account_id,
            invoice_id = %invoice.id,
            cba = %cba,
            credit = %next,
            "Applied account credit"
        );
        self.balance = next;
        Ok(Some(cba))
    }

    /// Builds the balanced pair of items that grant `amount` of credit:
    /// `CBA_ADJ +amount` and `CREDIT_ADJ -amount`
    pub fn credit_items(
        account_id: AccountId,
        amount: Money,
        date: NaiveDate,
    ) -> Result<(InvoiceItem, InvoiceItem), InvoiceError> {
        if !amount.is_positive() {
            return Err(InvoiceError::validation(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        Ok((
            InvoiceItem::cba_adjustment(account_id, date, amount),
            InvoiceItem::credit_adjustment(account_id, date, -amount),
        ))
    }
}
