//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for invoices that give more
//! meaningful error messages than comparing item vectors directly.

use chrono::NaiveDate;
use core_kernel::{Currency, Money};
use domain_invoice::{Invoice, InvoiceItem, InvoiceItemKind};
use rust_decimal::Decimal;

/// Expected shape of one invoice item: service period, kind and amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedItem {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub kind: InvoiceItemKind,
    pub amount: Decimal,
}

impl ExpectedItem {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>, kind: InvoiceItemKind, amount: Decimal) -> Self {
        Self {
            start,
            end,
            kind,
            amount,
        }
    }

    fn matches(&self, item: &InvoiceItem) -> bool {
        item.kind == self.kind
            && item.period.start == self.start
            && item.period.end == self.end
            && item.amount.amount() == self.amount
    }
}

/// Asserts that the invoice holds exactly the expected items, in any order
///
/// # Panics
///
/// Panics listing the actual items if any expected item is missing or the
/// invoice holds extra items.
pub fn assert_invoice_items(invoice: &Invoice, expected: &[ExpectedItem]) {
    let describe = || {
        invoice
            .items()
            .iter()
            .map(|item| format!("  {:?} {} {}", item.kind, item.period, item.amount))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut unmatched: Vec<&InvoiceItem> = invoice.items().iter().collect();
    for want in expected {
        let position = unmatched.iter().position(|item| want.matches(item));
        match position {
            Some(index) => {
                unmatched.remove(index);
            }
            None => panic!(
                "Invoice {} is missing {:?}; actual items:\n{}",
                invoice.id,
                want,
                describe()
            ),
        }
    }
    assert!(
        unmatched.is_empty(),
        "Invoice {} has {} unexpected items; actual items:\n{}",
        invoice.id,
        unmatched.len(),
        describe()
    );
}

/// Asserts the invoice total in USD
pub fn assert_invoice_amount(invoice: &Invoice, expected: Decimal) {
    let actual = invoice.amount().expect("invoice amount");
    assert_eq!(
        actual,
        Money::new(expected, Currency::USD),
        "Invoice {} total mismatch",
        invoice.id
    );
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(
        money.is_zero(),
        "Expected zero money, got {} {}",
        money.currency().symbol(),
        money.amount()
    );
}

/// Asserts that a Money value is not negative
pub fn assert_money_non_negative(money: &Money) {
    assert!(
        !money.is_negative(),
        "Expected non-negative money, got {} {}",
        money.currency().symbol(),
        money.amount()
    );
}
