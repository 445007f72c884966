//! Domain events emitted by the invoicing engine
//!
//! Events are published on a broadcast channel after the corresponding
//! invoices have been persisted. They are used for:
//! - Triggering payment collection for committed invoices
//! - Audit trails
//! - Notifying downstream systems of account credit changes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, InvoiceId, Money, PaymentId};

/// Events emitted by the invoicing engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    /// A draft was created or its items changed
    DraftInvoiceSaved {
        account_id: AccountId,
        invoice_id: InvoiceId,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An invoice was committed
    InvoiceCommitted {
        account_id: AccountId,
        invoice_id: InvoiceId,
        invoice_number: u64,
        balance: Money,
        /// True if the committed balance is positive and payment should be collected
        payment_required: bool,
        timestamp: DateTime<Utc>,
    },

    /// Credit was granted to the account
    CreditInserted {
        account_id: AccountId,
        invoice_id: InvoiceId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    /// A payment was recorded against a committed invoice
    PaymentRecorded {
        account_id: AccountId,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        amount: Money,
        balance: Money,
        timestamp: DateTime<Utc>,
    },
}

impl InvoiceEvent {
    /// Returns the account this event relates to
    pub fn account_id(&self) -> AccountId {
        match self {
            InvoiceEvent::DraftInvoiceSaved { account_id, .. }
            | InvoiceEvent::InvoiceCommitted { account_id, .. }
            | InvoiceEvent::CreditInserted { account_id, .. }
            | InvoiceEvent::PaymentRecorded { account_id, .. } => *account_id,
        }
    }

    /// Returns the invoice this event relates to
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::DraftInvoiceSaved { invoice_id, .. }
            | InvoiceEvent::InvoiceCommitted { invoice_id, .. }
            | InvoiceEvent::CreditInserted { invoice_id, .. }
            | InvoiceEvent::PaymentRecorded { invoice_id, .. } => *invoice_id,
        }
    }

    /// Returns the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::DraftInvoiceSaved { .. } => "DraftInvoiceSaved",
            InvoiceEvent::InvoiceCommitted { .. } => "InvoiceCommitted",
            InvoiceEvent::CreditInserted { .. } => "CreditInserted",
            InvoiceEvent::PaymentRecorded { .. } => "PaymentRecorded",
        }
    }

    /// Returns the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::DraftInvoiceSaved { timestamp, .. }
            | InvoiceEvent::InvoiceCommitted { timestamp, .. }
            | InvoiceEvent::CreditInserted { timestamp, .. }
            | InvoiceEvent::PaymentRecorded { timestamp, .. } => *timestamp,
        }
    }
}
