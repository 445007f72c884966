//! Invoicing domain errors

use core_kernel::{AccountId, CoreError, MoneyError, PortError, SubscriptionId, TemporalError};
use thiserror::Error;

/// Errors that can occur in the invoicing domain
#[derive(Debug, Error)]
pub enum InvoiceError {
    /// Billing events or prices for a subscription are inconsistent
    #[error("Validation error{}: {message}", subscription_id.map(|s| format!(" for subscription {}", s)).unwrap_or_default())]
    Validation {
        subscription_id: Option<SubscriptionId>,
        message: String,
    },

    /// An invoice plugin failed, timed out, or returned an unusable item
    #[error("Plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PortError,
    },

    /// Another generation pass holds the account
    #[error("Account {account_id} is being invoiced by another pass")]
    Concurrency { account_id: AccountId },

    /// A computation would break a ledger invariant; nothing was persisted
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not allowed in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] CoreError),

    /// Persistence adapter failure
    #[error("Store error: {0}")]
    Store(#[source] PortError),
}

impl InvoiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        InvoiceError::Validation {
            subscription_id: None,
            message: message.into(),
        }
    }

    pub fn subscription(subscription_id: SubscriptionId, message: impl Into<String>) -> Self {
        InvoiceError::Validation {
            subscription_id: Some(subscription_id),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        InvoiceError::InvariantViolation(message.into())
    }

    pub fn plugin(plugin: impl Into<String>, source: PortError) -> Self {
        InvoiceError::Plugin {
            plugin: plugin.into(),
            source,
        }
    }

    /// Returns true if the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            InvoiceError::Concurrency { .. } => true,
            InvoiceError::Plugin { source, .. } | InvoiceError::Store(source) => source.is_transient(),
            _ => false,
        }
    }
}

impl From<PortError> for InvoiceError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => {
                InvoiceError::NotFound(format!("{} {}", entity_type, id))
            }
            other => InvoiceError::Store(other),
        }
    }
}
