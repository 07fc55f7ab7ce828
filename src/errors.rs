//! Error types for the satgate library.
//!
//! This module defines all error types that can occur while issuing invoices,
//! refreshing exchange rates, and mutating balances.
//!
//! Insufficient funds is deliberately *not* represented here: a debit that
//! exceeds the balance is an expected, frequent outcome and is reported as a
//! negative result ([`DebitOutcome`](crate::ledger::DebitOutcome)), never as
//! an error.

use thiserror::Error;

/// Main error type for satgate operations.
#[derive(Error, Debug)]
pub enum SatgateError {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error parsing a URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Invoice creation failed (network failure or unparseable processor response)
    #[error("Invoice creation failed: {0}")]
    InvoiceCreation(String),

    /// A processor response was missing an expected field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// No exchange rate could be obtained (live fetch failed and no prior rate exists)
    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    /// Invalid funding amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency not in the allowed set
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// A funding request arrived while another invoice is still pending
    #[error("Conversation {0} already has a pending invoice")]
    PendingInvoice(String),

    /// A cancel command arrived with no pending invoice to resolve
    #[error("Conversation {0} has no pending invoice")]
    NoPendingInvoice(String),

    /// Configuration error (unknown processor kind, missing API token)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for satgate operations.
pub type Result<T> = std::result::Result<T, SatgateError>;
