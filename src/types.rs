//! Core type definitions for balance-gated metering.
//!
//! This module contains the data model shared across the crate: conversation
//! and invoice identity, invoice lifecycle state, exchange rates, and usage
//! costs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a messaging-platform conversation (group or direct
/// chat). The unit of balance accounting and invoice tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Creates a conversation id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Currency a funding amount may be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    /// Satoshis, the metering unit
    #[serde(rename = "SAT")]
    Sat,

    /// US dollars
    #[serde(rename = "USD")]
    Usd,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Sat => write!(f, "SAT"),
            Currency::Usd => write!(f, "USD"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = crate::errors::SatgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SAT" | "SATS" => Ok(Currency::Sat),
            "USD" => Ok(Currency::Usd),
            other => Err(crate::errors::SatgateError::UnsupportedCurrency(
                other.to_string(),
            )),
        }
    }
}

/// Lifecycle state of an invoice.
///
/// The only legal transitions are `Pending -> {Paid, Expired, Cancelled}`;
/// terminal states are immutable. The processor is the system of record, so
/// the local state is a cache refreshed by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceState {
    /// Issued, awaiting payment or expiry
    Pending,
    /// Payment confirmed by the processor
    Paid,
    /// Deadline elapsed without payment
    Expired,
    /// Explicitly cancelled by the user
    Cancelled,
}

impl InvoiceState {
    /// Returns true once the state can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceState::Pending)
    }
}

/// A single funding request issued through a payment processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Processor-assigned opaque identifier
    #[serde(rename = "invoiceId")]
    pub invoice_id: String,

    /// Caller-assigned unique token, one per creation attempt
    #[serde(rename = "correlationId")]
    pub correlation_id: Uuid,

    /// Amount the processor was asked for
    #[serde(rename = "requestedAmount")]
    pub requested_amount: f64,

    /// Currency of `requested_amount`
    #[serde(rename = "requestedCurrency")]
    pub requested_currency: Currency,

    /// The payable string (a BOLT11 Lightning invoice)
    #[serde(rename = "paymentRequest")]
    pub payment_request: String,

    /// Deadline after which the processor will no longer accept payment
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,

    /// Cached lifecycle state
    pub state: InvoiceState,
}

impl Invoice {
    /// Attempts the transition `Pending -> next`.
    ///
    /// Returns true if the transition was applied; false if the invoice was
    /// already terminal (the state is left untouched). Guarding credits with
    /// this method is what makes `PAID -> credit` at-most-once.
    pub fn transition(&mut self, next: InvoiceState) -> bool {
        if self.state.is_terminal() || !next.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }
}

/// A cached exchange rate, always expressed as sats per one fiat unit.
///
/// Keeping the rate in this orientation makes both conversions
/// multiplicative: `sats = usd * rate` and `usd = sats / rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Sats per one unit of the fiat currency
    pub sats_per_fiat: f64,

    /// Currency pair label, e.g. "BTC-USD"
    pub pair: String,

    /// Wall-clock instant the rate was observed
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

/// Cost of one LLM completion, derived from its token counts and the
/// exchange rate in force at debit time. Ephemeral; never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageCost {
    /// Prompt-side token count
    pub input_tokens: u32,

    /// Completion-side token count
    pub output_tokens: u32,

    /// Cost in fiat before conversion
    pub usd: f64,

    /// Cost in the metering unit, after the floor clamp
    pub sats: u64,
}

/// A validated user funding request.
#[derive(Debug, Clone)]
pub struct FundRequest {
    /// Requested amount, in `currency`
    pub amount: f64,

    /// Denomination of `amount`
    pub currency: Currency,

    /// Free-form description forwarded to the processor, e.g.
    /// "Payer - alice, Prompt - what is a utxo"
    pub description: String,
}

impl FundRequest {
    /// Creates a funding request.
    pub fn new(amount: f64, currency: Currency, description: impl Into<String>) -> Self {
        Self {
            amount,
            currency,
            description: description.into(),
        }
    }

    /// Validates the request before any external call is made.
    ///
    /// Invalid input terminates the workflow locally; no invoice is created.
    pub fn validate(&self) -> crate::errors::Result<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(crate::errors::SatgateError::InvalidAmount(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invoice() -> Invoice {
        Invoice {
            invoice_id: "INV1".to_string(),
            correlation_id: Uuid::new_v4(),
            requested_amount: 1.0,
            requested_currency: Currency::Usd,
            payment_request: "lnbc1...".to_string(),
            expires_at: Utc::now(),
            state: InvoiceState::Pending,
        }
    }

    #[test]
    fn test_invoice_serialization_round_trip() {
        let invoice = sample_invoice();
        let json = serde_json::to_string(&invoice).unwrap();
        assert!(json.contains("invoiceId"));
        assert!(json.contains("paymentRequest"));
        assert!(json.contains("PENDING"));

        let back: Invoice = serde_json::from_str(&json).unwrap();
        assert_eq!(back.invoice_id, "INV1");
        assert_eq!(back.state, InvoiceState::Pending);
    }

    #[test]
    fn test_state_transitions_are_one_way() {
        let mut invoice = sample_invoice();
        assert!(invoice.transition(InvoiceState::Paid));
        assert_eq!(invoice.state, InvoiceState::Paid);

        // Terminal states are immutable
        assert!(!invoice.transition(InvoiceState::Expired));
        assert_eq!(invoice.state, InvoiceState::Paid);

        // Pending is never a transition target
        let mut fresh = sample_invoice();
        assert!(!fresh.transition(InvoiceState::Pending));
        assert_eq!(fresh.state, InvoiceState::Pending);
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("SAT".parse::<Currency>().unwrap(), Currency::Sat);
        assert_eq!("sats".parse::<Currency>().unwrap(), Currency::Sat);
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("EUR".parse::<Currency>().is_err());
    }

    #[test]
    fn test_fund_request_validation() {
        assert!(FundRequest::new(50_000.0, Currency::Sat, "top up").validate().is_ok());
        assert!(FundRequest::new(0.0, Currency::Sat, "zero").validate().is_err());
        assert!(FundRequest::new(-1.0, Currency::Usd, "negative").validate().is_err());
        assert!(FundRequest::new(f64::NAN, Currency::Usd, "nan").validate().is_err());
    }

    #[test]
    fn test_conversation_id_display() {
        let id = ConversationId::new("chat-42");
        assert_eq!(id.to_string(), "chat-42");
        assert_eq!(id.as_str(), "chat-42");
    }
}
