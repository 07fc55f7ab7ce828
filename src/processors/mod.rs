//! Payment processor implementations.
//!
//! This module contains the capability trait every payment back-end
//! implements, and concrete clients for the Strike, LNbits, and OpenNode
//! REST APIs. The strategy is chosen once at process start (see
//! [`crate::config`]); callers never branch on processor identity.

pub mod lnbits;
pub mod opennode;
pub mod strike;

use crate::errors::Result;
use crate::types::Invoice;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a best-effort invoice cancellation.
///
/// Not every processor exposes a cancel endpoint; the ones that don't
/// report [`CancelOutcome::Unsupported`] deterministically instead of
/// erroring, so the workflow can still converge on a terminal local state
/// while the processor-side invoice self-expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The processor confirmed the invoice is cancelled
    Cancelled,
    /// The processor reported a state other than cancelled
    Refused,
    /// This processor has no cancel endpoint
    Unsupported,
}

/// Capability surface common to all payment processors.
///
/// Transport errors are never retried inside an implementation; retry
/// policy belongs to the workflow's polling loop, which re-queries on a
/// fixed cadence anyway.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the name of this processor (e.g. "strike").
    fn name(&self) -> &str;

    /// Creates a processor-side invoice for `fiat_amount` USD.
    ///
    /// `correlation_id` must be unique per attempt: the processor-side
    /// invoice carries real monetary exposure if paid, and a reused id on
    /// retry invites duplicate-invoice confusion.
    ///
    /// Fails with [`InvoiceCreation`](crate::errors::SatgateError::InvoiceCreation)
    /// if the network call fails or the response is missing the invoice id
    /// or payment string.
    async fn create_invoice(
        &self,
        correlation_id: Uuid,
        description: &str,
        fiat_amount: f64,
    ) -> Result<Invoice>;

    /// Queries whether the invoice has been paid. Pure query, safe to call
    /// repeatedly.
    async fn is_paid(&self, invoice_id: &str) -> Result<bool>;

    /// Attempts to cancel/expire the invoice. Best-effort.
    async fn expire_invoice(&self, invoice_id: &str) -> Result<CancelOutcome>;
}

/// Request timeout applied to every processor HTTP call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client() -> Result<Client> {
    Ok(Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Formats a fiat amount the way processor APIs expect it ("1.00").
pub(crate) fn fiat_string(amount: f64) -> String {
    format!("{:.2}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiat_string_formatting() {
        assert_eq!(fiat_string(1.0), "1.00");
        assert_eq!(fiat_string(0.5), "0.50");
        assert_eq!(fiat_string(21.5), "21.50");
    }

    #[test]
    fn test_http_client_builds() {
        assert!(http_client().is_ok());
    }
}
