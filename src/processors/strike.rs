//! Strike payment processor.
//!
//! Speaks the Strike v1 REST API: an invoice is created with
//! `POST /invoices`, quoted into a Lightning payment request with
//! `POST /invoices/{id}/quote`, polled with `GET /invoices/{id}`, and
//! cancelled with `PATCH /invoices/{id}/cancel`. Strike is the only
//! processor in the family with a real cancel endpoint.

use crate::errors::{Result, SatgateError};
use crate::processors::{fiat_string, http_client, CancelOutcome, PaymentProcessor};
use crate::types::{Currency, Invoice, InvoiceState};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.strike.me/v1/";

#[derive(Deserialize)]
struct CreateInvoiceResponse {
    #[serde(rename = "invoiceId")]
    invoice_id: Option<String>,
}

#[derive(Deserialize)]
struct QuoteResponse {
    #[serde(rename = "lnInvoice")]
    ln_invoice: Option<String>,
    #[serde(rename = "expirationInSec")]
    expiration_in_sec: Option<i64>,
}

#[derive(Deserialize)]
struct InvoiceStateResponse {
    state: Option<String>,
}

/// Client for the Strike payment API.
pub struct Strike {
    api_key: String,
    base_url: Url,
    http: Client,
}

impl Strike {
    /// Creates a processor against the production Strike API.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a processor against a custom base URL (for tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: Url::parse(base_url)?,
            http: http_client()?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Accept", "application/json")
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl PaymentProcessor for Strike {
    fn name(&self) -> &str {
        "strike"
    }

    #[instrument(skip(self, description), fields(processor = "strike"))]
    async fn create_invoice(
        &self,
        correlation_id: Uuid,
        description: &str,
        fiat_amount: f64,
    ) -> Result<Invoice> {
        let body = json!({
            "correlationId": correlation_id,
            "description": description,
            "amount": { "amount": fiat_string(fiat_amount), "currency": "USD" },
        });

        let created: CreateInvoiceResponse = self
            .authed(self.http.post(self.endpoint("invoices")?))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let invoice_id = created.invoice_id.ok_or_else(|| {
            SatgateError::InvoiceCreation("Strike response missing invoiceId".to_string())
        })?;

        // A second call quotes the invoice into a payable Lightning request.
        let quote: QuoteResponse = self
            .authed(
                self.http
                    .post(self.endpoint(&format!("invoices/{}/quote", invoice_id))?),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let payment_request = quote.ln_invoice.ok_or_else(|| {
            SatgateError::InvoiceCreation("Strike quote missing lnInvoice".to_string())
        })?;
        let expiration_in_sec = quote.expiration_in_sec.ok_or_else(|| {
            SatgateError::InvoiceCreation("Strike quote missing expirationInSec".to_string())
        })?;

        debug!(%invoice_id, expiration_in_sec, "strike invoice created");

        Ok(Invoice {
            invoice_id,
            correlation_id,
            requested_amount: fiat_amount,
            requested_currency: Currency::Usd,
            payment_request,
            expires_at: Utc::now() + ChronoDuration::seconds(expiration_in_sec),
            state: InvoiceState::Pending,
        })
    }

    async fn is_paid(&self, invoice_id: &str) -> Result<bool> {
        let response: InvoiceStateResponse = self
            .authed(
                self.http
                    .get(self.endpoint(&format!("invoices/{}", invoice_id))?),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.state.as_deref() == Some("PAID"))
    }

    async fn expire_invoice(&self, invoice_id: &str) -> Result<CancelOutcome> {
        let response: InvoiceStateResponse = self
            .authed(
                self.http
                    .patch(self.endpoint(&format!("invoices/{}/cancel", invoice_id))?),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.state.as_deref() == Some("CANCELLED") {
            Ok(CancelOutcome::Cancelled)
        } else {
            Ok(CancelOutcome::Refused)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let strike = Strike::new("key").unwrap();
        assert_eq!(strike.name(), "strike");
    }

    #[test]
    fn test_endpoint_join() {
        let strike = Strike::new("key").unwrap();
        let url = strike.endpoint("invoices/abc/quote").unwrap();
        assert_eq!(url.as_str(), "https://api.strike.me/v1/invoices/abc/quote");
    }

    #[test]
    fn test_create_response_parsing() {
        let created: CreateInvoiceResponse =
            serde_json::from_str(r#"{"invoiceId":"INV1","state":"UNPAID"}"#).unwrap();
        assert_eq!(created.invoice_id.as_deref(), Some("INV1"));

        // Missing id is represented, not a parse failure
        let missing: CreateInvoiceResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(missing.invoice_id.is_none());
    }

    #[test]
    fn test_quote_response_parsing() {
        let quote: QuoteResponse = serde_json::from_str(
            r#"{"lnInvoice":"lnbc10u1p...","expirationInSec":60,"quoteId":"q1"}"#,
        )
        .unwrap();
        assert_eq!(quote.ln_invoice.as_deref(), Some("lnbc10u1p..."));
        assert_eq!(quote.expiration_in_sec, Some(60));
    }

    #[test]
    fn test_state_response_parsing() {
        let state: InvoiceStateResponse =
            serde_json::from_str(r#"{"state":"PAID"}"#).unwrap();
        assert_eq!(state.state.as_deref(), Some("PAID"));
    }
}
