//! OpenNode payment processor.
//!
//! Charges are created with `POST /v1/charges` (fiat-denominated, OpenNode
//! converts internally) and polled with `GET /v1/charge/{id}`. Like LNbits,
//! OpenNode exposes no cancel endpoint, so
//! [`expire_invoice`](PaymentProcessor::expire_invoice) reports
//! [`CancelOutcome::Unsupported`].

use crate::errors::{Result, SatgateError};
use crate::processors::{http_client, CancelOutcome, PaymentProcessor};
use crate::types::{Currency, Invoice, InvoiceState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.opennode.com/";

#[derive(Deserialize)]
struct ChargeEnvelope {
    data: ChargeData,
}

#[derive(Deserialize)]
struct ChargeData {
    id: Option<String>,
    status: Option<String>,
    lightning_invoice: Option<LightningInvoice>,
}

#[derive(Deserialize)]
struct LightningInvoice {
    payreq: Option<String>,
    expires_at: Option<i64>,
}

/// Client for the OpenNode charges API.
pub struct OpenNode {
    api_key: String,
    base_url: Url,
    http: Client,
}

impl OpenNode {
    /// Creates a processor against the production OpenNode API.
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
}

#[async_trait]
impl PaymentProcessor for OpenNode {
    fn name(&self) -> &str {
        "opennode"
    }

    #[instrument(skip(self, description), fields(processor = "opennode"))]
    async fn create_invoice(
        &self,
        correlation_id: Uuid,
        description: &str,
        fiat_amount: f64,
    ) -> Result<Invoice> {
        let body = json!({
            "amount": fiat_amount,
            "currency": "USD",
            "description": description,
            "order_id": correlation_id,
        });

        let envelope: ChargeEnvelope = self
            .http
            .post(self.endpoint("v1/charges")?)
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let charge = envelope.data;
        let invoice_id = charge.id.ok_or_else(|| {
            SatgateError::InvoiceCreation("OpenNode charge missing id".to_string())
        })?;
        let ln = charge.lightning_invoice.ok_or_else(|| {
            SatgateError::InvoiceCreation("OpenNode charge missing lightning_invoice".to_string())
        })?;
        let payment_request = ln.payreq.ok_or_else(|| {
            SatgateError::InvoiceCreation("OpenNode charge missing payreq".to_string())
        })?;
        let expires_at = ln
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| {
                SatgateError::InvoiceCreation("OpenNode charge missing expires_at".to_string())
            })?;

        debug!(%invoice_id, "opennode charge created");

        Ok(Invoice {
            invoice_id,
            correlation_id,
            requested_amount: fiat_amount,
            requested_currency: Currency::Usd,
            payment_request,
            expires_at,
            state: InvoiceState::Pending,
        })
    }

    async fn is_paid(&self, invoice_id: &str) -> Result<bool> {
        let envelope: ChargeEnvelope = self
            .http
            .get(self.endpoint(&format!("v1/charge/{}", invoice_id))?)
            .header("Authorization", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(envelope.data.status.as_deref() == Some("paid"))
    }

    async fn expire_invoice(&self, _invoice_id: &str) -> Result<CancelOutcome> {
        // No cancel endpoint; the charge self-expires server-side.
        Ok(CancelOutcome::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let node = OpenNode::new("key").unwrap();
        assert_eq!(node.name(), "opennode");
    }

    #[test]
    fn test_endpoint_join() {
        let node = OpenNode::new("key").unwrap();
        let url = node.endpoint("v1/charge/abc").unwrap();
        assert_eq!(url.as_str(), "https://api.opennode.com/v1/charge/abc");
    }

    #[test]
    fn test_charge_parsing() {
        let envelope: ChargeEnvelope = serde_json::from_str(
            r#"{
                "data": {
                    "id": "ch_123",
                    "status": "unpaid",
                    "lightning_invoice": {
                        "payreq": "lnbc100n1p...",
                        "expires_at": 1700000600
                    }
                }
            }"#,
        )
        .unwrap();

        let data = envelope.data;
        assert_eq!(data.id.as_deref(), Some("ch_123"));
        let ln = data.lightning_invoice.unwrap();
        assert_eq!(ln.payreq.as_deref(), Some("lnbc100n1p..."));
        assert_eq!(ln.expires_at, Some(1700000600));
    }

    #[test]
    fn test_paid_status_parsing() {
        let envelope: ChargeEnvelope =
            serde_json::from_str(r#"{"data":{"id":"ch_123","status":"paid"}}"#).unwrap();
        assert_eq!(envelope.data.status.as_deref(), Some("paid"));
    }

    #[tokio::test]
    async fn test_expire_is_deterministically_unsupported() {
        let node = OpenNode::new("key").unwrap();
        let outcome = node.expire_invoice("ch_123").await.unwrap();
        assert_eq!(outcome, CancelOutcome::Unsupported);
    }
}
