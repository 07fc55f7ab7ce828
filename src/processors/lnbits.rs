//! LNbits payment processor.
//!
//! LNbits denominates invoices in sats rather than fiat, so this processor
//! converts the requested fiat amount through the shared [`PriceOracle`]
//! before calling `POST /api/v1/payments`. Payment status comes from
//! `GET /api/v1/payments/{payment_hash}`. LNbits has no cancel endpoint;
//! [`expire_invoice`](PaymentProcessor::expire_invoice) reports
//! [`CancelOutcome::Unsupported`] and the invoice self-expires server-side.

use crate::errors::{Result, SatgateError};
use crate::processors::{http_client, CancelOutcome, PaymentProcessor};
use crate::rates::PriceOracle;
use crate::types::{Currency, Invoice, InvoiceState};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

/// Lifetime LNbits applies to invoices it issues.
const INVOICE_EXPIRY_SECS: i64 = 3600;

#[derive(Deserialize)]
struct CreatePaymentResponse {
    payment_hash: Option<String>,
    payment_request: Option<String>,
}

#[derive(Deserialize)]
struct PaymentStatusResponse {
    paid: Option<bool>,
}

/// Client for an LNbits instance.
pub struct LnBits {
    api_key: String,
    base_url: Url,
    http: Client,
    oracle: Arc<PriceOracle>,
}

impl LnBits {
    /// Creates a processor for the LNbits instance at `base_url`.
    ///
    /// The oracle converts fiat funding amounts into the sat amounts the
    /// LNbits API expects.
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        oracle: Arc<PriceOracle>,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: Url::parse(base_url)?,
            http: http_client()?,
            oracle,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl PaymentProcessor for LnBits {
    fn name(&self) -> &str {
        "lnbits"
    }

    #[instrument(skip(self, description), fields(processor = "lnbits"))]
    async fn create_invoice(
        &self,
        correlation_id: Uuid,
        description: &str,
        fiat_amount: f64,
    ) -> Result<Invoice> {
        let amount_sat = self.oracle.to_sats(fiat_amount).await?;

        let body = json!({
            "out": false,
            "amount": amount_sat,
            "memo": description,
        });

        let created: CreatePaymentResponse = self
            .http
            .post(self.endpoint("api/v1/payments")?)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let payment_hash = created.payment_hash.ok_or_else(|| {
            SatgateError::InvoiceCreation("LNbits response missing payment_hash".to_string())
        })?;
        let payment_request = created.payment_request.ok_or_else(|| {
            SatgateError::InvoiceCreation("LNbits response missing payment_request".to_string())
        })?;

        debug!(%payment_hash, amount_sat, "lnbits invoice created");

        Ok(Invoice {
            invoice_id: payment_hash,
            correlation_id,
            requested_amount: fiat_amount,
            requested_currency: Currency::Usd,
            payment_request,
            expires_at: Utc::now() + ChronoDuration::seconds(INVOICE_EXPIRY_SECS),
            state: InvoiceState::Pending,
        })
    }

    async fn is_paid(&self, invoice_id: &str) -> Result<bool> {
        let status: PaymentStatusResponse = self
            .http
            .get(self.endpoint(&format!("api/v1/payments/{}", invoice_id))?)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(status.paid.unwrap_or(false))
    }

    async fn expire_invoice(&self, _invoice_id: &str) -> Result<CancelOutcome> {
        // No cancel endpoint; the invoice self-expires server-side.
        Ok(CancelOutcome::Unsupported)
    }
}
