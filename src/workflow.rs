//! Funding workflow: request -> invoice -> poll -> credit.
//!
//! One [`InvoiceWorkflow`] instance serves the whole process. Each accepted
//! funding request creates a processor-side invoice, presents it to the
//! conversation (QR image plus the payable string), and spawns its own
//! polling task so other conversations are never blocked. The task queries
//! `is_paid` on a fixed cadence until payment, deadline expiry, or an
//! explicit cancel signal, and credits the ledger exactly once on payment.
//!
//! Per conversation, at most one invoice may be pending: a second funding
//! request is rejected until the first reaches a terminal state or is
//! cancelled. The pending registry is also what a bare cancel command uses
//! to resolve "the" invoice for a conversation.

use crate::chat::{ChatSink, QrEncoder};
use crate::errors::{Result, SatgateError};
use crate::ledger::BalanceLedger;
use crate::processors::{CancelOutcome, PaymentProcessor};
use crate::rates::{sats_to_usd, usd_to_sats, PriceOracle, DEFAULT_PAIR};
use crate::types::{ConversationId, Currency, FundRequest, Invoice, InvoiceState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Tuning knobs for the funding workflow.
#[derive(Clone)]
pub struct WorkflowConfig {
    /// Cadence of `is_paid` queries
    pub poll_interval: Duration,

    /// Consecutive poll failures before the operator is notified once
    pub poll_failure_threshold: u32,

    /// Static receiving address offered when invoice creation fails
    pub fallback_address: Option<String>,

    /// Conversation that receives operator notifications
    pub operator: Option<ConversationId>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_failure_threshold: 5,
            fallback_address: None,
            operator: None,
        }
    }
}

struct PendingEntry {
    invoice_id: Option<String>,
    cancel_tx: watch::Sender<bool>,
}

/// Orchestrates funding requests end to end.
pub struct InvoiceWorkflow {
    processor: Arc<dyn PaymentProcessor>,
    oracle: Arc<PriceOracle>,
    ledger: Arc<BalanceLedger>,
    sink: Arc<dyn ChatSink>,
    qr: Arc<dyn QrEncoder>,
    config: WorkflowConfig,
    pending: Arc<RwLock<HashMap<ConversationId, PendingEntry>>>,
}

impl InvoiceWorkflow {
    /// Creates a workflow over the given collaborators.
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        oracle: Arc<PriceOracle>,
        ledger: Arc<BalanceLedger>,
        sink: Arc<dyn ChatSink>,
        qr: Arc<dyn QrEncoder>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            processor,
            oracle,
            ledger,
            sink,
            qr,
            config,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether a conversation currently has a pending invoice.
    pub async fn has_pending(&self, conversation: &ConversationId) -> bool {
        self.pending.read().await.contains_key(conversation)
    }

    /// Runs a funding request for a conversation.
    ///
    /// Validates the request, creates and presents an invoice, and spawns
    /// the polling task. Returns the created invoice; the eventual outcome
    /// (paid, expired, cancelled) is reported to the conversation through
    /// the [`ChatSink`].
    pub async fn fund(
        &self,
        conversation: &ConversationId,
        request: FundRequest,
    ) -> Result<Invoice> {
        request.validate()?;

        // Work out both denominations up front: the processor is billed in
        // fiat, the ledger is credited in sats.
        let rate = self.oracle.get_rate(DEFAULT_PAIR).await?;
        let (fiat_amount, credit_sats) = match request.currency {
            Currency::Sat => {
                let sats = request.amount.round() as u64;
                (sats_to_usd(&rate, sats), sats)
            }
            Currency::Usd => (request.amount, usd_to_sats(&rate, request.amount)),
        };

        let correlation_id = uuid::Uuid::new_v4();

        // Reserve the conversation's pending slot before any external call
        // so two racing fund commands cannot both create invoices.
        let cancel_rx = {
            let mut pending = self.pending.write().await;
            if pending.contains_key(conversation) {
                return Err(SatgateError::PendingInvoice(conversation.to_string()));
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            pending.insert(
                conversation.clone(),
                PendingEntry {
                    invoice_id: None,
                    cancel_tx,
                },
            );
            cancel_rx
        };

        info!(
            conversation = %conversation,
            %correlation_id,
            amount = request.amount,
            currency = %request.currency,
            "funding requested"
        );

        let invoice = match self
            .processor
            .create_invoice(correlation_id, &request.description, fiat_amount)
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => {
                self.pending.write().await.remove(conversation);
                self.report_creation_failure(conversation, correlation_id, &e)
                    .await;
                return Err(e);
            }
        };

        self.present(conversation, &invoice).await;

        {
            let mut pending = self.pending.write().await;
            if let Some(entry) = pending.get_mut(conversation) {
                entry.invoice_id = Some(invoice.invoice_id.clone());
            }
        }

        self.spawn_poll_task(conversation.clone(), invoice.clone(), credit_sats, cancel_rx);

        Ok(invoice)
    }

    /// Cancels the pending invoice for a conversation.
    ///
    /// Resolves the most recent pending invoice through the registry and
    /// signals its polling task, which transitions to `CANCELLED` without
    /// waiting out the deadline.
    pub async fn cancel(&self, conversation: &ConversationId) -> Result<()> {
        let pending = self.pending.read().await;
        let entry = pending
            .get(conversation)
            .ok_or_else(|| SatgateError::NoPendingInvoice(conversation.to_string()))?;

        info!(
            conversation = %conversation,
            invoice_id = entry.invoice_id.as_deref().unwrap_or("<creating>"),
            "cancel requested"
        );
        // The task may have just finished; a closed channel means the entry
        // is on its way out and there is nothing left to cancel.
        let _ = entry.cancel_tx.send(true);
        Ok(())
    }

    async fn present(&self, conversation: &ConversationId, invoice: &Invoice) {
        match self.qr.encode(&invoice.payment_request) {
            Ok(png) if !png.is_empty() => {
                if let Err(e) = self
                    .sink
                    .send_image(conversation, png, "Scan to pay and top up this conversation")
                    .await
                {
                    warn!(conversation = %conversation, error = %e, "QR send failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(conversation = %conversation, error = %e, "QR encode failed"),
        }

        if let Err(e) = self
            .sink
            .send_text(conversation, &invoice.payment_request)
            .await
        {
            warn!(conversation = %conversation, error = %e, "invoice send failed");
        }
    }

    async fn report_creation_failure(
        &self,
        conversation: &ConversationId,
        correlation_id: uuid::Uuid,
        e: &SatgateError,
    ) {
        error!(
            conversation = %conversation,
            %correlation_id,
            error = %e,
            "invoice creation failed"
        );

        let mut message =
            "Something went wrong creating your invoice. Please try again later.".to_string();
        if let Some(address) = &self.config.fallback_address {
            message.push_str(&format!("\nYou can also pay manually to {}", address));
        }
        let _ = self.sink.send_text(conversation, &message).await;

        if let Some(operator) = &self.config.operator {
            let _ = self
                .sink
                .send_text(
                    operator,
                    &format!(
                        "Invoice creation failed for conversation {} (correlation {}): {}",
                        conversation, correlation_id, e
                    ),
                )
                .await;
        }
    }

    fn spawn_poll_task(
        &self,
        conversation: ConversationId,
        invoice: Invoice,
        credit_sats: u64,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let task = PollTask {
            processor: self.processor.clone(),
            ledger: self.ledger.clone(),
            sink: self.sink.clone(),
            pending: self.pending.clone(),
            config: self.config.clone(),
            conversation,
            invoice,
            credit_sats,
        };
        tokio::spawn(task.run(cancel_rx));
    }
}

/// State owned by one invoice's polling task.
struct PollTask {
    processor: Arc<dyn PaymentProcessor>,
    ledger: Arc<BalanceLedger>,
    sink: Arc<dyn ChatSink>,
    pending: Arc<RwLock<HashMap<ConversationId, PendingEntry>>>,
    config: WorkflowConfig,
    conversation: ConversationId,
    invoice: Invoice,
    credit_sats: u64,
}

impl PollTask {
    async fn run(mut self, mut cancel_rx: watch::Receiver<bool>) {
        let deadline = self.invoice.expires_at;
        let notice_at = reminder_instant(deadline);
        let mut notice_sent = false;
        let mut consecutive_failures = 0u32;
        let mut operator_notified = false;
        let mut cancel_channel_open = true;

        debug!(
            conversation = %self.conversation,
            invoice_id = %self.invoice.invoice_id,
            %deadline,
            "polling started"
        );

        loop {
            tokio::select! {
                changed = cancel_rx.changed(), if cancel_channel_open => {
                    match changed {
                        Ok(()) => {
                            let signalled = *cancel_rx.borrow();
                            if signalled {
                                self.finish_cancelled().await;
                                break;
                            }
                        }
                        // Sender gone; cancellation can no longer arrive.
                        Err(_) => cancel_channel_open = false,
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.processor.is_paid(&self.invoice.invoice_id).await {
                        Ok(true) => {
                            self.finish_paid().await;
                            break;
                        }
                        Ok(false) => {
                            consecutive_failures = 0;
                        }
                        Err(e) => {
                            // Transient failure: skip the tick, keep polling.
                            consecutive_failures += 1;
                            warn!(
                                conversation = %self.conversation,
                                invoice_id = %self.invoice.invoice_id,
                                error = %e,
                                consecutive_failures,
                                "payment poll failed"
                            );
                            if consecutive_failures >= self.config.poll_failure_threshold
                                && !operator_notified
                            {
                                operator_notified = true;
                                self.notify_operator_poll_failures(consecutive_failures).await;
                            }
                        }
                    }

                    let now = Utc::now();
                    if now >= deadline {
                        self.finish_expired().await;
                        break;
                    }
                    if !notice_sent {
                        if let Some(at) = notice_at {
                            if now >= at {
                                notice_sent = true;
                                let remaining = (deadline - now).num_seconds().max(0);
                                let _ = self
                                    .sink
                                    .send_text(
                                        &self.conversation,
                                        &format!("Invoice expires in {} seconds", remaining),
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
        }

        self.pending.write().await.remove(&self.conversation);
    }

    async fn finish_paid(&mut self) {
        // The transition guard is what makes the credit at-most-once even
        // if is_paid reports true on several ticks.
        if !self.invoice.transition(InvoiceState::Paid) {
            return;
        }
        let balance = self.ledger.credit(&self.conversation, self.credit_sats).await;
        info!(
            conversation = %self.conversation,
            invoice_id = %self.invoice.invoice_id,
            credit_sats = self.credit_sats,
            balance,
            "invoice paid"
        );
        let _ = self
            .sink
            .send_text(
                &self.conversation,
                &format!(
                    "Payment received! Your balance is now {} sats. Thank you!",
                    balance
                ),
            )
            .await;
    }

    async fn finish_expired(&mut self) {
        if !self.invoice.transition(InvoiceState::Expired) {
            return;
        }
        self.try_expire_remote().await;
        info!(
            conversation = %self.conversation,
            invoice_id = %self.invoice.invoice_id,
            "invoice expired"
        );
        let _ = self
            .sink
            .send_text(&self.conversation, "Invoice expired. Retry?")
            .await;
    }

    async fn finish_cancelled(&mut self) {
        if !self.invoice.transition(InvoiceState::Cancelled) {
            return;
        }
        self.try_expire_remote().await;
        info!(
            conversation = %self.conversation,
            invoice_id = %self.invoice.invoice_id,
            "invoice cancelled"
        );
        let _ = self
            .sink
            .send_text(&self.conversation, "Invoice cancelled.")
            .await;
    }

    /// Best-effort processor-side cancellation. "Unsupported" is a normal
    /// answer: the invoice self-expires server-side and the local terminal
    /// state stands either way.
    async fn try_expire_remote(&self) {
        match self.processor.expire_invoice(&self.invoice.invoice_id).await {
            Ok(CancelOutcome::Cancelled) => {}
            Ok(CancelOutcome::Unsupported) => {
                debug!(
                    processor = self.processor.name(),
                    invoice_id = %self.invoice.invoice_id,
                    "processor does not support cancellation"
                );
            }
            Ok(CancelOutcome::Refused) => {
                warn!(
                    invoice_id = %self.invoice.invoice_id,
                    "processor refused cancellation"
                );
            }
            Err(e) => {
                warn!(
                    invoice_id = %self.invoice.invoice_id,
                    error = %e,
                    "processor-side cancel failed"
                );
            }
        }
    }

    async fn notify_operator_poll_failures(&self, failures: u32) {
        if let Some(operator) = &self.config.operator {
            let _ = self
                .sink
                .send_text(
                    operator,
                    &format!(
                        "Payment polling for invoice {} (conversation {}) has failed {} times in a row",
                        self.invoice.invoice_id, self.conversation, failures
                    ),
                )
                .await;
        }
    }
}

/// Picks the point at which the single expiry reminder is sent: halfway
/// through the invoice's remaining lifetime, or never for very short
/// invoices.
fn reminder_instant(deadline: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lifetime = deadline - Utc::now();
    if lifetime.num_seconds() < 10 {
        return None;
    }
    Some(deadline - lifetime / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reminder_instant_for_short_invoices() {
        // Anything under ten seconds gets no reminder
        assert!(reminder_instant(Utc::now() + chrono::Duration::seconds(5)).is_none());
        assert!(reminder_instant(Utc::now() + chrono::Duration::seconds(60)).is_some());
    }

    #[test]
    fn test_reminder_is_at_half_life() {
        let deadline = Utc::now() + chrono::Duration::seconds(60);
        let at = reminder_instant(deadline).unwrap();
        let from_now = (at - Utc::now()).num_seconds();
        assert!((28..=32).contains(&from_now), "got {}", from_now);
    }

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poll_failure_threshold, 5);
        assert!(config.fallback_address.is_none());
    }
}
