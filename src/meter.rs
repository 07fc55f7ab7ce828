//! LLM usage metering.
//!
//! Converts a completion's token counts into a sat cost via the price
//! oracle and debits the conversation's prepaid balance. Billing is
//! post-hoc: the completion has already happened when the debit runs, so a
//! conversation can overdraw by at most one completion's cost before the
//! failed debit flips it to out-of-funds. The caller must refuse further
//! completions for that conversation until a new invoice is paid.

use crate::errors::Result;
use crate::ledger::BalanceLedger;
use crate::rates::{usd_to_sats, PriceOracle, DEFAULT_PAIR};
use crate::types::{ConversationId, UsageCost};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-1000-token USD prices for a completion model.
#[derive(Debug, Clone, Copy)]
pub struct TokenPricing {
    /// USD per 1000 prompt tokens
    pub input_usd_per_1k: f64,

    /// USD per 1000 completion tokens
    pub output_usd_per_1k: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        // GPT-4 list prices at the time the bot ran
        Self {
            input_usd_per_1k: 0.03,
            output_usd_per_1k: 0.06,
        }
    }
}

/// Result of metering one completion.
#[derive(Debug, Clone, Copy)]
pub struct MeterOutcome {
    /// Whether the debit was applied; false means the conversation is out
    /// of funds
    pub ok: bool,

    /// Balance after the call
    pub remaining: u64,

    /// The computed cost, whether or not it was debited
    pub cost: UsageCost,
}

/// Meters completions against a conversation's prepaid balance.
pub struct UsageMeter {
    pricing: TokenPricing,
    oracle: Arc<PriceOracle>,
    ledger: Arc<BalanceLedger>,
}

impl UsageMeter {
    /// Creates a meter with the given pricing table.
    pub fn new(pricing: TokenPricing, oracle: Arc<PriceOracle>, ledger: Arc<BalanceLedger>) -> Self {
        Self {
            pricing,
            oracle,
            ledger,
        }
    }

    /// Computes the cost of one completion without touching the ledger.
    pub async fn compute_cost(&self, input_tokens: u32, output_tokens: u32) -> Result<UsageCost> {
        let usd = input_tokens as f64 / 1000.0 * self.pricing.input_usd_per_1k
            + output_tokens as f64 / 1000.0 * self.pricing.output_usd_per_1k;
        let rate = self.oracle.get_rate(DEFAULT_PAIR).await?;
        let sats = usd_to_sats(&rate, usd);

        Ok(UsageCost {
            input_tokens,
            output_tokens,
            usd,
            sats,
        })
    }

    /// Computes the cost of a finished completion and debits it.
    ///
    /// A failed debit is a normal outcome, not an error: the caller treats
    /// the conversation as out of funds and short-circuits further
    /// completions with a "fund required" signal.
    pub async fn compute_and_debit(
        &self,
        conversation: &ConversationId,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<MeterOutcome> {
        let cost = self.compute_cost(input_tokens, output_tokens).await?;
        let debit = self.ledger.debit(conversation, cost.sats).await;

        if debit.ok {
            debug!(
                conversation = %conversation,
                sats = cost.sats,
                remaining = debit.remaining,
                "usage debited"
            );
        } else {
            info!(
                conversation = %conversation,
                sats = cost.sats,
                balance = debit.remaining,
                "out of funds"
            );
        }

        Ok(MeterOutcome {
            ok: debit.ok,
            remaining: debit.remaining,
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::rates::{RateSource, SAT_FLOOR};
    use async_trait::async_trait;

    struct FixedRate(f64);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn fetch(&self, _pair: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn meter_with(rate: f64, ledger: Arc<BalanceLedger>) -> UsageMeter {
        let oracle = Arc::new(PriceOracle::new(Arc::new(FixedRate(rate))));
        UsageMeter::new(TokenPricing::default(), oracle, ledger)
    }

    #[tokio::test]
    async fn test_cost_computation() {
        let ledger = Arc::new(BalanceLedger::in_memory());
        // 2000 sats per dollar
        let meter = meter_with(2000.0, ledger);

        // 1000 in + 1000 out = $0.03 + $0.06 = $0.09 = 180 sats
        let cost = meter.compute_cost(1000, 1000).await.unwrap();
        assert!((cost.usd - 0.09).abs() < 1e-9);
        assert_eq!(cost.sats, 180);
    }

    #[tokio::test]
    async fn test_tiny_completion_clamps_to_floor() {
        let ledger = Arc::new(BalanceLedger::in_memory());
        let meter = meter_with(2000.0, ledger);

        let cost = meter.compute_cost(1, 1).await.unwrap();
        assert_eq!(cost.sats, SAT_FLOOR);
    }

    #[tokio::test]
    async fn test_debit_reduces_balance() {
        let ledger = Arc::new(BalanceLedger::in_memory());
        let c = ConversationId::new("c1");
        ledger.credit(&c, 1000).await;
        let meter = meter_with(2000.0, ledger.clone());

        let outcome = meter.compute_and_debit(&c, 1000, 1000).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.remaining, 820);
        assert_eq!(ledger.get_balance(&c).await, 820);
    }

    #[tokio::test]
    async fn test_insufficient_funds_short_circuit() {
        let ledger = Arc::new(BalanceLedger::in_memory());
        let c = ConversationId::new("c1");
        ledger.credit(&c, 10).await;
        let meter = meter_with(2000.0, ledger.clone());

        // Cost is 180 sats against a balance of 10: rejected, untouched
        let outcome = meter.compute_and_debit(&c, 1000, 1000).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.remaining, 10);
        assert_eq!(ledger.get_balance(&c).await, 10);
    }
}
