//! Exchange-rate oracle with a bounded staleness window.
//!
//! [`PriceOracle`] caches the sats-per-fiat rate and refreshes it from a
//! [`RateSource`] once the cached value is older than the staleness window.
//! Concurrent callers of a stale entry await the single in-flight refresh
//! rather than each issuing their own fetch.
//!
//! A live fetch failure never silently substitutes a stale rate: if a prior
//! rate exists it is returned as an explicit, logged degraded-mode fallback;
//! if none exists the call fails with
//! [`RateUnavailable`](crate::errors::SatgateError::RateUnavailable).

use crate::errors::{Result, SatgateError};
use crate::types::ExchangeRate;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sats in one whole bitcoin.
const SATS_PER_BTC: f64 = 100_000_000.0;

/// Smallest invoice the system will issue, in sats.
pub const SAT_FLOOR: u64 = 50;

/// Smallest representable fiat amount.
pub const USD_FLOOR: f64 = 0.01;

/// Maximum age at which a cached rate may be reused without a live refresh.
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Default currency pair for the metering conversions.
pub const DEFAULT_PAIR: &str = "BTC-USD";

/// An external source of exchange rates.
///
/// Implementations return the rate as sats per one fiat unit and perform no
/// caching or retrying of their own.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetches the current rate for `pair` (e.g. "BTC-USD").
    async fn fetch(&self, pair: &str) -> Result<f64>;
}

#[derive(Deserialize)]
struct SpotPriceResponse {
    data: SpotPriceData,
}

#[derive(Deserialize)]
struct SpotPriceData {
    amount: String,
}

/// Rate source backed by the Coinbase spot-price endpoint.
pub struct CoinbaseRateSource {
    http: Client,
    base_url: url::Url,
}

impl CoinbaseRateSource {
    /// Creates a source against the public Coinbase API.
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://api.coinbase.com")
    }

    /// Creates a source against a custom base URL (for tests or proxies).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            base_url: url::Url::parse(base_url)?,
        })
    }
}

#[async_trait]
impl RateSource for CoinbaseRateSource {
    async fn fetch(&self, pair: &str) -> Result<f64> {
        let url = self
            .base_url
            .join(&format!("/v2/prices/{}/spot", pair))?;
        let response = self.http.get(url).send().await?;
        let body: SpotPriceResponse = response.error_for_status()?.json().await?;

        let fiat_per_btc: f64 = body
            .data
            .amount
            .parse()
            .map_err(|_| SatgateError::RateUnavailable(format!(
                "unparseable spot price '{}'",
                body.data.amount
            )))?;
        if fiat_per_btc <= 0.0 {
            return Err(SatgateError::RateUnavailable(format!(
                "non-positive spot price {}",
                fiat_per_btc
            )));
        }
        Ok(SATS_PER_BTC / fiat_per_btc)
    }
}

struct CachedRate {
    rate: ExchangeRate,
    fetched_at: Instant,
}

/// Caching oracle over a [`RateSource`].
pub struct PriceOracle {
    source: Arc<dyn RateSource>,
    staleness_window: Duration,
    // One mutex for the whole cache: holding it across the refresh await is
    // what collapses concurrent stale reads into a single fetch.
    cache: Mutex<HashMap<String, CachedRate>>,
}

impl PriceOracle {
    /// Creates an oracle with the default 15-minute staleness window.
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self::with_staleness_window(source, DEFAULT_STALENESS_WINDOW)
    }

    /// Creates an oracle with a custom staleness window.
    pub fn with_staleness_window(source: Arc<dyn RateSource>, window: Duration) -> Self {
        Self {
            source,
            staleness_window: window,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a rate for `pair`, refreshing the cache if it is stale.
    pub async fn get_rate(&self, pair: &str) -> Result<ExchangeRate> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(pair) {
            if cached.fetched_at.elapsed() < self.staleness_window {
                debug!(pair, rate = cached.rate.sats_per_fiat, "rate cache hit");
                return Ok(cached.rate.clone());
            }
        }

        match self.source.fetch(pair).await {
            Ok(sats_per_fiat) => {
                let rate = ExchangeRate {
                    sats_per_fiat,
                    pair: pair.to_string(),
                    observed_at: Utc::now(),
                };
                debug!(pair, rate = sats_per_fiat, "rate refreshed");
                cache.insert(
                    pair.to_string(),
                    CachedRate {
                        rate: rate.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(rate)
            }
            Err(e) => {
                // Degraded mode: reuse the stale rate, loudly, only if one exists.
                if let Some(cached) = cache.get(pair) {
                    warn!(
                        pair,
                        error = %e,
                        age_secs = cached.fetched_at.elapsed().as_secs(),
                        "live rate fetch failed, serving stale rate"
                    );
                    return Ok(cached.rate.clone());
                }
                Err(e)
            }
        }
    }

    /// Converts a fiat amount to sats using the current default-pair rate.
    pub async fn to_sats(&self, fiat_amount: f64) -> Result<u64> {
        let rate = self.get_rate(DEFAULT_PAIR).await?;
        Ok(usd_to_sats(&rate, fiat_amount))
    }

    /// Converts a sat amount to fiat using the current default-pair rate.
    pub async fn to_usd(&self, sats: u64) -> Result<f64> {
        let rate = self.get_rate(DEFAULT_PAIR).await?;
        Ok(sats_to_usd(&rate, sats))
    }
}

/// Converts fiat to sats, clamped to [`SAT_FLOOR`].
///
/// Amounts that would round to zero (or below) become the floor so the
/// system never issues a zero-value invoice.
pub fn usd_to_sats(rate: &ExchangeRate, fiat_amount: f64) -> u64 {
    let sats = (fiat_amount * rate.sats_per_fiat).round();
    if sats < SAT_FLOOR as f64 {
        SAT_FLOOR
    } else {
        sats as u64
    }
}

/// Converts sats to fiat, clamped to [`USD_FLOOR`].
pub fn sats_to_usd(rate: &ExchangeRate, sats: u64) -> f64 {
    let usd = sats as f64 / rate.sats_per_fiat;
    if usd < USD_FLOOR {
        USD_FLOOR
    } else {
        usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        sats_per_fiat: f64,
        fetches: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl StaticSource {
        fn new(sats_per_fiat: f64) -> Self {
            Self {
                sats_per_fiat,
                fetches: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for StaticSource {
        async fn fetch(&self, pair: &str) -> Result<f64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SatgateError::RateUnavailable(format!(
                    "{} source down",
                    pair
                )));
            }
            Ok(self.sats_per_fiat)
        }
    }

    fn rate(sats_per_fiat: f64) -> ExchangeRate {
        ExchangeRate {
            sats_per_fiat,
            pair: DEFAULT_PAIR.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fresh_rate_is_cached() {
        let source = Arc::new(StaticSource::new(2000.0));
        let oracle = PriceOracle::new(source.clone());

        let first = oracle.get_rate(DEFAULT_PAIR).await.unwrap();
        let second = oracle.get_rate(DEFAULT_PAIR).await.unwrap();

        assert_eq!(first.sats_per_fiat, 2000.0);
        assert_eq!(second.sats_per_fiat, 2000.0);
        // Identical cached value, exactly one fetch
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_rate_triggers_one_refresh() {
        let source = Arc::new(StaticSource::new(2000.0));
        let oracle = PriceOracle::with_staleness_window(source.clone(), Duration::ZERO);

        oracle.get_rate(DEFAULT_PAIR).await.unwrap();
        oracle.get_rate(DEFAULT_PAIR).await.unwrap();

        // Zero window: every call is past the window, so each fetches once
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_source_fails() {
        let source = Arc::new(StaticSource::new(2000.0));
        let oracle = PriceOracle::with_staleness_window(source.clone(), Duration::ZERO);

        oracle.get_rate(DEFAULT_PAIR).await.unwrap();
        source.fail.store(true, Ordering::SeqCst);

        // Fetch fails but a prior rate exists: degraded mode returns it
        let degraded = oracle.get_rate(DEFAULT_PAIR).await.unwrap();
        assert_eq!(degraded.sats_per_fiat, 2000.0);
    }

    #[tokio::test]
    async fn test_no_rate_no_fallback() {
        let source = Arc::new(StaticSource::new(2000.0));
        source.fail.store(true, Ordering::SeqCst);
        let oracle = PriceOracle::new(source);

        let err = oracle.get_rate(DEFAULT_PAIR).await.unwrap_err();
        assert!(matches!(err, SatgateError::RateUnavailable(_)));
    }

    #[test]
    fn test_usd_to_sats_floor_clamp() {
        let r = rate(2000.0); // 2000 sats per dollar
        assert_eq!(usd_to_sats(&r, 1.0), 2000);
        assert_eq!(usd_to_sats(&r, 25.0), 50_000);
        // A dust amount clamps to exactly the floor
        assert_eq!(usd_to_sats(&r, 0.000001), SAT_FLOOR);
        assert_eq!(usd_to_sats(&r, 0.0), SAT_FLOOR);
    }

    #[test]
    fn test_sats_to_usd_floor_clamp() {
        let r = rate(2000.0);
        assert_eq!(sats_to_usd(&r, 50_000), 25.0);
        // Below the smallest representable fiat unit clamps to the floor
        assert_eq!(sats_to_usd(&r, 1), USD_FLOOR);
    }

    #[test]
    fn test_currency_round_trip() {
        let r = rate(2273.2);
        for x in [1.0_f64, 10.0, 0.5, 25.0] {
            let sats = usd_to_sats(&r, x);
            let back = sats_to_usd(&r, sats);
            // Within one minor unit of rounding error
            assert!((back - x).abs() <= 0.01, "x={} back={}", x, back);
        }
    }
}
