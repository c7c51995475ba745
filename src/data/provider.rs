//! Data provider abstraction for market data sources.
//!
//! Defines the `MarketDataProvider` trait consumed by the calendar resolver,
//! the synchronizer, and the screening engine. Keeping the seam here lets
//! component tests swap in an in-memory provider.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::{DailyBar, InstrumentInfo, MoneyFlowRecord, SectorSnapshot, TradingDay};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised by market data providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network-level failure (connect, timeout)
    #[error("network error: {0}")]
    Network(String),
    /// The provider rejected the request (bad token, quota exceeded)
    #[error("provider rejected request: {0}")]
    Api(String),
    /// Response arrived but could not be decoded
    #[error("malformed provider response: {0}")]
    Parse(String),
    /// Provider is temporarily down
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable(_))
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// A source of daily market snapshots for one exchange.
///
/// All calls are one-shot request/response; rate limiting and retry policy
/// live in the callers (the synchronizer retries per day, the screener does
/// not retry at all).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Exchange calendar entries in `[start, end]`, both open and closed
    /// days, ordered by the provider's convention (callers sort).
    async fn trading_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TradingDay>, ProviderError>;

    /// Full-market daily bars for one trade date.
    async fn daily_bars(&self, trade_date: NaiveDate) -> Result<Vec<DailyBar>, ProviderError>;

    /// Full-market money-flow records for one trade date.
    async fn money_flow(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<MoneyFlowRecord>, ProviderError>;

    /// Sector performance snapshots for one trade date, sorted descending
    /// by percent change.
    async fn sector_ranking(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<SectorSnapshot>, ProviderError>;

    /// Constituent instrument codes of one sector index.
    async fn sector_members(&self, sector_id: &str) -> Result<Vec<String>, ProviderError>;

    /// All currently listed instruments with display metadata.
    async fn listed_universe(&self) -> Result<Vec<InstrumentInfo>, ProviderError>;

    /// Benchmark index close prices ending at `end_date`, most recent
    /// first. Returns at least `window_days` entries when the provider has
    /// that much history.
    async fn benchmark_series(
        &self,
        symbol: &str,
        end_date: NaiveDate,
        window_days: usize,
    ) -> Result<Vec<f64>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================
