//! Incremental market data synchronization.
//!
//! Reconciles the store's watermark (max ingested trade date) against the
//! latest fully-closed trading session and pulls the missing per-day
//! snapshots. Faults are contained at the single-day level: a day that
//! exhausts its retries is counted as failed and the run moves on.

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::calendar::TradingCalendarResolver;
use super::provider::MarketDataProvider;
use super::store::BarStore;
use super::{DailyBar, MoneyFlowRecord};

// ============================================================================
// Sync Tuning
// ============================================================================

/// Retry and pacing knobs for the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncTuning {
    /// Attempts per day before counting it as failed
    pub fetch_attempts: u32,
    /// Fixed pause between attempts for one day
    pub retry_backoff: StdDuration,
    /// Pause after each successfully ingested day (provider rate limit)
    pub day_pause: StdDuration,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            retry_backoff: StdDuration::from_secs(5),
            day_pause: StdDuration::from_secs(1),
        }
    }
}

// ============================================================================
// Sync Outcome
// ============================================================================

/// Aggregate result of one sync run. Per-day provider failures surface
/// here as counts plus the last error message, never as an Err.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success_days: usize,
    pub failed_days: usize,
    pub message: String,
    pub last_error: Option<String>,
    /// Store watermark after the run
    pub watermark: Option<NaiveDate>,
}

impl SyncOutcome {
    fn up_to_date(watermark: NaiveDate) -> Self {
        Self {
            success_days: 0,
            failed_days: 0,
            message: format!("already up to date ({})", watermark),
            last_error: None,
            watermark: Some(watermark),
        }
    }
}

// ============================================================================
// Sync Scheduler
// ============================================================================

/// Pulls per-day market snapshots to keep the bar store current.
pub struct SyncScheduler<P> {
    provider: Arc<P>,
    store: Arc<BarStore>,
    calendar: TradingCalendarResolver<P>,
    lookback_days: i64,
    tuning: SyncTuning,
}

impl<P: MarketDataProvider> SyncScheduler<P> {
    pub fn new(
        provider: Arc<P>,
        store: Arc<BarStore>,
        lookback_days: i64,
        tuning: SyncTuning,
    ) -> Self {
        let calendar = TradingCalendarResolver::new(Arc::clone(&provider));
        Self {
            provider,
            store,
            calendar,
            lookback_days,
            tuning,
        }
    }

    /// Run a sync against the current wall clock.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        self.sync_at(Local::now()).await
    }

    /// Run a sync as of an explicit timestamp.
    pub async fn sync_at(&self, now: DateTime<Local>) -> Result<SyncOutcome> {
        let end = self.calendar.latest_closed_trading_day(now).await?;
        let watermark = self.store.latest_bar_date().await?;

        let start = match watermark {
            None => {
                let start = end - Duration::days(self.lookback_days);
                info!(%start, %end, "Cold-start sync");
                start
            }
            Some(w) if w < end => {
                let start = w + Duration::days(1);
                info!(%start, %end, watermark = %w, "Incremental sync");
                start
            }
            Some(w) => {
                // Idempotent no-op: no snapshot fetches when current.
                debug!(watermark = %w, "Store already at target watermark");
                return Ok(SyncOutcome::up_to_date(w));
            }
        };

        let mut open_days: Vec<NaiveDate> = self
            .provider
            .trading_calendar(start, end)
            .await?
            .into_iter()
            .filter(|d| d.is_open)
            .map(|d| d.date)
            .collect();
        open_days.sort_unstable();

        if open_days.is_empty() {
            return Ok(SyncOutcome {
                success_days: 0,
                failed_days: 0,
                message: format!("no new trading days ({} - {})", start, end),
                last_error: None,
                watermark,
            });
        }

        let mut success_days = 0;
        let mut failed_days = 0;
        let mut last_error = None;

        for day in open_days {
            match self.ingest_day(day).await {
                Ok(()) => {
                    success_days += 1;
                    sleep(self.tuning.day_pause).await;
                }
                Err(e) => {
                    // A single bad day never aborts the range.
                    failed_days += 1;
                    last_error = Some(e);
                }
            }
        }

        self.refresh_instruments().await;

        let watermark = self.store.latest_bar_date().await?;
        let outcome = SyncOutcome {
            success_days,
            failed_days,
            message: format!("synced {} days, {} failed", success_days, failed_days),
            last_error,
            watermark,
        };

        info!(
            success = outcome.success_days,
            failed = outcome.failed_days,
            watermark = ?outcome.watermark,
            "Sync run complete"
        );
        Ok(outcome)
    }

    /// Fetch and persist one day's snapshots with bounded retry.
    ///
    /// Returns the last provider error message once all attempts are
    /// exhausted. A store-write failure after a successful fetch is logged
    /// and the rows are dropped; it does not fail the day.
    async fn ingest_day(&self, day: NaiveDate) -> Result<(), String> {
        let mut attempt = 1;
        loop {
            match self.fetch_day(day).await {
                Ok((bars, flows)) => {
                    debug!(%day, bars = bars.len(), flows = flows.len(), "Fetched snapshots");
                    if let Err(e) = self.store.append_bars(&bars).await {
                        warn!(%day, error = %e, "Bar store write failed, rows dropped");
                    }
                    if let Err(e) = self.store.append_flows(&flows).await {
                        warn!(%day, error = %e, "Flow store write failed, rows dropped");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        %day,
                        attempt,
                        max_attempts = self.tuning.fetch_attempts,
                        error = %e,
                        "Snapshot fetch failed"
                    );
                    // Permanent faults (rejected token, garbage payload)
                    // will not improve with backoff.
                    if !e.is_transient() || attempt >= self.tuning.fetch_attempts {
                        return Err(e.to_string());
                    }
                    attempt += 1;
                    sleep(self.tuning.retry_backoff).await;
                }
            }
        }
    }

    async fn fetch_day(
        &self,
        day: NaiveDate,
    ) -> Result<(Vec<DailyBar>, Vec<MoneyFlowRecord>), super::ProviderError> {
        let bars = self.provider.daily_bars(day).await?;
        let flows = self.provider.money_flow(day).await?;
        Ok((bars, flows))
    }

    /// Best-effort refresh of the listed-instrument reference table.
    /// Failures here are non-critical metadata staleness.
    async fn refresh_instruments(&self) {
        match self.provider.listed_universe().await {
            Ok(instruments) => {
                if let Err(e) = self.store.replace_instruments(&instruments).await {
                    warn!(error = %e, "Instrument table refresh write failed");
                }
            }
            Err(e) => warn!(error = %e, "Instrument list fetch failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::{open_days, MockProvider};
    use chrono::TimeZone;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    // A timestamp safely past the session cutoff on the calendar's last day.
    fn evening_of(date: NaiveDate) -> DateTime<Local> {
        use chrono::Datelike;
        Local
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 18, 0, 0)
            .unwrap()
    }

    fn fast_tuning() -> SyncTuning {
        SyncTuning {
            fetch_attempts: 3,
            retry_backoff: StdDuration::ZERO,
            day_pause: StdDuration::ZERO,
        }
    }

    fn bar_for(day: NaiveDate) -> DailyBar {
        DailyBar {
            ts_code: "600519.SH".to_string(),
            trade_date: day,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1000.0,
            pct_change: 0.5,
        }
    }

    fn provider_for_range(end: NaiveDate, days: usize) -> MockProvider {
        let mut provider = MockProvider {
            calendar: open_days(end, days),
            ..Default::default()
        };
        for day in provider.calendar.iter().map(|d| d.date).collect::<Vec<_>>() {
            provider.bars.insert(day, vec![bar_for(day)]);
            provider.flows.insert(
                day,
                vec![MoneyFlowRecord {
                    ts_code: "600519.SH".to_string(),
                    trade_date: day,
                    net_amount: 1.0,
                }],
            );
        }
        provider
    }

    fn scheduler(
        provider: MockProvider,
        store: Arc<BarStore>,
    ) -> (Arc<MockProvider>, SyncScheduler<MockProvider>) {
        let provider = Arc::new(provider);
        let sync = SyncScheduler::new(Arc::clone(&provider), store, 60, fast_tuning());
        (provider, sync)
    }

    fn temp_store() -> (TempDir, Arc<BarStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BarStore::open(dir.path().join("sync.db")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn test_cold_start_ingests_full_range() {
        let (_dir, store) = temp_store();
        let end = d(10);
        let (_provider, sync) = scheduler(provider_for_range(end, 5), Arc::clone(&store));

        let outcome = sync.sync_at(evening_of(end)).await.unwrap();
        assert_eq!(outcome.success_days, 5);
        assert_eq!(outcome.failed_days, 0);
        assert_eq!(outcome.watermark, Some(end));
    }

    #[tokio::test]
    async fn test_second_sync_is_idempotent_with_no_snapshot_fetches() {
        let (_dir, store) = temp_store();
        let end = d(10);
        let (provider, sync) = scheduler(provider_for_range(end, 5), Arc::clone(&store));

        sync.sync_at(evening_of(end)).await.unwrap();
        let fetches_after_first = provider.snapshot_fetch_count();

        let outcome = sync.sync_at(evening_of(end)).await.unwrap();
        assert_eq!(outcome.success_days, 0);
        assert_eq!(outcome.failed_days, 0);
        assert!(outcome.message.contains("already up to date"));
        assert_eq!(provider.snapshot_fetch_count(), fetches_after_first);
    }

    #[tokio::test]
    async fn test_incremental_sync_starts_after_watermark() {
        let (_dir, store) = temp_store();
        let end = d(10);
        // Store already holds the first three days of the range.
        store.append_bars(&[bar_for(d(8))]).await.unwrap();

        let (provider, sync) = scheduler(provider_for_range(end, 5), Arc::clone(&store));
        let outcome = sync.sync_at(evening_of(end)).await.unwrap();

        assert_eq!(outcome.success_days, 2); // Jan 9 and Jan 10
        assert_eq!(outcome.watermark, Some(end));
        // Two days, one bar fetch + one flow fetch each.
        assert_eq!(provider.snapshot_fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_one_bad_day_does_not_abort_the_range() {
        let (_dir, store) = temp_store();
        let end = d(10);
        let mut provider = provider_for_range(end, 5);
        provider.failing_days = HashSet::from([d(8)]); // day 3 of 5

        let (_provider, sync) = scheduler(provider, Arc::clone(&store));
        let outcome = sync.sync_at(evening_of(end)).await.unwrap();

        assert_eq!(outcome.success_days, 4);
        assert_eq!(outcome.failed_days, 1);
        assert!(outcome.last_error.is_some());

        // Days 1, 2, 4, 5 are present; the failed day is absent.
        let bars = store
            .bars_since(d(6), &["600519.SH".to_string()])
            .await
            .unwrap();
        let dates: Vec<NaiveDate> = bars.iter().map(|b| b.trade_date).collect();
        assert!(dates.contains(&d(6)));
        assert!(dates.contains(&d(7)));
        assert!(!dates.contains(&d(8)));
        assert!(dates.contains(&d(9)));
        assert!(dates.contains(&d(10)));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let (_dir, store) = temp_store();
        let end = d(10);
        let mut provider = provider_for_range(end, 3);
        provider.rejected_days = HashSet::from([d(9)]);

        let (provider, sync) = scheduler(provider, Arc::clone(&store));
        let outcome = sync.sync_at(evening_of(end)).await.unwrap();

        assert_eq!(outcome.success_days, 2);
        assert_eq!(outcome.failed_days, 1);
        // Good days: one bar + one flow fetch each. The rejected day
        // fails its single bar fetch with no retries.
        assert_eq!(provider.snapshot_fetch_count(), 5);
    }

    #[tokio::test]
    async fn test_instrument_table_refreshed_after_sync() {
        let (_dir, store) = temp_store();
        let end = d(10);
        let mut provider = provider_for_range(end, 2);
        provider.instruments = vec![crate::data::InstrumentInfo {
            ts_code: "600519.SH".to_string(),
            name: "Kweichow Moutai".to_string(),
            industry: Some("Beverages".to_string()),
            market: None,
        }];

        let (_provider, sync) = scheduler(provider, Arc::clone(&store));
        sync.sync_at(evening_of(end)).await.unwrap();

        let instruments = store.instruments().await.unwrap();
        assert_eq!(instruments.len(), 1);
        assert_eq!(instruments[0].name, "Kweichow Moutai");
    }
}
