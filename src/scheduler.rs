//! Daily pipeline and its cron trigger.
//!
//! `Pipeline` wires sync, universe selection, screening, and the
//! Telegram report into operations the routes and the scheduler share.
//! A run guard serializes them: a manually triggered sync never overlaps
//! the scheduled daily run.
//!
//! `DailyScheduler` fires the pipeline every evening after the session
//! close; the trading calendar decides whether the day actually runs,
//! so weekends and exchange holidays are skipped in one place.

use anyhow::{Context, Result};
use chrono::Local;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::data::{
    BarStore, MarketDataProvider, SyncOutcome, SyncScheduler, SyncTuning, TradingCalendarResolver,
};
use crate::notification::TelegramNotifier;
use crate::screener::{
    InstrumentCheck, ScreenResult, ScreeningEngine, StrategyParams, UniverseSelector,
};

/// Result of one full daily run.
#[derive(Debug)]
pub struct DailyRunReport {
    pub sync: SyncOutcome,
    pub results: Vec<ScreenResult>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Shared orchestrator behind both the HTTP routes and the scheduler.
pub struct Pipeline<P> {
    calendar: TradingCalendarResolver<P>,
    sync: SyncScheduler<P>,
    universe: UniverseSelector<P>,
    engine: ScreeningEngine<P>,
    store: Arc<BarStore>,
    notifier: Arc<TelegramNotifier>,
    // Held across any pipeline operation; concurrent triggers queue up
    // instead of syncing the same days twice.
    run_guard: Mutex<()>,
}

impl<P: MarketDataProvider> Pipeline<P> {
    pub fn new(
        provider: Arc<P>,
        store: Arc<BarStore>,
        params: StrategyParams,
        tuning: SyncTuning,
        lookback_days: i64,
        notifier: Arc<TelegramNotifier>,
    ) -> Self {
        Self {
            calendar: TradingCalendarResolver::new(Arc::clone(&provider)),
            sync: SyncScheduler::new(
                Arc::clone(&provider),
                Arc::clone(&store),
                lookback_days,
                tuning,
            ),
            universe: UniverseSelector::new(
                Arc::clone(&provider),
                Arc::clone(&store),
                params.clone(),
            ),
            engine: ScreeningEngine::new(provider, Arc::clone(&store), params),
            store,
            notifier,
            run_guard: Mutex::new(()),
        }
    }

    /// Sync the store up to the latest closed trading day.
    pub async fn run_sync(&self) -> Result<SyncOutcome> {
        let _guard = self.run_guard.lock().await;
        self.sync_inner().await
    }

    /// Scan against whatever the store currently holds.
    pub async fn run_scan(&self) -> Result<Vec<ScreenResult>> {
        let _guard = self.run_guard.lock().await;
        self.scan_inner().await
    }

    /// The full evening run: sync, scan, report.
    pub async fn run_daily(&self) -> Result<DailyRunReport> {
        let _guard = self.run_guard.lock().await;

        let sync = self.sync_inner().await?;
        if sync.failed_days > 0 {
            // Report the gap but keep going; the scan works on the days
            // that did land.
            if let Err(e) = self.notifier.send_sync_report(&sync).await {
                warn!(error = %e, "Failed to send sync report");
            }
        }

        let results = self.scan_inner().await?;

        let date_str = sync
            .watermark
            .map(|d| d.to_string())
            .unwrap_or_else(|| Local::now().date_naive().to_string());
        if let Err(e) = self.notifier.send_scan_report(&results, &date_str).await {
            warn!(error = %e, "Failed to send scan report");
        }

        Ok(DailyRunReport { sync, results })
    }

    async fn sync_inner(&self) -> Result<SyncOutcome> {
        self.sync.sync().await
    }

    async fn scan_inner(&self) -> Result<Vec<ScreenResult>> {
        let trade_date = self
            .calendar
            .latest_closed_trading_day(Local::now())
            .await
            .context("Failed to resolve scan date")?;

        let universe = self.universe.select(trade_date).await?;
        self.engine.scan(&universe, trade_date).await
    }

    /// Drop all stored market data. Takes the run guard, so a reset
    /// never races a sync or scan; the next sync rebuilds the full
    /// lookback window from an empty watermark.
    pub async fn run_reset(&self) -> Result<()> {
        let _guard = self.run_guard.lock().await;
        self.store.clear().await
    }

    /// Diagnose a single instrument against the current funnel stages.
    pub async fn run_check(&self, ts_code: &str) -> Result<InstrumentCheck> {
        let _guard = self.run_guard.lock().await;
        let trade_date = self
            .calendar
            .latest_closed_trading_day(Local::now())
            .await
            .context("Failed to resolve check date")?;
        self.engine.check(ts_code, trade_date).await
    }

    /// Whether `date` is an exchange trading day.
    pub async fn is_trading_day(&self, date: chrono::NaiveDate) -> Result<bool> {
        Ok(self.calendar.is_open(date).await?)
    }
}

// ============================================================================
// Daily Scheduler
// ============================================================================

/// Cron-driven trigger for the evening pipeline run.
pub struct DailyScheduler<P> {
    pipeline: Arc<Pipeline<P>>,
    schedule: Schedule,
}

impl<P: MarketDataProvider> DailyScheduler<P> {
    pub fn new(pipeline: Arc<Pipeline<P>>, cron_expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .with_context(|| format!("Invalid daily cron: {}", cron_expr))?;
        Ok(Self { pipeline, schedule })
    }

    /// Sleep until each upcoming tick and run the pipeline. Never
    /// returns under normal operation.
    pub async fn run(&self) {
        info!(
            next = ?self.schedule.upcoming(Local).next(),
            "Daily scheduler started"
        );

        loop {
            let Some(next) = self.schedule.upcoming(Local).next() else {
                warn!("Cron schedule has no upcoming fire time, scheduler exiting");
                return;
            };

            let wait = (next - Local::now())
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(wait).await;

            self.fire().await;
        }
    }

    async fn fire(&self) {
        let today = Local::now().date_naive();

        // The cron fires every day; the calendar filters out weekends
        // and holidays here.
        match self.pipeline.is_trading_day(today).await {
            Ok(false) => {
                info!(%today, "Not a trading day, skipping daily run");
                return;
            }
            Ok(true) => {}
            Err(e) => {
                // Calendar unavailable: run anyway, the sync will
                // no-op if there is nothing new.
                warn!(error = %e, "Trading day check failed, running regardless");
            }
        }

        info!(%today, "Starting scheduled daily run");
        match self.pipeline.run_daily().await {
            Ok(report) => info!(
                synced = report.sync.success_days,
                selected = report.results.len(),
                "Daily run complete"
            ),
            Err(e) => error!(error = %e, "Daily run failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
