//! Screening engine.
//!
//! Walks the universe in fixed-size batches, bulk-loads each batch's bar
//! and money-flow history from the local store, runs the funnel per
//! instrument, scores the survivors, and returns them ranked by score.
//! Batching bounds memory; nothing here runs in parallel.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::StrategyParams;
use super::funnel::{self, FunnelPass};
use crate::data::{BarStore, DailyBar, MarketDataProvider, MoneyFlowRecord};

/// Base score for any funnel survivor.
const BASE_SCORE: u32 = 80;
/// Bonus for a strong same-day move.
const MOMENTUM_BONUS: u32 = 10;
/// Percent-change threshold for the bonus.
const MOMENTUM_PCT: f64 = 5.0;

// ============================================================================
// Screen Result
// ============================================================================

/// One selected instrument, ready for the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenResult {
    pub ts_code: String,
    pub name: String,
    pub price: f64,
    pub pct_change: f64,
    pub score: u32,
    pub reason: String,
}

/// Funnel diagnosis for a single instrument, pass or skip.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentCheck {
    pub ts_code: String,
    pub name: String,
    pub trade_date: NaiveDate,
    pub passed: bool,
    pub close: Option<f64>,
    pub box_high: Option<f64>,
    pub volume_ratio: Option<f64>,
    /// Pass summary, or the first failed stage with its figures.
    pub detail: String,
}

// ============================================================================
// Screening Engine
// ============================================================================

/// Runs the breakout funnel over a candidate universe.
pub struct ScreeningEngine<P> {
    provider: Arc<P>,
    store: Arc<BarStore>,
    params: StrategyParams,
}

impl<P: MarketDataProvider> ScreeningEngine<P> {
    pub fn new(provider: Arc<P>, store: Arc<BarStore>, params: StrategyParams) -> Self {
        Self {
            provider,
            store,
            params,
        }
    }

    /// Scan the universe as of `trade_date`. An empty universe yields an
    /// empty result, not an error.
    pub async fn scan(
        &self,
        universe: &[String],
        trade_date: NaiveDate,
    ) -> Result<Vec<ScreenResult>> {
        if universe.is_empty() {
            return Ok(Vec::new());
        }

        info!(candidates = universe.len(), %trade_date, "Starting scan");

        // One live benchmark call per scan; every instrument compares
        // against the same trailing return.
        let benchmark_return = self.benchmark_return(trade_date).await;

        let names: HashMap<String, String> = self
            .store
            .instruments()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|i| (i.ts_code, i.name))
            .collect();

        // Calendar days are sparser than trading days, so load twice the
        // window to guarantee enough sessions.
        let bar_start = trade_date - Duration::days((self.params.box_days + 20) as i64 * 2);
        let flow_start = trade_date - Duration::days((self.params.flow_days + 5) as i64 * 2);

        let mut results = Vec::new();
        for batch in universe.chunks(self.params.batch_size) {
            let (bars, flows) = match self.load_batch(batch, bar_start, flow_start).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    // A broken batch read skips the batch, not the scan.
                    warn!(error = %e, batch = batch.len(), "Batch load failed");
                    continue;
                }
            };

            for code in batch {
                let Some(instrument_bars) = bars.get(code) else {
                    continue;
                };
                let instrument_flows = flows.get(code).map(Vec::as_slice).unwrap_or(&[]);

                match funnel::evaluate(
                    instrument_bars,
                    instrument_flows,
                    benchmark_return,
                    &self.params,
                ) {
                    Ok(pass) => {
                        let name = names.get(code).cloned().unwrap_or_else(|| code.clone());
                        info!(code = %code, name = %name, "Selected");
                        results.push(self.build_result(code, name, &pass));
                    }
                    Err(reason) => debug!(code = %code, %reason, "Skipped"),
                }
            }
        }

        // Stable sort: equal scores keep batch order.
        results.sort_by(|a, b| b.score.cmp(&a.score));

        info!(selected = results.len(), "Scan complete");
        Ok(results)
    }

    /// Run the funnel for one instrument and report every stage figure,
    /// whether it passes or not. Unlike `scan`, a skip is a result here,
    /// not a silent exclusion.
    pub async fn check(&self, ts_code: &str, trade_date: NaiveDate) -> Result<InstrumentCheck> {
        let benchmark_return = self.benchmark_return(trade_date).await;

        let bar_start = trade_date - Duration::days((self.params.box_days + 20) as i64 * 2);
        let flow_start = trade_date - Duration::days((self.params.flow_days + 5) as i64 * 2);
        let codes = [ts_code.to_string()];
        let (bars, flows) = self.load_batch(&codes, bar_start, flow_start).await?;

        let name = self
            .store
            .instruments()
            .await
            .unwrap_or_default()
            .into_iter()
            .find(|i| i.ts_code == ts_code)
            .map(|i| i.name)
            .unwrap_or_else(|| ts_code.to_string());

        let instrument_bars = bars.get(ts_code).map(Vec::as_slice).unwrap_or(&[]);
        let instrument_flows = flows.get(ts_code).map(Vec::as_slice).unwrap_or(&[]);

        let check = match funnel::evaluate(
            instrument_bars,
            instrument_flows,
            benchmark_return,
            &self.params,
        ) {
            Ok(pass) => InstrumentCheck {
                ts_code: ts_code.to_string(),
                name,
                trade_date,
                passed: true,
                close: Some(pass.close),
                box_high: Some(pass.box_high),
                volume_ratio: Some(pass.volume_ratio),
                detail: format!(
                    "{}-day high breakout, volume ratio {:.1}",
                    self.params.box_days, pass.volume_ratio
                ),
            },
            Err(reason) => InstrumentCheck {
                ts_code: ts_code.to_string(),
                name,
                trade_date,
                passed: false,
                close: None,
                box_high: None,
                volume_ratio: None,
                // The skip reason carries the failing stage's figures.
                detail: reason.to_string(),
            },
        };

        info!(code = %check.ts_code, passed = check.passed, detail = %check.detail, "Checked");
        Ok(check)
    }

    fn build_result(&self, code: &str, name: String, pass: &FunnelPass) -> ScreenResult {
        ScreenResult {
            ts_code: code.to_string(),
            name,
            price: pass.close,
            pct_change: pass.pct_change,
            score: score(pass.pct_change),
            reason: format!(
                "{}-day high breakout, volume ratio {:.1}",
                self.params.box_days, pass.volume_ratio
            ),
        }
    }

    /// Benchmark trailing return over the relative-strength window.
    /// Degrades to a neutral 0.0 when the series is short or the call
    /// fails; the scan itself must not abort.
    async fn benchmark_return(&self, trade_date: NaiveDate) -> f64 {
        let window = self.params.vol_ma_days;
        let closes = match self
            .provider
            .benchmark_series(&self.params.benchmark, trade_date, window)
            .await
        {
            Ok(closes) => closes,
            Err(e) => {
                warn!(benchmark = %self.params.benchmark, error = %e, "Benchmark fetch failed");
                return 0.0;
            }
        };

        if closes.len() < window {
            return 0.0;
        }
        let newest = closes[0];
        let oldest = closes[window - 1];
        (newest - oldest) / oldest
    }

    #[allow(clippy::type_complexity)]
    async fn load_batch(
        &self,
        batch: &[String],
        bar_start: NaiveDate,
        flow_start: NaiveDate,
    ) -> Result<(
        HashMap<String, Vec<DailyBar>>,
        HashMap<String, Vec<MoneyFlowRecord>>,
    )> {
        let mut bars: HashMap<String, Vec<DailyBar>> = HashMap::new();
        for bar in self.store.bars_since(bar_start, batch).await? {
            bars.entry(bar.ts_code.clone()).or_default().push(bar);
        }

        let mut flows: HashMap<String, Vec<MoneyFlowRecord>> = HashMap::new();
        for flow in self.store.flows_since(flow_start, batch).await? {
            flows.entry(flow.ts_code.clone()).or_default().push(flow);
        }

        Ok((bars, flows))
    }
}

/// Score a funnel survivor: 80 base, +10 on a >5% daily move.
fn score(pct_change: f64) -> u32 {
    if pct_change > MOMENTUM_PCT {
        BASE_SCORE + MOMENTUM_BONUS
    } else {
        BASE_SCORE
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::MockProvider;
    use crate::data::InstrumentInfo;
    use tempfile::TempDir;

    fn trade_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    fn series(code: &str, close_today: f64, volume_today: f64, pct_change: f64) -> Vec<DailyBar> {
        let anchor_close = close_today / 1.08;
        (0..80)
            .map(|i| DailyBar {
                ts_code: code.to_string(),
                trade_date: trade_date() - Duration::days(i),
                open: 95.0,
                high: if i == 1 { 100.0 } else { 95.0 },
                low: 90.0,
                close: match i {
                    0 => close_today,
                    20 => anchor_close,
                    _ => 95.0,
                },
                volume: if i == 0 { volume_today } else { 1000.0 },
                pct_change: if i == 0 { pct_change } else { 0.5 },
            })
            .collect()
    }

    fn flows(code: &str, days: i64) -> Vec<MoneyFlowRecord> {
        (0..days)
            .map(|i| MoneyFlowRecord {
                ts_code: code.to_string(),
                trade_date: trade_date() - Duration::days(i),
                net_amount: 5.0,
            })
            .collect()
    }

    /// Benchmark closes giving a trailing 20-day return of 5%.
    fn benchmark_closes() -> Vec<f64> {
        let mut closes = vec![105.0];
        closes.extend(std::iter::repeat(102.0).take(18));
        closes.push(100.0);
        closes
    }

    fn open_store() -> (TempDir, Arc<BarStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BarStore::open(dir.path().join("scan.db")).unwrap());
        (dir, store)
    }

    fn engine_for(store: Arc<BarStore>) -> ScreeningEngine<MockProvider> {
        let provider = MockProvider {
            benchmark_closes: benchmark_closes(),
            ..Default::default()
        };
        ScreeningEngine::new(Arc::new(provider), store, StrategyParams::default())
    }

    #[tokio::test]
    async fn test_empty_universe_returns_empty() {
        let (_dir, store) = open_store();
        let engine = engine_for(store);
        let results = engine.scan(&[], trade_date()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_breakout_with_confirmation_is_selected() {
        let (_dir, store) = open_store();
        store
            .append_bars(&series("600519.SH", 110.0, 2000.0, 2.0))
            .await
            .unwrap();
        store.append_flows(&flows("600519.SH", 3)).await.unwrap();
        store
            .replace_instruments(&[InstrumentInfo {
                ts_code: "600519.SH".to_string(),
                name: "Kweichow Moutai".to_string(),
                industry: None,
                market: None,
            }])
            .await
            .unwrap();

        let engine = engine_for(store);
        let results = engine
            .scan(&["600519.SH".to_string()], trade_date())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Kweichow Moutai");
        assert_eq!(results[0].score, 80);
        assert!(results[0].reason.contains("55-day high breakout"));
        assert!(results[0].reason.contains("2.0"));
    }

    #[tokio::test]
    async fn test_unresolved_name_falls_back_to_code() {
        let (_dir, store) = open_store();
        store
            .append_bars(&series("000001.SZ", 110.0, 2000.0, 2.0))
            .await
            .unwrap();
        store.append_flows(&flows("000001.SZ", 3)).await.unwrap();

        let engine = engine_for(store);
        let results = engine
            .scan(&["000001.SZ".to_string()], trade_date())
            .await
            .unwrap();
        assert_eq!(results[0].name, "000001.SZ");
    }

    #[tokio::test]
    async fn test_missing_flow_data_excludes_instrument() {
        let (_dir, store) = open_store();
        store
            .append_bars(&series("600519.SH", 110.0, 2000.0, 2.0))
            .await
            .unwrap();
        // No money-flow rows at all: strict-data policy excludes.

        let engine = engine_for(store);
        let results = engine
            .scan(&["600519.SH".to_string()], trade_date())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ranking_is_descending_by_score() {
        let (_dir, store) = open_store();
        // First candidate misses the momentum bonus, second earns it.
        store
            .append_bars(&series("000002.SZ", 110.0, 2000.0, 4.0))
            .await
            .unwrap();
        store.append_flows(&flows("000002.SZ", 3)).await.unwrap();
        store
            .append_bars(&series("600519.SH", 110.0, 2000.0, 6.0))
            .await
            .unwrap();
        store.append_flows(&flows("600519.SH", 3)).await.unwrap();

        let engine = engine_for(store);

        let universe = vec!["000002.SZ".to_string(), "600519.SH".to_string()];
        let results = engine.scan(&universe, trade_date()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ts_code, "600519.SH");
        assert_eq!(results[0].score, 90);
        assert_eq!(results[1].score, 80);
    }

    #[tokio::test]
    async fn test_check_reports_passing_instrument() {
        let (_dir, store) = open_store();
        store
            .append_bars(&series("600519.SH", 110.0, 2000.0, 2.0))
            .await
            .unwrap();
        store.append_flows(&flows("600519.SH", 3)).await.unwrap();

        let engine = engine_for(store);
        let check = engine.check("600519.SH", trade_date()).await.unwrap();

        assert!(check.passed);
        assert_eq!(check.close, Some(110.0));
        assert_eq!(check.box_high, Some(100.0));
        assert!(check.detail.contains("55-day high breakout"));
    }

    #[tokio::test]
    async fn test_check_names_the_failing_stage() {
        let (_dir, store) = open_store();
        store
            .append_bars(&series("600519.SH", 110.0, 2000.0, 2.0))
            .await
            .unwrap();
        // No money-flow rows: stage four fails.

        let engine = engine_for(store);
        let check = engine.check("600519.SH", trade_date()).await.unwrap();

        assert!(!check.passed);
        assert!(check.detail.contains("money-flow data missing"));
    }

    #[tokio::test]
    async fn test_check_unknown_code_reports_no_history() {
        let (_dir, store) = open_store();
        let engine = engine_for(store);
        let check = engine.check("999999.SZ", trade_date()).await.unwrap();

        assert!(!check.passed);
        assert_eq!(check.name, "999999.SZ");
        assert!(check.detail.contains("insufficient history"));
    }

    #[test]
    fn test_score_momentum_bonus_boundary() {
        assert_eq!(score(6.0), 90);
        assert_eq!(score(5.0), 80);
        assert_eq!(score(4.0), 80);
    }
}
