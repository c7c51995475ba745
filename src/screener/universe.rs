//! Candidate universe selection.
//!
//! Primary path is sector rotation: union the constituents of the
//! top-performing sectors. When that degrades below a minimum breadth
//! (including total sector-feed failure), the full listed universe is used
//! so the screen always has something meaningful to search.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::config::StrategyParams;
use crate::data::{BarStore, MarketDataProvider};

/// Builds the candidate instrument set for one scan.
pub struct UniverseSelector<P> {
    provider: Arc<P>,
    store: Arc<BarStore>,
    params: StrategyParams,
}

impl<P: MarketDataProvider> UniverseSelector<P> {
    pub fn new(provider: Arc<P>, store: Arc<BarStore>, params: StrategyParams) -> Self {
        Self {
            provider,
            store,
            params,
        }
    }

    /// Candidate instrument codes for the given trade date, deduplicated
    /// and sorted.
    pub async fn select(&self, trade_date: NaiveDate) -> Result<Vec<String>> {
        let candidates = self.sector_candidates(trade_date).await;

        if candidates.len() >= self.params.min_universe {
            info!(
                count = candidates.len(),
                "Universe from sector rotation"
            );
            return Ok(candidates);
        }

        // Degraded or thin sector data: full-market fallback.
        warn!(
            sector_candidates = candidates.len(),
            floor = self.params.min_universe,
            "Sector universe too thin, falling back to full market"
        );
        let instruments = self.store.instruments().await?;
        Ok(instruments.into_iter().map(|i| i.ts_code).collect())
    }

    /// Union of constituents of the top `sector_top_pct` sectors by daily
    /// percent change. Feed failures yield an empty set rather than an
    /// error; the caller falls back.
    async fn sector_candidates(&self, trade_date: NaiveDate) -> Vec<String> {
        let mut sectors = match self.provider.sector_ranking(trade_date).await {
            Ok(sectors) => sectors,
            Err(e) => {
                warn!(error = %e, "Sector ranking unavailable");
                return Vec::new();
            }
        };

        sectors.sort_by(|a, b| {
            b.pct_change
                .partial_cmp(&a.pct_change)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let take = (sectors.len() as f64 * self.params.sector_top_pct) as usize;
        let mut codes = BTreeSet::new();
        for sector in sectors.iter().take(take) {
            match self.provider.sector_members(&sector.sector_id).await {
                Ok(members) => codes.extend(members),
                Err(e) => {
                    warn!(sector = %sector.sector_id, error = %e, "Sector member fetch failed")
                }
            }
        }

        codes.into_iter().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
