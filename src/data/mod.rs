//! Market data module for the A-share screener.
//!
//! Covers the full data path: the provider abstraction and its Tushare
//! implementation, the local SQLite time-series store, the trading calendar
//! resolver, and the incremental synchronizer that keeps the store current.

mod calendar;
mod provider;
mod store;
pub mod sync;
mod tushare;

pub use calendar::{CalendarError, TradingCalendarResolver, SESSION_CLOSE_HOUR};
pub use provider::{MarketDataProvider, ProviderError};
pub use store::{BarStore, StoreStats};
pub use sync::{SyncOutcome, SyncScheduler, SyncTuning};
pub use tushare::TushareClient;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Data Types
// ============================================================================

/// One entry of the exchange trading calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub is_open: bool,
}

/// A single daily OHLCV bar for one instrument.
///
/// Keyed by `(ts_code, trade_date)`; append-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Instrument code (e.g., "600519.SH")
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Traded volume (lots)
    pub volume: f64,
    /// Percent change versus the previous close
    pub pct_change: f64,
}

/// Net money flow attributed to one instrument on one day.
///
/// May be entirely absent for an instrument/date; the funnel treats
/// missing flow data as a hard exclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyFlowRecord {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    /// Net inflow amount; positive means net buying
    pub net_amount: f64,
}

/// Reference metadata for a listed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub ts_code: String,
    pub name: String,
    pub industry: Option<String>,
    pub market: Option<String>,
}

/// One sector's daily performance, used for sector-rotation universe
/// selection. Fetched live, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorSnapshot {
    pub sector_id: String,
    pub trade_date: NaiveDate,
    pub pct_change: f64,
}

// ============================================================================
// Mock Provider (test support)
// ============================================================================
