//! Local time-series store backed by SQLite.
//!
//! Owns durability for daily bars and money-flow records (append-only,
//! keyed by `(ts_code, trade_date)`) plus the replaceable listed-instrument
//! reference table. Everything else in the service is rebuilt per run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{DailyBar, InstrumentInfo, MoneyFlowRecord};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Daily bar table, append-only
CREATE TABLE IF NOT EXISTS daily_bars (
    ts_code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    pct_change REAL NOT NULL,
    PRIMARY KEY (ts_code, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_daily_bars_date
ON daily_bars(trade_date);

-- Money flow table, append-only
CREATE TABLE IF NOT EXISTS money_flow (
    ts_code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    net_amount REAL NOT NULL,
    PRIMARY KEY (ts_code, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_money_flow_date
ON money_flow(trade_date);

-- Listed instrument reference table, replaced wholesale on refresh
CREATE TABLE IF NOT EXISTS instruments (
    ts_code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    industry TEXT,
    market TEXT
);
"#;

// ============================================================================
// Store Stats
// ============================================================================

/// Row counts and date range, for the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub bar_rows: u64,
    pub flow_rows: u64,
    pub instrument_rows: u64,
    pub earliest_bar_date: Option<NaiveDate>,
    pub latest_bar_date: Option<NaiveDate>,
}

// ============================================================================
// Bar Store
// ============================================================================

/// SQLite-backed store for bars, money flow, and instrument metadata.
pub struct BarStore {
    // rusqlite::Connection is Send but not Sync; a tokio Mutex makes the
    // store shareable across the timer task and request handlers.
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl BarStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&path).context("Failed to open bar store database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %path.display(), "Opened bar store");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Append Operations
    // ========================================================================

    /// Append daily bars. Duplicate `(ts_code, trade_date)` keys are
    /// silently ignored; the store enforces row-key uniqueness.
    pub async fn append_bars(&self, bars: &[DailyBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO daily_bars
                 (ts_code, trade_date, open, high, low, close, volume, pct_change)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for bar in bars {
                count += stmt.execute(params![
                    bar.ts_code,
                    bar.trade_date.to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.pct_change,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Appended daily bars");
        Ok(count)
    }

    /// Append money-flow records, same key discipline as bars.
    pub async fn append_flows(&self, flows: &[MoneyFlowRecord]) -> Result<usize> {
        if flows.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO money_flow (ts_code, trade_date, net_amount)
                 VALUES (?1, ?2, ?3)",
            )?;
            for flow in flows {
                count += stmt.execute(params![
                    flow.ts_code,
                    flow.trade_date.to_string(),
                    flow.net_amount,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Appended money-flow records");
        Ok(count)
    }

    /// Replace the listed-instrument reference table wholesale.
    pub async fn replace_instruments(&self, instruments: &[InstrumentInfo]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM instruments", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO instruments (ts_code, name, industry, market)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for inst in instruments {
                stmt.execute(params![inst.ts_code, inst.name, inst.industry, inst.market])?;
            }
        }
        tx.commit()?;

        debug!(count = instruments.len(), "Replaced instrument table");
        Ok(instruments.len())
    }

    /// Wipe every table. The next sync observes an empty watermark and
    /// rebuilds history from scratch.
    pub async fn clear(&self) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM daily_bars", [])?;
        tx.execute("DELETE FROM money_flow", [])?;
        tx.execute("DELETE FROM instruments", [])?;
        tx.commit()?;

        warn!(db = %self.path.display(), "Cleared market data store");
        Ok(())
    }

    // ========================================================================
    // Query Operations
    // ========================================================================

    /// The watermark: most recent trade date present in the bar table.
    pub async fn latest_bar_date(&self) -> Result<Option<NaiveDate>> {
        let db = self.db.lock().await;
        let max: Option<String> =
            db.query_row("SELECT MAX(trade_date) FROM daily_bars", [], |row| row.get(0))?;

        match max {
            Some(s) => Ok(Some(s.parse().context("Invalid trade_date in store")?)),
            None => Ok(None),
        }
    }

    /// Bars for the given instruments with `trade_date >= start`.
    pub async fn bars_since(&self, start: NaiveDate, codes: &[String]) -> Result<Vec<DailyBar>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.db.lock().await;
        let placeholders = vec!["?"; codes.len()].join(",");
        let sql = format!(
            "SELECT ts_code, trade_date, open, high, low, close, volume, pct_change
             FROM daily_bars
             WHERE trade_date >= ? AND ts_code IN ({placeholders})
             ORDER BY ts_code, trade_date DESC"
        );

        let args: Vec<String> = std::iter::once(start.to_string())
            .chain(codes.iter().cloned())
            .collect();

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), Self::row_to_bar)?;
        let mut bars = Vec::new();
        for row in rows {
            bars.push(row?);
        }
        Ok(bars)
    }

    fn row_to_bar(row: &rusqlite::Row) -> rusqlite::Result<DailyBar> {
        let date_str: String = row.get(1)?;
        Ok(DailyBar {
            ts_code: row.get(0)?,
            trade_date: Self::parse_row_date(1, date_str)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
            pct_change: row.get(7)?,
        })
    }

    /// A stored trade_date that does not parse is corruption, surfaced as
    /// a query error rather than mapped to a sentinel date.
    fn parse_row_date(idx: usize, date_str: String) -> rusqlite::Result<NaiveDate> {
        date_str.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    /// Money-flow records for the given instruments since `start`.
    pub async fn flows_since(
        &self,
        start: NaiveDate,
        codes: &[String],
    ) -> Result<Vec<MoneyFlowRecord>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.db.lock().await;
        let placeholders = vec!["?"; codes.len()].join(",");
        let sql = format!(
            "SELECT ts_code, trade_date, net_amount FROM money_flow
             WHERE trade_date >= ? AND ts_code IN ({placeholders})
             ORDER BY ts_code, trade_date DESC"
        );

        let args: Vec<String> = std::iter::once(start.to_string())
            .chain(codes.iter().cloned())
            .collect();

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let date_str: String = row.get(1)?;
            Ok(MoneyFlowRecord {
                ts_code: row.get(0)?,
                trade_date: Self::parse_row_date(1, date_str)?,
                net_amount: row.get(2)?,
            })
        })?;

        let mut flows = Vec::new();
        for row in rows {
            flows.push(row?);
        }
        Ok(flows)
    }

    /// All listed instruments from the reference table.
    pub async fn instruments(&self) -> Result<Vec<InstrumentInfo>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT ts_code, name, industry, market FROM instruments ORDER BY ts_code")?;
        let rows = stmt.query_map([], |row| {
            Ok(InstrumentInfo {
                ts_code: row.get(0)?,
                name: row.get(1)?,
                industry: row.get(2)?,
                market: row.get(3)?,
            })
        })?;

        let mut instruments = Vec::new();
        for row in rows {
            instruments.push(row?);
        }
        Ok(instruments)
    }

    /// Row counts and bar date range.
    pub async fn stats(&self) -> Result<StoreStats> {
        let db = self.db.lock().await;
        let bar_rows: u64 = db.query_row("SELECT COUNT(*) FROM daily_bars", [], |r| r.get(0))?;
        let flow_rows: u64 = db.query_row("SELECT COUNT(*) FROM money_flow", [], |r| r.get(0))?;
        let instrument_rows: u64 =
            db.query_row("SELECT COUNT(*) FROM instruments", [], |r| r.get(0))?;
        let (min, max): (Option<String>, Option<String>) = db.query_row(
            "SELECT MIN(trade_date), MAX(trade_date) FROM daily_bars",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(StoreStats {
            bar_rows,
            flow_rows,
            instrument_rows,
            earliest_bar_date: min.and_then(|s| s.parse().ok()),
            latest_bar_date: max.and_then(|s| s.parse().ok()),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bar(code: &str, date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            ts_code: code.to_string(),
            trade_date: date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
            pct_change: 0.0,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn temp_store() -> (TempDir, BarStore) {
        let dir = TempDir::new().unwrap();
        let store = BarStore::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_watermark_empty_then_after_append() {
        let (_dir, store) = temp_store();
        assert_eq!(store.latest_bar_date().await.unwrap(), None);

        store
            .append_bars(&[
                bar("600519.SH", d(2025, 1, 8), 100.0),
                bar("600519.SH", d(2025, 1, 9), 101.0),
            ])
            .await
            .unwrap();

        assert_eq!(store.latest_bar_date().await.unwrap(), Some(d(2025, 1, 9)));
    }

    #[tokio::test]
    async fn test_duplicate_keys_ignored() {
        let (_dir, store) = temp_store();
        let row = bar("600519.SH", d(2025, 1, 8), 100.0);
        assert_eq!(store.append_bars(&[row.clone()]).await.unwrap(), 1);
        // Same key appended again: not deduplicated by the caller, but the
        // store keeps one row.
        assert_eq!(store.append_bars(&[row]).await.unwrap(), 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.bar_rows, 1);
    }

    #[tokio::test]
    async fn test_bars_since_filters_by_code_and_date() {
        let (_dir, store) = temp_store();
        store
            .append_bars(&[
                bar("600519.SH", d(2025, 1, 6), 100.0),
                bar("600519.SH", d(2025, 1, 9), 101.0),
                bar("000001.SZ", d(2025, 1, 9), 12.0),
            ])
            .await
            .unwrap();

        let got = store
            .bars_since(d(2025, 1, 7), &["600519.SH".to_string()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].trade_date, d(2025, 1, 9));
    }

    #[tokio::test]
    async fn test_replace_instruments_is_wholesale() {
        let (_dir, store) = temp_store();
        let old = InstrumentInfo {
            ts_code: "000001.SZ".to_string(),
            name: "Ping An Bank".to_string(),
            industry: None,
            market: None,
        };
        let new = InstrumentInfo {
            ts_code: "600519.SH".to_string(),
            name: "Kweichow Moutai".to_string(),
            industry: Some("Beverages".to_string()),
            market: Some("Main".to_string()),
        };

        store.replace_instruments(&[old]).await.unwrap();
        store.replace_instruments(&[new.clone()]).await.unwrap();

        let got = store.instruments().await.unwrap();
        assert_eq!(got, vec![new]);
    }

    #[tokio::test]
    async fn test_clear_resets_watermark() {
        let (_dir, store) = temp_store();
        store
            .append_bars(&[bar("600519.SH", d(2025, 1, 8), 100.0)])
            .await
            .unwrap();
        store
            .replace_instruments(&[InstrumentInfo {
                ts_code: "600519.SH".to_string(),
                name: "Kweichow Moutai".to_string(),
                industry: None,
                market: None,
            }])
            .await
            .unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.latest_bar_date().await.unwrap(), None);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.bar_rows, 0);
        assert_eq!(stats.flow_rows, 0);
        assert_eq!(stats.instrument_rows, 0);
        assert!(store.instruments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_trade_date_is_an_error() {
        let (_dir, store) = temp_store();
        store
            .db
            .lock()
            .await
            .execute(
                "INSERT INTO daily_bars
                 (ts_code, trade_date, open, high, low, close, volume, pct_change)
                 VALUES ('600519.SH', 'garbage', 1.0, 1.0, 1.0, 1.0, 1.0, 0.0)",
                [],
            )
            .unwrap();

        let got = store
            .bars_since(d(2020, 1, 1), &["600519.SH".to_string()])
            .await;
        assert!(got.is_err(), "unparseable stored date must not decode");
    }
}
