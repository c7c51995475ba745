//! Service configuration.
//!
//! Everything comes from environment variables with sensible defaults;
//! the only hard requirement is the Tushare API token. The struct is
//! built once at startup and never mutated.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::data::SyncTuning;
use crate::screener::StrategyParams;

/// Extra trading days synced beyond the box window on a cold start, so
/// the funnel has its anchor bar on day one.
const LOOKBACK_MARGIN_DAYS: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Tushare Pro API token. Required.
    pub tushare_token: String,
    /// Telegram bot token. Empty disables notifications.
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    /// SQLite database path.
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// When the daily pipeline fires, local time.
    pub daily_cron: String,
    pub log_level: String,
    pub log_format: String,
    pub strategy: StrategyParams,
    pub sync_tuning: SyncTuning,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tushare_token =
            env::var("TUSHARE_TOKEN").context("TUSHARE_TOKEN environment variable is required")?;

        let db_path = match env::var("DATABASE_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => default_db_path(),
        };

        let port = match env::var("PORT") {
            Ok(p) => p.parse().context("PORT must be a number")?,
            Err(_) => 8087,
        };

        Ok(Self {
            tushare_token,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
            db_path,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            // 17:00 every day, after the session-close cutoff. The scheduler
            // consults the trading calendar before running, so non-trading
            // days are skipped there rather than encoded in the expression.
            daily_cron: env::var("DAILY_CRON").unwrap_or_else(|_| "0 0 17 * * *".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            strategy: StrategyParams::default(),
            sync_tuning: SyncTuning::default(),
        })
    }

    /// Cold-start sync depth in trading days.
    pub fn lookback_days(&self) -> i64 {
        (self.strategy.box_days + LOOKBACK_MARGIN_DAYS) as i64
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".breakout-screener")
        .join("market.db")
}

// ============================================================================
// Tests
// ============================================================================
