//! Breakout Screener - daily A-share market sync and breakout screening.
//!
//! Syncs daily bars and money-flow data from Tushare Pro into a local
//! SQLite store, then screens for box breakouts after each session close.

use anyhow::Result;
use breakout_screener::config::Config;
use breakout_screener::logging::init_logging;
use breakout_screener::ScreenerService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::from_env()?;

    init_logging(&config.log_level, &config.log_format);

    tracing::info!("Breakout Screener v{}", env!("CARGO_PKG_VERSION"));

    let service = ScreenerService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
