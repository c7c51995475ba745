//! A-share breakout screener.
//!
//! Keeps a local SQLite store of daily bars and money-flow data in sync
//! with Tushare Pro, then screens the market after each session close
//! for box breakouts confirmed by volume, relative strength, and
//! consecutive net inflows. Results go out as a Telegram daily report
//! and are also exposed over HTTP.
//!
//! # Pipeline
//!
//! ```text
//! calendar ──▶ sync (watermark, per-day retry) ──▶ store (SQLite)
//!                                                    │
//! sector rotation ──▶ universe ──▶ funnel ──▶ rank ──▶ report
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod data;
pub mod logging;
pub mod notification;
pub mod routes;
pub mod scheduler;
pub mod screener;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::data::{BarStore, MarketDataProvider, TushareClient};
use crate::notification::TelegramNotifier;
use crate::scheduler::{DailyScheduler, Pipeline};

/// Shared service state behind the HTTP routes.
pub struct AppState {
    pub config: Config,
    pub store: Arc<BarStore>,
    pub pipeline: Arc<Pipeline<TushareClient>>,
    pub notifier: Arc<TelegramNotifier>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let provider = Arc::new(TushareClient::new(config.tushare_token.clone()));
        let store = Arc::new(BarStore::open(&config.db_path)?);
        info!(
            provider = provider.name(),
            db = %store.path().display(),
            "Data layer ready"
        );
        let notifier = Arc::new(TelegramNotifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_chat_id.clone(),
        ));

        let pipeline = Arc::new(Pipeline::new(
            provider,
            Arc::clone(&store),
            config.strategy.clone(),
            config.sync_tuning.clone(),
            config.lookback_days(),
            Arc::clone(&notifier),
        ));

        Ok(Self {
            config,
            store,
            pipeline,
            notifier,
        })
    }
}

/// Main screener service.
pub struct ScreenerService {
    state: Arc<AppState>,
}

impl ScreenerService {
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::new(config)?);
        Ok(Self { state })
    }

    /// Start the daily scheduler and the HTTP server. Runs until the
    /// process is stopped.
    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/health", get(routes::health))
            .route("/api/v1/sync", post(routes::trigger_sync))
            .route("/api/v1/scan", post(routes::trigger_scan))
            .route("/api/v1/reset", post(routes::trigger_reset))
            .route("/api/v1/check/:ts_code", get(routes::check_instrument))
            .route("/api/v1/status", get(routes::get_status))
            .with_state(self.state.clone());

        // Evening pipeline trigger.
        let scheduler = DailyScheduler::new(
            Arc::clone(&self.state.pipeline),
            &self.state.config.daily_cron,
        )?;
        tokio::spawn(async move {
            scheduler.run().await;
            error!("Daily scheduler exited");
        });

        let addr: SocketAddr =
            format!("{}:{}", self.state.config.host, self.state.config.port).parse()?;
        info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
