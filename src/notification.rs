//! Telegram notification for scan and sync reports.
//!
//! Talks to the Telegram Bot API directly. When no bot token is
//! configured the notifier is disabled and every send is a silent no-op,
//! so the pipeline never depends on it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::SyncOutcome;
use crate::screener::ScreenResult;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SEND_RETRIES: u32 = 3;
/// Keep report messages under Telegram's length limit.
const REPORT_TOP_N: usize = 10;

/// Telegram sendMessage payload
#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    parse_mode: String,
}

/// Telegram API envelope
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Notifier for daily screening and sync reports.
pub struct TelegramNotifier {
    enabled: bool,
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let enabled = !bot_token.is_empty() && !chat_id.is_empty();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            enabled,
            bot_token,
            chat_id,
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send the daily screening report.
    pub async fn send_scan_report(&self, results: &[ScreenResult], date_str: &str) -> Result<()> {
        let message = format_scan_report(results, date_str);
        self.send_message(&message).await
    }

    /// Send a sync summary, typically after a failed or partial run.
    pub async fn send_sync_report(&self, outcome: &SyncOutcome) -> Result<()> {
        let message = format_sync_report(outcome);
        self.send_message(&message).await
    }

    /// Send a raw Markdown message with retries.
    pub async fn send_message(&self, message: &str) -> Result<()> {
        if !self.enabled {
            debug!("Telegram notifier disabled, skipping send");
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.bot_token);
        let request = SendMessageRequest {
            chat_id: self.chat_id.clone(),
            text: message.to_string(),
            parse_mode: "Markdown".to_string(),
        };

        let mut last_error = None;

        for attempt in 1..=SEND_RETRIES {
            match self.try_send(&url, &request).await {
                Ok(()) => {
                    info!(chat_id = %self.chat_id, "Telegram message sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = SEND_RETRIES,
                        error = %e,
                        "Failed to send Telegram message, retrying..."
                    );
                    last_error = Some(e);

                    if attempt < SEND_RETRIES {
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }

    async fn try_send(&self, url: &str, request: &SendMessageRequest) -> Result<()> {
        let response = self.client.post(url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {}: {}", status, error_text);
        }

        let result: TelegramResponse = response.json().await?;
        if result.ok {
            Ok(())
        } else {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_else(|| "unknown".to_string())
            )
        }
    }
}

// ============================================================================
// Report Formatting
// ============================================================================

fn format_scan_report(results: &[ScreenResult], date_str: &str) -> String {
    if results.is_empty() {
        return format!("📅 {} \n\n今日无符合【严格突破模型】的标的。", date_str);
    }

    let mut msg = format!("🚀 *量化选股日报* ({})\n", date_str);
    msg.push_str("策略：突破箱体 + 机构主线 + 资金连买\n");
    msg.push_str("========================\n\n");

    for s in results.iter().take(REPORT_TOP_N) {
        msg.push_str(&format!("🔥 *{}* (`{}`)\n", s.name, s.ts_code));
        msg.push_str(&format!(
            "   💰 现价: {:.2} (涨幅 {:.2}%)\n",
            s.price, s.pct_change
        ));
        msg.push_str(&format!("   📊 评分: {}\n", s.score));
        msg.push_str(&format!("   💡 理由: {}\n\n", s.reason));
    }

    if results.len() > REPORT_TOP_N {
        msg.push_str(&format!(
            "_共 {} 只入选，仅展示前 {} 只_\n",
            results.len(),
            REPORT_TOP_N
        ));
    }

    msg
}

fn format_sync_report(outcome: &SyncOutcome) -> String {
    let status = if outcome.failed_days == 0 {
        "✅ 数据同步完成"
    } else {
        "⚠️ 数据同步部分失败"
    };

    let mut msg = format!("{}\n\n成功: {} 天\n", status, outcome.success_days);

    if outcome.failed_days > 0 {
        msg.push_str(&format!("失败: {} 天\n", outcome.failed_days));
        if let Some(err) = &outcome.last_error {
            msg.push_str(&format!("最近错误: {}\n", err));
        }
    }
    if let Some(w) = outcome.watermark {
        msg.push_str(&format!("最新数据日期: {}\n", w));
    }

    msg
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn result(code: &str, name: &str, score: u32) -> ScreenResult {
        ScreenResult {
            ts_code: code.to_string(),
            name: name.to_string(),
            price: 110.25,
            pct_change: 6.12,
            score,
            reason: "55-day high breakout, volume ratio 2.0".to_string(),
        }
    }

    #[test]
    fn test_notifier_disabled_without_token() {
        let notifier = TelegramNotifier::new(String::new(), "123".to_string());
        assert!(!notifier.is_enabled());

        let notifier = TelegramNotifier::new("token".to_string(), String::new());
        assert!(!notifier.is_enabled());

        let notifier = TelegramNotifier::new("token".to_string(), "123".to_string());
        assert!(notifier.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_send_is_noop() {
        let notifier = TelegramNotifier::new(String::new(), String::new());
        notifier.send_message("hello").await.unwrap();
    }

    #[test]
    fn test_empty_report_message() {
        let msg = format_scan_report(&[], "2025-06-30");
        assert!(msg.contains("2025-06-30"));
        assert!(msg.contains("今日无符合"));
    }

    #[test]
    fn test_report_contains_selected_instruments() {
        let results = vec![
            result("600519.SH", "贵州茅台", 90),
            result("000001.SZ", "平安银行", 80),
        ];
        let msg = format_scan_report(&results, "2025-06-30");

        assert!(msg.contains("量化选股日报"));
        assert!(msg.contains("贵州茅台"));
        assert!(msg.contains("600519.SH"));
        assert!(msg.contains("评分: 90"));
        assert!(msg.contains("110.25"));
        assert!(!msg.contains("只展示"));
    }

    #[test]
    fn test_report_truncates_to_top_ten() {
        let results: Vec<ScreenResult> = (0..15)
            .map(|i| result(&format!("60{:04}.SH", i), &format!("股票{}", i), 80))
            .collect();
        let msg = format_scan_report(&results, "2025-06-30");

        assert!(msg.contains("股票9"));
        assert!(!msg.contains("`600010.SH`"));
        assert!(msg.contains("共 15 只入选"));
    }

    #[test]
    fn test_sync_report_partial_failure() {
        let outcome = SyncOutcome {
            success_days: 4,
            failed_days: 1,
            message: "synced 4 of 5 days".to_string(),
            last_error: Some("connection reset".to_string()),
            watermark: NaiveDate::from_ymd_opt(2025, 6, 30),
        };
        let msg = format_sync_report(&outcome);

        assert!(msg.contains("部分失败"));
        assert!(msg.contains("connection reset"));
        assert!(msg.contains("2025-06-30"));
    }
}
