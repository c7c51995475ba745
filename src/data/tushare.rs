//! Tushare Pro API adapter.
//!
//! # API Documentation
//! https://tushare.pro/document/2
//!
//! Endpoints used: `trade_cal`, `daily`, `moneyflow`, `sw_daily`,
//! `index_member`, `stock_basic`, `index_daily`. All are full-market or
//! per-index queries; the synchronizer pulls one date per call.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

use super::provider::{MarketDataProvider, ProviderError};
use super::{DailyBar, InstrumentInfo, MoneyFlowRecord, SectorSnapshot, TradingDay};

const DATE_FMT: &str = "%Y%m%d";

/// Tushare Pro client.
pub struct TushareClient {
    token: String,
    client: reqwest::Client,
    base_url: String,
}

impl TushareClient {
    /// Create a new client with the given API token.
    pub fn new(token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            token: token.into(),
            client,
            base_url: "http://api.tushare.pro".to_string(),
        }
    }

    /// Call one Tushare API endpoint.
    async fn call_api<T: DeserializeOwned>(
        &self,
        api_name: &str,
        params: HashMap<&str, String>,
        fields: &[&str],
    ) -> Result<T, ProviderError> {
        let request = TushareRequest {
            api_name: api_name.to_string(),
            token: self.token.clone(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::Unavailable(format!(
                "{} returned HTTP {}",
                api_name, status
            )));
        }

        let result: TushareResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if result.code != 0 {
            return Err(ProviderError::Api(format!(
                "{}: {} ({})",
                api_name,
                result.msg.unwrap_or_default(),
                result.code
            )));
        }

        result
            .data
            .ok_or_else(|| ProviderError::Parse(format!("{}: empty data field", api_name)))
    }

    fn parse_date(s: &str) -> Result<NaiveDate, ProviderError> {
        NaiveDate::parse_from_str(s, DATE_FMT)
            .map_err(|e| ProviderError::Parse(format!("bad trade date {:?}: {}", s, e)))
    }
}

#[async_trait]
impl MarketDataProvider for TushareClient {
    fn name(&self) -> &'static str {
        "tushare"
    }

    async fn trading_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TradingDay>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("start_date", start.format(DATE_FMT).to_string());
        params.insert("end_date", end.format(DATE_FMT).to_string());

        let data: TushareData<CalendarRow> = self
            .call_api("trade_cal", params, &["cal_date", "is_open"])
            .await?;

        data.items
            .iter()
            .map(|(cal_date, is_open)| {
                Ok(TradingDay {
                    date: Self::parse_date(cal_date)?,
                    is_open: *is_open == 1,
                })
            })
            .collect()
    }

    async fn daily_bars(&self, trade_date: NaiveDate) -> Result<Vec<DailyBar>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("trade_date", trade_date.format(DATE_FMT).to_string());

        let data: TushareData<DailyRow> = self
            .call_api(
                "daily",
                params,
                &["ts_code", "trade_date", "open", "high", "low", "close", "vol", "pct_chg"],
            )
            .await?;

        data.items
            .iter()
            .map(|(ts_code, trade_date, open, high, low, close, vol, pct_chg)| {
                Ok(DailyBar {
                    ts_code: ts_code.clone(),
                    trade_date: Self::parse_date(trade_date)?,
                    open: *open,
                    high: *high,
                    low: *low,
                    close: *close,
                    volume: vol.unwrap_or(0.0),
                    pct_change: pct_chg.unwrap_or(0.0),
                })
            })
            .collect()
    }

    async fn money_flow(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<MoneyFlowRecord>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("trade_date", trade_date.format(DATE_FMT).to_string());

        let data: TushareData<MoneyFlowRow> = self
            .call_api(
                "moneyflow",
                params,
                &["ts_code", "trade_date", "net_mf_amount"],
            )
            .await?;

        data.items
            .iter()
            .map(|(ts_code, trade_date, net_mf_amount)| {
                Ok(MoneyFlowRecord {
                    ts_code: ts_code.clone(),
                    trade_date: Self::parse_date(trade_date)?,
                    net_amount: net_mf_amount.unwrap_or(0.0),
                })
            })
            .collect()
    }

    async fn sector_ranking(
        &self,
        trade_date: NaiveDate,
    ) -> Result<Vec<SectorSnapshot>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("trade_date", trade_date.format(DATE_FMT).to_string());

        let data: TushareData<SectorRow> = self
            .call_api("sw_daily", params, &["ts_code", "trade_date", "pct_change"])
            .await?;

        let mut sectors: Vec<SectorSnapshot> = data
            .items
            .iter()
            .map(|(ts_code, trade_date, pct_change)| {
                Ok(SectorSnapshot {
                    sector_id: ts_code.clone(),
                    trade_date: Self::parse_date(trade_date)?,
                    pct_change: pct_change.unwrap_or(0.0),
                })
            })
            .collect::<Result<_, ProviderError>>()?;

        sectors.sort_by(|a, b| {
            b.pct_change
                .partial_cmp(&a.pct_change)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(sectors)
    }

    async fn sector_members(&self, sector_id: &str) -> Result<Vec<String>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("index_code", sector_id.to_string());

        let data: TushareData<MemberRow> =
            self.call_api("index_member", params, &["con_code"]).await?;

        Ok(data.items.into_iter().map(|(con_code,)| con_code).collect())
    }

    async fn listed_universe(&self) -> Result<Vec<InstrumentInfo>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("list_status", "L".to_string());

        let data: TushareData<StockBasicRow> = self
            .call_api(
                "stock_basic",
                params,
                &["ts_code", "name", "industry", "market"],
            )
            .await?;

        Ok(data
            .items
            .into_iter()
            .map(|(ts_code, name, industry, market)| InstrumentInfo {
                ts_code,
                name,
                industry,
                market,
            })
            .collect())
    }

    async fn benchmark_series(
        &self,
        symbol: &str,
        end_date: NaiveDate,
        window_days: usize,
    ) -> Result<Vec<f64>, ProviderError> {
        // Calendar days are sparser than trading days, so ask for twice the
        // window to be sure enough sessions come back.
        let start = end_date - Duration::days(window_days as i64 * 2);

        let mut params = HashMap::new();
        params.insert("ts_code", symbol.to_string());
        params.insert("start_date", start.format(DATE_FMT).to_string());
        params.insert("end_date", end_date.format(DATE_FMT).to_string());

        let data: TushareData<IndexDailyRow> = self
            .call_api("index_daily", params, &["trade_date", "close"])
            .await?;

        let mut rows: Vec<(NaiveDate, f64)> = data
            .items
            .iter()
            .map(|(trade_date, close)| Ok((Self::parse_date(trade_date)?, *close)))
            .collect::<Result<_, ProviderError>>()?;

        // Most recent first
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, close)| close).collect())
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TushareRequest {
    api_name: String,
    token: String,
    params: HashMap<String, String>,
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TushareResponse<T> {
    code: i32,
    msg: Option<String>,
    data: Option<T>,
}

/// Tushare payload: `items` is an array of positional rows whose column
/// order matches the `fields` list sent in the request.
#[derive(Debug, Deserialize)]
struct TushareData<Row> {
    #[serde(default)]
    items: Vec<Row>,
}

// Row tuples, one per endpoint, in requested field order.
type CalendarRow = (String, i32);
type DailyRow = (String, String, f64, f64, f64, f64, Option<f64>, Option<f64>);
type MoneyFlowRow = (String, String, Option<f64>);
type SectorRow = (String, String, Option<f64>);
type MemberRow = (String,);
type StockBasicRow = (String, String, Option<String>, Option<String>);
type IndexDailyRow = (String, f64);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = TushareClient::new("test_token");
        assert_eq!(client.token, "test_token");
        assert_eq!(client.base_url, "http://api.tushare.pro");
    }

    #[test]
    fn test_parse_date() {
        let date = TushareClient::parse_date("20250110").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        assert!(TushareClient::parse_date("2025-01-10").is_err());
    }

    #[test]
    fn test_response_envelope_decoding() {
        // Items come back as positional rows, not keyed objects.
        let json = r#"{"code":0,"msg":null,"data":{"fields":["cal_date","is_open"],"items":[["20250110",1],["20250111",0]]}}"#;
        let resp: TushareResponse<TushareData<CalendarRow>> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 0);
        let items = resp.data.unwrap().items;
        assert_eq!(items[0], ("20250110".to_string(), 1));
        assert_eq!(items[1].1, 0);
    }

    #[test]
    fn test_daily_row_with_null_columns() {
        let json = r#"{"items":[["600519.SH","20250110",10.0,11.0,9.5,10.5,null,null]]}"#;
        let data: TushareData<DailyRow> = serde_json::from_str(json).unwrap();
        assert_eq!(data.items[0].6, None);
        assert_eq!(data.items[0].5, 10.5);
    }

    // Integration coverage requires a valid Tushare token; exercised
    // manually against the live API.
}
