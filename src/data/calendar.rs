//! Trading calendar resolution.
//!
//! Daily snapshots for "today" are not reliably published before the
//! close-processing cutoff, so anything ingested earlier would be partial.
//! The resolver therefore treats today's session as provisional until 16:00
//! local time and falls back to the previous open session before then.

use chrono::{DateTime, Duration, Local, NaiveDate, Timelike};
use std::sync::Arc;
use thiserror::Error;

use super::provider::{MarketDataProvider, ProviderError};

/// Local hour after which today's session counts as finalized.
pub const SESSION_CLOSE_HOUR: u32 = 16;

/// How far back to query the calendar feed when resolving the latest
/// closed session.
const CALENDAR_LOOKBACK_DAYS: i64 = 30;

/// Errors from calendar resolution. Aborts the resolving call only.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar feed returned {0} open sessions in the lookback window, need at least 2")]
    InsufficientCalendar(usize),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Resolves "the latest fully-closed trading day" against the exchange
/// calendar feed.
pub struct TradingCalendarResolver<P> {
    provider: Arc<P>,
}

impl<P: MarketDataProvider> TradingCalendarResolver<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// The most recent trading day whose close data is finalized.
    ///
    /// If the last open day in the feed is today's calendar date and the
    /// local hour is before [`SESSION_CLOSE_HOUR`], today is still
    /// provisional and the previous open day is returned instead.
    pub async fn latest_closed_trading_day(
        &self,
        now: DateTime<Local>,
    ) -> Result<NaiveDate, CalendarError> {
        let today = now.date_naive();
        let start = today - Duration::days(CALENDAR_LOOKBACK_DAYS);

        let calendar = self.provider.trading_calendar(start, today).await?;

        let mut open_days: Vec<NaiveDate> = calendar
            .into_iter()
            .filter(|d| d.is_open)
            .map(|d| d.date)
            .collect();
        open_days.sort_unstable();

        if open_days.len() < 2 {
            return Err(CalendarError::InsufficientCalendar(open_days.len()));
        }

        let last = open_days[open_days.len() - 1];
        if last == today && now.hour() < SESSION_CLOSE_HOUR {
            return Ok(open_days[open_days.len() - 2]);
        }
        Ok(last)
    }

    /// Whether the given date is an open trading session.
    ///
    /// Used by the daily timer to skip the pipeline on holidays and
    /// weekends.
    pub async fn is_open(&self, date: NaiveDate) -> Result<bool, CalendarError> {
        let calendar = self.provider.trading_calendar(date, date).await?;
        Ok(calendar.iter().any(|d| d.date == date && d.is_open))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::{open_days, MockProvider};
    use chrono::TimeZone;

    fn resolver_with_days(days: Vec<crate::data::TradingDay>) -> TradingCalendarResolver<MockProvider> {
        let provider = MockProvider {
            calendar: days,
            ..Default::default()
        };
        TradingCalendarResolver::new(Arc::new(provider))
    }

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_before_cutoff_returns_previous_session() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let resolver = resolver_with_days(open_days(today, 5));

        let resolved = resolver
            .latest_closed_trading_day(local(2025, 1, 10, 15))
            .await
            .unwrap();
        assert_eq!(resolved, NaiveDate::from_ymd_opt(2025, 1, 9).unwrap());
    }

    #[tokio::test]
    async fn test_after_cutoff_returns_today() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let resolver = resolver_with_days(open_days(today, 5));

        let resolved = resolver
            .latest_closed_trading_day(local(2025, 1, 10, 16))
            .await
            .unwrap();
        assert_eq!(resolved, today);
    }

    #[tokio::test]
    async fn test_non_trading_today_returns_last_open() {
        // Calendar ends the day before "now": a weekend invocation.
        let last_open = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let resolver = resolver_with_days(open_days(last_open, 5));

        let resolved = resolver
            .latest_closed_trading_day(local(2025, 1, 11, 10))
            .await
            .unwrap();
        assert_eq!(resolved, last_open);
    }

    #[tokio::test]
    async fn test_insufficient_calendar_is_an_error() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let resolver = resolver_with_days(open_days(today, 1));

        let err = resolver
            .latest_closed_trading_day(local(2025, 1, 10, 17))
            .await
            .unwrap_err();
        assert!(matches!(err, CalendarError::InsufficientCalendar(1)));
    }

    #[tokio::test]
    async fn test_is_open() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let resolver = resolver_with_days(open_days(today, 3));

        assert!(resolver.is_open(today).await.unwrap());
        assert!(!resolver
            .is_open(NaiveDate::from_ymd_opt(2025, 1, 11).unwrap())
            .await
            .unwrap());
    }
}
