pub mod parsers;

use crate::config::MarketConfig;
use crate::error::PollError;
use crate::http::{FetchRequest, Provider, RetryingFetcher};
use crate::models::{DailyComparisonPoint, IntradayPoint};
use async_trait::async_trait;
use tracing::debug;

use self::parsers::{parse_daily, parse_intraday};

pub static ALPHA_VANTAGE: Provider = Provider {
    name: "alphavantage",
    advisory_fields: &["Note", "Information", "Error Message"],
};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable quote source abstraction.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_intraday(&self, symbol: &str) -> Result<IntradayPoint, PollError>;
    async fn fetch_daily(&self, symbol: &str) -> Result<DailyComparisonPoint, PollError>;
}

// ── Alpha Vantage ─────────────────────────────────────────────────────────────

pub struct AlphaVantageAdapter {
    fetcher: RetryingFetcher,
    config: MarketConfig,
}

impl AlphaVantageAdapter {
    pub fn new(fetcher: RetryingFetcher, config: &MarketConfig) -> Self {
        Self {
            fetcher,
            config: config.clone(),
        }
    }

    fn request(&self, function: &str, symbol: &str) -> FetchRequest {
        FetchRequest::new(&ALPHA_VANTAGE, &self.config.base_url, self.config.timeout())
            .param("function", function)
            .param("symbol", symbol)
    }

    /// Latest compact intraday series at the configured interval.
    pub fn intraday_request(&self, symbol: &str) -> FetchRequest {
        self.request("TIME_SERIES_INTRADAY", symbol)
            .param("interval", &self.config.interval)
            .param("outputsize", "compact")
            .param("apikey", &self.config.api_key)
    }

    /// Latest compact daily-adjusted series.
    pub fn daily_request(&self, symbol: &str) -> FetchRequest {
        self.request("TIME_SERIES_DAILY_ADJUSTED", symbol)
            .param("outputsize", "compact")
            .param("apikey", &self.config.api_key)
    }
}

#[async_trait]
impl MarketSource for AlphaVantageAdapter {
    async fn fetch_intraday(&self, symbol: &str) -> Result<IntradayPoint, PollError> {
        let payload = self.fetcher.fetch(&self.intraday_request(symbol)).await?;
        let point = parse_intraday(&payload, symbol, &self.config.interval)?;
        debug!("{}: intraday bar at {} close={}", symbol, point.captured_at, point.close);
        Ok(point)
    }

    async fn fetch_daily(&self, symbol: &str) -> Result<DailyComparisonPoint, PollError> {
        let payload = self.fetcher.fetch(&self.daily_request(symbol)).await?;
        let daily = parse_daily(&payload, symbol)?;
        debug!(
            "{}: daily close {} on {} (previous {:?})",
            symbol, daily.latest_close, daily.latest_date, daily.previous_close
        );
        Ok(daily)
    }
}
