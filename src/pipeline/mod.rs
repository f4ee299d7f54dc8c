//! Pipeline orchestrator: ties provider adapters → snapshot builder → sink.
//!
//! ## Run modes
//!
//! `run_market_poll()`: one snapshot per symbol, strictly in input order:
//!   1. Fetch the latest intraday bar, then the last two daily closes
//!   2. Build the snapshot and insert it
//!   3. Sleep `pipeline.symbol_delay_secs` before the next symbol (not after the last)
//!   A failing symbol is recorded and the run moves on.
//!
//! `run_weather_poll()`: one snapshot for the configured location, from a
//!   single forecast request.
//!
//! Both are stateless: re-running writes the same subject + captured_at again.

use crate::config::AppConfig;
use crate::error::PollError;
use crate::market::MarketSource;
use crate::models::{Snapshot, format_utc};
use crate::snapshot::{Clock, build_market_snapshot, build_weather_snapshot};
use crate::storage::SnapshotSink;
use crate::weather::{WeatherSource, build_reading, extract_previous_hour_temperature};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    sink: Arc<dyn SnapshotSink>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(config: AppConfig, sink: Arc<dyn SnapshotSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            sink,
            clock,
        }
    }

    pub async fn run_market_poll<S>(&self, source: &S, symbols: &[String]) -> PollOutcome
    where
        S: MarketSource + ?Sized,
    {
        info!("=== Market poll: {} symbols ===", symbols.len());
        let delay = self.config.pipeline.symbol_delay();
        let mut outcome = PollOutcome::default();

        for (index, symbol) in symbols.iter().enumerate() {
            info!("Fetching data for {}...", symbol);
            match self.poll_symbol(source, symbol).await {
                Ok(snapshot) => {
                    info!("Stored snapshot for {} at {}", symbol, format_utc(&snapshot.captured_at()));
                    outcome.stored += 1;
                }
                Err(e) => {
                    warn!("Error processing {}: {}", symbol, e);
                    outcome.record(symbol, &e);
                }
            }
            outcome.processed += 1;

            if index + 1 < symbols.len() && !delay.is_zero() {
                info!("Waiting {:?} before next symbol", delay);
                sleep(delay).await;
            }
        }

        outcome.log_summary();
        outcome
    }

    async fn poll_symbol<S>(&self, source: &S, symbol: &str) -> Result<Snapshot, PollError>
    where
        S: MarketSource + ?Sized,
    {
        let intraday = source.fetch_intraday(symbol).await?;
        let daily = source.fetch_daily(symbol).await?;
        let snapshot = Snapshot::from(build_market_snapshot(
            &intraday,
            &daily,
            &self.config.market,
            self.clock.as_ref(),
        ));
        self.sink.insert(&snapshot).await?;
        Ok(snapshot)
    }

    pub async fn run_weather_poll<S>(&self, source: &S) -> PollOutcome
    where
        S: WeatherSource + ?Sized,
    {
        let label = &self.config.weather.location_label;
        info!("=== Weather poll: {} ===", label);
        let mut outcome = PollOutcome::default();

        match self.poll_location(source).await {
            Ok(snapshot) => {
                info!("Stored weather snapshot for {} at {}", label, format_utc(&snapshot.captured_at()));
                outcome.stored += 1;
            }
            Err(e) => {
                warn!("Error processing {}: {}", label, e);
                outcome.record(label, &e);
            }
        }
        outcome.processed += 1;

        outcome.log_summary();
        outcome
    }

    async fn poll_location<S>(&self, source: &S) -> Result<Snapshot, PollError>
    where
        S: WeatherSource + ?Sized,
    {
        let payload = source.fetch_forecast().await?;
        let reading = build_reading(&payload)?;
        let previous = extract_previous_hour_temperature(&payload, reading.captured_at);
        let snapshot = Snapshot::from(build_weather_snapshot(
            &reading,
            previous,
            &self.config.weather,
            self.clock.as_ref(),
        ));
        self.sink.insert(&snapshot).await?;
        Ok(snapshot)
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFailure {
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct PollOutcome {
    pub processed: usize,
    pub stored: usize,
    pub failures: Vec<SubjectFailure>,
}

impl PollOutcome {
    fn record(&mut self, subject: &str, err: &PollError) {
        self.failures.push(SubjectFailure {
            subject: subject.to_string(),
            error: err.to_string(),
        });
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit status: 0 when every subject was stored, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    fn log_summary(&self) {
        if self.is_success() {
            info!("All snapshots stored successfully ({} subjects)", self.stored);
        } else {
            error!(
                "Completed with errors: {} of {} subjects failed",
                self.failures.len(),
                self.processed
            );
            for f in &self.failures {
                error!("  {}: {}", f.subject, f.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyComparisonPoint, IntradayPoint};
    use crate::snapshot::FixedClock;
    use crate::storage::testing::MemorySink;
    use crate::weather::ForecastPayload;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, 0, 0).unwrap()
    }

    /// Serves fixed bars; symbols listed in `broken` fail with a data-shape error.
    struct FakeMarket {
        broken: Vec<&'static str>,
        calls: Mutex<Vec<(String, tokio::time::Instant)>>,
    }

    impl FakeMarket {
        fn new(broken: Vec<&'static str>) -> Self {
            Self {
                broken,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_log(&self) -> Vec<(String, tokio::time::Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketSource for FakeMarket {
        async fn fetch_intraday(&self, symbol: &str) -> Result<IntradayPoint, PollError> {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), tokio::time::Instant::now()));
            if self.broken.contains(&symbol) {
                return Err(PollError::data_shape(format!("Intraday data missing for {}", symbol)));
            }
            Ok(IntradayPoint {
                symbol: symbol.to_string(),
                captured_at: at(16),
                open: 149.0,
                high: 151.0,
                low: 148.5,
                close: 150.0,
                volume: 1000.0,
            })
        }

        async fn fetch_daily(&self, _symbol: &str) -> Result<DailyComparisonPoint, PollError> {
            Ok(DailyComparisonPoint {
                latest_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                latest_close: 150.0,
                previous_close: Some(148.0),
            })
        }
    }

    struct FakeWeather(serde_json::Value);

    #[async_trait]
    impl WeatherSource for FakeWeather {
        async fn fetch_forecast(&self) -> Result<ForecastPayload, PollError> {
            ForecastPayload::from_raw(self.0.clone())
        }
    }

    fn pipeline(sink: Arc<MemorySink>) -> Pipeline {
        let mut config = AppConfig::default();
        config.weather.location_label = "berlin".into();
        Pipeline::new(config, sink, Arc::new(FixedClock(at(17))))
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_symbol_does_not_stop_the_run() {
        let sink = Arc::new(MemorySink::default());
        let source = FakeMarket::new(vec!["MSFT"]);

        let outcome = pipeline(sink.clone())
            .run_market_poll(&source, &symbols(&["AAPL", "MSFT"]))
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.stored, 1);
        assert_eq!(
            outcome.failures,
            vec![SubjectFailure {
                subject: "MSFT".into(),
                error: "Intraday data missing for MSFT".into(),
            }]
        );
        assert_eq!(sink.subjects(), vec!["AAPL"]);

        let rows = sink.rows.lock().unwrap();
        let Snapshot::Market(aapl) = &rows[0] else {
            panic!("expected a market snapshot");
        };
        assert_eq!(aapl.change_percent, Some(1.3514));
        assert_eq!(aapl.created_at, at(17));
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbols_run_in_order_with_delay_between_only() {
        let sink = Arc::new(MemorySink::default());
        let source = FakeMarket::new(vec![]);
        let start = tokio::time::Instant::now();

        let outcome = pipeline(sink.clone())
            .run_market_poll(&source, &symbols(&["AAPL", "MSFT", "IBM"]))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
        let log = source.call_log();
        let order: Vec<&str> = log.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["AAPL", "MSFT", "IBM"]);
        assert_eq!(log[1].1 - log[0].1, Duration::from_secs(15));
        assert_eq!(log[2].1 - log[1].1, Duration::from_secs(15));
        // no trailing sleep after the last symbol
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_recorded_per_symbol() {
        let sink = Arc::new(MemorySink::rejecting("AAPL"));
        let source = FakeMarket::new(vec![]);

        let outcome = pipeline(sink.clone())
            .run_market_poll(&source, &symbols(&["AAPL", "MSFT"]))
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].subject, "AAPL");
        assert!(outcome.failures[0].error.starts_with("insert into market_snapshots failed"));
        assert_eq!(sink.subjects(), vec!["MSFT"]);
    }

    #[tokio::test]
    async fn test_weather_poll_builds_and_stores_snapshot() {
        let sink = Arc::new(MemorySink::default());
        let source = FakeWeather(json!({
            "latitude": 52.52,
            "longitude": 13.41,
            "current": {"time": "2024-01-01T02:00", "temperature_2m": 14.0, "weathercode": 1},
            "hourly": {
                "time": ["2024-01-01T00:00", "2024-01-01T01:00", "2024-01-01T02:00"],
                "temperature_2m": [10.0, 12.0, 14.0]
            }
        }));

        let outcome = pipeline(sink.clone()).run_weather_poll(&source).await;
        assert!(outcome.is_success());

        let rows = sink.rows.lock().unwrap();
        let Snapshot::Weather(snap) = &rows[0] else {
            panic!("expected a weather snapshot");
        };
        assert_eq!(snap.location, "berlin");
        assert_eq!(snap.previous_temperature_c, Some(12.0));
        assert_eq!(snap.temperature_change, Some(2.0));
        assert_eq!(snap.temperature_change_percent, Some(16.6667));
        assert_eq!(snap.metadata["weather_code"], 1);
    }

    #[tokio::test]
    async fn test_weather_poll_without_current_block_fails() {
        let sink = Arc::new(MemorySink::default());
        let source = FakeWeather(json!({"hourly": {"time": [], "temperature_2m": []}}));

        let outcome = pipeline(sink.clone()).run_weather_poll(&source).await;
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.failures[0].subject, "berlin");
        assert!(sink.subjects().is_empty());
        assert!(
            outcome.failures[0].error.contains("current weather missing"),
            "{}",
            outcome.failures[0].error
        );
    }
}
