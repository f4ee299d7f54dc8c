//! Typed view over Alpha Vantage time-series payloads.
//!
//! Series are keyed by timestamp text (`2024-01-02 16:00:00` / `2024-01-02`).
//! Those keys sort chronologically, so entries are held in a `BTreeMap` and
//! recency is read from the end of the map, not from JSON object order.

use crate::error::PollError;
use crate::models::{DailyComparisonPoint, IntradayPoint, RawPayload};
use crate::normalize::{parse_date, parse_number, parse_utc};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DAILY_SERIES_KEY: &str = "Time Series (Daily)";

pub fn intraday_series_key(interval: &str) -> String {
    format!("Time Series ({})", interval)
}

/// One OHLCV entry as the provider encodes it (numbers as strings).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandle {
    #[serde(rename = "1. open")]
    pub open: Option<String>,
    #[serde(rename = "2. high")]
    pub high: Option<String>,
    #[serde(rename = "3. low")]
    pub low: Option<String>,
    #[serde(rename = "4. close")]
    pub close: Option<String>,
    /// Daily-adjusted payloads put volume under "6. volume"; only intraday reads it.
    #[serde(rename = "5. volume")]
    pub volume: Option<String>,
}

pub type Series = BTreeMap<String, RawCandle>;

/// The one place a series is pulled out of an untyped payload.
pub fn time_series(payload: &RawPayload, key: &str) -> Option<Series> {
    let raw = payload.get(key)?;
    let series: Series = serde_json::from_value(raw.clone()).ok()?;
    if series.is_empty() { None } else { Some(series) }
}

fn field(value: Option<&String>, name: &str, symbol: &str, stamp: &str) -> Result<f64, PollError> {
    value
        .and_then(|s| parse_number(s))
        .ok_or_else(|| PollError::data_shape(format!("Invalid {} for {} at {}", name, symbol, stamp)))
}

pub fn parse_intraday(payload: &RawPayload, symbol: &str, interval: &str) -> Result<IntradayPoint, PollError> {
    let series = time_series(payload, &intraday_series_key(interval))
        .ok_or_else(|| PollError::data_shape(format!("Intraday data missing for {}", symbol)))?;

    let Some((stamp, candle)) = series.iter().next_back() else {
        return Err(PollError::data_shape(format!("Intraday data missing for {}", symbol)));
    };

    let captured_at = parse_utc(stamp).ok_or_else(|| {
        PollError::data_shape(format!("Unreadable intraday timestamp {:?} for {}", stamp, symbol))
    })?;

    Ok(IntradayPoint {
        symbol: symbol.to_string(),
        captured_at,
        open: field(candle.open.as_ref(), "open", symbol, stamp)?,
        high: field(candle.high.as_ref(), "high", symbol, stamp)?,
        low: field(candle.low.as_ref(), "low", symbol, stamp)?,
        close: field(candle.close.as_ref(), "close", symbol, stamp)?,
        volume: field(candle.volume.as_ref(), "volume", symbol, stamp)?,
    })
}

pub fn parse_daily(payload: &RawPayload, symbol: &str) -> Result<DailyComparisonPoint, PollError> {
    let series = time_series(payload, DAILY_SERIES_KEY)
        .ok_or_else(|| PollError::data_shape(format!("Daily data missing for {}", symbol)))?;

    let mut newest_first = series.iter().rev();
    let Some((latest_stamp, latest)) = newest_first.next() else {
        return Err(PollError::data_shape(format!("Daily data missing for {}", symbol)));
    };

    let latest_date = parse_date(latest_stamp).ok_or_else(|| {
        PollError::data_shape(format!("Unreadable daily date {:?} for {}", latest_stamp, symbol))
    })?;
    let latest_close = field(latest.close.as_ref(), "close", symbol, latest_stamp)?;

    let previous_close = match newest_first.next() {
        Some((stamp, candle)) => Some(field(candle.close.as_ref(), "close", symbol, stamp)?),
        None => None,
    };

    Ok(DailyComparisonPoint {
        latest_date,
        latest_close,
        previous_close,
    })
}
