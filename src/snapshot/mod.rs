//! Pure transformation from parsed provider records into persisted snapshots.
//!
//! Only `created_at` depends on anything outside the arguments, and it comes
//! from the injected [`Clock`].

use crate::config::{MarketConfig, WeatherConfig};
use crate::models::{
    DailyComparisonPoint, IntradayPoint, MarketSnapshot, WeatherReading, WeatherSnapshot,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

pub const MARKET_SOURCE: &str = "alphavantage";
pub const WEATHER_SOURCE: &str = "open-meteo";

// ── Clock ─────────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── Derived fields ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Change {
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `change` needs both operands; `change_percent` additionally needs a
/// non-zero baseline. Absent inputs give absent outputs, never zero.
pub fn derive_change(current: Option<f64>, baseline: Option<f64>) -> Change {
    let (Some(current), Some(baseline)) = (current, baseline) else {
        return Change::default();
    };

    let change = current - baseline;
    let change_percent = (baseline != 0.0).then(|| round_to(change / baseline * 100.0, 4));

    Change {
        change: Some(change),
        change_percent,
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

pub fn build_market_snapshot(
    intraday: &IntradayPoint,
    daily: &DailyComparisonPoint,
    config: &MarketConfig,
    clock: &dyn Clock,
) -> MarketSnapshot {
    let Change {
        change,
        change_percent,
    } = derive_change(Some(intraday.close), daily.previous_close);

    let mut metadata = Map::new();
    metadata.insert(
        "daily_close_date".to_string(),
        Value::String(daily.latest_date.format("%Y-%m-%d").to_string()),
    );

    MarketSnapshot {
        symbol: intraday.symbol.clone(),
        captured_at: intraday.captured_at,
        interval: config.interval.clone(),
        price: intraday.close,
        open: intraday.open,
        high: intraday.high,
        low: intraday.low,
        volume: intraday.volume,
        previous_close: daily.previous_close,
        change,
        change_percent,
        source: MARKET_SOURCE.to_string(),
        metadata,
        created_at: clock.now(),
    }
}

pub fn build_weather_snapshot(
    reading: &WeatherReading,
    previous_temperature: Option<f64>,
    config: &WeatherConfig,
    clock: &dyn Clock,
) -> WeatherSnapshot {
    let Change {
        change,
        change_percent,
    } = derive_change(reading.temperature_c, previous_temperature);

    let mut metadata = Map::new();
    metadata.insert("weather_code".into(), reading.weather_code.clone().unwrap_or(Value::Null));
    metadata.insert("is_day".into(), reading.is_day.clone().unwrap_or(Value::Null));
    metadata.insert("latitude".into(), json!(reading.latitude));
    metadata.insert("longitude".into(), json!(reading.longitude));

    WeatherSnapshot {
        location: config.location_label.clone(),
        captured_at: reading.captured_at,
        temperature_c: reading.temperature_c,
        relative_humidity: reading.relative_humidity,
        windspeed_kmh: reading.windspeed_kmh,
        winddirection_deg: reading.winddirection_deg,
        precipitation_mm: reading.precipitation_mm,
        previous_temperature_c: previous_temperature,
        temperature_change: change,
        temperature_change_percent: change_percent,
        source: WEATHER_SOURCE.to_string(),
        metadata,
        created_at: clock.now(),
    }
}
