use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped provider response body. Never leaves the adapter that fetched it.
pub type RawPayload = Value;

pub const MARKET_TABLE: &str = "market_snapshots";
pub const WEATHER_TABLE: &str = "weather_snapshots";

// ── Provider records ──────────────────────────────────────────────────────────

/// Most recent intraday bar for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct IntradayPoint {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest and second-latest daily closes.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyComparisonPoint {
    pub latest_date: NaiveDate,
    pub latest_close: f64,
    /// Absent when the provider returned a single daily bar.
    pub previous_close: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub captured_at: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub windspeed_kmh: Option<f64>,
    pub winddirection_deg: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub weather_code: Option<Value>,
    pub is_day: Option<Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    #[serde(with = "utc_seconds")]
    pub captured_at: DateTime<Utc>,
    pub interval: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub previous_close: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub source: String,
    pub metadata: Map<String, Value>,
    #[serde(with = "utc_seconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: String,
    #[serde(with = "utc_seconds")]
    pub captured_at: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub windspeed_kmh: Option<f64>,
    pub winddirection_deg: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub previous_temperature_c: Option<f64>,
    pub temperature_change: Option<f64>,
    pub temperature_change_percent: Option<f64>,
    pub source: String,
    pub metadata: Map<String, Value>,
    #[serde(with = "utc_seconds")]
    pub created_at: DateTime<Utc>,
}

/// The persisted unit, one per subject per poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Market(MarketSnapshot),
    Weather(WeatherSnapshot),
}

impl Snapshot {
    pub fn table(&self) -> &'static str {
        match self {
            Snapshot::Market(_) => MARKET_TABLE,
            Snapshot::Weather(_) => WEATHER_TABLE,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            Snapshot::Market(s) => &s.symbol,
            Snapshot::Weather(s) => &s.location,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Snapshot::Market(s) => s.captured_at,
            Snapshot::Weather(s) => s.captured_at,
        }
    }
}

impl From<MarketSnapshot> for Snapshot {
    fn from(s: MarketSnapshot) -> Self {
        Snapshot::Market(s)
    }
}

impl From<WeatherSnapshot> for Snapshot {
    fn from(s: WeatherSnapshot) -> Self {
        Snapshot::Weather(s)
    }
}

/// Canonical text form for instants: `2024-01-01T02:00:00Z`.
pub fn format_utc(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub mod utc_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_utc(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_serialises_instants_as_utc_text() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let snap = Snapshot::from(WeatherSnapshot {
            location: "berlin".into(),
            captured_at: at,
            temperature_c: Some(3.5),
            relative_humidity: None,
            windspeed_kmh: None,
            winddirection_deg: None,
            precipitation_mm: None,
            previous_temperature_c: None,
            temperature_change: None,
            temperature_change_percent: None,
            source: "open-meteo".into(),
            metadata: Map::new(),
            created_at: at,
        });

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["captured_at"], "2024-01-01T02:00:00Z");
        assert_eq!(json["temperature_change"], Value::Null);
        assert_eq!(snap.table(), WEATHER_TABLE);
        assert_eq!(snap.subject(), "berlin");
    }
}
