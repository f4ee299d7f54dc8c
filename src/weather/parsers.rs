//! Typed view over Open-Meteo forecast payloads.

use crate::error::PollError;
use crate::models::{RawPayload, WeatherReading};
use crate::normalize::{parse_utc, value_as_f64};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastPayload {
    #[serde(default)]
    pub latitude: Value,
    #[serde(default)]
    pub longitude: Value,
    pub current: Option<CurrentBlock>,
    pub hourly: Option<HourlyBlock>,
}

/// The `current` block: a `time` plus one value per requested variable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentBlock {
    pub time: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl CurrentBlock {
    fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(value_as_f64)
    }

    fn passthrough(&self, name: &str) -> Option<Value> {
        self.values.get(name).filter(|v| !v.is_null()).cloned()
    }
}

/// Parallel hourly arrays; only the time axis and temperature are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyBlock {
    #[serde(default)]
    pub time: Vec<Value>,
    #[serde(default)]
    pub temperature_2m: Vec<Value>,
}

impl ForecastPayload {
    pub fn from_raw(payload: RawPayload) -> Result<Self, PollError> {
        serde_json::from_value(payload)
            .map_err(|e| PollError::data_shape(format!("Unexpected Open-Meteo payload shape: {}", e)))
    }
}

/// Normalise the `current` block into a reading.
pub fn build_reading(payload: &ForecastPayload) -> Result<WeatherReading, PollError> {
    let current = payload
        .current
        .as_ref()
        .ok_or_else(|| PollError::data_shape("Open-Meteo current weather missing in payload"))?;

    let time = current
        .time
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PollError::data_shape("Open-Meteo payload missing current time field"))?;

    let captured_at = parse_utc(time)
        .ok_or_else(|| PollError::data_shape(format!("Unreadable Open-Meteo current time {:?}", time)))?;

    Ok(WeatherReading {
        captured_at,
        temperature_c: current.number("temperature_2m"),
        relative_humidity: current.number("relativehumidity_2m"),
        windspeed_kmh: current.number("windspeed_10m"),
        winddirection_deg: current.number("winddirection_10m"),
        precipitation_mm: current.number("precipitation"),
        weather_code: current.passthrough("weathercode"),
        is_day: current.passthrough("is_day"),
        latitude: value_as_f64(&payload.latitude),
        longitude: value_as_f64(&payload.longitude),
    })
}

/// Temperature one hour before the hourly slot that `current` falls in.
///
/// The comparison slot is the first hourly time equal to `current`, else the
/// slot just before the first later time, else the final slot. The value one
/// index before it (clamped at 0) is returned. Hourly times that cannot be
/// read never match.
pub fn extract_previous_hour_temperature(
    payload: &ForecastPayload,
    current: DateTime<Utc>,
) -> Option<f64> {
    let hourly = payload.hourly.as_ref()?;
    if hourly.time.is_empty() || hourly.temperature_2m.is_empty() {
        return None;
    }

    let comparison = hourly
        .time
        .iter()
        .enumerate()
        .find_map(|(i, t)| {
            let at = t.as_str().and_then(parse_utc)?;
            match at.cmp(&current) {
                Ordering::Equal => Some(i),
                Ordering::Greater => Some(i.saturating_sub(1)),
                Ordering::Less => None,
            }
        })
        .unwrap_or(hourly.time.len() - 1);

    let previous = comparison.saturating_sub(1);
    hourly.temperature_2m.get(previous).and_then(value_as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn hourly(times: &[&str], temps: Value) -> ForecastPayload {
        ForecastPayload::from_raw(json!({
            "hourly": {"time": times, "temperature_2m": temps}
        }))
        .unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_utc(s).unwrap()
    }

    const TIMES: [&str; 3] = ["2024-01-01T00:00", "2024-01-01T01:00", "2024-01-01T02:00"];

    #[test]
    fn test_exact_match_uses_index_before() {
        let payload = hourly(&TIMES, json!([10, 12, 14]));
        assert_eq!(extract_previous_hour_temperature(&payload, at("2024-01-01T02:00")), Some(12.0));
    }

    #[test]
    fn test_between_slots_steps_back_from_first_later_time() {
        let payload = hourly(&TIMES, json!([10, 12, 14]));
        assert_eq!(extract_previous_hour_temperature(&payload, at("2024-01-01T01:30")), Some(10.0));
    }

    #[test]
    fn test_after_all_slots_uses_last_index() {
        let payload = hourly(&TIMES, json!([10, 12, 14]));
        assert_eq!(extract_previous_hour_temperature(&payload, at("2024-01-01T05:00")), Some(12.0));
    }

    #[test]
    fn test_before_all_slots_clamps_to_zero() {
        let payload = hourly(&TIMES, json!([10, 12, 14]));
        assert_eq!(extract_previous_hour_temperature(&payload, at("2023-12-31T22:00")), Some(10.0));
    }

    #[test]
    fn test_missing_values_are_absent() {
        let short = hourly(&TIMES, json!([10]));
        assert_eq!(extract_previous_hour_temperature(&short, at("2024-01-01T02:00")), None);

        let null = hourly(&TIMES, json!([10, null, 14]));
        assert_eq!(extract_previous_hour_temperature(&null, at("2024-01-01T02:00")), None);

        let empty = hourly(&[], json!([]));
        assert_eq!(extract_previous_hour_temperature(&empty, at("2024-01-01T02:00")), None);

        let no_hourly = ForecastPayload::from_raw(json!({})).unwrap();
        assert_eq!(extract_previous_hour_temperature(&no_hourly, at("2024-01-01T02:00")), None);
    }

    #[test]
    fn test_build_reading_normalises_fields() {
        let payload = ForecastPayload::from_raw(json!({
            "latitude": 52.52,
            "longitude": 13.419998,
            "current": {
                "time": "2024-01-01T02:00",
                "interval": 900,
                "temperature_2m": 3.4,
                "relativehumidity_2m": "81",
                "is_day": 0,
                "precipitation": null,
                "weathercode": 3,
                "windspeed_10m": "fast",
                "winddirection_10m": 250
            }
        }))
        .unwrap();

        let reading = build_reading(&payload).unwrap();
        assert_eq!(reading.captured_at, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
        assert_eq!(reading.temperature_c, Some(3.4));
        assert_eq!(reading.relative_humidity, Some(81.0));
        assert_eq!(reading.precipitation_mm, None);
        assert_eq!(reading.windspeed_kmh, None);
        assert_eq!(reading.winddirection_deg, Some(250.0));
        assert_eq!(reading.weather_code, Some(json!(3)));
        assert_eq!(reading.is_day, Some(json!(0)));
        assert_eq!(reading.latitude, Some(52.52));
    }

    #[test]
    fn test_build_reading_requires_current_block_and_time() {
        let no_current = ForecastPayload::from_raw(json!({"hourly": {}})).unwrap();
        let err = build_reading(&no_current).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);
        assert!(err.to_string().contains("current weather missing"));

        let no_time = ForecastPayload::from_raw(json!({"current": {"temperature_2m": 1.0}})).unwrap();
        let err = build_reading(&no_time).unwrap_err();
        assert!(err.to_string().contains("missing current time"));
    }

    #[test]
    fn test_wrong_shape_is_data_shape() {
        let err = ForecastPayload::from_raw(json!({"hourly": "nope"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);
    }
}
