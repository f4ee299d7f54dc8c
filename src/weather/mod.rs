pub mod parsers;

use crate::config::WeatherConfig;
use crate::error::PollError;
use crate::http::{FetchRequest, Provider, RetryingFetcher};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

pub use self::parsers::{ForecastPayload, build_reading, extract_previous_hour_temperature};

pub static OPEN_METEO: Provider = Provider {
    name: "open-meteo",
    advisory_fields: &["reason"],
};

pub const CURRENT_VARIABLES: [&str; 7] = [
    "temperature_2m",
    "relativehumidity_2m",
    "is_day",
    "precipitation",
    "weathercode",
    "windspeed_10m",
    "winddirection_10m",
];

/// Swappable forecast source abstraction.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Current reading plus an hourly series reaching one day back, in one call.
    async fn fetch_forecast(&self) -> Result<ForecastPayload, PollError>;
}

pub struct OpenMeteoAdapter {
    fetcher: RetryingFetcher,
    config: WeatherConfig,
}

impl OpenMeteoAdapter {
    pub fn new(fetcher: RetryingFetcher, config: &WeatherConfig) -> Self {
        Self {
            fetcher,
            config: config.clone(),
        }
    }

    /// Hourly variables requested: configured ones plus temperature, sorted, deduplicated.
    pub fn hourly_variables(&self) -> Vec<String> {
        self.config
            .hourly_variables
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .chain(std::iter::once("temperature_2m".to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn forecast_request(&self) -> Result<FetchRequest, PollError> {
        let (Some(latitude), Some(longitude)) = (self.config.latitude, self.config.longitude) else {
            return Err(PollError::Transport {
                provider: OPEN_METEO.name,
                message: "latitude/longitude not configured".to_string(),
            });
        };

        Ok(
            FetchRequest::new(&OPEN_METEO, &self.config.base_url, self.config.timeout())
                .param("latitude", latitude.to_string())
                .param("longitude", longitude.to_string())
                .param("current", CURRENT_VARIABLES.join(","))
                .param("hourly", self.hourly_variables().join(","))
                .param("past_days", "1")
                .param("timezone", "UTC"),
        )
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoAdapter {
    async fn fetch_forecast(&self) -> Result<ForecastPayload, PollError> {
        let request = self.forecast_request()?;
        let payload = ForecastPayload::from_raw(self.fetcher.fetch(&request).await?)?;
        debug!(
            "{}: forecast with {} hourly slots",
            self.config.location_label,
            payload.hourly.as_ref().map(|h| h.time.len()).unwrap_or(0)
        );
        Ok(payload)
    }
}
