use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Alpha Vantage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_interval")]
    pub interval: String,

    #[serde(default = "default_symbols", deserialize_with = "comma_list")]
    pub symbols: Vec<String>,

    #[serde(default = "default_market_timeout_secs")]
    pub timeout_secs: f64,
}

/// Open-Meteo configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    #[serde(default = "default_location_label")]
    pub location_label: String,

    #[serde(default = "default_hourly_variables", deserialize_with = "comma_list")]
    pub hourly_variables: Vec<String>,

    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Supabase,
    Duckdb,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Supabase project URL, e.g. `https://xyz.supabase.co`.
    pub url: Option<String>,

    pub service_role_key: Option<String>,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pause between symbols; the free Alpha Vantage tier allows 5 calls/minute.
    #[serde(default = "default_symbol_delay_secs")]
    pub symbol_delay_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_MARKET_TIMEOUT_SECS: f64 = 45.0;
const DEFAULT_WEATHER_TIMEOUT_SECS: f64 = 30.0;

fn default_market_base_url() -> String {
    "https://www.alphavantage.co/query".to_string()
}
fn default_weather_base_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}
fn default_interval() -> String {
    "5min".to_string()
}
fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string()]
}
fn default_market_timeout_secs() -> f64 {
    DEFAULT_MARKET_TIMEOUT_SECS
}
fn default_weather_timeout_secs() -> f64 {
    DEFAULT_WEATHER_TIMEOUT_SECS
}
fn default_location_label() -> String {
    "unknown".to_string()
}
fn default_hourly_variables() -> Vec<String> {
    ["temperature_2m", "relativehumidity_2m", "precipitation", "windspeed_10m"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/snapshots.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_symbol_delay_secs() -> u64 {
    15
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_base_url(),
            api_key: String::new(),
            interval: default_interval(),
            symbols: default_symbols(),
            timeout_secs: default_market_timeout_secs(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_base_url(),
            latitude: None,
            longitude: None,
            location_label: default_location_label(),
            hourly_variables: default_hourly_variables(),
            timeout_secs: default_weather_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: None,
            service_role_key: None,
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol_delay_secs: default_symbol_delay_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            weather: WeatherConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────────────────

fn positive_or(secs: f64, fallback: f64) -> Duration {
    let fallback = Duration::from_secs_f64(fallback);
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(fallback)
    } else {
        fallback
    }
}

impl MarketConfig {
    pub fn timeout(&self) -> Duration {
        positive_or(self.timeout_secs, DEFAULT_MARKET_TIMEOUT_SECS)
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        positive_or(self.timeout_secs, DEFAULT_WEATHER_TIMEOUT_SECS)
    }
}

impl PipelineConfig {
    pub fn symbol_delay(&self) -> Duration {
        Duration::from_secs(self.symbol_delay_secs)
    }
}

/// A TOML array, or one comma-separated string as environment variables give it.
fn comma_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(joined) => joined
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        OneOrMany::Many(items) => items,
    })
}

/// Trim, upper-case and drop empty entries: `" aapl, ,msft"` → `["AAPL", "MSFT"]`.
pub fn normalise_symbols<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|s| s.as_ref().split(','))
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Validation ───────────────────────────────────────────────────────────────

fn blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

impl AppConfig {
    /// Required settings for a market poll, reported by environment name.
    pub fn missing_for_market(&self) -> Vec<&'static str> {
        let mut missing = self.missing_for_storage();
        if self.market.api_key.trim().is_empty() {
            missing.push("SNAPSHOT__MARKET__API_KEY");
        }
        missing
    }

    /// Required settings for a weather poll, reported by environment name.
    pub fn missing_for_weather(&self) -> Vec<&'static str> {
        let mut missing = self.missing_for_storage();
        if self.weather.latitude.is_none() {
            missing.push("SNAPSHOT__WEATHER__LATITUDE");
        }
        if self.weather.longitude.is_none() {
            missing.push("SNAPSHOT__WEATHER__LONGITUDE");
        }
        missing
    }

    fn missing_for_storage(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.storage.backend == StorageBackend::Supabase {
            if blank(self.storage.url.as_deref()) {
                missing.push("SNAPSHOT__STORAGE__URL");
            }
            if blank(self.storage.service_role_key.as_deref()) {
                missing.push("SNAPSHOT__STORAGE__SERVICE_ROLE_KEY");
            }
        }
        missing
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// `SNAPSHOT__SECTION__KEY` overrides. Values stay strings until serde asks
/// for a number, so keys and labels keep leading zeros. List settings are
/// split by `comma_list`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("SNAPSHOT").separator("__")
}

impl AppConfig {
    /// Load configuration from `<dir>/default.toml`, `<dir>/local.toml` and
    /// `SNAPSHOT__*` environment overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(
                config::File::from(dir.join("default"))
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::from(dir.join("local"))
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(environment());

        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let cfg = builder.build().context("Failed to read configuration")?;
        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration values")?;
        app_cfg.market.symbols = normalise_symbols(&app_cfg.market.symbols);
        Ok(app_cfg)
    }
}
