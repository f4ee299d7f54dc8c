pub mod supabase;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::PollError;
use crate::models::{MARKET_TABLE, MarketSnapshot, Snapshot, WEATHER_TABLE, WeatherSnapshot};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use self::supabase::SupabaseSink;

// ── Sink trait ────────────────────────────────────────────────────────────────

/// Destination for snapshots. The table follows from the snapshot variant.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn insert(&self, snapshot: &Snapshot) -> Result<(), PollError>;
}

/// Build the sink selected by configuration.
pub fn open_sink(config: &StorageConfig) -> Result<Arc<dyn SnapshotSink>> {
    match config.backend {
        StorageBackend::Supabase => {
            let url = config.url.as_deref().context("storage.url is not set")?;
            let key = config
                .service_role_key
                .as_deref()
                .context("storage.service_role_key is not set")?;
            Ok(Arc::new(SupabaseSink::new(url, key)?))
        }
        StorageBackend::Duckdb => {
            let repo = Repository::open(&config.db_path)?;
            if config.run_migrations {
                repo.run_migrations()?;
            }
            Ok(Arc::new(repo))
        }
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS market_snapshots (
    symbol          VARCHAR   NOT NULL,
    captured_at     TIMESTAMP NOT NULL,
    "interval"      VARCHAR   NOT NULL,
    price           DOUBLE    NOT NULL,
    open            DOUBLE,
    high            DOUBLE,
    low             DOUBLE,
    volume          DOUBLE,
    previous_close  DOUBLE,
    change          DOUBLE,
    change_percent  DOUBLE,
    source          VARCHAR   NOT NULL,
    metadata        VARCHAR,
    created_at      TIMESTAMP NOT NULL,
    PRIMARY KEY (symbol, captured_at)
);

CREATE TABLE IF NOT EXISTS weather_snapshots (
    location                    VARCHAR   NOT NULL,
    captured_at                 TIMESTAMP NOT NULL,
    temperature_c               DOUBLE,
    relative_humidity           DOUBLE,
    windspeed_kmh               DOUBLE,
    winddirection_deg           DOUBLE,
    precipitation_mm            DOUBLE,
    previous_temperature_c      DOUBLE,
    temperature_change          DOUBLE,
    temperature_change_percent  DOUBLE,
    source                      VARCHAR   NOT NULL,
    metadata                    VARCHAR,
    created_at                  TIMESTAMP NOT NULL,
    PRIMARY KEY (location, captured_at)
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_market_captured  ON market_snapshots (captured_at);
CREATE INDEX IF NOT EXISTS idx_weather_captured ON weather_snapshots (captured_at);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// Local DuckDB store. Re-inserting the same subject + instant overwrites.
pub struct Repository {
    conn: Mutex<Connection>,
}

/// Row counts and latest capture per table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub table: &'static str,
    pub rows: i64,
    pub subjects: i64,
    pub latest: Option<NaiveDateTime>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("DuckDB connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub fn upsert_market_snapshot(&self, s: &MarketSnapshot) -> Result<()> {
        let metadata = serde_json::to_string(&s.metadata)?;
        self.conn()?
            .execute(
                r#"INSERT INTO market_snapshots
                       (symbol, captured_at, "interval", price, open, high, low, volume,
                        previous_close, change, change_percent, source, metadata, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (symbol, captured_at) DO UPDATE SET
                       "interval"     = excluded."interval",
                       price          = excluded.price,
                       open           = excluded.open,
                       high           = excluded.high,
                       low            = excluded.low,
                       volume         = excluded.volume,
                       previous_close = excluded.previous_close,
                       change         = excluded.change,
                       change_percent = excluded.change_percent,
                       source         = excluded.source,
                       metadata       = excluded.metadata,
                       created_at     = excluded.created_at"#,
                params![
                    s.symbol,
                    s.captured_at.naive_utc(),
                    s.interval,
                    s.price,
                    s.open,
                    s.high,
                    s.low,
                    s.volume,
                    s.previous_close,
                    s.change,
                    s.change_percent,
                    s.source,
                    metadata,
                    s.created_at.naive_utc(),
                ],
            )
            .with_context(|| format!("upsert market snapshot {} {}", s.symbol, s.captured_at))?;
        Ok(())
    }

    pub fn upsert_weather_snapshot(&self, s: &WeatherSnapshot) -> Result<()> {
        let metadata = serde_json::to_string(&s.metadata)?;
        self.conn()?
            .execute(
                r#"INSERT INTO weather_snapshots
                       (location, captured_at, temperature_c, relative_humidity, windspeed_kmh,
                        winddirection_deg, precipitation_mm, previous_temperature_c,
                        temperature_change, temperature_change_percent, source, metadata, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (location, captured_at) DO UPDATE SET
                       temperature_c              = excluded.temperature_c,
                       relative_humidity          = excluded.relative_humidity,
                       windspeed_kmh              = excluded.windspeed_kmh,
                       winddirection_deg          = excluded.winddirection_deg,
                       precipitation_mm           = excluded.precipitation_mm,
                       previous_temperature_c     = excluded.previous_temperature_c,
                       temperature_change         = excluded.temperature_change,
                       temperature_change_percent = excluded.temperature_change_percent,
                       source                     = excluded.source,
                       metadata                   = excluded.metadata,
                       created_at                 = excluded.created_at"#,
                params![
                    s.location,
                    s.captured_at.naive_utc(),
                    s.temperature_c,
                    s.relative_humidity,
                    s.windspeed_kmh,
                    s.winddirection_deg,
                    s.precipitation_mm,
                    s.previous_temperature_c,
                    s.temperature_change,
                    s.temperature_change_percent,
                    s.source,
                    metadata,
                    s.created_at.naive_utc(),
                ],
            )
            .with_context(|| format!("upsert weather snapshot {} {}", s.location, s.captured_at))?;
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<Vec<TableStats>> {
        let conn = self.conn()?;
        let mut out = Vec::new();
        for (table, subject) in [(MARKET_TABLE, "symbol"), (WEATHER_TABLE, "location")] {
            let sql = format!(
                "SELECT COUNT(*), COUNT(DISTINCT {}), MAX(captured_at) FROM {}",
                subject, table
            );
            let (rows, subjects, latest) = conn
                .query_row(&sql, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
                .with_context(|| format!("stats for {}", table))?;
            out.push(TableStats {
                table,
                rows,
                subjects,
                latest,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl SnapshotSink for Repository {
    async fn insert(&self, snapshot: &Snapshot) -> Result<(), PollError> {
        let result = match snapshot {
            Snapshot::Market(s) => self.upsert_market_snapshot(s),
            Snapshot::Weather(s) => self.upsert_weather_snapshot(s),
        };
        result.map_err(|e| PollError::Persistence {
            table: snapshot.table(),
            reason: format!("{:#}", e),
        })
    }
}

// ── Test sink ─────────────────────────────────────────────────────────────────
