//! Supabase (PostgREST) sink: one `POST /rest/v1/<table>` per snapshot.

use super::SnapshotSink;
use crate::error::PollError;
use crate::http::USER_AGENT;
use crate::models::Snapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

const INSERT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SupabaseSink {
    client: reqwest::Client,
    rest_url: Url,
    service_role_key: String,
}

impl SupabaseSink {
    pub fn new(project_url: &str, service_role_key: &str) -> Result<Self> {
        let base = Url::parse(project_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid Supabase URL {:?}", project_url))?;
        let rest_url = base
            .join("/rest/v1/")
            .context("Failed to derive Supabase REST URL")?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(INSERT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            rest_url,
            service_role_key: service_role_key.to_string(),
        })
    }

    pub fn table_url(&self, table: &str) -> Result<Url, url::ParseError> {
        self.rest_url.join(table)
    }

    /// The PostgREST insert for one snapshot, ready to send.
    pub fn insert_request(&self, snapshot: &Snapshot) -> Result<reqwest::Request, PollError> {
        let table = snapshot.table();
        let url = self.table_url(table).map_err(|e| persistence(table, e))?;
        self.client
            .post(url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "return=minimal")
            .json(snapshot)
            .build()
            .map_err(|e| persistence(table, e))
    }
}

fn persistence(table: &'static str, reason: impl ToString) -> PollError {
    PollError::Persistence {
        table,
        reason: reason.to_string(),
    }
}

/// Any 2xx is stored; everything else fails with the status and response body.
pub fn check_insert_status(table: &'static str, status: u16, body: &str) -> Result<(), PollError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(persistence(table, format!("HTTP {}: {}", status, body.trim())))
    }
}

#[async_trait]
impl SnapshotSink for SupabaseSink {
    async fn insert(&self, snapshot: &Snapshot) -> Result<(), PollError> {
        let table = snapshot.table();
        let request = self.insert_request(snapshot)?;
        debug!("POST {} ({})", request.url(), snapshot.subject());

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|e| persistence(table, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        check_insert_status(table, status.as_u16(), &body)
    }
}
