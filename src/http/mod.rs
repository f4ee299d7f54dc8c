//! Provider HTTP plumbing: request description, a swappable transport, and
//! the retrying fetcher built on top of it.

pub mod classify;
pub mod retry;

use crate::error::PollError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

pub use self::retry::{RetryPolicy, RetryingFetcher};

/// Static description of an upstream provider.
#[derive(Debug)]
pub struct Provider {
    pub name: &'static str,
    /// Top-level fields a 2xx payload uses to carry errors or notices.
    pub advisory_fields: &'static [&'static str],
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A parameterised GET against one provider.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub provider: &'static Provider,
    pub base_url: String,
    pub params: Vec<(&'static str, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(provider: &'static Provider, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            params: Vec::new(),
            timeout,
        }
    }

    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn url(&self) -> Result<Url, PollError> {
        Url::parse_with_params(&self.base_url, &self.params).map_err(|e| PollError::Transport {
            provider: self.provider.name,
            message: format!("invalid request URL {:?}: {}", self.base_url, e),
        })
    }

    /// Loggable form of the query, with the API key redacted.
    pub fn describe(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| {
                if *k == "apikey" {
                    format!("{}=***", k)
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout(String),
    Other(String),
}

/// Single-shot GET. Retrying and classification live above this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<TransportResponse, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        };

        let resp = self
            .inner
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify)?;
        Ok(TransportResponse { status, body })
    }
}

pub const USER_AGENT: &str = concat!("snapshot-etl/", env!("CARGO_PKG_VERSION"));

// ── Test transport ────────────────────────────────────────────────────────────

#[cfg(test)]
pub mod testing {
    use super::*;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of outcomes and records every call.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: Mutex<Vec<(Url, Instant)>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn json(body: Value) -> Result<TransportResponse, TransportError> {
            Self::status(200, &body.to_string())
        }

        pub fn status(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            })
        }

        pub fn timeout() -> Result<TransportResponse, TransportError> {
            Err(TransportError::Timeout("operation timed out".into()))
        }

        pub fn broken() -> Result<TransportResponse, TransportError> {
            Err(TransportError::Other("connection refused".into()))
        }

        pub fn urls(&self) -> Vec<Url> {
            self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Time elapsed between consecutive calls.
        pub fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1].1 - w[0].1).collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &Url, _timeout: Duration) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push((url.clone(), Instant::now()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }
}
