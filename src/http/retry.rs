use super::classify::{classify_advisory, classify_status, classify_transport, find_advisory};
use super::{FetchRequest, Transport};
use crate::error::PollError;
use crate::models::RawPayload;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

pub const MAX_ATTEMPTS: u32 = 5;
pub const BACKOFF_BASE: Duration = Duration::from_secs(10);

/// Linear backoff: after failed attempt `n` the fetcher sleeps `base * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_base: BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Sleeps between attempts, in order. One fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let base = self.backoff_base;
        (1..self.max_attempts.max(1)).map(move |n| base * n)
    }

    /// Wait preceding 1-indexed attempt `k`: zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt.saturating_sub(1)
    }
}

pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// GET the request, retrying transient failures per the policy.
    ///
    /// Final errors surface on first sight. Transient ones that outlast the
    /// policy come back as `RetriesExhausted` wrapping the last cause.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<RawPayload, PollError> {
        let url = request.url()?;
        let provider = request.provider.name;
        let policy = self.policy;
        let attempts = AtomicU32::new(0);

        let this = self;
        let url_ref = &url;
        let counter = &attempts;
        let action = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            this.attempt(request, url_ref, attempt)
        };

        let should_retry = move |err: &PollError| {
            let attempt = counter.load(Ordering::SeqCst);
            let retry = err.is_retryable();
            if retry && attempt < policy.max_attempts {
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    provider,
                    attempt,
                    policy.max_attempts,
                    err,
                    policy.delay_before(attempt + 1)
                );
            }
            retry
        };

        match RetryIf::spawn(policy.delays(), action, should_retry).await {
            Ok(payload) => Ok(payload),
            Err(err) if err.is_retryable() => Err(PollError::RetriesExhausted {
                provider,
                attempts: attempts.load(Ordering::SeqCst),
                last: Box::new(err),
            }),
            Err(err) => Err(err),
        }
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        url: &Url,
        attempt: u32,
    ) -> Result<RawPayload, PollError> {
        let provider = request.provider;
        debug!(
            "GET {} {} (attempt {}/{})",
            provider.name,
            request.describe(),
            attempt,
            self.policy.max_attempts
        );

        let response = self
            .transport
            .get(url, request.timeout)
            .await
            .map_err(|e| classify_transport(provider.name, e))?;

        classify_status(provider.name, response.status)?;

        let payload: RawPayload = serde_json::from_str(&response.body).map_err(|e| {
            PollError::data_shape(format!("{} returned a non-JSON body: {}", provider.name, e))
        })?;

        if let Some(message) = find_advisory(&payload, provider.advisory_fields) {
            return Err(classify_advisory(provider.name, message));
        }

        Ok(payload)
    }
}
