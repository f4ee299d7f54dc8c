use thiserror::Error;

/// Coarse error families used to decide retry and reporting behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, 429, 5xx and provider rate-limit advisories.
    TransientNetwork,
    /// Other 4xx, transport failures, malformed requests, provider rejections.
    PermanentRequest,
    /// An otherwise successful response lacks an expected series or field.
    DataShape,
    /// The storage sink rejected an insert.
    PersistenceFailure,
}

/// Everything that can go wrong while polling a single subject.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rate limited (status {status})")]
    RateLimited { provider: &'static str, status: u16 },

    #[error("{provider} server error (status {status})")]
    ServerError { provider: &'static str, status: u16 },

    #[error("{provider} rate limit advisory: {message}")]
    RateLimitAdvisory { provider: &'static str, message: String },

    #[error("{provider} HTTP error: {status}")]
    HttpStatus { provider: &'static str, status: u16 },

    #[error("{provider} rejected request: {message}")]
    Rejected { provider: &'static str, message: String },

    #[error("{provider} request failed: {message}")]
    Transport { provider: &'static str, message: String },

    #[error("{provider} request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: &'static str,
        attempts: u32,
        last: Box<PollError>,
    },

    #[error("{0}")]
    DataShape(String),

    #[error("insert into {table} failed: {reason}")]
    Persistence { table: &'static str, reason: String },
}

impl PollError {
    pub fn data_shape(message: impl Into<String>) -> Self {
        Self::DataShape(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::RateLimitAdvisory { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::TransientNetwork,
            Self::HttpStatus { .. } | Self::Rejected { .. } | Self::Transport { .. } => {
                ErrorKind::PermanentRequest
            }
            Self::DataShape(_) => ErrorKind::DataShape,
            Self::Persistence { .. } => ErrorKind::PersistenceFailure,
        }
    }

    /// True when another attempt may succeed. An escalated
    /// `RetriesExhausted` is transient in kind but is never retried again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork && !matches!(self, Self::RetriesExhausted { .. })
    }
}
