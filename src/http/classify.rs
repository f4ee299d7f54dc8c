//! Outcome classification for a single provider attempt.

use super::TransportError;
use crate::error::PollError;
use serde_json::Value;

pub fn classify_transport(provider: &'static str, err: TransportError) -> PollError {
    match err {
        TransportError::Timeout(_) => PollError::Timeout { provider },
        TransportError::Other(message) => PollError::Transport { provider, message },
    }
}

/// 2xx passes; 429 and 5xx are transient; every other status is final.
pub fn classify_status(provider: &'static str, status: u16) -> Result<(), PollError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(PollError::RateLimited { provider, status }),
        500.. => Err(PollError::ServerError { provider, status }),
        _ => Err(PollError::HttpStatus { provider, status }),
    }
}

/// First advisory field present in a successful payload, if any.
pub fn find_advisory<'a>(payload: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| payload.get(*f))
        .filter_map(Value::as_str)
        .find(|msg| !msg.trim().is_empty())
}

/// Keyword check for rate-limit notices delivered with a 200.
///
/// Alpha Vantage has no structured rate-limit code, so this matches on
/// "frequency" / "limit" in the message text. It breaks if the wording
/// changes; replace it once the provider exposes a code.
pub fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("frequency") || lower.contains("limit")
}

pub fn classify_advisory(provider: &'static str, message: &str) -> PollError {
    if mentions_rate_limit(message) {
        PollError::RateLimitAdvisory {
            provider,
            message: message.to_string(),
        }
    } else {
        PollError::Rejected {
            provider,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_status_classes() {
        assert!(classify_status("p", 200).is_ok());
        assert!(classify_status("p", 204).is_ok());
        assert!(classify_status("p", 429).unwrap_err().is_retryable());
        assert!(classify_status("p", 500).unwrap_err().is_retryable());
        assert!(classify_status("p", 503).unwrap_err().is_retryable());
        for status in [400, 401, 403, 404, 422] {
            let err = classify_status("p", status).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PermanentRequest, "status {status}");
        }
    }

    #[test]
    fn test_transport_errors() {
        let timeout = classify_transport("p", TransportError::Timeout("slow".into()));
        assert!(timeout.is_retryable());
        let refused = classify_transport("p", TransportError::Other("refused".into()));
        assert!(!refused.is_retryable());
        assert_eq!(refused.kind(), ErrorKind::PermanentRequest);
    }

    #[test]
    fn test_advisory_lookup_skips_absent_and_blank_fields() {
        let fields = ["Note", "Information", "Error Message"];
        assert_eq!(find_advisory(&json!({"Time Series (Daily)": {}}), &fields), None);
        assert_eq!(find_advisory(&json!({"Note": "  "}), &fields), None);
        assert_eq!(
            find_advisory(&json!({"Information": "slow down"}), &fields),
            Some("slow down")
        );
    }

    #[test]
    fn test_advisory_keywords() {
        let note = "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute.";
        assert!(classify_advisory("alphavantage", note).is_retryable());
        let daily = "You have reached the daily rate LIMIT of 25 requests.";
        assert!(classify_advisory("alphavantage", daily).is_retryable());

        let invalid = "Invalid API call. Please retry or visit the documentation.";
        let err = classify_advisory("alphavantage", invalid);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Invalid API call"));
    }
}
