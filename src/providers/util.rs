use crate::core::FetchError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;
use tracing::debug;

/// Maps a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, what: &str) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
            let retry_after = retry_after(headers);
            debug!(%status, ?retry_after, "Provider is throttling {}", what);
            FetchError::RateLimited { retry_after }
        }
        StatusCode::NOT_FOUND => FetchError::NotFound(what.to_string()),
        s if s.is_server_error() => FetchError::Network(format!("HTTP {s} for {what}")),
        s => FetchError::Unknown(format!("HTTP {s} for {what}")),
    }
}

/// Maps a transport-level failure. Timeouts raised by the client itself are
/// reported with the configured budget when known.
pub fn classify_transport(err: reqwest::Error, timeout: Option<Duration>) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout.unwrap_or_default())
    } else if err.is_decode() {
        FetchError::Malformed(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        FetchError::Network(err.to_string())
    } else {
        FetchError::Unknown(err.to_string())
    }
}

/// Only the delta-seconds form of `Retry-After` is honoured.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Provider numbers arrive as strings; blank means absent.
pub fn parse_optional_number(raw: Option<&str>, field: &str) -> Result<Option<f64>, FetchError> {
    match raw.map(str::trim) {
        None | Some("") | Some("--") => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| FetchError::Malformed(format!("{field} is not a number: '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, &headers, "000001"),
            FetchError::NotFound("000001".into())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &headers, "000001"),
            FetchError::Network(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, &headers, "000001"),
            FetchError::Unknown(_)
        ));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "000001"),
            FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn test_parse_optional_number() {
        assert_eq!(parse_optional_number(Some("1.0234"), "DWJZ").unwrap(), Some(1.0234));
        assert_eq!(parse_optional_number(Some(""), "JZZZL").unwrap(), None);
        assert_eq!(parse_optional_number(None, "JZZZL").unwrap(), None);
        assert!(parse_optional_number(Some("n/a"), "DWJZ").is_err());
    }
}
