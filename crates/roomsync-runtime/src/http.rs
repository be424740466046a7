//! Shared HTTP plumbing for the History Service and Persistence Endpoint

use std::time::Duration;

use roomsync_core::errors::TransportError;
use roomsync_core::{Result, SyncError};
use url::Url;

/// Build the HTTP client used by both request/response collaborators
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::config_error(format!("cannot build HTTP client: {}", e)))
}

/// Translate a reqwest failure into a transport error
pub(crate) fn request_error(endpoint: &str, err: reqwest::Error, timeout: Duration) -> SyncError {
    if err.is_timeout() {
        SyncError::Transport(TransportError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        })
    } else if err.is_connect() {
        SyncError::connection_failed(endpoint, err.to_string())
    } else {
        SyncError::request_failed(endpoint, err.to_string())
    }
}

/// Parse a resolved endpoint and check its scheme
pub fn validate_endpoint(resolved: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(resolved).map_err(|e| {
        SyncError::Transport(TransportError::InvalidUrl {
            url: resolved.to_string(),
            reason: e.to_string(),
        })
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(SyncError::Transport(TransportError::InvalidUrl {
            url: resolved.to_string(),
            reason: format!("expected one of {:?}, got {}", schemes, url.scheme()),
        }));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("http://localhost:8080/rooms/a/messages", &["http", "https"]).is_ok());
        assert!(validate_endpoint("ws://localhost:8080/rooms/a/live", &["http", "https"]).is_err());
        assert!(validate_endpoint("not a url", &["ws"]).is_err());
    }
}
