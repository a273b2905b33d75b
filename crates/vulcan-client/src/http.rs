//! Shared HTTP plumbing for the reqwest-based fetchers.

use reqwest::{Client, StatusCode};

use vulcan_core::config::FetchSettings;
use vulcan_core::error::AppError;

/// Builds the HTTP client all fetchers share the configuration of:
/// crawler User-Agent and a hard per-request timeout.
pub(crate) fn build_client(settings: &FetchSettings) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.http_timeout())
        .build()
        .map_err(|e| AppError::Network(e.to_string()))
}

/// Maps a reqwest transport error onto the application taxonomy.
pub(crate) fn map_transport_error(e: &reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::Network(format!("Connection failed: {}", e))
    } else {
        AppError::Network(e.to_string())
    }
}

/// Rejects non-success statuses, distinguishing throttling from the rest.
pub(crate) fn check_status(status: StatusCode) -> Result<(), AppError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Err(AppError::RateLimitExceeded)
    } else {
        Err(AppError::RemoteService {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unrecognized status")
                .to_string(),
        })
    }
}
