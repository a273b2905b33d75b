use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur in the Vulcan
/// application. It uses the `thiserror` crate for ergonomic error handling and
/// automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// Some errors automatically convert from their source types using the `#[from]` attribute:
/// - `std::io::Error` → `AppError::Filesystem`
/// - `serde_json::Error` → `AppError::Serialization`
///
/// # Examples
///
/// ```no_run
/// use vulcan_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Configuration("missing identity".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Network or connection error.
    ///
    /// This error occurs when a request fails due to connectivity issues,
    /// DNS resolution failures, or the remote host being unreachable.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote operation timed out.
    ///
    /// This error occurs when an external call (HTTP request or subprocess)
    /// takes longer than the configured timeout.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Remote service responded with a non-success status.
    ///
    /// Server-side statuses (5xx) are transient and retryable; client-side
    /// statuses (4xx) indicate a problem with the request itself.
    #[error("Remote service error ({status}): {message}")]
    RemoteService { status: u16, message: String },

    /// Rate limit imposed by the remote service was hit.
    ///
    /// This error occurs when the remote side answers 429 despite local
    /// limiting. Local quota waits are scheduled delays, never errors.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// External command exited with a failure status.
    ///
    /// Carries the captured stderr of the command. Not retried as a class:
    /// exit codes do not distinguish transient failures from permanent ones,
    /// so adapters map known-transient output to `Network` before
    /// constructing this variant.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Local filesystem operation failed.
    ///
    /// Permission and disk-space problems are not retryable; retrying cannot
    /// fix them and risks compounding partial writes.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    ///
    /// This error occurs when parsing API responses or writing run reports.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed.
    ///
    /// This error occurs when a source identity that must be a URL cannot
    /// be parsed as one.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration input is unusable.
    ///
    /// Malformed settings, source declarations, or descriptors are rejected
    /// before any remote call is made.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Network(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Operation timed out after {} seconds.\n   The remote service may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::RemoteService { status, message } => {
                if *status == 401 || *status == 403 {
                    format!(
                        "Access denied ({}): {}\n   Check your credentials (e.g. HUGGINGFACE_TOKEN).",
                        status, message
                    )
                } else if *status >= 500 {
                    format!(
                        "Remote service error ({}): {}\n   The service may be temporarily unavailable. Try again later.",
                        status, message
                    )
                } else {
                    format!("Remote service error ({}): {}", status, message)
                }
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::CommandFailed(msg) => {
                if msg.contains("not found") || msg.contains("does not exist") {
                    format!(
                        "Command failed: {}\n   Check the source URL; the remote may be private or deleted.",
                        msg
                    )
                } else {
                    format!("Command failed: {}", msg)
                }
            }
            AppError::Filesystem(e) => {
                format!(
                    "Filesystem error: {}\n   Check permissions and free space under the output directory.",
                    e
                )
            }
            AppError::Configuration(msg) => {
                format!(
                    "Configuration error: {}\n   Review the sources file and command-line flags.",
                    msg
                )
            }
            AppError::InvalidUrl(url) => {
                format!("Invalid URL: {}\n   Example: https://github.com/owner/repo", url)
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// Transient remote failures (network, timeout, throttling, 5xx) are
    /// worth retrying with backoff; everything else fails fast.
    ///
    /// # Examples
    ///
    /// ```
    /// use vulcan_core::error::AppError;
    ///
    /// // Network errors are retryable
    /// let err = AppError::Network("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// // Configuration problems are NOT retryable
    /// let err = AppError::Configuration("missing identity".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::RemoteService { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
