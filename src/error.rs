//! Error types for the Dramabox core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by cause (caller input, transport, upstream status,
//! soft upstream rejection, token lifecycle) so the HTTP shell can map them to
//! responses and so the retry machinery can decide what is worth repeating.
//!
//! ## Taxonomy
//!
//! - `Validation` - bad caller input, never retried
//! - `Transport` - DNS / connection / timeout failures, always retryable
//! - `UpstreamStatus` - non-2xx from the upstream; retryable only for
//!   408, 429, 500, 502, 503 and 504
//! - `UpstreamRejected` - HTTP 200 carrying `success: false`; retried exactly
//!   once through a forced re-authentication, then terminal
//! - `TokenAcquisitionFailed` - terminal after retry exhaustion
//! - `NotFound` - terminal, maps to 404 at the boundary

use std::fmt;
use thiserror::Error;

/// Result type alias using our DramaboxError type
pub type Result<T> = std::result::Result<T, DramaboxError>;

/// HTTP statuses the upstream produces under load; everything else is terminal.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Cause of a transport-level failure (no upstream response was received)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Request or connect timeout
    Timeout,
    /// Host name could not be resolved
    Dns,
    /// Remote end refused the connection
    ConnectionRefused,
    /// Connection was reset mid-flight
    ConnectionReset,
    /// Any other I/O or protocol failure
    Network,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the Dramabox core
#[derive(Error, Debug)]
pub enum DramaboxError {
    // ===== Caller Errors =====

    /// Caller supplied an invalid argument (never retried)
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Requested resource does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Transport / Upstream Errors =====

    /// No upstream response was received
    #[error("Network error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Upstream answered with a non-success HTTP status
    #[error("Upstream returned HTTP {status} for {endpoint}: {message}")]
    UpstreamStatus {
        status: u16,
        /// Endpoint path that failed
        endpoint: String,
        message: String,
    },

    /// Upstream answered HTTP 200 with `success: false`
    #[error("Upstream rejected {endpoint}: {message}")]
    UpstreamRejected {
        endpoint: String,
        message: String,
    },

    /// Upstream payload could not be understood
    #[error("Invalid upstream response: {message}")]
    InvalidResponse {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    // ===== Token Errors =====

    /// Bootstrap call succeeded but did not carry a token and a user id
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// Token minting failed after all retry attempts
    #[error("Failed to acquire token for '{language}' after {attempts} attempt(s): {source}")]
    TokenAcquisitionFailed {
        language: String,
        attempts: u32,
        #[source]
        source: Box<DramaboxError>,
    },

    // ===== Retry / Configuration =====

    /// A retryable operation ran out of attempts
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DramaboxError>,
    },

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DramaboxError {
    fn from(err: reqwest::Error) -> Self {
        DramaboxError::Transport {
            kind: classify_reqwest_error(&err),
            message: err.to_string(),
        }
    }
}

/// Work out why reqwest failed by walking the error and its source chain.
fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    return TransportErrorKind::ConnectionReset
                }
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }

        let text = current.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportErrorKind::Dns;
        }
        if text.contains("connection refused") {
            return TransportErrorKind::ConnectionRefused;
        }
        if text.contains("connection reset") {
            return TransportErrorKind::ConnectionReset;
        }

        source = current.source();
    }

    TransportErrorKind::Network
}

// Helper methods for creating and classifying errors
impl DramaboxError {
    /// Create a Validation error with a message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        DramaboxError::Validation(message.into())
    }

    /// Create a NotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        DramaboxError::NotFound(resource.into())
    }

    /// Create a Transport error
    pub fn transport<S: Into<String>>(kind: TransportErrorKind, message: S) -> Self {
        DramaboxError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Create an UpstreamStatus error
    pub fn upstream_status<S: Into<String>>(status: u16, endpoint: &str, message: S) -> Self {
        DramaboxError::UpstreamStatus {
            status,
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Create an UpstreamRejected error
    pub fn rejected<S: Into<String>>(endpoint: &str, message: S) -> Self {
        DramaboxError::UpstreamRejected {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Create an InvalidResponse error
    pub fn invalid_response<S: Into<String>>(message: S, response_body: Option<String>) -> Self {
        DramaboxError::InvalidResponse {
            message: message.into(),
            response_body,
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DramaboxError::UpstreamStatus { status, .. } => Some(*status),
            DramaboxError::RetriesExhausted { source, .. }
            | DramaboxError::TokenAcquisitionFailed { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Check if error is retryable
    ///
    /// Returns `true` when no upstream response was received at all, or when
    /// the upstream answered with one of [`RETRYABLE_STATUS_CODES`].
    pub fn is_retryable(&self) -> bool {
        match self {
            DramaboxError::Transport { .. } => true,
            DramaboxError::UpstreamStatus { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Whether this failure means the upstream may have swapped our session.
    ///
    /// 502/503 and soft rejections force a token invalidation before the next
    /// attempt, even though the HTTP layer alone would not require it.
    pub fn forces_reauth(&self) -> bool {
        matches!(
            self,
            DramaboxError::UpstreamStatus { status: 502 | 503, .. }
                | DramaboxError::UpstreamRejected { .. }
        )
    }

    /// Stable machine-readable cause of this error
    pub fn category(&self) -> &'static str {
        match self {
            DramaboxError::Validation(_) => "validation",
            DramaboxError::NotFound(_) => "not_found",
            DramaboxError::Transport { kind, .. } => kind.as_str(),
            DramaboxError::UpstreamStatus { .. } => "http_status",
            DramaboxError::UpstreamRejected { .. } => "rejected",
            DramaboxError::InvalidResponse { .. } | DramaboxError::Json(_) => "invalid_response",
            DramaboxError::InvalidTokenResponse(_) | DramaboxError::TokenAcquisitionFailed { .. } => "token",
            DramaboxError::RetriesExhausted { source, .. } => source.category(),
            DramaboxError::InvalidConfiguration(_) => "configuration",
        }
    }

    /// Get user-friendly error message suitable for display
    ///
    /// The message names the cause (network vs DNS vs refused vs reset vs
    /// HTTP status) so callers can tell failures apart without parsing.
    pub fn user_message(&self) -> String {
        match self {
            DramaboxError::Validation(message) => format!("Invalid request: {}", message),
            DramaboxError::NotFound(resource) => format!("{} was not found.", resource),
            DramaboxError::Transport { kind, .. } => match kind {
                TransportErrorKind::Timeout => {
                    "The Dramabox server took too long to respond. Please try again.".to_string()
                }
                TransportErrorKind::Dns => {
                    "Could not resolve the Dramabox server address. Check the network connection.".to_string()
                }
                TransportErrorKind::ConnectionRefused => {
                    "The Dramabox server refused the connection. It may be down.".to_string()
                }
                TransportErrorKind::ConnectionReset => {
                    "The connection to the Dramabox server was reset. Please try again.".to_string()
                }
                TransportErrorKind::Network => {
                    "A network error occurred while contacting the Dramabox server.".to_string()
                }
            },
            DramaboxError::UpstreamStatus { status, .. } => match *status {
                429 => "The Dramabox server is rate limiting requests. Please wait and try again.".to_string(),
                500..=599 => format!("The Dramabox server is having problems (HTTP {}).", status),
                _ => format!("The Dramabox server rejected the request (HTTP {}).", status),
            },
            DramaboxError::UpstreamRejected { message, .. } => {
                format!("The Dramabox server declined the request: {}", message)
            }
            DramaboxError::InvalidResponse { .. } | DramaboxError::Json(_) => {
                "The Dramabox server sent a response that could not be read.".to_string()
            }
            DramaboxError::InvalidTokenResponse(_) | DramaboxError::TokenAcquisitionFailed { .. } => {
                "Could not open a session with the Dramabox server. Please try again later.".to_string()
            }
            DramaboxError::RetriesExhausted { source, attempts, .. } => {
                format!("{} (gave up after {} attempts)", source.user_message(), attempts)
            }
            DramaboxError::InvalidConfiguration(message) => format!("Server misconfigured: {}", message),
        }
    }
}
