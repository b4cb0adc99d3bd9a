//! Error types for the appsync-link client library.

use thiserror::Error;

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AppSyncLinkError>;

/// All errors surfaced by the AppSync client.
///
/// The retry loop in [`crate::AppSyncClient::post`] distinguishes three
/// classes: errors that are never retried ([`GraphQl`](Self::GraphQl),
/// [`NonRetryableFetch`](Self::NonRetryableFetch)), errors that are retried
/// until attempts run out (everything else thrown by the HTTP layer), and
/// errors that only occur outside the retry envelope (construction,
/// subscription lifecycle).
#[derive(Debug, Error)]
pub enum AppSyncLinkError {
    /// No credentials were supplied and none could be resolved from the
    /// environment-default provider.
    #[error("No credentials provided: {0}")]
    Credentials(String),

    /// Invalid client configuration (bad URL, missing endpoint, ...).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The realtime handshake was rejected by the server
    /// (a `connection_error` frame).
    #[error("Connection to AppSync refused: {0}")]
    Connection(String),

    /// The client was closed while the operation was in flight.
    #[error("AppSync client has been closed")]
    ClientClosing,

    /// No keep-alive frame arrived within the negotiated interval; the
    /// connection is considered dead.
    #[error("Connection has become stale (did not receive a keep-alive message for {0} ms.)")]
    KeepAliveIntervalLapsed(u64),

    /// HTTP fetch failure that is worth retrying (status 429).
    #[error("Failed to fetch {uri}: {message}")]
    Fetch {
        /// Request URI.
        uri: String,
        /// Failure description.
        message: String,
    },

    /// HTTP fetch failure whose recurrence on retry is guaranteed
    /// (unexpected status code or content type).
    #[error("Failed to fetch {uri}: {message}")]
    NonRetryableFetch {
        /// Request URI.
        uri: String,
        /// Failure description.
        message: String,
    },

    /// No response arrived within the configured response timeout.
    #[error("Failed to fetch {uri}: Response time-out (after {timeout_ms} ms.)")]
    ResponseTimeout {
        /// Request URI.
        uri: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The backend returned a GraphQL-level `errors` array. Deterministic
    /// outcome of the request; never retried.
    #[error("{0}")]
    GraphQl(String),

    /// WebSocket transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A client-side timeout other than the HTTP response timeout
    /// (connect, subscription establishment).
    #[error("Timeout: {0}")]
    Timeout(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP failure from reqwest (connect refused, DNS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppSyncLinkError {
    /// Whether the POST retry loop should keep going after this error.
    ///
    /// GraphQL-level errors and non-retryable fetch errors abort the loop
    /// immediately; everything else counts against the remaining attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppSyncLinkError::GraphQl(_) | AppSyncLinkError::NonRetryableFetch { .. }
        )
    }
}
