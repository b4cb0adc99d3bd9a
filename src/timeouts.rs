//! Timeout configuration for the AppSync client.
//!
//! All durations in one place, with sensible defaults and presets for fast
//! or patient environments.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use appsync_link::AppSyncTimeouts;
//!
//! let timeouts = AppSyncTimeouts::builder()
//!     .response_timeout(Duration::from_secs(10))
//!     .build();
//! assert_eq!(timeouts.response_timeout, Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Timeouts applied by [`AppSyncClient`](crate::AppSyncClient).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppSyncTimeouts {
    /// Maximum time to establish and handshake the realtime connection.
    pub connection_timeout: Duration,
    /// Default response timeout for the first attempt of a POST.
    pub response_timeout: Duration,
    /// Maximum time to wait for a subscription to be acknowledged.
    pub subscribe_timeout: Duration,
    /// Keep-alive interval assumed until the server advertises one in its
    /// connection acknowledgement.
    pub keep_alive_timeout: Duration,
}

impl Default for AppSyncTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_millis(3000),
            subscribe_timeout: Duration::from_millis(5000),
            keep_alive_timeout: Duration::from_secs(300),
        }
    }
}

impl AppSyncTimeouts {
    pub fn builder() -> AppSyncTimeoutsBuilder {
        AppSyncTimeoutsBuilder::default()
    }

    /// Short timeouts for local development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(500),
            subscribe_timeout: Duration::from_secs(1),
            keep_alive_timeout: Duration::from_secs(30),
        }
    }

    /// Generous timeouts for slow links.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(15),
            subscribe_timeout: Duration::from_secs(15),
            keep_alive_timeout: Duration::from_secs(600),
        }
    }
}

/// Builder for [`AppSyncTimeouts`], starting from the defaults.
#[derive(Debug, Default)]
pub struct AppSyncTimeoutsBuilder {
    connection_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
    subscribe_timeout: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
}

impl AppSyncTimeoutsBuilder {
    pub fn connection_timeout(mut self, value: Duration) -> Self {
        self.connection_timeout = Some(value);
        self
    }

    pub fn response_timeout(mut self, value: Duration) -> Self {
        self.response_timeout = Some(value);
        self
    }

    pub fn subscribe_timeout(mut self, value: Duration) -> Self {
        self.subscribe_timeout = Some(value);
        self
    }

    pub fn keep_alive_timeout(mut self, value: Duration) -> Self {
        self.keep_alive_timeout = Some(value);
        self
    }

    pub fn build(self) -> AppSyncTimeouts {
        let defaults = AppSyncTimeouts::default();
        AppSyncTimeouts {
            connection_timeout: self.connection_timeout.unwrap_or(defaults.connection_timeout),
            response_timeout: self.response_timeout.unwrap_or(defaults.response_timeout),
            subscribe_timeout: self.subscribe_timeout.unwrap_or(defaults.subscribe_timeout),
            keep_alive_timeout: self.keep_alive_timeout.unwrap_or(defaults.keep_alive_timeout),
        }
    }
}
