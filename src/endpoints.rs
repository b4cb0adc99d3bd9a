//! Endpoint configuration for the AppSync client.
//!
//! Holds the GraphQL (HTTPS) endpoint, the realtime (WebSocket) endpoint,
//! and the signing region. The realtime endpoint and region can be derived
//! from a standard AppSync GraphQL URL of the form
//! `https://<api-id>.appsync-api.<region>.amazonaws.com/graphql`.

use reqwest::Url;

use crate::error::{AppSyncLinkError, Result};

/// Immutable endpoint configuration, created once at client construction.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// The HTTPS endpoint queries and mutations are POSTed to.
    pub graphql_url: Url,
    /// The WebSocket endpoint subscriptions connect to.
    pub realtime_url: Url,
    /// Signing region for SigV4 authorization.
    pub region: String,
}

impl Endpoints {
    /// Build the configuration, deriving the region and realtime endpoint
    /// from the GraphQL URL where they are not given explicitly.
    pub fn new(
        graphql_url: &str,
        realtime_url: Option<&str>,
        region: Option<&str>,
    ) -> Result<Self> {
        let graphql_url = Url::parse(graphql_url.trim()).map_err(|e| {
            AppSyncLinkError::Configuration(format!("Invalid GraphQL URL '{}': {}", graphql_url, e))
        })?;

        let host = graphql_url
            .host_str()
            .ok_or_else(|| {
                AppSyncLinkError::Configuration("GraphQL URL must include a host".to_string())
            })?
            .to_string();
        let labels: Vec<&str> = host.split('.').collect();

        let region = match region {
            Some(region) => region.to_string(),
            // Standard AppSync hostnames read <api-id>.appsync-api.<region>.amazonaws.com
            None => labels
                .get(2)
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    AppSyncLinkError::Configuration(format!(
                        "Cannot derive region from hostname '{}'; set the region explicitly",
                        host
                    ))
                })?,
        };

        let realtime_url = match realtime_url {
            Some(url) => Url::parse(url.trim()).map_err(|e| {
                AppSyncLinkError::Configuration(format!("Invalid realtime URL '{}': {}", url, e))
            })?,
            None => {
                let api_id = labels.first().copied().unwrap_or_default();
                let derived = format!(
                    "wss://{}.appsync-realtime-api.{}.amazonaws.com/graphql",
                    api_id, region
                );
                Url::parse(&derived).map_err(|e| {
                    AppSyncLinkError::Configuration(format!(
                        "Failed to derive realtime URL: {}",
                        e
                    ))
                })?
            },
        };

        match realtime_url.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(AppSyncLinkError::Configuration(format!(
                    "Realtime URL must use ws:// or wss:// (found '{}')",
                    other
                )));
            },
        }

        Ok(Self {
            graphql_url,
            realtime_url,
            region,
        })
    }

    /// Hostname of the GraphQL endpoint (signed into every request).
    pub fn graphql_host(&self) -> &str {
        self.graphql_url.host_str().unwrap_or_default()
    }
}
