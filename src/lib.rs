//! Client library for AWS AppSync GraphQL APIs.
//!
//! Queries and mutations are executed as SigV4-signed HTTPS POSTs with
//! exponential-backoff retry; subscriptions are multiplexed over a single
//! shared WebSocket connection speaking the `graphql-ws` realtime protocol.
//!
//! # Quick start
//!
//! ```no_run
//! use appsync_link::AppSyncClient;
//!
//! # async fn demo() -> appsync_link::Result<()> {
//! let client = AppSyncClient::builder()
//!     .graphql_url("https://abc123.appsync-api.eu-west-1.amazonaws.com/graphql")
//!     .build()?;
//!
//! // Query over HTTPS.
//! let data = client
//!     .post("query { listItems { id name } }", None)
//!     .await?;
//! println!("items: {}", data["listItems"]);
//!
//! // Subscribe over the realtime connection and drain events.
//! let mut subscription = client
//!     .subscribe("subscription { onItemChanged { id } }", None)
//!     .await?;
//! while let Some(event) = subscription.next().await {
//!     println!("changed: {}", event?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Credentials come from the builder, a custom [`ProvideCredentials`]
//! implementation, or the standard AWS environment variables. Cognito
//! user-pool tokens are supported per call via
//! [`PostOptions`] and [`AppSyncClient::subscribe_with_token`].

mod client;
mod connection;
mod credentials;
mod endpoints;
mod error;
mod event_handlers;
mod http;
mod models;
mod retry;
mod signer;
mod subscription;
mod timeouts;

pub use client::{AppSyncClient, AppSyncClientBuilder, PostOptions};
pub use credentials::{Credentials, EnvCredentials, ProvideCredentials, StaticCredentials};
pub use endpoints::Endpoints;
pub use error::{AppSyncLinkError, Result};
pub use event_handlers::{DisconnectReason, EventHandlers};
pub use models::{GraphQlRequest, graphql_error_message, has_graphql_errors};
pub use retry::{generate_retry_strategy, RetryAttempt, RetryStrategyOptions};
pub use signer::RequestSigner;
pub use subscription::Subscription;
pub use timeouts::{AppSyncTimeouts, AppSyncTimeoutsBuilder};
