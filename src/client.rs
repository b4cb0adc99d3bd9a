//! The AppSync client and its builder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::{ConnCmd, ConnectionManager};
use crate::credentials::{Credentials, EnvCredentials, ProvideCredentials, StaticCredentials};
use crate::endpoints::Endpoints;
use crate::error::{AppSyncLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::http::fetch_json;
use crate::models::{graphql_error, has_graphql_errors, GraphQlRequest};
use crate::retry::{generate_retry_strategy, RetryAttempt, RetryStrategyOptions};
use crate::signer::RequestSigner;
use crate::subscription::{Subscription, EVENT_CHANNEL_CAPACITY};
use crate::timeouts::AppSyncTimeouts;

/// Subscription identifiers wrap at this bound before being stringified.
const SUBSCRIPTION_ID_BOUND: u64 = 9_007_199_254_740_991;

/// Authentication for a single request: SigV4 signing by default, or a
/// caller-supplied Cognito bearer token.
enum RequestAuth<'a> {
    Signed,
    Token(&'a str),
}

/// Per-call options for [`AppSyncClient::post_with_options`].
#[derive(Default)]
pub struct PostOptions {
    /// Response timeout of the first attempt. Defaults to the client's
    /// configured response timeout.
    pub response_timeout: Option<Duration>,
    /// Replaces the derived retry strategy.
    pub retry_strategy: Option<Vec<RetryAttempt>>,
    /// Cognito user-pool token; bypasses SigV4 signing when set.
    pub auth_token: Option<String>,
}

/// Client for an AWS AppSync GraphQL API.
///
/// Queries and mutations go over signed HTTPS POSTs with retry; subscriptions
/// share one lazily-established realtime WebSocket connection.
///
/// # Examples
///
/// ```no_run
/// use appsync_link::AppSyncClient;
///
/// # async fn demo() -> appsync_link::Result<()> {
/// let client = AppSyncClient::builder()
///     .graphql_url("https://abc123.appsync-api.eu-west-1.amazonaws.com/graphql")
///     .build()?;
///
/// let data = client.post("query { listItems { id } }", None).await?;
/// println!("{}", data);
/// # Ok(())
/// # }
/// ```
pub struct AppSyncClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    signer: RequestSigner,
    timeouts: AppSyncTimeouts,
    connection: ConnectionManager,
    next_subscription_id: AtomicU64,
}

impl AppSyncClient {
    pub fn builder() -> AppSyncClientBuilder {
        AppSyncClientBuilder::default()
    }

    /// Execute a query or mutation with the default options.
    ///
    /// Resolves with the `data` field of the GraphQL response.
    pub async fn post(&self, query: &str, variables: Option<Value>) -> Result<Value> {
        self.post_with_options(query, variables, PostOptions::default())
            .await
    }

    /// Execute a query or mutation.
    ///
    /// The first attempt runs immediately with the caller's response timeout.
    /// Transient failures (429, network errors, response timeouts) are
    /// retried per the strategy, sleeping each attempt's delay first.
    /// GraphQL-level errors and non-retryable fetch errors abort at once.
    pub async fn post_with_options(
        &self,
        query: &str,
        variables: Option<Value>,
        options: PostOptions,
    ) -> Result<Value> {
        let body = serde_json::to_string(&GraphQlRequest::new(query, variables))?;
        let response_timeout = options
            .response_timeout
            .unwrap_or(self.timeouts.response_timeout);
        let strategy = options.retry_strategy.unwrap_or_else(|| {
            generate_retry_strategy(&RetryStrategyOptions {
                retries: 2,
                base_response_timeout: response_timeout.mul_f64(1.3),
                response_timeout_factor: 2.5,
                delay_factor: 4.0,
                ..Default::default()
            })
        });

        let mut attempts = vec![RetryAttempt {
            delay: Duration::ZERO,
            response_timeout,
        }];
        attempts.extend(strategy);
        let total = attempts.len();

        let auth = match &options.auth_token {
            Some(token) => RequestAuth::Token(token),
            None => RequestAuth::Signed,
        };

        let mut last_error = None;
        for (attempt, RetryAttempt { delay, response_timeout }) in
            attempts.into_iter().enumerate()
        {
            if attempt > 0 {
                // last_error is always set once a retry is reached.
                if let Some(e) = &last_error {
                    log::warn!(
                        "[graphql] attempt {}/{} failed ({}), retrying in {} ms",
                        attempt,
                        total,
                        e,
                        delay.as_millis()
                    );
                }
                tokio::time::sleep(delay).await;
            }

            // Headers are rebuilt per attempt so a failed credential lookup
            // is retried like any other transient error.
            let result = match self.request_headers(&body, &auth).await {
                Ok(headers) => {
                    fetch_json(
                        &self.http,
                        &self.endpoints.graphql_url,
                        &headers,
                        Some(body.clone()),
                        Some(response_timeout),
                    )
                    .await
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(mut response) => {
                    if has_graphql_errors(&response) {
                        return Err(graphql_error(&response));
                    }
                    return Ok(response
                        .get_mut("data")
                        .map(Value::take)
                        .unwrap_or(Value::Null));
                },
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        // The loop always has at least one attempt.
        Err(last_error.unwrap_or(AppSyncLinkError::ClientClosing))
    }

    /// Start a subscription with a client-generated identifier.
    ///
    /// Resolves once the server acknowledges the start frame; events are then
    /// pulled from the returned [`Subscription`].
    pub async fn subscribe(&self, query: &str, variables: Option<Value>) -> Result<Subscription> {
        let id = self.next_subscription_id();
        self.start_subscription(id, query, variables, RequestAuth::Signed)
            .await
    }

    /// Like [`subscribe`](Self::subscribe), authenticating with a Cognito
    /// user-pool token instead of SigV4.
    pub async fn subscribe_with_token(
        &self,
        query: &str,
        variables: Option<Value>,
        token: &str,
    ) -> Result<Subscription> {
        let id = self.next_subscription_id();
        self.start_subscription(id, query, variables, RequestAuth::Token(token))
            .await
    }

    /// Like [`subscribe`](Self::subscribe), with a caller-chosen identifier.
    pub async fn subscribe_with_id(
        &self,
        id: impl Into<String>,
        query: &str,
        variables: Option<Value>,
    ) -> Result<Subscription> {
        self.start_subscription(id.into(), query, variables, RequestAuth::Signed)
            .await
    }

    /// Close the realtime connection, failing all active subscriptions with
    /// [`AppSyncLinkError::ClientClosing`]. Idempotent. HTTP requests are
    /// unaffected.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    fn next_subscription_id(&self) -> String {
        let n = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        (n % SUBSCRIPTION_ID_BOUND).to_string()
    }

    async fn start_subscription(
        &self,
        id: String,
        query: &str,
        variables: Option<Value>,
        auth: RequestAuth<'_>,
    ) -> Result<Subscription> {
        let data = serde_json::to_string(&GraphQlRequest::new(query, variables))?;
        let (authorization, connection_headers) = match &auth {
            RequestAuth::Signed => (
                self.signer.sign(&data, false).await?,
                self.signer.sign("{}", true).await?,
            ),
            RequestAuth::Token(token) => (
                self.subscribe_token_headers(token),
                self.subscribe_token_headers(token),
            ),
        };

        // A connection that drained its registry between handle() and the
        // start command shows up as a dead channel; one reconnect covers it.
        for reconnect in 0..2 {
            let handle = self.connection.handle(&connection_headers).await?;
            let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let (ack_tx, ack_rx) = oneshot::channel();

            let cmd = ConnCmd::Start {
                id: id.clone(),
                data: data.clone(),
                authorization: authorization.clone(),
                event_tx,
                ack_tx,
            };
            if handle.send(cmd).await.is_err() {
                if reconnect == 0 {
                    continue;
                }
                return Err(AppSyncLinkError::ClientClosing);
            }

            return match tokio::time::timeout(self.timeouts.subscribe_timeout, ack_rx).await {
                Ok(Ok(Ok(()))) => {
                    log::debug!("[realtime] subscription {} established", id);
                    Ok(Subscription::new(id, event_rx, handle.sender()))
                },
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_)) => Err(AppSyncLinkError::ClientClosing),
                Err(_) => {
                    // Withdraw the pending registration so no stray frames
                    // linger after the timeout.
                    let _ = handle
                        .send(ConnCmd::Stop {
                            id: id.clone(),
                            done_tx: None,
                        })
                        .await;
                    Err(AppSyncLinkError::Timeout(format!(
                        "Subscription {} not acknowledged within {} ms",
                        id,
                        self.timeouts.subscribe_timeout.as_millis()
                    )))
                },
            };
        }
        Err(AppSyncLinkError::ClientClosing)
    }

    async fn request_headers(
        &self,
        body: &str,
        auth: &RequestAuth<'_>,
    ) -> Result<std::collections::BTreeMap<String, String>> {
        match auth {
            RequestAuth::Signed => self.signer.sign(body, false).await,
            RequestAuth::Token(token) => Ok(self.token_headers(token)),
        }
    }

    /// Realtime authentication object for Cognito user-pool tokens. AppSync
    /// accepts only the API host and the token on the WebSocket path.
    fn subscribe_token_headers(&self, token: &str) -> std::collections::BTreeMap<String, String> {
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("host".to_string(), self.endpoints.graphql_host().to_string());
        headers.insert("Authorization".to_string(), token.to_string());
        headers
    }

    /// Header set for Cognito user-pool authentication.
    fn token_headers(&self, token: &str) -> std::collections::BTreeMap<String, String> {
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert(
            "aws_appsync_region".to_string(),
            self.endpoints.region.clone(),
        );
        headers.insert(
            "aws_appsync_authenticationType".to_string(),
            "AMAZON_COGNITO_USER_POOLS".to_string(),
        );
        headers.insert("Authorization".to_string(), token.to_string());
        headers
    }
}

/// Builder for [`AppSyncClient`].
#[derive(Default)]
pub struct AppSyncClientBuilder {
    graphql_url: Option<String>,
    realtime_url: Option<String>,
    region: Option<String>,
    credentials: Option<Credentials>,
    credentials_provider: Option<Arc<dyn ProvideCredentials>>,
    timeouts: AppSyncTimeouts,
    event_handlers: EventHandlers,
}

impl AppSyncClientBuilder {
    /// GraphQL HTTPS endpoint. Required.
    pub fn graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = Some(url.into());
        self
    }

    /// Realtime WebSocket endpoint. Derived from the GraphQL URL when unset.
    pub fn realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Signing region. Derived from the GraphQL hostname when unset.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Fixed AWS credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Credential source resolved before each signed request. Takes
    /// precedence over [`credentials`](Self::credentials).
    pub fn credentials_provider(mut self, provider: Arc<dyn ProvideCredentials>) -> Self {
        self.credentials_provider = Some(provider);
        self
    }

    pub fn timeouts(mut self, timeouts: AppSyncTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build the client.
    ///
    /// Without explicit credentials the standard AWS environment variables
    /// are used; they are checked here so misconfiguration fails fast.
    pub fn build(self) -> Result<AppSyncClient> {
        let graphql_url = self.graphql_url.ok_or_else(|| {
            AppSyncLinkError::Configuration("graphql_url is required".to_string())
        })?;
        let endpoints = Endpoints::new(
            &graphql_url,
            self.realtime_url.as_deref(),
            self.region.as_deref(),
        )?;

        let provider: Arc<dyn ProvideCredentials> = match (self.credentials_provider, self.credentials) {
            (Some(provider), _) => provider,
            (None, Some(credentials)) => Arc::new(StaticCredentials::new(credentials)),
            (None, None) => {
                EnvCredentials::resolve()?;
                Arc::new(EnvCredentials)
            },
        };

        let http = reqwest::Client::builder()
            .connect_timeout(self.timeouts.connection_timeout)
            .build()?;
        let signer = RequestSigner::new(provider, &endpoints);
        let connection =
            ConnectionManager::new(endpoints.clone(), self.timeouts, self.event_handlers);

        Ok(AppSyncClient {
            http,
            endpoints,
            signer,
            timeouts: self.timeouts,
            connection,
            next_subscription_id: AtomicU64::new(1),
        })
    }
}
