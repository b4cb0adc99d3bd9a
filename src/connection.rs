//! Realtime WebSocket connection management.
//!
//! A single WebSocket carries all active subscriptions. The connection is
//! established lazily on the first subscribe, shared by every subsequent
//! one, and torn down when the last subscription goes away. All socket I/O
//! happens in one background task; the rest of the crate talks to it
//! through a command channel.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::endpoints::Endpoints;
use crate::error::{AppSyncLinkError, Result};
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::models::{normalize_whitespace, ClientMessage, ServerMessage, StartExtensions, StartPayload};
use crate::timeouts::AppSyncTimeouts;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CMD_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted by the background connection task.
pub(crate) enum ConnCmd {
    /// Register a subscription and send its start frame.
    Start {
        id: String,
        /// JSON-encoded GraphQL request, carried verbatim in the start frame.
        data: String,
        authorization: BTreeMap<String, String>,
        event_tx: mpsc::Sender<Result<Value>>,
        ack_tx: oneshot::Sender<Result<()>>,
    },
    /// Remove a subscription, sending a stop frame if it was acknowledged.
    Stop {
        id: String,
        done_tx: Option<oneshot::Sender<()>>,
    },
    /// Tear down the connection and fail all remaining subscriptions.
    Close,
}

/// Cheap handle to a live connection task.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnCmd>,
}

impl ConnectionHandle {
    pub(crate) async fn send(&self, cmd: ConnCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| AppSyncLinkError::ClientClosing)
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<ConnCmd> {
        self.cmd_tx.clone()
    }

    fn is_live(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Owns the (at most one) realtime connection and hands out handles to it.
pub(crate) struct ConnectionManager {
    endpoints: Endpoints,
    timeouts: AppSyncTimeouts,
    handlers: EventHandlers,
    current: Mutex<Option<ConnectionHandle>>,
}

impl ConnectionManager {
    pub(crate) fn new(
        endpoints: Endpoints,
        timeouts: AppSyncTimeouts,
        handlers: EventHandlers,
    ) -> Self {
        Self {
            endpoints,
            timeouts,
            handlers,
            current: Mutex::new(None),
        }
    }

    /// Return a handle to the live connection, establishing one if needed.
    ///
    /// The lock is held across the whole handshake, so concurrent callers
    /// wait for the first connect instead of racing their own.
    pub(crate) async fn handle(
        &self,
        auth_headers: &BTreeMap<String, String>,
    ) -> Result<ConnectionHandle> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            if handle.is_live() {
                return Ok(handle.clone());
            }
        }

        let handle = self.establish(auth_headers).await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Tear down the live connection, if any. Idempotent.
    pub(crate) async fn close(&self) {
        let handle = self.current.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.send(ConnCmd::Close).await;
        }
    }

    async fn establish(&self, auth_headers: &BTreeMap<String, String>) -> Result<ConnectionHandle> {
        let url = connection_url(&self.endpoints, auth_headers)?;
        log::debug!("[realtime] connecting to {}", self.endpoints.realtime_url);

        let connect = async {
            let mut request = url.as_str().into_client_request().map_err(|e| {
                AppSyncLinkError::Connection(format!("Invalid connection request: {}", e))
            })?;
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                "graphql-ws".parse().map_err(|_| {
                    AppSyncLinkError::Connection("Invalid subprotocol header".to_string())
                })?,
            );

            let (mut ws, _) = connect_async(request)
                .await
                .map_err(|e| AppSyncLinkError::Connection(e.to_string()))?;

            let init = serde_json::to_string(&ClientMessage::ConnectionInit)?;
            ws.send(Message::Text(init.into()))
                .await
                .map_err(|e| AppSyncLinkError::Connection(e.to_string()))?;

            // The ack may be preceded by keep-alive frames.
            loop {
                let msg = ws.next().await.ok_or_else(|| {
                    AppSyncLinkError::Connection(
                        "Socket closed before connection was acknowledged".to_string(),
                    )
                })?;
                let msg = msg.map_err(|e| AppSyncLinkError::Connection(e.to_string()))?;
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::ConnectionAck { payload }) => {
                        let keep_alive = payload
                            .map(|p| Duration::from_millis(p.connection_timeout_ms))
                            .unwrap_or(self.timeouts.keep_alive_timeout);
                        return Ok((ws, keep_alive));
                    },
                    Ok(ServerMessage::ConnectionError { payload }) => {
                        let detail = payload
                            .map(|p| normalize_whitespace(&p.to_string()))
                            .unwrap_or_else(|| "connection_error".to_string());
                        return Err(AppSyncLinkError::Connection(detail));
                    },
                    Ok(ServerMessage::Ka) => continue,
                    Ok(_) | Err(_) => {
                        log::debug!("[realtime] ignoring pre-ack frame: {}", text);
                    },
                }
            }
        };

        let (ws, keep_alive) = tokio::time::timeout(self.timeouts.connection_timeout, connect)
            .await
            .map_err(|_| {
                AppSyncLinkError::Timeout(format!(
                    "Realtime connection not acknowledged within {} ms",
                    self.timeouts.connection_timeout.as_millis()
                ))
            })??;

        log::info!(
            "[realtime] connection established (keep-alive {} ms)",
            keep_alive.as_millis()
        );
        self.handlers.emit_connect();

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let handlers = self.handlers.clone();
        tokio::spawn(connection_task(ws, cmd_rx, keep_alive, handlers));
        Ok(ConnectionHandle { cmd_tx })
    }
}

/// Build the connection URL with the base64-encoded auth header and payload
/// query parameters the realtime endpoint expects.
fn connection_url(
    endpoints: &Endpoints,
    auth_headers: &BTreeMap<String, String>,
) -> Result<reqwest::Url> {
    let header = BASE64.encode(serde_json::to_string(auth_headers)?);
    let payload = BASE64.encode(serde_json::to_string("{}")?);

    let mut url = endpoints.realtime_url.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair("header", &header)
        .append_pair("payload", &payload);
    Ok(url)
}

struct SubEntry {
    event_tx: mpsc::Sender<Result<Value>>,
    ack_tx: Option<oneshot::Sender<Result<()>>>,
    /// Set once the server acknowledges the start frame. Only acknowledged
    /// subscriptions get a stop frame on removal.
    established: bool,
    /// Present while a stop frame is awaiting its `complete`; resolved when
    /// the server confirms the teardown.
    stop_done: Option<oneshot::Sender<()>>,
}

/// Background task owning the WebSocket. Exits when the registry drains,
/// the client closes, the keep-alive lapses or the socket fails.
async fn connection_task(
    mut ws: WsStream,
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    keep_alive: Duration,
    handlers: EventHandlers,
) {
    let mut registry: HashMap<String, SubEntry> = HashMap::new();
    let mut ka_deadline = Instant::now() + keep_alive;
    let mut seen_first_start = false;

    let reason = loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCmd::Start { id, data, authorization, event_tx, ack_tx }) => {
                    seen_first_start = true;
                    let frame = ClientMessage::Start {
                        id: id.clone(),
                        payload: StartPayload {
                            data,
                            extensions: StartExtensions { authorization },
                        },
                    };
                    match send_frame(&mut ws, &frame).await {
                        Ok(()) => {
                            registry.insert(id, SubEntry {
                                event_tx,
                                ack_tx: Some(ack_tx),
                                established: false,
                                stop_done: None,
                            });
                        },
                        Err(e) => {
                            let _ = ack_tx.send(Err(e));
                            break DisconnectReason::ConnectionLost;
                        },
                    }
                },
                Some(ConnCmd::Stop { id, done_tx }) => {
                    // An acknowledged subscription is stopped on the wire and
                    // lingers until the server confirms with `complete`; one
                    // the server never learned about is dropped right away.
                    let established = registry.get(&id).is_some_and(|e| e.established);
                    if established {
                        let frame = ClientMessage::Stop { id: id.clone() };
                        match send_frame(&mut ws, &frame).await {
                            Ok(()) => {
                                if let Some(entry) = registry.get_mut(&id) {
                                    entry.stop_done = done_tx;
                                }
                                continue;
                            },
                            Err(_) => {
                                log::debug!("[realtime] stop frame for {} not sent", id);
                                registry.remove(&id);
                            },
                        }
                    } else if registry.remove(&id).is_some() {
                        log::debug!("[realtime] subscription {} removed before ack", id);
                    }
                    if let Some(done_tx) = done_tx {
                        let _ = done_tx.send(());
                    }
                    if registry.is_empty() && seen_first_start {
                        break DisconnectReason::ClientClosed;
                    }
                },
                // Channel closed counts as a close request.
                Some(ConnCmd::Close) | None => break DisconnectReason::ClientClosed,
            },

            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(server_msg) => {
                            if let Some(reason) = route_message(
                                server_msg,
                                &mut registry,
                                &mut ka_deadline,
                                keep_alive,
                                &handlers,
                            ).await {
                                break reason;
                            }
                            if registry.is_empty() && seen_first_start {
                                break DisconnectReason::ClientClosed;
                            }
                        },
                        Err(e) => log::warn!("[realtime] unparsable frame ({}): {}", e, text),
                    }
                },
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::ConnectionLost,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    log::warn!("[realtime] socket error: {}", e);
                    break DisconnectReason::ConnectionLost;
                },
            },

            _ = sleep_until(ka_deadline) => break DisconnectReason::KeepAliveLapsed,
        }
    };

    shutdown(ws, registry, reason, keep_alive, &handlers).await;
}

/// Dispatch an incoming frame to its subscription. Returns a disconnect
/// reason when the frame ends the connection.
async fn route_message(
    msg: ServerMessage,
    registry: &mut HashMap<String, SubEntry>,
    ka_deadline: &mut Instant,
    keep_alive: Duration,
    handlers: &EventHandlers,
) -> Option<DisconnectReason> {
    match msg {
        ServerMessage::Ka => {
            *ka_deadline = Instant::now() + keep_alive;
        },
        ServerMessage::StartAck { id } => mark_established(registry, &id),
        ServerMessage::Data { id, payload } => {
            let event = if crate::models::has_graphql_errors(&payload) {
                Err(crate::models::graphql_error(&payload))
            } else {
                Ok(payload)
            };
            deliver(registry, &id, event).await;
        },
        ServerMessage::Error { id: Some(id), payload } => {
            let error = subscription_error(&payload);
            if let Some(entry) = registry.get_mut(&id) {
                if let Some(ack_tx) = entry.ack_tx.take() {
                    // Failed before acknowledgement: fail the subscribe call
                    // and drop the registration.
                    let _ = ack_tx.send(Err(error));
                    registry.remove(&id);
                    return None;
                }
            }
            deliver(registry, &id, Err(error)).await;
        },
        ServerMessage::Error { id: None, payload } => {
            let error = subscription_error(&payload);
            log::warn!("[realtime] connection-level error: {}", error);
            handlers.emit_error(&error);
        },
        ServerMessage::Complete { id } => {
            // Dropping the entry closes the event channel, ending the
            // consumer's stream cleanly.
            if let Some(entry) = registry.remove(&id) {
                if let Some(stop_done) = entry.stop_done {
                    let _ = stop_done.send(());
                }
                log::debug!("[realtime] subscription {} completed by server", id);
            }
        },
        ServerMessage::ConnectionAck { .. } | ServerMessage::ConnectionError { .. } => {
            log::debug!("[realtime] unexpected handshake frame after ack");
        },
    }
    None
}

fn mark_established(registry: &mut HashMap<String, SubEntry>, id: &str) {
    match registry.get_mut(id) {
        Some(entry) => {
            entry.established = true;
            if let Some(ack_tx) = entry.ack_tx.take() {
                let _ = ack_tx.send(Ok(()));
            }
        },
        None => log::debug!("[realtime] start_ack for unknown id {}", id),
    }
}

/// Forward an event to the subscription's channel. A gone receiver means the
/// consumer lost interest, so the registration is dropped.
async fn deliver(registry: &mut HashMap<String, SubEntry>, id: &str, event: Result<Value>) {
    let Some(entry) = registry.get(id) else {
        log::debug!("[realtime] frame for unknown id {}", id);
        return;
    };
    if entry.event_tx.send(event).await.is_err() {
        registry.remove(id);
        log::debug!("[realtime] consumer for {} is gone", id);
    }
}

fn subscription_error(payload: &Value) -> AppSyncLinkError {
    if crate::models::has_graphql_errors(payload) {
        crate::models::graphql_error(payload)
    } else {
        AppSyncLinkError::GraphQl(normalize_whitespace(&payload.to_string()))
    }
}

async fn send_frame(ws: &mut WsStream, frame: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| AppSyncLinkError::WebSocket(e.to_string()))
}

async fn shutdown(
    mut ws: WsStream,
    registry: HashMap<String, SubEntry>,
    reason: DisconnectReason,
    keep_alive: Duration,
    handlers: &EventHandlers,
) {
    let error = match reason {
        DisconnectReason::ClientClosed => AppSyncLinkError::ClientClosing,
        DisconnectReason::KeepAliveLapsed => {
            AppSyncLinkError::KeepAliveIntervalLapsed(keep_alive.as_millis() as u64)
        },
        DisconnectReason::ConnectionLost => {
            AppSyncLinkError::Connection("Realtime connection lost".to_string())
        },
    };

    if !registry.is_empty() {
        log::warn!(
            "[realtime] closing with {} active subscription(s): {}",
            registry.len(),
            reason
        );
        for entry in registry.into_values() {
            if let Some(ack_tx) = entry.ack_tx {
                let _ = ack_tx.send(Err(clone_close_error(&error)));
            } else {
                let _ = entry.event_tx.try_send(Err(clone_close_error(&error)));
            }
        }
    }

    if !matches!(reason, DisconnectReason::ClientClosed) {
        handlers.emit_error(&error);
    }
    handlers.emit_disconnect(reason);

    let _ = ws.close(None).await;
    log::info!("[realtime] connection closed");
}

// The close error is fanned out to every subscription, so it has to be
// reproducible rather than moved.
fn clone_close_error(error: &AppSyncLinkError) -> AppSyncLinkError {
    match error {
        AppSyncLinkError::ClientClosing => AppSyncLinkError::ClientClosing,
        AppSyncLinkError::KeepAliveIntervalLapsed(ms) => {
            AppSyncLinkError::KeepAliveIntervalLapsed(*ms)
        },
        other => AppSyncLinkError::Connection(other.to_string()),
    }
}
