use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Control frames received from the server over the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; carries the keep-alive interval the client must
    /// monitor from now on.
    ConnectionAck {
        /// Ack payload (keep-alive interval).
        payload: Option<ConnectionAckPayload>,
    },

    /// Handshake rejected; the payload is a GraphQL-style error result.
    ConnectionError {
        /// Error payload, shape `{ errors: [{ message, ... }] }`.
        payload: Option<JsonValue>,
    },

    /// Keep-alive heartbeat; resets the staleness timer.
    Ka,

    /// The subscription identified by `id` is now established.
    StartAck {
        /// Subscription identifier being acknowledged.
        id: String,
    },

    /// A published event for the subscription identified by `id`.
    Data {
        /// Subscription identifier the payload belongs to.
        id: String,
        /// GraphQL result (may itself carry an `errors` array).
        payload: JsonValue,
    },

    /// Subscription-level error (bad query, unauthorized, ...).
    Error {
        /// Subscription identifier, when the error is tied to one.
        id: Option<String>,
        /// GraphQL-style error result.
        payload: JsonValue,
    },

    /// The subscription identified by `id` has been torn down server-side.
    Complete {
        /// Subscription identifier that completed.
        id: String,
    },
}

/// Payload of a `connection_ack` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAckPayload {
    /// How long the client may go without a `ka` frame before it must
    /// consider the connection dead, in milliseconds.
    #[serde(rename = "connectionTimeoutMs")]
    pub connection_timeout_ms: u64,
}
