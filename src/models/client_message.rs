use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Control frames sent from client to server over the realtime socket.
///
/// Serialized with a `type` discriminator per the `graphql-ws` sub-protocol
/// AppSync speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame after the socket opens; the server answers with
    /// `connection_ack` or `connection_error`.
    ConnectionInit,

    /// Register a subscription under `id`.
    Start {
        /// Client-chosen subscription identifier.
        id: String,
        /// GraphQL request plus authorization extensions.
        payload: StartPayload,
    },

    /// Tear down the subscription registered under `id`; the server answers
    /// with a `complete` frame for the same id.
    Stop {
        /// The subscription identifier to stop.
        id: String,
    },
}

/// Payload of a `start` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    /// The GraphQL request, JSON-encoded as a string (AppSync requires the
    /// inner request to be double-encoded).
    pub data: String,
    /// Authorization extensions carrying the signed or token headers.
    pub extensions: StartExtensions,
}

/// `extensions` object of a `start` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExtensions {
    /// Signed (or token) headers authorizing this subscription.
    pub authorization: BTreeMap<String, String>,
}
