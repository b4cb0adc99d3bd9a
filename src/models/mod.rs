//! Data models for the appsync-link client library.
//!
//! Defines the realtime control-frame types and the GraphQL request/response
//! helpers shared by the HTTP and WebSocket paths.

pub mod client_message;
pub mod graphql;
pub mod server_message;

pub use client_message::{ClientMessage, StartExtensions, StartPayload};
pub use graphql::{graphql_error, graphql_error_message, has_graphql_errors, GraphQlRequest};
pub(crate) use graphql::normalize_whitespace;
pub use server_message::ServerMessage;
