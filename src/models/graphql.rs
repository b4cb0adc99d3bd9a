use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppSyncLinkError;

/// The JSON body of a GraphQL HTTP request or `start` frame payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlRequest {
    /// The query, mutation, or subscription document.
    pub query: String,
    /// Variables map; defaults to an empty object.
    #[serde(default)]
    pub variables: JsonValue,
}

impl GraphQlRequest {
    /// Build a request body from a document and optional variables.
    pub fn new(query: impl Into<String>, variables: Option<JsonValue>) -> Self {
        Self {
            query: query.into(),
            variables: variables.unwrap_or_else(|| JsonValue::Object(Default::default())),
        }
    }
}

/// Whether a GraphQL result carries a non-empty `errors` array.
pub fn has_graphql_errors(result: &JsonValue) -> bool {
    result
        .get("errors")
        .and_then(JsonValue::as_array)
        .is_some_and(|errors| !errors.is_empty())
}

/// Collapse runs of whitespace to single spaces.
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract a single human-readable message from a GraphQL error result.
///
/// A one-element `errors` array yields that error's message; anything else
/// yields the JSON-encoded array. Either way the message is
/// whitespace-normalized.
pub fn graphql_error_message(result: &JsonValue) -> String {
    let errors = match result.get("errors").and_then(JsonValue::as_array) {
        Some(errors) if !errors.is_empty() => errors,
        _ => return String::new(),
    };

    if errors.len() == 1 {
        let message = errors[0]
            .get("message")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        normalize_whitespace(message)
    } else {
        normalize_whitespace(&JsonValue::Array(errors.clone()).to_string())
    }
}

/// Build the error for a GraphQL result known to carry errors.
pub fn graphql_error(result: &JsonValue) -> AppSyncLinkError {
    AppSyncLinkError::GraphQl(graphql_error_message(result))
}
