//! Low-level HTTP execution.
//!
//! [`fetch_json`] performs a single HTTP exchange against a pooled
//! [`reqwest::Client`] and classifies every failure as either retryable
//! ([`AppSyncLinkError::Fetch`], [`AppSyncLinkError::ResponseTimeout`]) or
//! non-retryable ([`AppSyncLinkError::NonRetryableFetch`]). Retry decisions
//! live one layer up.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;

use crate::error::{AppSyncLinkError, Result};
use crate::models::normalize_whitespace;

/// Execute a single request and parse the JSON response body.
///
/// Sends a POST when `body` is given, a GET otherwise. The optional
/// `response_timeout` covers the entire exchange from send to fully read
/// body. A 429 status maps to a retryable error, any other non-200 status
/// and any non-JSON content type are not retried.
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &Url,
    headers: &BTreeMap<String, String>,
    body: Option<String>,
    response_timeout: Option<Duration>,
) -> Result<Value> {
    match response_timeout {
        Some(timeout) => tokio::time::timeout(timeout, execute(client, url, headers, body))
            .await
            .map_err(|_| AppSyncLinkError::ResponseTimeout {
                uri: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?,
        None => execute(client, url, headers, body).await,
    }
}

async fn execute(
    client: &reqwest::Client,
    url: &Url,
    headers: &BTreeMap<String, String>,
    body: Option<String>,
) -> Result<Value> {
    let mut request = match body {
        Some(body) => client.post(url.clone()).body(body),
        None => client.get(url.clone()),
    };
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(|e| AppSyncLinkError::Fetch {
        uri: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = response.bytes().await.map_err(|e| AppSyncLinkError::Fetch {
        uri: url.to_string(),
        message: e.to_string(),
    })?;

    if status.as_u16() == 429 {
        return Err(AppSyncLinkError::Fetch {
            uri: url.to_string(),
            message: "Too many requests".to_string(),
        });
    }
    if status.as_u16() != 200 {
        return Err(AppSyncLinkError::NonRetryableFetch {
            uri: url.to_string(),
            message: with_body(
                format!("Status code is {}, expected 200", status.as_u16()),
                &bytes,
            ),
        });
    }
    if !is_json_content_type(&content_type) {
        return Err(AppSyncLinkError::NonRetryableFetch {
            uri: url.to_string(),
            message: with_body(
                format!(
                    "Content-type is \"{}\", expected \"application/json\"",
                    content_type
                ),
                &bytes,
            ),
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| AppSyncLinkError::NonRetryableFetch {
        uri: url.to_string(),
        message: format!("Invalid JSON in response body: {}", e),
    })
}

/// Accepts `application/json`, optionally followed by a charset parameter,
/// case-insensitively.
fn is_json_content_type(content_type: &str) -> bool {
    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        return false;
    }
    parts.all(|param| {
        let param = param.trim();
        param.is_empty()
            || param
                .split_once('=')
                .map(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
                .unwrap_or(false)
    })
}

fn with_body(message: String, bytes: &[u8]) -> String {
    let body = normalize_whitespace(&String::from_utf8_lossy(bytes));
    if body.is_empty() {
        message
    } else {
        format!("{}: {}", message, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_matching() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=UTF-8"));
        assert!(is_json_content_type("Application/JSON;charset=utf-8"));
        assert!(!is_json_content_type("text/html"));
        assert!(!is_json_content_type("application/json-patch+json"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn body_snippets_are_whitespace_normalized() {
        let message = with_body("Status code is 500, expected 200".to_string(), b"oh\n  no");
        assert_eq!(message, "Status code is 500, expected 200: oh no");

        let bare = with_body("Status code is 500, expected 200".to_string(), b"  ");
        assert_eq!(bare, "Status code is 500, expected 200");
    }
}
