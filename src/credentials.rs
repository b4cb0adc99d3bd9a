//! AWS credential types and providers.
//!
//! Requests are signed with SigV4, so every signed call needs an access key
//! pair (and, for temporary credentials, a session token). Credentials are
//! resolved through the [`ProvideCredentials`] trait so callers can plug in
//! rotating sources; static and environment-backed providers are built in.

use std::env;

use async_trait::async_trait;

use crate::error::{AppSyncLinkError, Result};

/// A set of AWS credentials used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Present for temporary (STS) credentials.
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

// The secret key never appears in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_deref().map(|_| "***"))
            .finish()
    }
}

/// Source of AWS credentials, resolved before each signed request so that
/// rotating credentials are picked up without rebuilding the client.
#[async_trait]
pub trait ProvideCredentials: Send + Sync {
    async fn provide(&self) -> Result<Credentials>;
}

/// Provider returning a fixed set of credentials.
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ProvideCredentials for StaticCredentials {
    async fn provide(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Provider reading the standard `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
/// and `AWS_SESSION_TOKEN` environment variables on every call.
pub struct EnvCredentials;

impl EnvCredentials {
    /// Read the environment once, failing if the key pair is incomplete.
    pub fn resolve() -> Result<Credentials> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            AppSyncLinkError::Credentials("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            AppSyncLinkError::Credentials("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok();
        Ok(Credentials::new(access_key_id, secret_access_key, session_token))
    }
}

#[async_trait]
impl ProvideCredentials for EnvCredentials {
    async fn provide(&self) -> Result<Credentials> {
        Self::resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_configured_credentials() {
        let provider = StaticCredentials::new(Credentials::new("AKID", "secret", None));
        let creds = provider.provide().await.unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.secret_access_key, "secret");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::new(
            "AKID",
            "wJalrXUtnFEMI/K7MDENG",
            Some("FwoGZXIvYXdzEBY".to_string()),
        );
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("AKID"));
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("wJalrXUtnFEMI/K7MDENG"));
        assert!(!rendered.contains("FwoGZXIvYXdzEBY"));
    }
}
