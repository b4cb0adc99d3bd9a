//! SigV4 request signing for AppSync.
//!
//! Produces the full header set AppSync expects on a signed POST, including
//! the `Authorization` header. Connection attempts for the realtime endpoint
//! are signed against the `/connect` path even though no HTTP request is
//! actually sent there.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credentials::ProvideCredentials;
use crate::endpoints::Endpoints;
use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "appsync";

/// Signs GraphQL requests with AWS Signature Version 4.
pub struct RequestSigner {
    provider: Arc<dyn ProvideCredentials>,
    region: String,
    host: String,
    path: String,
}

impl RequestSigner {
    pub fn new(provider: Arc<dyn ProvideCredentials>, endpoints: &Endpoints) -> Self {
        Self {
            provider,
            region: endpoints.region.clone(),
            host: endpoints.graphql_host().to_string(),
            path: endpoints.graphql_url.path().to_string(),
        }
    }

    /// Sign `body` for a POST to the GraphQL endpoint, resolving credentials
    /// from the provider. `connection_attempt` signs against the `/connect`
    /// sub-path used by the realtime handshake instead.
    pub async fn sign(
        &self,
        body: &str,
        connection_attempt: bool,
    ) -> Result<BTreeMap<String, String>> {
        self.sign_at(body, connection_attempt, Utc::now()).await
    }

    /// Like [`sign`](Self::sign), with an explicit signing timestamp.
    pub async fn sign_at(
        &self,
        body: &str,
        connection_attempt: bool,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>> {
        let credentials = self.provider.provide().await?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let mut path = self.path.clone();
        if connection_attempt {
            path.push_str("/connect");
        }

        // BTreeMap keeps headers in the sorted order canonicalization needs.
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json, text/javascript".to_string());
        headers.insert("content-encoding".to_string(), "amz-1.0".to_string());
        headers.insert(
            "content-type".to_string(),
            "application/json; charset=UTF-8".to_string(),
        );
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();
        let signed_headers: String =
            headers.keys().cloned().collect::<Vec<_>>().join(";");
        let payload_hash = hex_sha256(body.as_bytes());

        let canonical_request = format!(
            "POST\n{}\n\n{}\n{}\n{}",
            path, canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &credentials.secret_access_key,
            &date_stamp,
            &self.region,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        headers.insert(
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
            ),
        );
        Ok(headers)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
