//! OAuth2 bearer tokens for a service account
//!
//! A signed JWT assertion (RS256) is exchanged at the key's `token_uri` for
//! a short-lived access token. The token is cached and reused until it is
//! close to expiry, so requests do not re-authenticate.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::StoreError;
use crate::credentials::ServiceAccountKey;

/// Scopes requested for the spreadsheet
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token's stated expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    access_token: String,
    refresh_after: Instant,
}

/// Token source for one service account
pub struct ServiceAccountAuth {
    account: ServiceAccountKey,
    encoding_key: EncodingKey,
    http_client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Parse the private key; fails on a malformed PEM
    pub fn new(account: ServiceAccountKey, http_client: reqwest::Client) -> Result<Self, StoreError> {
        let encoding_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| StoreError::Auth(format!("invalid service-account private key: {}", e)))?;

        Ok(Self {
            account,
            encoding_key,
            http_client,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.account.client_email
    }

    /// Current access token, fetching a new one if the cached token is stale
    pub async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.access_token.clone());
            }
            tracing::debug!("Cached access token expired, refreshing");
        }

        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Forget the cached token (after the API rejects it)
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    fn signed_assertion(&self, now: i64) -> Result<String, StoreError> {
        let claims = Claims {
            iss: &self.account.client_email,
            scope: SCOPES.join(" "),
            aud: &self.account.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.account.private_key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| StoreError::Auth(format!("failed to sign assertion: {}", e)))
    }

    async fn fetch_token(&self) -> Result<CachedToken, StoreError> {
        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;

        tracing::debug!(
            client_email = %self.account.client_email,
            token_uri = %self.account.token_uri,
            "Requesting access token"
        );

        let response = self
            .http_client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::info!(expires_in = token.expires_in, "Obtained spreadsheet access token");

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_after: Instant::now() + lifetime,
        })
    }
}
