//! HTTP binding for the remote platform
//!
//! `PUT {base}/users/{user}/public-key` sets the key. Verification signs a
//! short-lived key-pair JWT with the private key and presents it to
//! `POST {base}/session/verify`; only a 2xx answer counts as authenticated.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{CredentialUpdater, RemoteError, VerifyOutcome};
use crate::core::{AccountId, KeyPair, PublicKey};

/// Connection settings for [`HttpCredentialUpdater`]
#[derive(Debug, Clone)]
pub struct HttpUpdaterConfig {
    /// API root
    pub base_url: Url,
    /// Platform account locator used in JWT issuer and subject
    pub account_locator: String,
    /// Service user whose key is managed
    pub user: AccountId,
    /// Bearer token of an administrator allowed to change the user's key
    pub admin_token: Option<String>,
    /// Per-request timeout inside the client
    pub request_timeout: Duration,
    /// Lifetime of verification JWTs
    pub token_lifetime: Duration,
}

impl HttpUpdaterConfig {
    /// Defaults: 30 second requests, one hour tokens, no admin token
    pub fn new(base_url: Url, account_locator: impl Into<String>, user: AccountId) -> Self {
        Self {
            base_url,
            account_locator: account_locator.into(),
            user,
            admin_token: None,
            request_timeout: Duration::from_secs(30),
            token_lifetime: Duration::from_secs(3600),
        }
    }

    /// Set the administrator token
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}

/// Key-pair JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairClaims {
    /// `ACCOUNT.USER.SHA256:<fingerprint>`
    pub iss: String,
    /// `ACCOUNT.USER`
    pub sub: String,
    /// Issued at (seconds)
    pub iat: i64,
    /// Expiry (seconds)
    pub exp: i64,
}

#[derive(Serialize)]
struct SetPublicKey<'a> {
    public_key: &'a str,
}

/// Remote updater over HTTP
#[derive(Debug, Clone)]
pub struct HttpCredentialUpdater {
    client: Client,
    config: HttpUpdaterConfig,
}

impl HttpCredentialUpdater {
    /// Build the client
    pub fn new(mut config: HttpUpdaterConfig) -> Result<Self, RemoteError> {
        // Url::join drops the last segment unless the base ends with '/'
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Request(format!("invalid endpoint {path}: {e}")))
    }

    fn qualified_user(&self) -> String {
        format!(
            "{}.{}",
            self.config.account_locator.to_ascii_uppercase(),
            self.config.user.as_str().to_ascii_uppercase()
        )
    }

    /// Claims for a verification token signed by `public_key`'s private half
    pub fn claims_for(&self, public_key: &PublicKey) -> KeyPairClaims {
        let subject = self.qualified_user();
        let iat = Utc::now().timestamp();
        let lifetime = i64::try_from(self.config.token_lifetime.as_secs()).unwrap_or(i64::MAX);

        KeyPairClaims {
            iss: format!("{subject}.{}", public_key.fingerprint()),
            sub: subject,
            iat,
            exp: iat.saturating_add(lifetime),
        }
    }

    /// Signed RS256 key-pair JWT for `pair`
    pub fn key_pair_jwt(&self, pair: &KeyPair) -> Result<String, String> {
        let pem = pair
            .private_key()
            .to_pkcs8_pem()
            .map_err(|e| e.to_string())?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| e.to_string())?;

        encode(
            &Header::new(Algorithm::RS256),
            &self.claims_for(pair.public_key()),
            &key,
        )
        .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CredentialUpdater for HttpCredentialUpdater {
    async fn update_public_key(&self, public_key: &PublicKey) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("users/{}/public-key", self.config.user))?;

        let mut request = self.client.put(url).json(&SetPublicKey {
            public_key: public_key.as_str(),
        });
        if let Some(token) = &self.config.admin_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.config.request_timeout)
            } else if e.is_connect() {
                RemoteError::Unavailable(e.to_string())
            } else {
                RemoteError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(
                user = %self.config.user,
                fingerprint = %public_key.fingerprint(),
                "Remote accepted public key"
            );
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(RemoteError::Unavailable(message));
        }
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn verify_connection(&self, pair: &KeyPair) -> VerifyOutcome {
        let token = match self.key_pair_jwt(pair) {
            Ok(token) => token,
            Err(e) => return VerifyOutcome::AuthFailed(format!("cannot sign token: {e}")),
        };

        let url = match self.endpoint("session/verify") {
            Ok(url) => url,
            Err(e) => return VerifyOutcome::AuthFailed(e.to_string()),
        };

        let response = match self.client.post(url).bearer_auth(token).send().await {
            Ok(response) => response,
            Err(e) => return VerifyOutcome::AuthFailed(format!("verification request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            VerifyOutcome::Authenticated
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            VerifyOutcome::AuthFailed(format!("{status}: {body}"))
        } else {
            VerifyOutcome::AuthFailed(format!("unexpected verification status {status}"))
        }
    }
}
