//! Bearer tokens for GitHub API calls.
//!
//! GitHub App installation tokens live for an hour. [`InstallationTokenCache`]
//! keeps one per installation and mints a new one, through a
//! [`TokenIssuer`], only when the cached token is missing or within
//! [`DEFAULT_REFRESH_SKEW_SECS`] of expiring. The lock is held across issuance so
//! concurrent callers for one installation share a single new token.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use backport::InstallationId;

use crate::error::GithubError;

/// A cached token is replaced once it is this close to its expiry.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

/// App JWTs are backdated to tolerate clock drift between us and GitHub.
const JWT_BACKDATE_SECS: i64 = 60;
const JWT_LIFETIME_SECS: i64 = 9 * 60;

/// Supplies the bearer token for the next request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, GithubError>;

    /// Called when GitHub answered 401 to a request carrying the current
    /// token. Providers that cache tokens drop it so the next call mints a
    /// fresh one.
    async fn reject(&self) {}
}

/// A fixed token, such as a personal access token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, GithubError> {
        Ok(self.0.clone())
    }
}

/// A freshly minted installation token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints installation tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, installation: InstallationId) -> Result<IssuedToken, GithubError>;
}

// ---------------------------------------------------------------------------
// GitHub App issuer
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Exchanges an RS256-signed app JWT for an installation token via
/// `POST /app/installations/{id}/access_tokens`.
pub struct AppTokenIssuer {
    http: reqwest::Client,
    api_url: String,
    app_id: u64,
    key: EncodingKey,
}

impl AppTokenIssuer {
    /// `private_key_pem` is the PEM-encoded RSA key downloaded from the app
    /// settings page.
    pub fn new(
        api_url: impl Into<String>,
        app_id: u64,
        private_key_pem: &[u8],
    ) -> Result<Self, GithubError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)?;
        let http = reqwest::Client::builder()
            .user_agent(crate::client::USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            app_id,
            key,
        })
    }

    fn app_jwt(&self, now: DateTime<Utc>) -> Result<String, GithubError> {
        let claims = AppClaims {
            iat: now.timestamp() - JWT_BACKDATE_SECS,
            exp: now.timestamp() + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.key,
        )?)
    }
}

#[async_trait]
impl TokenIssuer for AppTokenIssuer {
    #[instrument(skip(self), fields(app_id = self.app_id))]
    async fn issue(&self, installation: InstallationId) -> Result<IssuedToken, GithubError> {
        let jwt = self.app_jwt(Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", crate::client::ACCEPT)
            .header("X-GitHub-Api-Version", crate::client::API_VERSION)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(GithubError::Status {
                status,
                message: crate::client::error_message(&text),
            });
        }
        let issued: IssuedToken = serde_json::from_str(&text)?;
        debug!(expires_at = %issued.expires_at, "installation token issued");
        Ok(issued)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Installation tokens keyed by installation, refreshed lazily.
pub struct InstallationTokenCache {
    issuer: Arc<dyn TokenIssuer>,
    skew: Duration,
    tokens: Mutex<HashMap<InstallationId, IssuedToken>>,
}

impl InstallationTokenCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            issuer,
            skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a token for `installation` that stays valid for at least the
    /// refresh skew.
    pub async fn token_for(&self, installation: InstallationId) -> Result<String, GithubError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&installation) {
            if cached.expires_at - self.skew > Utc::now() {
                return Ok(cached.token.clone());
            }
            debug!(installation = %installation, "cached installation token expiring; refreshing");
        }
        let issued = self.issuer.issue(installation).await?;
        let token = issued.token.clone();
        tokens.insert(installation, issued);
        Ok(token)
    }

    /// Drops the cached token for `installation`.
    pub async fn invalidate(&self, installation: InstallationId) {
        self.tokens.lock().await.remove(&installation);
    }
}

/// [`TokenProvider`] bound to one installation of the app.
pub struct InstallationToken {
    cache: Arc<InstallationTokenCache>,
    installation: InstallationId,
}

impl InstallationToken {
    pub fn new(cache: Arc<InstallationTokenCache>, installation: InstallationId) -> Self {
        Self {
            cache,
            installation,
        }
    }
}

#[async_trait]
impl TokenProvider for InstallationToken {
    async fn token(&self) -> Result<String, GithubError> {
        self.cache.token_for(self.installation).await
    }

    async fn reject(&self) {
        debug!(installation = %self.installation, "installation token rejected; dropping it");
        self.cache.invalidate(self.installation).await;
    }
}
