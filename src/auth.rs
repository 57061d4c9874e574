//! Client-credentials authentication for the mailbox REST API

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AuthError, LeadMachineError, Result};

/// Tokens are never handed out within this many seconds of their expiry
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

/// Default OAuth2 authority
pub const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// Default scope requested for application permissions
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Application registration used for the client-credentials grant
#[derive(Debug)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub tenant_id: String,
}

impl ClientCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            tenant_id: tenant_id.into(),
        }
    }

    /// Load the application id and secret from the environment
    ///
    /// # Environment Variables
    /// - `GRAPH_CLIENT_ID`: application (client) id
    /// - `GRAPH_CLIENT_SECRET`: client secret
    ///
    /// The tenant comes from the resolved configuration, which already
    /// applied any `GRAPH_TENANT_ID` override.
    pub fn from_env(tenant_id: impl Into<String>) -> Result<Self> {
        let client_id = env::var("GRAPH_CLIENT_ID").ok().filter(|v| !v.trim().is_empty());
        let client_secret = env::var("GRAPH_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty());

        match (client_id, client_secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret, tenant_id)),
            (id, secret) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push("GRAPH_CLIENT_ID");
                }
                if secret.is_none() {
                    missing.push("GRAPH_CLIENT_SECRET");
                }
                Err(LeadMachineError::ConfigError(format!(
                    "missing required environment variables: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS)
    }
}

/// Obtains bearer tokens and caches them until shortly before expiry
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: ClientCredentials,
    token_url: String,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider against `{login_base}/{tenant}/oauth2/v2.0/token`
    pub fn new(
        credentials: ClientCredentials,
        login_base: &str,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::InvalidResponse(format!("failed to build HTTP client: {}", e)))?;

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            login_base.trim_end_matches('/'),
            credentials.tenant_id
        );

        Ok(Self {
            http,
            credentials,
            token_url,
            scope: scope.into(),
            cache: Mutex::new(None),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Return a valid bearer token, refreshing it when the cached one is
    /// missing or inside the expiry margin.
    ///
    /// The cache lock is held across the refresh so concurrent callers wait
    /// for a single token exchange.
    pub async fn get_token(&self) -> std::result::Result<SecretString, AuthError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.is_usable(Utc::now()) {
                return Ok(SecretString::from(cached.access_token.clone()));
            }
            debug!("Cached token is inside the expiry margin, refreshing");
        }

        let fresh = self.fetch_token().await?;
        let token = SecretString::from(fresh.access_token.clone());
        *cache = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token so the next call performs a fresh exchange
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn fetch_token(&self) -> std::result::Result<CachedToken, AuthError> {
        debug!("Requesting access token from {}", self.token_url);

        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::Failed(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if let Some(token_type) = body.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                debug!("Unexpected token type: {}", token_type);
            }
        }

        let expires_at = Utc::now() + ChronoDuration::seconds(body.expires_in);
        debug!("Obtained access token valid until {}", expires_at);

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at,
        })
    }
}
