//! Token lifecycle manager — the credential/token state machine.
//!
//! `get_access_token()` resolves a bearer token in order of cost:
//! 1. Stored access token whose expiry is strictly in the future → reuse,
//!    zero network calls.
//! 2. Stored refresh token → silent refresh against the token endpoint
//!    (endpoints re-discovered on every call, never cached). Any failure is
//!    logged and falls through; the refresh token is kept for the next cycle.
//! 3. Full interactive authorization-code flow with PKCE: Okta primary
//!    authentication → session token → authorization request with redirects
//!    disabled → code lifted from the `Location` header → code/verifier
//!    exchange.
//!
//! Every state transition is written to the credential store before
//! returning, so a crash mid-flow leaves the artifacts of the last completed
//! step on disk. Transient artifacts (session token, PKCE verifier,
//! authorization code) are erased at every terminal outcome of the flow,
//! success or failure. The whole call is serialized by a mutex: two
//! concurrent refreshes would race the provider into rejecting one of them.

pub mod pkce;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::config::Config;
use crate::errors::AuthError;
use crate::store::CredentialStore;
use pkce::PkcePair;

/// Fixed custom-scheme callback registered with the provider. Never
/// web-reachable; it only exists so the authorization code can be read off
/// the redirect.
pub const REDIRECT_URI: &str = "au.com.redenergy://callback";

const SCOPES: &str = "openid profile offline_access";

// Credential store keys. Public so collaborators (CLI, tests) can inspect
// the cache; the manager is the only writer.
pub const KEY_ACCESS_TOKEN: &str = "RE_ACCESS_TOKEN";
pub const KEY_ACCESS_TOKEN_EXPIRES_AT: &str = "RE_ACCESS_TOKEN_EXPIRES_AT";
pub const KEY_REFRESH_TOKEN: &str = "RE_REFRESH_TOKEN";
pub const KEY_SESSION_TOKEN: &str = "RE_SESSION_TOKEN";
pub const KEY_SESSION_TOKEN_EXPIRES_AT: &str = "RE_SESSION_TOKEN_EXPIRES_AT";
pub const KEY_CODE_VERIFIER: &str = "RE_CODE_VERIFIER";
pub const KEY_AUTH_CODE: &str = "RE_AUTH_CODE";

/// Identity-provider endpoints and operator credentials.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub discovery_url: String,
    pub authn_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
}

impl IdpConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            discovery_url: cfg.discovery_url.clone(),
            authn_url: cfg.authn_url.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client_id: cfg.client_id.clone(),
        }
    }
}

/// OIDC discovery document (the two endpoints this flow consumes).
#[derive(Debug, Deserialize)]
struct Discovery {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

/// Okta `/api/v1/authn` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthnResponse {
    session_token: String,
    expires_at: String,
}

/// OAuth2 token endpoint response (authorization-code and refresh grants).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// Snapshot of the cached token state, for `auth status`.
#[derive(Debug)]
pub struct TokenStatus {
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    idp: IdpConfig,
    http: reqwest::Client,
    /// Client with redirect following disabled, used only for the
    /// authorization-code capture.
    no_redirect: reqwest::Client,
    lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(idp: IdpConfig, store: Arc<dyn CredentialStore>) -> Self {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        let no_redirect = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");

        Self {
            store,
            idp,
            http,
            no_redirect,
            lock: Mutex::new(()),
        }
    }

    /// Resolve a usable access token: cached → refreshed → interactive.
    pub async fn get_access_token(&self) -> Result<String, AuthError> {
        let _guard = self.lock.lock().await;

        if let Some(token) = self.stored_valid_token().await? {
            tracing::debug!("reusing cached access token");
            return Ok(token);
        }

        if let Some(refresh_token) = self.store.get(KEY_REFRESH_TOKEN).await? {
            match self.refresh(&refresh_token).await {
                Ok(token) => return Ok(token),
                // The refresh token is deliberately left in place; it may
                // work on a later cycle.
                Err(e) => {
                    tracing::warn!("token refresh failed, falling back to interactive login: {e}")
                }
            }
        }

        self.interactive_login().await
    }

    /// Force the interactive flow, ignoring any cached or refreshable token.
    pub async fn login(&self) -> Result<String, AuthError> {
        let _guard = self.lock.lock().await;
        self.interactive_login().await
    }

    pub async fn status(&self) -> Result<TokenStatus, AuthError> {
        let expires_at = match self.store.get(KEY_ACCESS_TOKEN_EXPIRES_AT).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            None => None,
        };
        Ok(TokenStatus {
            access_token_expires_at: expires_at,
            has_refresh_token: self.store.get(KEY_REFRESH_TOKEN).await?.is_some(),
        })
    }

    /// Drop all cached token material, including the refresh token.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.lock.lock().await;
        self.store.delete(KEY_ACCESS_TOKEN).await?;
        self.store.delete(KEY_ACCESS_TOKEN_EXPIRES_AT).await?;
        self.store.delete(KEY_REFRESH_TOKEN).await?;
        self.clear_flow_artifacts().await?;
        Ok(())
    }

    async fn stored_valid_token(&self) -> Result<Option<String>, AuthError> {
        let token = self.store.get(KEY_ACCESS_TOKEN).await?;
        let expires_at = self.store.get(KEY_ACCESS_TOKEN_EXPIRES_AT).await?;

        if let (Some(token), Some(raw)) = (token, expires_at) {
            match DateTime::parse_from_rfc3339(&raw) {
                // Strictly in the future; a token expiring exactly now is
                // already dead.
                Ok(exp) if exp > Utc::now() => return Ok(Some(token)),
                Ok(_) => tracing::debug!("cached access token has expired"),
                Err(e) => tracing::debug!("unreadable token expiry, treating as expired: {e}"),
            }
        }
        Ok(None)
    }

    /// Fetch the discovery document. Done fresh on every call that needs it;
    /// provider metadata is never cached.
    async fn discover(&self) -> Result<(String, String), AuthError> {
        let doc: Discovery = self
            .http
            .get(&self.idp.discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let authorization_endpoint = doc
            .authorization_endpoint
            .ok_or(AuthError::Discovery("authorization_endpoint"))?;
        let token_endpoint = doc
            .token_endpoint
            .ok_or(AuthError::Discovery("token_endpoint"))?;
        Ok((authorization_endpoint, token_endpoint))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let client_id = self
            .idp
            .client_id
            .as_deref()
            .ok_or(AuthError::MissingCredentials)?;
        let (_, token_endpoint) = self.discover().await?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        let resp = self.http.post(&token_endpoint).form(&params).send().await?;
        if !resp.status().is_success() {
            return Err(AuthError::TokenExchange(resp.status()));
        }
        let token: TokenResponse = resp.json().await?;
        self.save_token(&token).await?;
        tracing::info!("access token refreshed silently");
        Ok(token.access_token)
    }

    /// Run the interactive flow and erase transient artifacts afterwards
    /// whatever the outcome.
    async fn interactive_login(&self) -> Result<String, AuthError> {
        let result = self.authorization_code_flow().await;
        if let Err(e) = self.clear_flow_artifacts().await {
            tracing::warn!("failed to clear login flow artifacts: {e}");
        }
        result
    }

    async fn authorization_code_flow(&self) -> Result<String, AuthError> {
        let (username, password, client_id) = match (
            self.idp.username.as_deref(),
            self.idp.password.as_deref(),
            self.idp.client_id.as_deref(),
        ) {
            (Some(u), Some(p), Some(c)) => (u, p, c),
            _ => return Err(AuthError::MissingCredentials),
        };

        let (authorization_endpoint, token_endpoint) = self.discover().await?;

        let session_token = self.primary_authenticate(username, password).await?;

        let pair = PkcePair::generate();
        self.store.set(KEY_CODE_VERIFIER, &pair.verifier).await?;

        let code = self
            .fetch_authorization_code(
                &authorization_endpoint,
                client_id,
                &session_token,
                &pair.challenge,
            )
            .await?;
        self.store.set(KEY_AUTH_CODE, &code).await?;

        let token = self
            .exchange_code(&token_endpoint, client_id, &code, &pair.verifier)
            .await?;
        self.save_token(&token).await?;
        tracing::info!("interactive login complete");
        Ok(token.access_token)
    }

    /// Okta primary authentication: username/password → short-lived session
    /// token, persisted immediately so a crashed flow can be inspected.
    async fn primary_authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let payload = serde_json::json!({
            "username": username,
            "password": password,
            "options": {
                "warnBeforePasswordExpired": false,
                "multiOptionalFactorEnroll": false,
            },
        });

        let resp = self
            .http
            .post(&self.idp.authn_url)
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::PrimaryAuth(resp.status()));
        }
        let authn: AuthnResponse = resp.json().await?;

        self.store.set(KEY_SESSION_TOKEN, &authn.session_token).await?;
        self.store
            .set(KEY_SESSION_TOKEN_EXPIRES_AT, &authn.expires_at)
            .await?;
        Ok(authn.session_token)
    }

    /// Issue the authorization request with redirects disabled and lift the
    /// code out of the `Location` header. The redirect target (a custom
    /// app-scheme URI) is never requested.
    async fn fetch_authorization_code(
        &self,
        authorization_endpoint: &str,
        client_id: &str,
        session_token: &str,
        code_challenge: &str,
    ) -> Result<String, AuthError> {
        let mut url = Url::parse(authorization_endpoint)?;
        let state = uuid::Uuid::new_v4().to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", REDIRECT_URI)
            .append_pair("scope", SCOPES)
            .append_pair("response_type", "code")
            .append_pair("sessionToken", session_token)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");

        let resp = self.no_redirect.get(url).send().await?;

        resp.headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| Url::parse(loc).ok())
            .and_then(|loc| {
                loc.query_pairs()
                    .find(|(k, _)| k == "code")
                    .map(|(_, v)| v.into_owned())
            })
            .ok_or(AuthError::NoAuthorizationCode)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        client_id: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id),
            ("code_verifier", code_verifier),
        ];
        let resp = self.http.post(token_endpoint).form(&params).send().await?;
        if !resp.status().is_success() {
            return Err(AuthError::TokenExchange(resp.status()));
        }
        Ok(resp.json().await?)
    }

    /// Token and expiry are written together, never one without the other. A
    /// rotated refresh token replaces the stored one.
    async fn save_token(&self, token: &TokenResponse) -> Result<(), AuthError> {
        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in);
        self.store.set(KEY_ACCESS_TOKEN, &token.access_token).await?;
        self.store
            .set(KEY_ACCESS_TOKEN_EXPIRES_AT, &expires_at.to_rfc3339())
            .await?;
        if let Some(refresh_token) = &token.refresh_token {
            self.store.set(KEY_REFRESH_TOKEN, refresh_token).await?;
        }
        Ok(())
    }

    async fn clear_flow_artifacts(&self) -> anyhow::Result<()> {
        self.store.delete(KEY_SESSION_TOKEN).await?;
        self.store.delete(KEY_SESSION_TOKEN_EXPIRES_AT).await?;
        self.store.delete(KEY_CODE_VERIFIER).await?;
        self.store.delete(KEY_AUTH_CODE).await?;
        Ok(())
    }
}
