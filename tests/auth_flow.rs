//! Integration tests for the token lifecycle manager, with the identity
//! provider (discovery, Okta authn, authorization, token endpoint) mocked by
//! wiremock. No real network is touched.

use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use redsync::auth::pkce::challenge_for;
use redsync::auth::{
    IdpConfig, TokenManager, KEY_ACCESS_TOKEN, KEY_ACCESS_TOKEN_EXPIRES_AT, KEY_AUTH_CODE,
    KEY_CODE_VERIFIER, KEY_REFRESH_TOKEN, KEY_SESSION_TOKEN, KEY_SESSION_TOKEN_EXPIRES_AT,
};
use redsync::errors::AuthError;
use redsync::store::sqlite::SqliteStore;
use redsync::store::CredentialStore;

async fn store() -> SqliteStore {
    let s = SqliteStore::connect_in_memory().await.unwrap();
    s.init().await.unwrap();
    s
}

fn manager(server: &MockServer, store: &SqliteStore) -> TokenManager {
    TokenManager::new(
        IdpConfig {
            discovery_url: format!("{}/.well-known/openid-configuration", server.uri()),
            authn_url: format!("{}/api/v1/authn", server.uri()),
            username: Some("user@example.com".into()),
            password: Some("hunter2".into()),
            client_id: Some("client-abc".into()),
        },
        Arc::new(store.clone()),
    )
}

async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/oauth2/v1/authorize", server.uri()),
            "token_endpoint": format!("{}/oauth2/v1/token", server.uri()),
        })))
        .mount(server)
        .await;
}

async fn mount_authn(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sessionToken": "sess-123",
            "expiresAt": "2099-01-01T00:00:00Z",
            "status": "SUCCESS",
        })))
        .mount(server)
        .await;
}

async fn mount_authorize_redirect(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth2/v1/authorize"))
        .respond_with(
            ResponseTemplate::new(302).insert_header(
                "Location",
                "au.com.redenergy://callback?code=auth-code-1&state=ignored",
            ),
        )
        .mount(server)
        .await;
}

async fn mount_code_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-interactive",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-interactive",
        })))
        .mount(server)
        .await;
}

// ── Fast path ─────────────────────────────────────────────────

#[tokio::test]
async fn cached_token_with_future_expiry_makes_zero_network_calls() {
    let server = MockServer::start().await;
    let store = store().await;

    store.set(KEY_ACCESS_TOKEN, "cached-token").await.unwrap();
    store
        .set(
            KEY_ACCESS_TOKEN_EXPIRES_AT,
            &(Utc::now() + Duration::hours(1)).to_rfc3339(),
        )
        .await
        .unwrap();

    let mgr = manager(&server, &store);
    let token = mgr.get_access_token().await.unwrap();

    assert_eq!(token, "cached-token");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn token_expiring_exactly_now_is_treated_as_invalid() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;
    mount_code_exchange(&server).await;

    let store = store().await;
    store.set(KEY_ACCESS_TOKEN, "stale-token").await.unwrap();
    // Strict `>` comparison: an expiry of "now" must force re-auth.
    store
        .set(KEY_ACCESS_TOKEN_EXPIRES_AT, &Utc::now().to_rfc3339())
        .await
        .unwrap();

    let mgr = manager(&server, &store);
    let token = mgr.get_access_token().await.unwrap();
    assert_eq!(token, "at-interactive");
}

// ── Silent refresh ────────────────────────────────────────────

#[tokio::test]
async fn refresh_grant_rotates_tokens_without_interactive_login() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-refreshed",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-rotated",
        })))
        .expect(1)
        .mount(&server)
        .await;

    // The interactive path must stay untouched.
    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = store().await;
    store.set(KEY_REFRESH_TOKEN, "rt-old").await.unwrap();

    let mgr = manager(&server, &store);
    let token = mgr.get_access_token().await.unwrap();

    assert_eq!(token, "at-refreshed");
    assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap().unwrap(), "at-refreshed");
    assert_eq!(store.get(KEY_REFRESH_TOKEN).await.unwrap().unwrap(), "rt-rotated");
    // Expiry is persisted together with the token and sits in the future.
    let expires_at = store
        .get(KEY_ACCESS_TOKEN_EXPIRES_AT)
        .await
        .unwrap()
        .unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&expires_at).unwrap() > Utc::now());
}

#[tokio::test]
async fn failed_refresh_falls_back_to_interactive_login() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;

    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
        })))
        .mount(&server)
        .await;
    mount_code_exchange(&server).await;

    let store = store().await;
    store.set(KEY_REFRESH_TOKEN, "rt-dead").await.unwrap();

    let mgr = manager(&server, &store);
    // Must not propagate the refresh failure.
    let token = mgr.get_access_token().await.unwrap();

    assert_eq!(token, "at-interactive");
    // The new refresh token supersedes the dead one; no mid-flow artifacts
    // remain.
    assert_eq!(
        store.get(KEY_REFRESH_TOKEN).await.unwrap().unwrap(),
        "rt-interactive"
    );
    assert_eq!(store.get(KEY_SESSION_TOKEN).await.unwrap(), None);
    assert_eq!(store.get(KEY_CODE_VERIFIER).await.unwrap(), None);
}

// ── Interactive flow ──────────────────────────────────────────

#[tokio::test]
async fn missing_credentials_fail_before_any_identity_call() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let store = store().await;

    let mgr = TokenManager::new(
        IdpConfig {
            discovery_url: format!("{}/.well-known/openid-configuration", server.uri()),
            authn_url: format!("{}/api/v1/authn", server.uri()),
            username: Some("user@example.com".into()),
            password: None,
            client_id: Some("client-abc".into()),
        },
        Arc::new(store.clone()),
    );

    let err = mgr.get_access_token().await.unwrap_err();
    assert!(matches!(err, AuthError::MissingCredentials));
    // Credentials are checked before the provider is contacted.
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cached_token_survives_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("energy_data.db");
    let path = path.to_str().unwrap();

    {
        let store = SqliteStore::connect(path).await.unwrap();
        store.init().await.unwrap();
        store.set(KEY_ACCESS_TOKEN, "persisted-token").await.unwrap();
        store
            .set(
                KEY_ACCESS_TOKEN_EXPIRES_AT,
                &(Utc::now() + Duration::hours(1)).to_rfc3339(),
            )
            .await
            .unwrap();
    }

    // Fresh pool over the same file, as after a process restart.
    let server = MockServer::start().await;
    let store = SqliteStore::connect(path).await.unwrap();
    store.init().await.unwrap();

    let mgr = manager(&server, &store);
    assert_eq!(mgr.get_access_token().await.unwrap(), "persisted-token");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn authorization_request_carries_pkce_challenge_matching_the_verifier() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;
    mount_code_exchange(&server).await;

    let store = store().await;
    let mgr = manager(&server, &store);
    mgr.get_access_token().await.unwrap();

    let requests = server.received_requests().await.unwrap();

    let authorize = requests
        .iter()
        .find(|r| r.url.path() == "/oauth2/v1/authorize")
        .expect("no authorization request issued");
    let query: std::collections::HashMap<_, _> = authorize.url.query_pairs().collect();

    assert_eq!(query["client_id"], "client-abc");
    assert_eq!(query["redirect_uri"], "au.com.redenergy://callback");
    assert_eq!(query["scope"], "openid profile offline_access");
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["sessionToken"], "sess-123");
    assert_eq!(query["code_challenge_method"], "S256");
    assert!(uuid::Uuid::parse_str(&query["state"]).is_ok());
    assert!(uuid::Uuid::parse_str(&query["nonce"]).is_ok());

    // Recompute the S256 challenge from the verifier sent to the token
    // endpoint; it must be exactly what the authorization request carried.
    let exchange = requests
        .iter()
        .find(|r| {
            r.url.path() == "/oauth2/v1/token"
                && String::from_utf8_lossy(&r.body).contains("grant_type=authorization_code")
        })
        .expect("no code exchange issued");
    let form: std::collections::HashMap<_, _> =
        url::form_urlencoded::parse(&exchange.body).collect();

    assert_eq!(form["code"], "auth-code-1");
    assert_eq!(challenge_for(&form["code_verifier"]), query["code_challenge"]);
}

#[tokio::test]
async fn state_and_nonce_are_fresh_on_every_flow() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;
    mount_code_exchange(&server).await;

    let store = store().await;
    let mgr = manager(&server, &store);
    mgr.login().await.unwrap();
    mgr.login().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let states: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/oauth2/v1/authorize")
        .map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap()
        })
        .collect();

    assert_eq!(states.len(), 2);
    assert_ne!(states[0], states[1]);
}

#[tokio::test]
async fn redirect_without_code_fails_and_still_cleans_up() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;

    // Provider bounces back to the login page instead of the callback — no
    // code anywhere.
    Mock::given(method("GET"))
        .and(path("/oauth2/v1/authorize"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "https://login.example.com/signin?reason=mfa"),
        )
        .mount(&server)
        .await;

    let store = store().await;
    let mgr = manager(&server, &store);

    let err = mgr.get_access_token().await.unwrap_err();
    assert!(matches!(err, AuthError::NoAuthorizationCode));

    // Cleanup invariant: transient secrets never outlive the flow, even on
    // failure.
    assert_eq!(store.get(KEY_SESSION_TOKEN).await.unwrap(), None);
    assert_eq!(store.get(KEY_SESSION_TOKEN_EXPIRES_AT).await.unwrap(), None);
    assert_eq!(store.get(KEY_CODE_VERIFIER).await.unwrap(), None);
    assert_eq!(store.get(KEY_AUTH_CODE).await.unwrap(), None);
    assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn successful_flow_persists_tokens_and_erases_artifacts() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;
    mount_code_exchange(&server).await;

    let store = store().await;
    let mgr = manager(&server, &store);
    let token = mgr.get_access_token().await.unwrap();

    assert_eq!(token, "at-interactive");
    assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap().unwrap(), "at-interactive");
    assert!(store.get(KEY_ACCESS_TOKEN_EXPIRES_AT).await.unwrap().is_some());
    assert_eq!(store.get(KEY_REFRESH_TOKEN).await.unwrap().unwrap(), "rt-interactive");
    assert_eq!(store.get(KEY_SESSION_TOKEN).await.unwrap(), None);
    assert_eq!(store.get(KEY_CODE_VERIFIER).await.unwrap(), None);
    assert_eq!(store.get(KEY_AUTH_CODE).await.unwrap(), None);

    // A second call reuses the cached token without another flow.
    let request_count = server.received_requests().await.unwrap().len();
    let again = mgr.get_access_token().await.unwrap();
    assert_eq!(again, "at-interactive");
    assert_eq!(server.received_requests().await.unwrap().len(), request_count);
}

#[tokio::test]
async fn token_exchange_error_surfaces_as_auth_error() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;

    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = store().await;
    let mgr = manager(&server, &store);

    let err = mgr.get_access_token().await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchange(status) if status.as_u16() == 500));
    // Failure is terminal for this run but leaves no partial token state.
    assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap(), None);
    assert_eq!(store.get(KEY_CODE_VERIFIER).await.unwrap(), None);
}

#[tokio::test]
async fn logout_erases_all_cached_token_material() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_authn(&server).await;
    mount_authorize_redirect(&server).await;
    mount_code_exchange(&server).await;

    let store = store().await;
    let mgr = manager(&server, &store);
    mgr.get_access_token().await.unwrap();

    mgr.logout().await.unwrap();

    assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap(), None);
    assert_eq!(store.get(KEY_ACCESS_TOKEN_EXPIRES_AT).await.unwrap(), None);
    assert_eq!(store.get(KEY_REFRESH_TOKEN).await.unwrap(), None);
}
