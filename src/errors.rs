use thiserror::Error;

/// Failures of the token lifecycle manager.
///
/// Refresh failures never surface here — they are logged and converted into
/// a fallback to the full interactive flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials: set RE_USERNAME, RE_PASSWORD and RE_CLIENT_ID")]
    MissingCredentials,

    #[error("authorization redirect carried no code (session token invalid or extra factors required)")]
    NoAuthorizationCode,

    #[error("primary authentication failed with status {0}")]
    PrimaryAuth(reqwest::StatusCode),

    #[error("token exchange failed with status {0}")]
    TokenExchange(reqwest::StatusCode),

    #[error("identity provider discovery document is missing '{0}'")]
    Discovery(&'static str),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Failures of the sync pipeline. Branch-level errors are caught and logged
/// at the account/property loop; anything raised before the loop aborts the
/// whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("API request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unknown or unsupported state code: {0}")]
    UnknownState(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
