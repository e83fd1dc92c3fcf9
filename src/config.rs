use serde::Deserialize;

pub const DEFAULT_DISCOVERY_URL: &str =
    "https://login.redenergy.com.au/oauth2/default/.well-known/openid-configuration";
pub const DEFAULT_AUTHN_URL: &str = "https://redenergy.okta.com/api/v1/authn";
pub const DEFAULT_API_BASE_URL: &str = "https://selfservice.services.retail.energy/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    /// How many days of history to backfill when the usage table is empty.
    /// Set via PRELOAD_USAGE_DAYS. Default: 28.
    pub preload_usage_days: u32,
    /// Path of the SQLite file holding synced data and cached tokens.
    pub database_path: String,
    /// OIDC discovery document URL. Overridable for tests/staging.
    pub discovery_url: String,
    /// Okta primary authentication endpoint.
    pub authn_url: String,
    /// Base URL of the self-service REST API.
    pub api_base_url: String,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        username: std::env::var("RE_USERNAME").ok(),
        password: std::env::var("RE_PASSWORD").ok(),
        client_id: std::env::var("RE_CLIENT_ID").ok(),
        preload_usage_days: std::env::var("PRELOAD_USAGE_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(28),
        database_path: std::env::var("RE_DATABASE_PATH")
            .unwrap_or_else(|_| "energy_data.db".into()),
        discovery_url: std::env::var("RE_DISCOVERY_URL")
            .unwrap_or_else(|_| DEFAULT_DISCOVERY_URL.into()),
        authn_url: std::env::var("RE_AUTHN_URL").unwrap_or_else(|_| DEFAULT_AUTHN_URL.into()),
        api_base_url: std::env::var("RE_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.into()),
    })
}
