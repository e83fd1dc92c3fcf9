//! Thin bearer-authenticated wrappers over the self-service REST API.
//!
//! Each call asks the token manager for a token first, so an expired token
//! is transparently refreshed (or re-logged-in) before the request goes out.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::auth::TokenManager;
use crate::errors::SyncError;
use crate::models::{Customer, Property, UsageDay};

pub struct ApiClient {
    base_url: String,
    auth: Arc<TokenManager>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Arc<TokenManager>) -> Self {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http,
        }
    }

    pub async fn get_customer(&self) -> Result<Customer, SyncError> {
        tracing::info!("fetching customer profile");
        let token = self.auth.get_access_token().await?;
        let customer = self
            .http
            .get(format!("{}/customers/current", self.base_url))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(customer)
    }

    pub async fn get_properties(&self) -> Result<Vec<Property>, SyncError> {
        tracing::info!("fetching properties");
        let token = self.auth.get_access_token().await?;
        let properties = self
            .http
            .get(format!("{}/properties", self.base_url))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(properties)
    }

    pub async fn get_usage_interval(
        &self,
        consumer_number: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<UsageDay>, SyncError> {
        tracing::info!(
            consumer = consumer_number,
            from = %from_date,
            to = %to_date,
            "fetching usage interval"
        );
        let token = self.auth.get_access_token().await?;
        let usage = self
            .http
            .get(format!("{}/usage/interval", self.base_url))
            .query(&[
                ("fromDate", from_date.format("%Y-%m-%d").to_string()),
                ("toDate", to_date.format("%Y-%m-%d").to_string()),
                ("consumerNumber", consumer_number.to_string()),
            ])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(usage)
    }
}
