//! Sync orchestrator: customer → properties → per-consumer usage refresh.
//!
//! Failure policy: schema init and the two top-level fetches abort the run;
//! a failure inside one account/property branch is logged and the remaining
//! branches continue; a failed write loses that record for this cycle only.

pub mod window;

use chrono::Utc;
use chrono_tz::Tz;

use crate::api::ApiClient;
use crate::errors::SyncError;
use crate::models::{Account, Property};
use crate::store::sqlite::SqliteStore;

/// Civil-date timezone for each Australian state/territory the provider
/// services.
pub fn timezone_for_state(state: &str) -> Result<Tz, SyncError> {
    match state.trim().to_ascii_uppercase().as_str() {
        "NSW" => Ok(Tz::Australia__Sydney),
        "VIC" => Ok(Tz::Australia__Melbourne),
        "QLD" => Ok(Tz::Australia__Brisbane),
        "SA" => Ok(Tz::Australia__Adelaide),
        "WA" => Ok(Tz::Australia__Perth),
        "TAS" => Ok(Tz::Australia__Hobart),
        "NT" => Ok(Tz::Australia__Darwin),
        "ACT" => Ok(Tz::Australia__Sydney),
        other => Err(SyncError::UnknownState(other.to_string())),
    }
}

pub struct Syncer {
    store: SqliteStore,
    api: ApiClient,
    preload_days: u32,
}

impl Syncer {
    pub fn new(store: SqliteStore, api: ApiClient, preload_days: u32) -> Self {
        Self {
            store,
            api,
            preload_days,
        }
    }

    pub async fn run(&self) -> Result<(), SyncError> {
        self.store.init().await?;

        let customer = self.api.get_customer().await?;
        match serde_json::to_value(&customer) {
            Ok(payload) => {
                if let Err(e) = self
                    .store
                    .upsert_customer(&customer.customer_number, &payload)
                    .await
                {
                    tracing::error!("failed to persist customer record: {e}");
                }
            }
            Err(e) => tracing::error!("failed to serialize customer record: {e}"),
        }

        let properties = self.api.get_properties().await?;
        for property in &properties {
            match serde_json::to_value(property) {
                Ok(payload) => {
                    if let Err(e) = self
                        .store
                        .upsert_property(&property.property_number, &payload)
                        .await
                    {
                        tracing::error!(
                            property = %property.property_number,
                            "failed to persist property record: {e}"
                        );
                    }
                }
                Err(e) => tracing::error!(
                    property = %property.property_number,
                    "failed to serialize property record: {e}"
                ),
            }
        }

        for account in &customer.accounts {
            for property in &properties {
                if let Err(e) = self.process_branch(account, property).await {
                    tracing::error!(
                        account = %account.account_number,
                        property = %property.property_number,
                        "branch failed, continuing with siblings: {e}"
                    );
                }
            }
        }

        tracing::info!("sync run complete");
        Ok(())
    }

    /// One account × property branch: resolve the timezone, then refresh
    /// usage for every consumer billed to this account.
    async fn process_branch(
        &self,
        account: &Account,
        property: &Property,
    ) -> Result<(), SyncError> {
        let tz = timezone_for_state(&property.address.state)?;

        for consumer in &property.consumers {
            if consumer.account_number == account.account_number {
                self.refresh_usage(&consumer.consumer_number, &property.property_number, tz)
                    .await?;
            }
        }
        Ok(())
    }

    async fn refresh_usage(
        &self,
        consumer_number: &str,
        property_number: &str,
        tz: Tz,
    ) -> Result<(), SyncError> {
        let today = Utc::now().with_timezone(&tz).date_naive();
        let latest = self
            .store
            .latest_usage_date(consumer_number, property_number)
            .await?;

        let Some(win) = window::plan(latest, today, self.preload_days) else {
            tracing::info!(
                consumer = consumer_number,
                property = property_number,
                "usage already current, nothing to fetch"
            );
            return Ok(());
        };

        tracing::info!(
            consumer = consumer_number,
            property = property_number,
            from = %win.from,
            to = %win.to,
            "refreshing usage"
        );

        let days = self
            .api
            .get_usage_interval(consumer_number, win.from, win.to)
            .await?;

        for day in days {
            match serde_json::to_value(&day) {
                Ok(payload) => {
                    if let Err(e) = self
                        .store
                        .upsert_usage(consumer_number, property_number, day.usage_date, &payload)
                        .await
                    {
                        tracing::error!(
                            consumer = consumer_number,
                            date = %day.usage_date,
                            "failed to persist usage day: {e}"
                        );
                    }
                }
                Err(e) => tracing::error!(
                    consumer = consumer_number,
                    date = %day.usage_date,
                    "failed to serialize usage day: {e}"
                ),
            }
        }
        Ok(())
    }
}
