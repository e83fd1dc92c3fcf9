use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::CredentialStore;

/// Local SQLite storage: three upsert tables for synced data plus the
/// `credentials` key-value table used as the token cache.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageRow {
    pub consumer_number: String,
    pub property_number: String,
    pub usage_date: String,
    pub timestamp: String,
    pub data: String,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// An in-memory store, used by tests. Capped at one connection because
    /// each SQLite in-memory connection is its own database.
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema creation. Safe to call on every startup.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS customer_data (
                customer_number TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS property_data (
                property_number TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS usage_data (
                consumer_number TEXT NOT NULL,
                property_number TEXT NOT NULL,
                usage_date TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (consumer_number, property_number, usage_date)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS credentials (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("database schema initialized");
        Ok(())
    }

    // -- Sync data operations --

    pub async fn upsert_customer(
        &self,
        customer_number: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO customer_data (customer_number, timestamp, data)
               VALUES ($1, $2, $3)
               ON CONFLICT(customer_number) DO UPDATE SET
                   timestamp = excluded.timestamp,
                   data = excluded.data"#,
        )
        .bind(customer_number)
        .bind(Utc::now().to_rfc3339())
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_property(
        &self,
        property_number: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO property_data (property_number, timestamp, data)
               VALUES ($1, $2, $3)
               ON CONFLICT(property_number) DO UPDATE SET
                   timestamp = excluded.timestamp,
                   data = excluded.data"#,
        )
        .bind(property_number)
        .bind(Utc::now().to_rfc3339())
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_usage(
        &self,
        consumer_number: &str,
        property_number: &str,
        usage_date: NaiveDate,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_data (consumer_number, property_number, usage_date, timestamp, data)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT(consumer_number, property_number, usage_date) DO UPDATE SET
                   timestamp = excluded.timestamp,
                   data = excluded.data"#,
        )
        .bind(consumer_number)
        .bind(property_number)
        .bind(usage_date.format("%Y-%m-%d").to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest stored usage date for one (consumer, property) pair. Scoped to
    /// the pair on purpose: one property having fresher data must not shift
    /// another property's fetch window.
    pub async fn latest_usage_date(
        &self,
        consumer_number: &str,
        property_number: &str,
    ) -> anyhow::Result<Option<NaiveDate>> {
        // ISO dates sort lexicographically, so MAX on the TEXT column is the
        // latest calendar day.
        let max: Option<String> = sqlx::query_scalar(
            "SELECT MAX(usage_date) FROM usage_data WHERE consumer_number = $1 AND property_number = $2",
        )
        .bind(consumer_number)
        .bind(property_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(match max {
            Some(s) => Some(NaiveDate::parse_from_str(&s, "%Y-%m-%d")?),
            None => None,
        })
    }

    pub async fn get_usage(
        &self,
        consumer_number: &str,
        property_number: &str,
        usage_date: NaiveDate,
    ) -> anyhow::Result<Option<UsageRow>> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"SELECT consumer_number, property_number, usage_date, timestamp, data
               FROM usage_data
               WHERE consumer_number = $1 AND property_number = $2 AND usage_date = $3"#,
        )
        .bind(consumer_number)
        .bind(property_number)
        .bind(usage_date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn usage_count(&self) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM credentials WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO credentials (key, value) VALUES ($1, $2)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM credentials WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
