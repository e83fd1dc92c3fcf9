pub mod sqlite;

use async_trait::async_trait;

/// Abstraction over the persistent key-value cache that backs the token
/// lifecycle (tokens, expiries, mid-flow PKCE artifacts).
///
/// Each operation is an atomic per-key read or write; the token manager
/// layers its own mutex on top so a refresh is never run twice concurrently.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Remove a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
