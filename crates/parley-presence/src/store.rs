use anyhow::Result;
use async_trait::async_trait;

/// Keyed store shared by every server process. Presence and active-focus
/// entries live here so that horizontal scaling does not strand them in one
/// process's memory.
///
/// The contract is deliberately the smallest thing both backings support:
/// named maps of string keys to string values, last-write-wins. Atomicity is
/// per-operation; callers needing stronger guarantees get them from the
/// durable store, not from here.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, map: &str, key: &str) -> Result<Option<String>>;

    async fn set(&self, map: &str, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, map: &str, key: &str) -> Result<()>;

    /// Snapshot of a whole map, for reverse lookups.
    async fn entries(&self, map: &str) -> Result<Vec<(String, String)>>;
}
