use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::KeyedStore;

/// Process-local backing. Correct only for a single-instance deployment —
/// a second server process cannot see these entries. The server logs that
/// constraint at startup when this backing is selected.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, map: &str, key: &str) -> Result<Option<String>> {
        let guard = self.inner.read().await;
        Ok(guard.get(map).and_then(|m| m.get(key).cloned()))
    }

    async fn set(&self, map: &str, key: &str, value: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard
            .entry(map.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, map: &str, key: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(m) = guard.get_mut(map) {
            m.remove(key);
        }
        Ok(())
    }

    async fn entries(&self, map: &str) -> Result<Vec<(String, String)>> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(map)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = MemoryStore::new();

        store.set("presence", "u1", "conn-1").await.unwrap();
        assert_eq!(
            store.get("presence", "u1").await.unwrap().as_deref(),
            Some("conn-1")
        );

        // Last write wins
        store.set("presence", "u1", "conn-2").await.unwrap();
        assert_eq!(
            store.get("presence", "u1").await.unwrap().as_deref(),
            Some("conn-2")
        );

        store.delete("presence", "u1").await.unwrap();
        assert_eq!(store.get("presence", "u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn maps_are_independent() {
        let store = MemoryStore::new();

        store.set("presence", "u1", "conn-1").await.unwrap();
        store.set("focus", "u1", "u2").await.unwrap();

        store.delete("presence", "u1").await.unwrap();
        assert_eq!(store.get("focus", "u1").await.unwrap().as_deref(), Some("u2"));

        let entries = store.entries("focus").await.unwrap();
        assert_eq!(entries, vec![("u1".to_string(), "u2".to_string())]);
    }
}
