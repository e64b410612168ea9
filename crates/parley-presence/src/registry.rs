use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::KeyedStore;

const PRESENCE_MAP: &str = "presence";
const FOCUS_MAP: &str = "focus";

/// Binds users to their live gateway connections. One entry per connected
/// user; absence means unreachable. Advisory only — the durable read flag,
/// not presence, is the source of truth for unread state.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn KeyedStore>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    /// Unconditional overwrite: a user reconnecting keeps only the newest
    /// connection (last-register-wins).
    pub async fn register(&self, user_id: &str, connection_id: Uuid) -> Result<()> {
        self.store
            .set(PRESENCE_MAP, user_id, &connection_id.to_string())
            .await?;
        debug!(user_id, %connection_id, "presence registered");
        Ok(())
    }

    pub async fn lookup(&self, user_id: &str) -> Result<Option<Uuid>> {
        let Some(raw) = self.store.get(PRESENCE_MAP, user_id).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(connection_id) => Ok(Some(connection_id)),
            Err(_) => {
                warn!(user_id, %raw, "discarding unparseable presence entry");
                Ok(None)
            }
        }
    }

    /// Reverse lookup and removal for a closed connection. Compares the
    /// stored connection id before deleting: if the user already
    /// re-registered on a newer connection, the stale disconnect must not
    /// evict the new entry. Returns the user id that was unbound, if any.
    pub async fn remove_by_connection(&self, connection_id: Uuid) -> Result<Option<String>> {
        let needle = connection_id.to_string();
        for (user_id, stored) in self.store.entries(PRESENCE_MAP).await? {
            if stored == needle {
                self.store.delete(PRESENCE_MAP, &user_id).await?;
                debug!(%user_id, %connection_id, "presence removed on disconnect");
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }
}

/// Tracks which peer each user is currently viewing. A best-effort hint for
/// read-on-arrival classification, never a commitment.
#[derive(Clone)]
pub struct FocusTracker {
    store: Arc<dyn KeyedStore>,
}

impl FocusTracker {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    pub async fn set_focus(&self, user_id: &str, peer_id: &str) -> Result<()> {
        self.store.set(FOCUS_MAP, user_id, peer_id).await
    }

    pub async fn get_focus(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get(FOCUS_MAP, user_id).await
    }

    pub async fn clear_focus(&self, user_id: &str) -> Result<()> {
        self.store.delete(FOCUS_MAP, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn registry() -> (PresenceRegistry, FocusTracker) {
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new());
        (
            PresenceRegistry::new(store.clone()),
            FocusTracker::new(store),
        )
    }

    #[tokio::test]
    async fn last_register_wins() {
        let (presence, _) = registry();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        presence.register("u1", old).await.unwrap();
        presence.register("u1", new).await.unwrap();

        assert_eq!(presence.lookup("u1").await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_new_connection() {
        let (presence, _) = registry();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();

        presence.register("u1", old).await.unwrap();
        // User reconnects before the old connection's disconnect arrives
        presence.register("u1", new).await.unwrap();

        assert_eq!(presence.remove_by_connection(old).await.unwrap(), None);
        assert_eq!(presence.lookup("u1").await.unwrap(), Some(new));

        // The live connection's own disconnect still cleans up
        assert_eq!(
            presence.remove_by_connection(new).await.unwrap().as_deref(),
            Some("u1")
        );
        assert_eq!(presence.lookup("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn focus_overwrites_and_clears() {
        let (_, focus) = registry();

        assert_eq!(focus.get_focus("u1").await.unwrap(), None);

        focus.set_focus("u1", "u2").await.unwrap();
        focus.set_focus("u1", "u3").await.unwrap();
        assert_eq!(focus.get_focus("u1").await.unwrap().as_deref(), Some("u3"));

        focus.clear_focus("u1").await.unwrap();
        assert_eq!(focus.get_focus("u1").await.unwrap(), None);
    }
}
