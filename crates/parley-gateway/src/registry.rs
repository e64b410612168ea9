use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_core::push::EventSink;
use parley_types::events::ServerEvent;

/// Tracks the sockets attached to this process and routes events to them.
/// This is the local half of the transport: the shared presence registry
/// decides WHO is reachable, this registry knows HOW to reach the sockets
/// it owns.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id and the channel its socket task drains.
    pub async fn add(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.insert(connection_id, tx);
        (connection_id, rx)
    }

    pub async fn remove(&self, connection_id: Uuid) {
        self.inner.write().await.remove(&connection_id);
    }

    /// Deliver an event to one connection. Returns false when the connection
    /// is not on this process or its socket already went away.
    pub async fn send(&self, connection_id: Uuid, event: ServerEvent) -> bool {
        let guard = self.inner.read().await;
        match guard.get(&connection_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl EventSink for ConnectionRegistry {
    async fn push(&self, connection_id: Uuid, event: ServerEvent) {
        // "Receiver offline" is an expected outcome, not an error
        if !self.send(connection_id, event).await {
            debug!(%connection_id, "push target not connected, skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_live_connection() {
        let registry = ConnectionRegistry::new();
        let (connection_id, mut rx) = registry.add().await;

        let delivered = registry
            .send(
                connection_id,
                ServerEvent::Error {
                    message: "ping".into(),
                },
            )
            .await;
        assert!(delivered);
        assert!(matches!(rx.recv().await, Some(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn unknown_connection_is_skipped() {
        let registry = ConnectionRegistry::new();

        let delivered = registry
            .send(
                Uuid::new_v4(),
                ServerEvent::Error {
                    message: "nobody home".into(),
                },
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn removed_connection_no_longer_receives() {
        let registry = ConnectionRegistry::new();
        let (connection_id, _rx) = registry.add().await;

        registry.remove(connection_id).await;
        let delivered = registry
            .send(
                connection_id,
                ServerEvent::Error {
                    message: "late".into(),
                },
            )
            .await;
        assert!(!delivered);
    }
}
