use async_trait::async_trait;
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// Outbound half of the real-time channel: push one event to one connection.
///
/// Delivery is best-effort by contract. A connection that is gone by the
/// time the push lands is "receiver offline", not an error — implementations
/// skip it silently; the durable store already holds the truth.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, connection_id: Uuid, event: ServerEvent);
}
