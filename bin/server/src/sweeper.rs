//! Periodic eviction of idle rooms.

use aichat_conversation::ConversationService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns a task that ends sessions idle for longer than `idle_ttl`,
/// checking every `interval`.
pub fn spawn(
    service: Arc<ConversationService>,
    idle_ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            interval.tick().await;
            let evicted = service.evict_idle(idle_ttl);
            if !evicted.is_empty() {
                tracing::debug!(evicted_rooms = evicted.len(), "Periodic idle room sweep");
            }
        }
    })
}
