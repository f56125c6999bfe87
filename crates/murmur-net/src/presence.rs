//! Presence tracking.
//!
//! Holds the set of peers the presence service last reported online. Every
//! snapshot replaces the set wholesale; the tracker never diffs or merges.
//! Losing the channel leaves the set untouched; only [`PresenceTracker::clear`]
//! (called when the session ends) empties it.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use murmur_shared::{ChannelEvent, EventKind, UserId};

use crate::manager::{ConnectionManager, SubscriptionId};

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: Arc<RwLock<HashSet<UserId>>>,
}

impl PresenceTracker {
    /// Create a tracker already subscribed to presence snapshots.
    pub fn new(connection: &ConnectionManager) -> Self {
        let tracker = Self::default();
        tracker.attach(connection);
        tracker
    }

    /// Subscribe to presence snapshots on `connection`. Needed again after
    /// the connection manager has been closed.
    pub fn attach(&self, connection: &ConnectionManager) -> SubscriptionId {
        let tracker = self.clone();
        connection.subscribe(EventKind::PresenceSnapshot, move |event| {
            if let ChannelEvent::PresenceSnapshot(peers) = event {
                tracker.apply_snapshot(peers.iter().cloned());
            }
        })
    }

    /// Replace the online set.
    pub fn apply_snapshot(&self, peers: impl IntoIterator<Item = UserId>) {
        let next: HashSet<UserId> = peers.into_iter().collect();
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        debug!(before = online.len(), after = next.len(), "Presence snapshot applied");
        *online = next;
    }

    pub fn is_online(&self, peer_id: &UserId) -> bool {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer_id)
    }

    /// Online peers, sorted for stable rendering.
    pub fn online_peers(&self) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self
            .online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    pub fn online_count(&self) -> usize {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        if !online.is_empty() {
            debug!(cleared = online.len(), "Presence cleared");
            online.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backoff::Backoff;
    use crate::manager::ChannelState;
    use crate::memory::MemoryConnector;

    fn ids(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|n| UserId::from(*n)).collect()
    }

    #[test]
    fn test_snapshot_replaces_set() {
        let tracker = PresenceTracker::default();
        tracker.apply_snapshot(ids(&["a", "b", "c"]));
        assert!(tracker.is_online(&UserId::from("b")));

        tracker.apply_snapshot(ids(&["c"]));
        assert!(!tracker.is_online(&UserId::from("a")));
        assert!(!tracker.is_online(&UserId::from("b")));
        assert_eq!(tracker.online_peers(), ids(&["c"]));
    }

    #[test]
    fn test_clear_empties_set() {
        let tracker = PresenceTracker::default();
        tracker.apply_snapshot(ids(&["a", "b"]));
        tracker.clear();
        assert_eq!(tracker.online_count(), 0);
        assert!(!tracker.is_online(&UserId::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_survives_reconnect_without_clearing() {
        let hub = MemoryConnector::new();
        let connection = ConnectionManager::new(
            Arc::new(hub.clone()),
            Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 5),
        );
        let tracker = PresenceTracker::new(&connection);
        let me = UserId::from("me");
        let mut rx = connection.watch_state();

        connection.open(me.clone());
        rx.wait_for(|s| *s == ChannelState::Open).await.unwrap();
        hub.push(&me, ChannelEvent::PresenceSnapshot(ids(&["me", "peer"])));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(tracker.is_online(&UserId::from("peer")));

        hub.drop_link(&me);
        rx.wait_for(|s| matches!(s, ChannelState::Reconnecting { .. }))
            .await
            .unwrap();
        assert!(tracker.is_online(&UserId::from("peer")));
    }
}
