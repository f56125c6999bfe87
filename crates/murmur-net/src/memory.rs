//! In-process transport.
//!
//! [`MemoryConnector`] stands in for the presence service when the engine
//! is embedded in tests or run without a backend. The same handle both
//! serves connections and drives them: pushing events, dropping links and
//! making users unreachable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use murmur_shared::{ChannelEvent, UserId};

use crate::error::{NetError, Result};
use crate::transport::{ChannelStream, Connector};

#[derive(Default)]
struct Hub {
    links: HashMap<UserId, mpsc::UnboundedSender<ChannelEvent>>,
    unreachable: HashMap<UserId, bool>,
    attempts: HashMap<UserId, usize>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event on the user's live link. Returns `false` when no
    /// connection is currently reading.
    pub fn push(&self, user_id: &UserId, event: ChannelEvent) -> bool {
        match self.hub().links.get(user_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Sever the user's live link, as a transport failure would.
    pub fn drop_link(&self, user_id: &UserId) {
        if self.hub().links.remove(user_id).is_some() {
            debug!(user = %user_id.short(), "Memory link dropped");
        }
    }

    /// While unreachable, every connect attempt for the user fails.
    pub fn set_reachable(&self, user_id: &UserId, reachable: bool) {
        self.hub().unreachable.insert(user_id.clone(), !reachable);
    }

    /// Number of connect attempts made for the user so far.
    pub fn attempts(&self, user_id: &UserId) -> usize {
        self.hub().attempts.get(user_id).copied().unwrap_or(0)
    }

    pub fn is_linked(&self, user_id: &UserId) -> bool {
        self.hub()
            .links
            .get(user_id)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, user_id: &UserId) -> Result<Box<dyn ChannelStream>> {
        let mut hub = self.hub();
        *hub.attempts.entry(user_id.clone()).or_insert(0) += 1;

        if hub.unreachable.get(user_id).copied().unwrap_or(false) {
            return Err(NetError::Connect(format!("{} unreachable", user_id.short())));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        hub.links.insert(user_id.clone(), tx);
        Ok(Box::new(MemoryStream { rx }))
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
impl ChannelStream for MemoryStream {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        Ok(self.rx.recv().await)
    }
}
