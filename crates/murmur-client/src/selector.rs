use std::sync::{Arc, Mutex, PoisonError};

use murmur_shared::UserId;

use crate::error::Result;
use crate::sync::MessageSynchronizer;

/// Which peer the user is looking at. Setting it is the only path that
/// loads a conversation's history.
#[derive(Clone)]
pub struct ConversationSelector {
    selected: Arc<Mutex<Option<UserId>>>,
    sync: MessageSynchronizer,
}

impl ConversationSelector {
    pub fn new(sync: MessageSynchronizer) -> Self {
        Self {
            selected: Arc::new(Mutex::new(None)),
            sync,
        }
    }

    pub fn selected(&self) -> Option<UserId> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reselecting the current peer only fetches again when its history
    /// failed to load.
    pub async fn select(&self, peer: UserId) -> Result<()> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer.clone());
        self.sync.select_conversation(peer).await
    }

    pub fn clear(&self) {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.sync.deselect();
    }
}
