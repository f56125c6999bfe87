//! Per-conversation message log.
//!
//! Entries live in an append-only arena; a slot's index is its ordering key.
//! Removal leaves a hole so indices stay stable, and two maps give O(1)
//! lookup by local and by server id.

use std::collections::{HashMap, HashSet};

use murmur_shared::{DeliveryState, LocalId, Message, ServerId};

#[derive(Debug, Default)]
pub struct ConversationLog {
    slots: Vec<Option<Message>>,
    by_local: HashMap<LocalId, usize>,
    by_server: HashMap<ServerId, usize>,
}

/// Outcome of [`ConversationLog::append_confirmed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Inserted,
    /// Server id or local id already present; nothing changed.
    Duplicate,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }

    /// Entries in display order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.slots.iter().flatten()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    pub fn get(&self, local_id: &LocalId) -> Option<&Message> {
        self.by_local
            .get(local_id)
            .and_then(|&idx| self.slots[idx].as_ref())
    }

    pub fn contains_server_id(&self, server_id: &ServerId) -> bool {
        self.by_server.contains_key(server_id)
    }

    /// Image references in log order.
    pub fn media(&self) -> Vec<String> {
        self.iter()
            .filter_map(|m| m.payload.image().map(str::to_string))
            .collect()
    }

    /// Optimistic insert at the tail.
    pub fn push_pending(&mut self, message: Message) -> LocalId {
        let local_id = message.local_id;
        self.insert(message);
        local_id
    }

    /// Append a message the server already knows about, unless it is here.
    pub fn append_confirmed(&mut self, message: Message) -> Append {
        let known_server = message
            .server_id
            .as_ref()
            .is_some_and(|id| self.by_server.contains_key(id));
        if known_server || self.by_local.contains_key(&message.local_id) {
            return Append::Duplicate;
        }
        self.insert(message);
        Append::Inserted
    }

    /// Confirm an entry in place. When an uncorrelated echo with the same
    /// server id got in first, the echo is dropped so the message appears
    /// once, at the position of the original insert.
    pub fn confirm(&mut self, local_id: &LocalId, server_id: ServerId) -> Option<&Message> {
        let idx = *self.by_local.get(local_id)?;

        if let Some(&other) = self.by_server.get(&server_id) {
            if other != idx {
                self.remove_slot(other);
            }
        }

        let message = self.slots[idx].as_mut()?;
        if let Some(old) = message.server_id.replace(server_id.clone()) {
            if old != server_id {
                self.by_server.remove(&old);
            }
        }
        message.delivery = DeliveryState::Confirmed;
        self.by_server.insert(server_id, idx);
        self.slots[idx].as_ref()
    }

    /// `pending` → `failed`. Returns false if the entry is missing or was
    /// already confirmed.
    pub fn fail(&mut self, local_id: &LocalId) -> bool {
        self.transition(local_id, DeliveryState::Pending, DeliveryState::Failed)
    }

    /// `failed` → `pending`, for a manual retry.
    pub fn rearm(&mut self, local_id: &LocalId) -> bool {
        self.transition(local_id, DeliveryState::Failed, DeliveryState::Pending)
    }

    pub fn remove(&mut self, local_id: &LocalId) -> Option<Message> {
        let idx = *self.by_local.get(local_id)?;
        self.remove_slot(idx)
    }

    /// Fold a fetched history into the log.
    ///
    /// The history is authoritative for what the server has stored and is
    /// laid down first. Local entries it does not mention (unconfirmed
    /// sends, or arrivals newer than the snapshot) follow, in their
    /// existing relative order. An entry already known by server id keeps
    /// its local id.
    pub fn merge_history(&mut self, history: Vec<Message>) {
        let history: Vec<Message> = history
            .into_iter()
            .map(|mut message| {
                let known = message
                    .server_id
                    .as_ref()
                    .and_then(|id| self.by_server.get(id))
                    .and_then(|&idx| self.slots[idx].as_ref());
                if let Some(existing) = known {
                    message.local_id = existing.local_id;
                }
                message
            })
            .collect();

        let server_ids: HashSet<&ServerId> =
            history.iter().filter_map(|m| m.server_id.as_ref()).collect();
        let local_ids: HashSet<&LocalId> = history.iter().map(|m| &m.local_id).collect();

        let retained: Vec<Message> = self
            .iter()
            .filter(|m| {
                let in_history = m
                    .server_id
                    .as_ref()
                    .is_some_and(|id| server_ids.contains(id))
                    || local_ids.contains(&m.local_id);
                !in_history
            })
            .cloned()
            .collect();

        *self = Self::default();
        for message in history.into_iter().chain(retained) {
            self.append_any(message);
        }
    }

    fn append_any(&mut self, message: Message) {
        let known_server = message
            .server_id
            .as_ref()
            .is_some_and(|id| self.by_server.contains_key(id));
        if !known_server && !self.by_local.contains_key(&message.local_id) {
            self.insert(message);
        }
    }

    fn transition(&mut self, local_id: &LocalId, from: DeliveryState, to: DeliveryState) -> bool {
        let Some(&idx) = self.by_local.get(local_id) else {
            return false;
        };
        match self.slots[idx].as_mut() {
            Some(message) if message.delivery == from => {
                message.delivery = to;
                true
            }
            _ => false,
        }
    }

    fn insert(&mut self, message: Message) {
        let idx = self.slots.len();
        self.by_local.insert(message.local_id, idx);
        if let Some(server_id) = &message.server_id {
            self.by_server.insert(server_id.clone(), idx);
        }
        self.slots.push(Some(message));
    }

    fn remove_slot(&mut self, idx: usize) -> Option<Message> {
        let message = self.slots.get_mut(idx)?.take()?;
        self.by_local.remove(&message.local_id);
        if let Some(server_id) = &message.server_id {
            self.by_server.remove(server_id);
        }
        Some(message)
    }
}
