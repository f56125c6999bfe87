//! Message synchronizer.
//!
//! Owns one [`ConversationLog`] per peer. Outbound messages are inserted
//! optimistically and reconciled in place; inbound channel messages are
//! appended to whichever log they belong to; history fetches carry a
//! [`FetchTicket`] so a late answer for a conversation the user already left
//! is dropped.

pub mod log;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use murmur_net::{ConnectionManager, SubscriptionId};
use murmur_shared::{
    ChannelEvent, Credential, DeliveryState, EventKind, LocalId, Message, Payload, SendRequest,
    ServerId, UserId, WireMessage,
};

use crate::api::{HistoryApi, SendApi};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventSink};
use crate::session::SessionLifecycle;

pub use log::{Append, ConversationLog};

/// Staleness tag for a history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub peer: UserId,
    generation: u64,
}

/// Where the active conversation's history stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum HistoryStatus {
    #[default]
    Loading,
    Loaded,
    Failed,
}

#[derive(Default)]
struct State {
    active: Option<UserId>,
    /// Bumped on every selection change; a fetch is current only while its
    /// ticket's generation matches.
    generation: u64,
    history: HistoryStatus,
    logs: HashMap<UserId, ConversationLog>,
    /// Which conversation each outbound local id was inserted into.
    owners: HashMap<LocalId, UserId>,
}

#[derive(Clone)]
pub struct MessageSynchronizer {
    inner: Arc<Inner>,
}

struct Inner {
    session: SessionLifecycle,
    history: Arc<dyn HistoryApi>,
    sender: Arc<dyn SendApi>,
    timeout: Duration,
    events: EventSink,
    state: Mutex<State>,
}

impl MessageSynchronizer {
    pub fn new(
        session: SessionLifecycle,
        history: Arc<dyn HistoryApi>,
        sender: Arc<dyn SendApi>,
        timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                history,
                sender,
                timeout,
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Route inbound channel messages into the logs.
    pub fn attach(&self, connection: &ConnectionManager) -> SubscriptionId {
        let sync = self.clone();
        connection.subscribe(EventKind::MessageInbound, move |event| {
            if let ChannelEvent::MessageInbound(wire) = event {
                sync.apply_inbound(wire.clone());
            }
        })
    }

    pub fn active(&self) -> Option<UserId> {
        self.lock().active.clone()
    }

    /// Make `peer` the active conversation and load its history. Selecting
    /// the conversation that is already active does nothing unless its last
    /// history fetch failed, in which case the fetch is issued again.
    pub async fn select_conversation(&self, peer: UserId) -> Result<()> {
        let Some(ticket) = self.begin_fetch(peer) else {
            return Ok(());
        };
        let result = self.fetch(&ticket).await;
        self.complete_fetch(ticket, result)
    }

    /// Switch the active conversation and issue a ticket for its history.
    pub fn begin_fetch(&self, peer: UserId) -> Option<FetchTicket> {
        let ticket = {
            let mut state = self.lock();
            if state.active.as_ref() == Some(&peer) && state.history != HistoryStatus::Failed {
                return None;
            }
            state.generation += 1;
            state.history = HistoryStatus::Loading;
            state.active = Some(peer.clone());
            state.logs.entry(peer.clone()).or_default();
            FetchTicket {
                peer: peer.clone(),
                generation: state.generation,
            }
        };
        debug!(peer = %peer.short(), generation = ticket.generation, "Conversation selected");
        self.inner
            .events
            .emit(ClientEvent::ConversationSelected(Some(peer)));
        Some(ticket)
    }

    /// Apply a history result if its ticket is still current. Returns
    /// `Ok(())` for stale results, which are dropped unseen.
    pub fn complete_fetch(
        &self,
        ticket: FetchTicket,
        result: Result<Vec<WireMessage>>,
    ) -> Result<()> {
        let applied = {
            let mut state = self.lock();
            let current = state.generation == ticket.generation
                && state.active.as_ref() == Some(&ticket.peer);
            if !current {
                warn!(
                    peer = %ticket.peer.short(),
                    generation = ticket.generation,
                    "Discarding stale history"
                );
                return Ok(());
            }

            let wire = match result {
                Ok(wire) => wire,
                Err(e) => {
                    state.history = HistoryStatus::Failed;
                    drop(state);
                    warn!(peer = %ticket.peer.short(), error = %e, "History fetch failed");
                    self.inner.events.notify_error(e.to_string());
                    return Err(e);
                }
            };

            let history: Vec<Message> = wire
                .into_iter()
                .filter_map(|w| match w.into_message() {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable history entry");
                        None
                    }
                })
                .collect();
            let count = history.len();
            state
                .logs
                .entry(ticket.peer.clone())
                .or_default()
                .merge_history(history);
            state.history = HistoryStatus::Loaded;
            state.prune_owners(&ticket.peer);
            count
        };

        debug!(peer = %ticket.peer.short(), messages = applied, "History applied");
        self.inner.events.emit(ClientEvent::ConversationUpdated {
            peer: ticket.peer,
            scroll: true,
        });
        Ok(())
    }

    async fn fetch(&self, ticket: &FetchTicket) -> Result<Vec<WireMessage>> {
        let credential = self.inner.session.credential().ok_or(ClientError::NoSession)?;
        tokio::time::timeout(
            self.inner.timeout,
            self.inner.history.fetch_history(&credential, &ticket.peer),
        )
        .await
        .map_err(|_| ClientError::Timeout("history fetch"))?
        .map_err(ClientError::from)
    }

    /// Clear the selection. In-flight fetches become stale.
    pub fn deselect(&self) {
        let changed = {
            let mut state = self.lock();
            state.generation += 1;
            state.history = HistoryStatus::Loading;
            state.active.take().is_some()
        };
        if changed {
            self.inner
                .events
                .emit(ClientEvent::ConversationSelected(None));
        }
    }

    /// Send to the active conversation.
    ///
    /// The message is in the log, `pending`, before the send collaborator is
    /// called. On failure it stays, marked `failed`, and the error carries its
    /// local id for [`retry`](Self::retry).
    pub async fn send(&self, payload: Payload) -> Result<LocalId> {
        let payload = normalize(payload)?;
        let me = self.inner.session.user_id().ok_or(ClientError::NoSession)?;
        let credential = self.inner.session.credential().ok_or(ClientError::NoSession)?;

        let (peer, local_id) = {
            let mut state = self.lock();
            let peer = state.active.clone().ok_or(ClientError::NoConversation)?;
            let message = Message::pending(me, peer.clone(), payload.clone());
            state.owners.insert(message.local_id, peer.clone());
            let local_id = state
                .logs
                .entry(peer.clone())
                .or_default()
                .push_pending(message);
            (peer, local_id)
        };

        debug!(peer = %peer.short(), %local_id, image = payload.is_image(), "Message queued");
        self.inner.events.emit(ClientEvent::ConversationUpdated {
            peer: peer.clone(),
            scroll: true,
        });

        self.deliver(&credential, &peer, local_id, &payload).await?;
        Ok(local_id)
    }

    /// Re-issue a `failed` message under the same local id.
    pub async fn retry(&self, local_id: LocalId) -> Result<()> {
        let credential = self.inner.session.credential().ok_or(ClientError::NoSession)?;

        let (peer, payload) = {
            let mut state = self.lock();
            let peer = state
                .owners
                .get(&local_id)
                .cloned()
                .ok_or(ClientError::UnknownMessage(local_id))?;
            let log = state
                .logs
                .get_mut(&peer)
                .ok_or(ClientError::UnknownMessage(local_id))?;
            if !log.rearm(&local_id) {
                return Err(ClientError::NotRetryable(local_id));
            }
            let payload = log
                .get(&local_id)
                .map(|m| m.payload.clone())
                .ok_or(ClientError::UnknownMessage(local_id))?;
            (peer, payload)
        };

        info!(peer = %peer.short(), %local_id, "Retrying message");
        self.emit_changed(&peer, local_id, DeliveryState::Pending);
        self.deliver(&credential, &peer, local_id, &payload).await
    }

    /// Drop a `failed` message from its log.
    pub fn discard(&self, local_id: LocalId) -> Result<Message> {
        let (peer, message) = {
            let mut state = self.lock();
            let peer = state
                .owners
                .get(&local_id)
                .cloned()
                .ok_or(ClientError::UnknownMessage(local_id))?;
            let log = state
                .logs
                .get_mut(&peer)
                .ok_or(ClientError::UnknownMessage(local_id))?;
            match log.get(&local_id).map(|m| m.delivery) {
                Some(DeliveryState::Failed) => {}
                Some(_) => return Err(ClientError::NotRetryable(local_id)),
                None => return Err(ClientError::UnknownMessage(local_id)),
            }
            let message = log
                .remove(&local_id)
                .ok_or(ClientError::UnknownMessage(local_id))?;
            state.owners.remove(&local_id);
            (peer, message)
        };

        debug!(peer = %peer.short(), %local_id, "Failed message discarded");
        self.inner
            .events
            .emit(ClientEvent::ConversationUpdated { peer, scroll: false });
        Ok(message)
    }

    async fn deliver(
        &self,
        credential: &Credential,
        peer: &UserId,
        local_id: LocalId,
        payload: &Payload,
    ) -> Result<()> {
        let request = SendRequest::new(payload, local_id);
        let outcome = tokio::time::timeout(
            self.inner.timeout,
            self.inner.sender.send_message(credential, peer, &request),
        )
        .await
        .map_err(|_| ClientError::Timeout("send"))
        .and_then(|r| r.map_err(ClientError::from));

        match outcome {
            Ok(receipt) => {
                self.confirm(peer, local_id, receipt.message_id);
                Ok(())
            }
            Err(e) => {
                let delivery = {
                    let mut state = self.lock();
                    state.logs.get_mut(peer).and_then(|log| {
                        log.fail(&local_id);
                        log.get(&local_id).map(|m| m.delivery)
                    })
                };
                // A correlated echo may have confirmed it while the call
                // was failing.
                if delivery == Some(DeliveryState::Confirmed) {
                    debug!(%local_id, error = %e, "Send errored after echo confirmation");
                    return Ok(());
                }
                warn!(peer = %peer.short(), %local_id, error = %e, "Send failed");
                if delivery.is_some() {
                    self.emit_changed(peer, local_id, DeliveryState::Failed);
                }
                Err(ClientError::SendFailed {
                    local_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn confirm(&self, peer: &UserId, local_id: LocalId, server_id: ServerId) {
        let changed = {
            let mut state = self.lock();
            let changed = match state.logs.get_mut(peer) {
                Some(log) => {
                    let was_confirmed = log.get(&local_id).is_some_and(|m| m.is_confirmed());
                    log.confirm(&local_id, server_id).is_some() && !was_confirmed
                }
                None => false,
            };
            state.prune_owners(peer);
            changed
        };
        if changed {
            debug!(peer = %peer.short(), %local_id, "Message confirmed");
            self.emit_changed(peer, local_id, DeliveryState::Confirmed);
        }
    }

    /// Apply one `message-inbound` event.
    ///
    /// Our own messages carrying a known correlation id confirm the pending
    /// entry; everything else is appended to the peer's log unless its server
    /// id is already there.
    pub fn apply_inbound(&self, wire: WireMessage) {
        let Some(me) = self.inner.session.user_id() else {
            debug!("Inbound message without a session, dropped");
            return;
        };
        if wire.sender_id != me && wire.recipient_id != me {
            warn!(id = %wire.id, "Inbound message not addressed to us, dropped");
            return;
        }

        if wire.sender_id == me {
            if let Some(client_id) = wire.client_id {
                let owner = self.lock().owners.get(&client_id).cloned();
                if let Some(peer) = owner {
                    self.confirm(&peer, client_id, wire.id);
                    return;
                }
            }
        }

        let message = match wire.into_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable inbound message");
                return;
            }
        };
        let peer = message.peer_of(&me).clone();

        let (appended, active) = {
            let mut state = self.lock();
            let appended = state
                .logs
                .entry(peer.clone())
                .or_default()
                .append_confirmed(message);
            (appended, state.active.as_ref() == Some(&peer))
        };

        match appended {
            Append::Inserted => {
                debug!(peer = %peer.short(), active, "Inbound message appended");
                self.inner.events.emit(ClientEvent::ConversationUpdated {
                    peer,
                    scroll: active,
                });
            }
            Append::Duplicate => debug!(peer = %peer.short(), "Duplicate inbound message ignored"),
        }
    }

    /// Drop every log and the selection. Called when the session ends.
    pub fn reset(&self) {
        let mut state = self.lock();
        let generation = state.generation + 1;
        *state = State {
            generation,
            ..State::default()
        };
    }

    pub fn messages(&self, peer: &UserId) -> Vec<Message> {
        self.lock()
            .logs
            .get(peer)
            .map(ConversationLog::messages)
            .unwrap_or_default()
    }

    pub fn message(&self, local_id: &LocalId) -> Option<Message> {
        let state = self.lock();
        let peer = state.owners.get(local_id)?;
        state.logs.get(peer)?.get(local_id).cloned()
    }

    /// Image references shared in the conversation with `peer`.
    pub fn media(&self, peer: &UserId) -> Vec<String> {
        self.lock()
            .logs
            .get(peer)
            .map(ConversationLog::media)
            .unwrap_or_default()
    }

    fn emit_changed(&self, peer: &UserId, local_id: LocalId, delivery: DeliveryState) {
        self.inner.events.emit(ClientEvent::MessageChanged {
            peer: peer.clone(),
            local_id,
            delivery,
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    /// Forget outbound local ids that no longer resolve in `peer`'s log.
    fn prune_owners(&mut self, peer: &UserId) {
        let log = self.logs.get(peer);
        self.owners
            .retain(|id, owner| owner != peer || log.is_some_and(|l| l.get(id).is_some()));
    }
}

/// Trim text and reject empty bodies.
fn normalize(payload: Payload) -> Result<Payload> {
    match payload {
        Payload::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Err(ClientError::InvalidPayload("message text is empty".into()))
            } else {
                Ok(Payload::Text(trimmed.to_string()))
            }
        }
        Payload::Image(image) if image.is_empty() => {
            Err(ClientError::InvalidPayload("image reference is empty".into()))
        }
        image => Ok(image),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use murmur_shared::MurmurError;
    use murmur_store::MemoryCredentialStore;

    use super::*;
    use crate::api::SendReceipt;
    use crate::error::ErrorKind;
    use crate::session::tests::FakeAuth;

    fn uid(id: &str) -> UserId {
        UserId::from(id)
    }

    fn wire(id: &str, from: &str, to: &str, text: &str) -> WireMessage {
        WireMessage {
            id: ServerId::new(id),
            sender_id: uid(from),
            recipient_id: uid(to),
            text: Some(text.into()),
            image: None,
            created_at: Utc::now(),
            client_id: None,
        }
    }

    #[derive(Default)]
    struct FakeHistory {
        stored: HashMap<UserId, Vec<WireMessage>>,
        delays: HashMap<UserId, Duration>,
        offline: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HistoryApi for FakeHistory {
        async fn fetch_history(
            &self,
            _credential: &Credential,
            peer: &UserId,
        ) -> std::result::Result<Vec<WireMessage>, MurmurError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(peer) {
                tokio::time::sleep(*delay).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(MurmurError::Network("history unavailable".into()));
            }
            Ok(self.stored.get(peer).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeSender {
        offline: AtomicBool,
        issued: AtomicUsize,
        requests: Mutex<Vec<SendRequest>>,
    }

    #[async_trait]
    impl SendApi for FakeSender {
        async fn send_message(
            &self,
            _credential: &Credential,
            _recipient: &UserId,
            request: &SendRequest,
        ) -> std::result::Result<SendReceipt, MurmurError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.offline.load(Ordering::SeqCst) {
                return Err(MurmurError::Network("connection reset".into()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SendReceipt {
                message_id: ServerId::new(format!("srv-{n}")),
            })
        }
    }

    async fn synchronizer(
        history: FakeHistory,
        sender: Arc<FakeSender>,
    ) -> (MessageSynchronizer, SessionLifecycle, EventSink) {
        let events = EventSink::new();
        let session = SessionLifecycle::new(
            Arc::new(FakeAuth::default()),
            Arc::new(MemoryCredentialStore::new()),
            Duration::from_secs(5),
            events.clone(),
        );
        session.establish(Credential::new("tok-me")).await.unwrap();
        let sync = MessageSynchronizer::new(
            session.clone(),
            Arc::new(history),
            sender,
            Duration::from_secs(5),
            events.clone(),
        );
        (sync, session, events)
    }

    fn texts(sync: &MessageSynchronizer, peer: &str) -> Vec<String> {
        sync.messages(&uid(peer))
            .iter()
            .map(|m| m.payload.text().unwrap_or("<image>").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_sends_keep_call_order() {
        let sender = Arc::new(FakeSender::default());
        let (sync, _session, _events) = synchronizer(FakeHistory::default(), sender.clone()).await;
        sync.select_conversation(uid("bob")).await.unwrap();

        for text in ["one", " two ", "three"] {
            sync.send(Payload::Text(text.into())).await.unwrap();
        }
        assert_eq!(texts(&sync, "bob"), ["one", "two", "three"]);
        assert!(sync.messages(&uid("bob")).iter().all(Message::is_confirmed));
        assert_eq!(sender.requests.lock().unwrap()[1].text.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_send_requires_conversation_and_text() {
        let (sync, _session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        assert!(matches!(
            sync.send(Payload::Text("hi".into())).await,
            Err(ClientError::NoConversation)
        ));

        sync.select_conversation(uid("bob")).await.unwrap();
        assert!(matches!(
            sync.send(Payload::Text("   ".into())).await,
            Err(ClientError::InvalidPayload(_))
        ));
        assert!(sync.messages(&uid("bob")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_history_for_previous_conversation_is_dropped() {
        let mut history = FakeHistory::default();
        history.stored.insert(uid("alice"), vec![wire("a1", "alice", "me", "from alice")]);
        history.stored.insert(uid("bob"), vec![wire("b1", "bob", "me", "from bob")]);
        history.delays.insert(uid("alice"), Duration::from_secs(2));
        history.delays.insert(uid("bob"), Duration::from_millis(10));
        let (sync, _session, _events) =
            synchronizer(history, Arc::new(FakeSender::default())).await;

        let slow = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.select_conversation(uid("alice")).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(sync.active(), Some(uid("alice")));

        sync.select_conversation(uid("bob")).await.unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(sync.active(), Some(uid("bob")));
        assert_eq!(texts(&sync, "bob"), ["from bob"]);
        assert!(texts(&sync, "alice").is_empty());
    }

    #[tokio::test]
    async fn test_stale_ticket_cannot_touch_log() {
        let (sync, _session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        let first = sync.begin_fetch(uid("alice")).unwrap();
        let second = sync.begin_fetch(uid("bob")).unwrap();

        sync.complete_fetch(second, Ok(vec![wire("b1", "bob", "me", "hey")]))
            .unwrap();
        sync.complete_fetch(first, Ok(vec![wire("a1", "alice", "me", "late")]))
            .unwrap();

        assert_eq!(texts(&sync, "bob"), ["hey"]);
        assert!(texts(&sync, "alice").is_empty());
        // Same peer again is a no-op.
        assert!(sync.begin_fetch(uid("bob")).is_none());
    }

    #[tokio::test]
    async fn test_echo_after_response_yields_single_entry() {
        let (sync, _session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        sync.select_conversation(uid("bob")).await.unwrap();
        let local_id = sync.send(Payload::Text("hello".into())).await.unwrap();

        let mut echo = wire("srv-1", "me", "bob", "hello");
        echo.client_id = Some(local_id);
        sync.apply_inbound(echo);

        let log = sync.messages(&uid("bob"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].local_id, local_id);
        assert_eq!(log[0].server_id, Some(ServerId::new("srv-1")));
        assert!(log[0].is_confirmed());
    }

    #[tokio::test]
    async fn test_uncorrelated_echo_after_response_is_deduplicated() {
        let (sync, _session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        sync.select_conversation(uid("bob")).await.unwrap();
        sync.send(Payload::Text("hello".into())).await.unwrap();

        sync.apply_inbound(wire("srv-1", "me", "bob", "hello"));
        assert_eq!(sync.messages(&uid("bob")).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_retries_under_same_local_id() {
        let sender = Arc::new(FakeSender::default());
        let (sync, _session, _events) = synchronizer(FakeHistory::default(), sender.clone()).await;
        sync.select_conversation(uid("bob")).await.unwrap();

        sender.offline.store(true, Ordering::SeqCst);
        let err = sync.send(Payload::Text("ping".into())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SendFailed);
        let ClientError::SendFailed { local_id, .. } = err else {
            unreachable!()
        };

        let log = sync.messages(&uid("bob"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].delivery, DeliveryState::Failed);

        // No automatic retry happened.
        assert_eq!(sender.requests.lock().unwrap().len(), 1);

        sender.offline.store(false, Ordering::SeqCst);
        sync.retry(local_id).await.unwrap();

        let log = sync.messages(&uid("bob"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].local_id, local_id);
        assert!(log[0].is_confirmed());
        let requests = sender.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].client_id, requests[1].client_id);
        drop(requests);

        assert!(matches!(
            sync.retry(local_id).await,
            Err(ClientError::NotRetryable(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_only_failed() {
        let sender = Arc::new(FakeSender::default());
        let (sync, _session, _events) = synchronizer(FakeHistory::default(), sender.clone()).await;
        sync.select_conversation(uid("bob")).await.unwrap();

        let ok = sync.send(Payload::Text("kept".into())).await.unwrap();
        assert!(matches!(sync.discard(ok), Err(ClientError::NotRetryable(_))));

        sender.offline.store(true, Ordering::SeqCst);
        let Err(ClientError::SendFailed { local_id, .. }) =
            sync.send(Payload::Text("dropped".into())).await
        else {
            panic!("send should fail");
        };
        sync.discard(local_id).unwrap();
        assert_eq!(texts(&sync, "bob"), ["kept"]);
        assert!(matches!(
            sync.discard(local_id),
            Err(ClientError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_inbound_for_background_conversation_does_not_scroll() {
        let (sync, _session, events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        sync.select_conversation(uid("bob")).await.unwrap();
        let mut rx = events.subscribe();

        sync.apply_inbound(wire("c1", "carol", "me", "psst"));
        sync.apply_inbound(wire("b1", "bob", "me", "hi"));
        sync.apply_inbound(wire("b1", "bob", "me", "hi"));

        let updates: Vec<(UserId, bool)> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                ClientEvent::ConversationUpdated { peer, scroll } => Some((peer, scroll)),
                _ => None,
            })
            .collect();
        assert_eq!(updates, [(uid("carol"), false), (uid("bob"), true)]);
        assert_eq!(texts(&sync, "carol"), ["psst"]);
        assert_eq!(texts(&sync, "bob"), ["hi"]);
    }

    #[tokio::test]
    async fn test_history_merges_with_retained_log() {
        let mut history = FakeHistory::default();
        history.stored.insert(
            uid("bob"),
            vec![wire("b1", "bob", "me", "old"), wire("b2", "me", "bob", "reply")],
        );
        let (sync, _session, _events) =
            synchronizer(history, Arc::new(FakeSender::default())).await;

        // Arrived while another conversation was open.
        sync.apply_inbound(wire("b3", "bob", "me", "newer"));
        sync.select_conversation(uid("bob")).await.unwrap();
        assert_eq!(texts(&sync, "bob"), ["old", "reply", "newer"]);

        sync.select_conversation(uid("alice")).await.unwrap();
        sync.select_conversation(uid("bob")).await.unwrap();
        assert_eq!(texts(&sync, "bob"), ["old", "reply", "newer"]);
    }

    #[tokio::test]
    async fn test_failed_history_can_be_loaded_again() {
        let mut history = FakeHistory::default();
        history.stored.insert(uid("bob"), vec![wire("b1", "bob", "me", "hi")]);
        history.offline.store(true, Ordering::SeqCst);
        let offline = history.offline.clone();
        let calls = history.calls.clone();
        let (sync, _session, _events) =
            synchronizer(history, Arc::new(FakeSender::default())).await;

        let err = sync.select_conversation(uid("bob")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(sync.active(), Some(uid("bob")));

        offline.store(false, Ordering::SeqCst);
        sync.select_conversation(uid("bob")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(texts(&sync, "bob"), ["hi"]);

        // Loaded now, so selecting again stays a no-op.
        sync.select_conversation(uid("bob")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refetch_keeps_local_id_of_sent_message() {
        let (sync, _session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        sync.select_conversation(uid("bob")).await.unwrap();
        let local_id = sync.send(Payload::Text("hello".into())).await.unwrap();
        sync.select_conversation(uid("alice")).await.unwrap();

        // History from a server that does not store the correlation id.
        let ticket = sync.begin_fetch(uid("bob")).unwrap();
        sync.complete_fetch(ticket, Ok(vec![wire("srv-1", "me", "bob", "hello")]))
            .unwrap();

        let log = sync.messages(&uid("bob"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].local_id, local_id);
        assert!(sync.message(&local_id).is_some_and(|m| m.is_confirmed()));
        assert_eq!(sync.lock().owners.len(), 1);
    }

    #[tokio::test]
    async fn test_media_and_inbound_dropped_without_session() {
        let (sync, session, _events) =
            synchronizer(FakeHistory::default(), Arc::new(FakeSender::default())).await;
        sync.select_conversation(uid("bob")).await.unwrap();
        sync.send(Payload::Image("data:image/png;base64,AAAA".into()))
            .await
            .unwrap();
        assert_eq!(sync.media(&uid("bob")), ["data:image/png;base64,AAAA"]);

        session.terminate();
        sync.reset();
        sync.apply_inbound(wire("b9", "bob", "me", "too late"));
        assert!(sync.messages(&uid("bob")).is_empty());
        assert_eq!(sync.active(), None);
    }
}
