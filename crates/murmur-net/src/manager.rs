//! Connection manager: owns the realtime channel for the active session.
//!
//! Each `open` spawns a dedicated tokio task that connects through the
//! [`Connector`], reads events and fans them out to subscribers. The task
//! is tagged with an epoch; anything it reports after the manager has moved
//! on (close, or open for another user) is discarded.
//!
//! ```text
//! Closed ──open──▶ Connecting ──ok──▶ Open
//!                      │               │ link lost
//!                      ▼               ▼
//!                 Reconnecting ◀───────┘ ──gave up──▶ Closed(RetriesExhausted)
//! ```
//!
//! `close` is honoured from every state and cancels pending retries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_shared::{ChannelEvent, EventKind, UserId};

use crate::backoff::Backoff;
use crate::transport::Connector;

/// Callback invoked for every inbound event of the subscribed kind.
///
/// Handlers run on the channel task while the subscription registry is
/// locked, so they must not call back into the manager.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Never opened.
    Idle,
    /// `close` was called.
    Requested,
    /// Reconnect attempts ran out.
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Closed(CloseReason),
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
}

impl ChannelState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed(_))
    }
}

struct Link {
    user_id: Option<UserId>,
    epoch: u64,
    cancel: Option<CancellationToken>,
}

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

struct Registry {
    /// Epoch whose events may be delivered. `None` once closed.
    live_epoch: Option<u64>,
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    link: Mutex<Link>,
    registry: Mutex<Registry>,
    state_tx: watch::Sender<ChannelState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the single realtime channel. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, backoff: Backoff) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Closed(CloseReason::Idle));
        Self {
            shared: Arc::new(Shared {
                connector,
                backoff,
                link: Mutex::new(Link {
                    user_id: None,
                    epoch: 0,
                    cancel: None,
                }),
                registry: Mutex::new(Registry {
                    live_epoch: None,
                    next_id: 0,
                    subscriptions: Vec::new(),
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state_tx.borrow().clone()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// User the current (or last given-up) channel is bound to.
    pub fn current_user(&self) -> Option<UserId> {
        lock(&self.shared.link).user_id.clone()
    }

    /// Open the channel for `user_id`.
    ///
    /// A no-op while a channel for the same user is live. For a different
    /// user the existing channel, including any pending retry, is torn
    /// down first. Subscriptions carry over to the new channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, user_id: UserId) {
        let mut link = lock(&self.shared.link);

        if link.cancel.is_some() && link.user_id.as_ref() == Some(&user_id) {
            debug!(user = %user_id.short(), "Channel already live, open ignored");
            return;
        }

        if let Some(previous) = link.cancel.take() {
            previous.cancel();
            info!(
                from = ?link.user_id.as_ref().map(|u| u.short().to_string()),
                to = %user_id.short(),
                "Replacing channel for new user"
            );
        }

        link.epoch += 1;
        let epoch = link.epoch;
        let cancel = CancellationToken::new();
        link.cancel = Some(cancel.clone());
        link.user_id = Some(user_id.clone());
        lock(&self.shared.registry).live_epoch = Some(epoch);
        self.shared.state_tx.send_replace(ChannelState::Connecting);
        drop(link);

        info!(user = %user_id.short(), epoch, "Opening channel");
        tokio::spawn(run_channel(self.shared.clone(), user_id, epoch, cancel));
    }

    /// Close the channel and drop every subscription. Idempotent.
    pub fn close(&self) {
        let mut link = lock(&self.shared.link);
        let cancelled = match link.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        };
        link.epoch += 1;
        link.user_id = None;

        let removed = {
            let mut registry = lock(&self.shared.registry);
            registry.live_epoch = None;
            let removed = registry.subscriptions.len();
            registry.subscriptions.clear();
            removed
        };

        let was_closed = self.shared.state_tx.borrow().is_closed();
        if !was_closed {
            self.shared
                .state_tx
                .send_replace(ChannelState::Closed(CloseReason::Requested));
        }
        drop(link);

        if cancelled || removed > 0 || !was_closed {
            info!(subscriptions = removed, "Channel closed");
        } else {
            debug!("Channel already closed");
        }
    }

    /// Register a handler for one event kind. Handlers of a kind run in
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.shared.registry);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscriptions.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        debug!(kind = %kind, "Subscribed");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.shared.registry);
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|s| s.id != id);
        registry.subscriptions.len() != before
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.shared.registry)
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

impl Shared {
    /// Publish a state on behalf of the task owning `epoch`. Returns false
    /// when that task has been superseded.
    fn transition(&self, epoch: u64, state: ChannelState) -> bool {
        let mut link = lock(&self.link);
        if link.epoch != epoch {
            return false;
        }
        if state.is_closed() {
            link.cancel = None;
        }
        self.state_tx.send_replace(state);
        true
    }

    fn dispatch(&self, epoch: u64, event: &ChannelEvent) {
        let registry = lock(&self.registry);
        if registry.live_epoch != Some(epoch) {
            debug!(kind = %event.kind(), epoch, "Dropping event from superseded channel");
            return;
        }

        let kind = event.kind();
        for sub in registry.subscriptions.iter().filter(|s| s.kind == kind) {
            (sub.handler)(event);
        }
    }
}

/// Channel task: connect, pump events, and reconnect with backoff until
/// cancelled or out of attempts.
async fn run_channel(shared: Arc<Shared>, user_id: UserId, epoch: u64, cancel: CancellationToken) {
    let mut attempt = 0u32;

    loop {
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = shared.connector.connect(&user_id) => result,
        };

        match connected {
            Ok(mut stream) => {
                if !shared.transition(epoch, ChannelState::Open) {
                    break;
                }
                if attempt > 0 {
                    info!(user = %user_id.short(), attempt, "Channel re-established");
                } else {
                    info!(user = %user_id.short(), "Channel open");
                }
                attempt = 0;

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        next = stream.next_event() => next,
                    };

                    match next {
                        Ok(Some(event)) => {
                            debug!(kind = %event.kind(), "Inbound event");
                            shared.dispatch(epoch, &event);
                        }
                        Ok(None) => {
                            warn!(user = %user_id.short(), "Channel closed by remote");
                            break;
                        }
                        Err(e) => {
                            warn!(user = %user_id.short(), error = %e, "Channel transport failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(user = %user_id.short(), attempt, error = %e, "Channel connect failed");
            }
        }

        attempt += 1;
        if shared.backoff.exhausted(attempt) {
            warn!(
                user = %user_id.short(),
                attempts = attempt - 1,
                "Giving up on channel"
            );
            shared.transition(epoch, ChannelState::Closed(CloseReason::RetriesExhausted));
            break;
        }

        if !shared.transition(epoch, ChannelState::Reconnecting { attempt }) {
            break;
        }

        let delay = shared.backoff.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(user = %user_id.short(), epoch, "Channel task finished");
}
