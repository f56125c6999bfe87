use serde::Serialize;
use tokio::sync::broadcast;

use murmur_net::ChannelState;
use murmur_shared::{DeliveryState, LocalId, Profile, UserId};

const EVENT_CAPACITY: usize = 256;

/// Everything the view layer needs to re-render.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionActive(Profile),
    SessionInactive,
    ProfileUpdated(Profile),
    ChannelState(ChannelState),
    PresenceChanged { online: usize },
    /// `None` when the selection was cleared.
    ConversationSelected(Option<UserId>),
    /// The log for `peer` changed shape. `scroll` is set only when the active
    /// conversation grew.
    ConversationUpdated { peer: UserId, scroll: bool },
    MessageChanged {
        peer: UserId,
        local_id: LocalId,
        delivery: DeliveryState,
    },
    Notice(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Fan-out of [`ClientEvent`]s. A lagging receiver loses events; senders
/// never wait.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = ?e.0, "No event receivers");
        }
    }

    pub fn notify_success(&self, text: impl Into<String>) {
        self.emit(ClientEvent::Notice(Notice {
            level: NoticeLevel::Success,
            text: text.into(),
        }));
    }

    pub fn notify_error(&self, text: impl Into<String>) {
        self.emit(ClientEvent::Notice(Notice {
            level: NoticeLevel::Error,
            text: text.into(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receivers_is_harmless() {
        let sink = EventSink::new();
        sink.emit(ClientEvent::SessionInactive);
        sink.notify_error("nobody listening");
    }

    #[test]
    fn test_notice_reaches_subscriber() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();
        sink.notify_success("Profile updated");
        match rx.try_recv().unwrap() {
            ClientEvent::Notice(notice) => {
                assert_eq!(notice.level, NoticeLevel::Success);
                assert_eq!(notice.text, "Profile updated");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
