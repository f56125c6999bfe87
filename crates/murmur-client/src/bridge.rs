//! Glue between session edges, the channel and the view event stream.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_net::{ChannelState, CloseReason, ConnectionManager, PresenceTracker};
use murmur_shared::EventKind;

use crate::events::{ClientEvent, EventSink};
use crate::selector::ConversationSelector;
use crate::session::{SessionLifecycle, SessionSignal};
use crate::sync::MessageSynchronizer;

/// Everything a session edge has to drive.
#[derive(Clone)]
pub(crate) struct Bridge {
    pub connection: ConnectionManager,
    pub presence: PresenceTracker,
    pub sync: MessageSynchronizer,
    pub selector: ConversationSelector,
    pub events: EventSink,
}

impl Bridge {
    /// Register the session listener that opens the channel on activation
    /// and tears everything down on deactivation.
    pub fn install(self, session: &SessionLifecycle) {
        session.subscribe(move |signal| match signal {
            SessionSignal::Activated(user) => {
                self.attach_handlers();
                self.connection.open(user.id.clone());
            }
            SessionSignal::Deactivated => {
                self.connection.close();
                self.presence.clear();
                self.events.emit(ClientEvent::PresenceChanged { online: 0 });
                self.selector.clear();
                self.sync.reset();
            }
        });
    }

    /// `close` drops every subscription, so each activation registers them
    /// again. The tracker goes first so the view notice sees the new set.
    fn attach_handlers(&self) {
        self.presence.attach(&self.connection);

        let presence = self.presence.clone();
        let events = self.events.clone();
        self.connection
            .subscribe(EventKind::PresenceSnapshot, move |_| {
                events.emit(ClientEvent::PresenceChanged {
                    online: presence.online_count(),
                });
            });

        self.sync.attach(&self.connection);
        debug!("Channel handlers attached");
    }
}

/// Forward channel state to the view and end the session once reconnecting
/// has given up.
pub(crate) fn spawn_state_watcher(
    connection: &ConnectionManager,
    session: SessionLifecycle,
    events: EventSink,
) -> JoinHandle<()> {
    let mut rx = connection.watch_state();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            debug!(state = ?state, "Channel state");
            events.emit(ClientEvent::ChannelState(state.clone()));

            match state {
                ChannelState::Open => info!("Channel open"),
                ChannelState::Closed(CloseReason::RetriesExhausted) if session.is_active() => {
                    warn!("Channel lost for good, session needs re-authentication");
                    session.terminate();
                    events.notify_error("Connection lost. Please sign in again.");
                }
                _ => {}
            }
        }
        debug!("Channel state watcher stopped");
    })
}
