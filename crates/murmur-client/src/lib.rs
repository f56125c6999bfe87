//! Realtime session and message synchronization engine for a two-person
//! messaging client.

pub mod api;
mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod selector;
pub mod session;
pub mod sync;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::{Client, Collaborators};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind, Result};
pub use events::{ClientEvent, EventSink, Notice, NoticeLevel};
pub use selector::ConversationSelector;
pub use session::{Session, SessionLifecycle, SessionSignal};
pub use sync::{ConversationLog, FetchTicket, MessageSynchronizer};

/// Install a `tracing` subscriber filtered by `RUST_LOG`. Hosts that already
/// run their own subscriber skip this.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_net=debug,murmur_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(app = murmur_shared::constants::APP_NAME, "Logging initialised");
    }
}
