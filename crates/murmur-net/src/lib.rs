// Realtime channel layer: connection lifecycle, transports and presence.

pub mod backoff;
pub mod error;
pub mod manager;
pub mod memory;
pub mod presence;
pub mod transport;
pub mod websocket;

pub use backoff::Backoff;
pub use error::NetError;
pub use manager::{ChannelState, CloseReason, ConnectionManager, EventHandler, SubscriptionId};
pub use memory::MemoryConnector;
pub use presence::PresenceTracker;
pub use transport::{ChannelStream, Connector};
pub use websocket::WsConnector;
