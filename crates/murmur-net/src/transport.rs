//! Transport seam for the realtime channel.
//!
//! The connection manager never touches sockets directly: it asks a
//! [`Connector`] for a fresh [`ChannelStream`] on every (re)connect and
//! reads decoded events from it until it ends.

use async_trait::async_trait;

use murmur_shared::{ChannelEvent, UserId};

use crate::error::Result;

/// Opens one duplex connection bound to a user.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, user_id: &UserId) -> Result<Box<dyn ChannelStream>>;
}

/// Inbound half of a live connection.
#[async_trait]
pub trait ChannelStream: Send {
    /// Next decoded event. `Ok(None)` is an orderly close; an error is a
    /// transport failure. Either way the connection is gone.
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>>;
}
