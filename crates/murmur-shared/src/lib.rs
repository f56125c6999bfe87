//! Types, wire frames and errors shared by every murmur crate.

pub mod constants;
pub mod error;
pub mod media;
pub mod protocol;
pub mod types;

pub use error::{MediaError, MurmurError};
pub use protocol::{ChannelEvent, EventKind, SendRequest, WireMessage};
pub use types::{
    AuthMode, Credential, Credentials, DeliveryState, LocalId, Message, Payload, Profile,
    ProfileUpdate, ServerId, UserId,
};
