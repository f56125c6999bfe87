//! # murmur-store
//!
//! Persistence of the bearer credential across process restarts. The token
//! is opaque: the store never looks inside it beyond "present or not".

pub mod credentials;

mod error;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Result, StoreError};
