//! Remote collaborators: authentication, history, sending and the user
//! directory. [`http::HttpApi`] implements all four against the REST API;
//! tests substitute in-memory fakes.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;

use murmur_shared::{
    AuthMode, Credential, Credentials, MurmurError, Profile, ProfileUpdate, SendRequest,
    ServerId, UserId, WireMessage,
};

pub use http::HttpApi;

/// Result of a successful login or sign-up.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub user: Profile,
    pub credential: Credential,
    /// Server-provided confirmation text, when any.
    pub message: Option<String>,
}

/// Server acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: ServerId,
}

/// Sidebar data: known peers and how many unseen messages each has sent.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    pub users: Vec<Profile>,
    pub unseen: HashMap<UserId, u32>,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Check a stored credential and return the profile it belongs to.
    async fn validate(&self, credential: &Credential) -> Result<Profile, MurmurError>;

    async fn login(
        &self,
        mode: AuthMode,
        credentials: &Credentials,
    ) -> Result<LoginGrant, MurmurError>;

    async fn update_profile(
        &self,
        credential: &Credential,
        update: &ProfileUpdate,
    ) -> Result<Profile, MurmurError>;
}

#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Conversation with `peer`, oldest first.
    async fn fetch_history(
        &self,
        credential: &Credential,
        peer: &UserId,
    ) -> Result<Vec<WireMessage>, MurmurError>;
}

#[async_trait]
pub trait SendApi: Send + Sync {
    async fn send_message(
        &self,
        credential: &Credential,
        recipient: &UserId,
        request: &SendRequest,
    ) -> Result<SendReceipt, MurmurError>;
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn list_users(&self, credential: &Credential) -> Result<UserDirectory, MurmurError>;
}
