use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-issued user identifier. Opaque to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client-generated identity of a log entry. Stable across confirmation and retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the server once a message is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Public profile of a user, as supplied by the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "fullName", default)]
    pub display_name: String,
    #[serde(rename = "profilePic", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub bio: String,
}

/// Message body. Exactly one of text or image is ever carried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    /// Inline image reference (a `data:` URL or a server-hosted URL).
    Image(String),
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Image(_) => None,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            Payload::Image(i) => Some(i),
            Payload::Text(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Payload::Image(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// One entry of a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Message {
    /// Build an optimistic outbound message.
    pub fn pending(sender_id: UserId, recipient_id: UserId, payload: Payload) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: None,
            sender_id,
            recipient_id,
            payload,
            created_at: Utc::now(),
            delivery: DeliveryState::Pending,
        }
    }

    /// The other participant, seen from `me`.
    pub fn peer_of(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.delivery == DeliveryState::Confirmed
    }
}

/// Mode for the login collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Login,
    Signup,
}

impl AuthMode {
    pub fn as_path(&self) -> &'static str {
        match self {
            AuthMode::Login => "login",
            AuthMode::Signup => "signup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Partial profile update; absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(rename = "fullName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(rename = "profilePic", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_of_either_direction() {
        let me = UserId::from("me");
        let them = UserId::from("them");
        let out = Message::pending(me.clone(), them.clone(), Payload::Text("hi".into()));
        assert_eq!(out.peer_of(&me), &them);

        let mut inbound = out.clone();
        inbound.sender_id = them.clone();
        inbound.recipient_id = me.clone();
        assert_eq!(inbound.peer_of(&me), &them);
    }

    #[test]
    fn test_profile_uses_server_field_names() {
        let json = r#"{"_id":"u1","fullName":"Ada","bio":"hello","profilePic":"p.png"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, UserId::from("u1"));
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.avatar_ref.as_deref(), Some("p.png"));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("s3cret-token");
        assert_eq!(format!("{credential:?}"), "Credential(..)");
        assert_eq!(credential.as_str(), "s3cret-token");
    }

    #[test]
    fn test_short_id_handles_short_strings() {
        assert_eq!(UserId::from("abc").short(), "abc");
        assert_eq!(UserId::from("0123456789").short(), "01234567");
    }
}
