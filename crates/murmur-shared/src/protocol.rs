//! Realtime channel frames and the server's message object.
//!
//! Frames are JSON text: `{"event": "<name>", "data": <payload>}`. Only two
//! inbound event names are understood; everything else is reported as
//! unknown and skipped by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_MESSAGE_INBOUND, EVENT_PRESENCE_SNAPSHOT};
use crate::error::MurmurError;
use crate::types::{DeliveryState, LocalId, Message, Payload, ServerId, UserId};

/// Kinds of inbound events a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PresenceSnapshot,
    MessageInbound,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PresenceSnapshot => "presence-snapshot",
            EventKind::MessageInbound => "message-inbound",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Full replacement set of online peers.
    PresenceSnapshot(Vec<UserId>),
    /// A message addressed to us, or the echo of one we sent.
    MessageInbound(WireMessage),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::PresenceSnapshot(_) => EventKind::PresenceSnapshot,
            ChannelEvent::MessageInbound(_) => EventKind::MessageInbound,
        }
    }

    /// Decode a text frame. `Ok(None)` means a well-formed frame with an
    /// event name this client does not handle.
    pub fn decode(frame: &str) -> Result<Option<Self>, MurmurError> {
        let raw: RawFrame =
            serde_json::from_str(frame).map_err(|e| MurmurError::Serialization(e.to_string()))?;

        let event = match raw.event.as_str() {
            EVENT_PRESENCE_SNAPSHOT => {
                let peers: Vec<UserId> = serde_json::from_value(raw.data)
                    .map_err(|e| MurmurError::Serialization(e.to_string()))?;
                ChannelEvent::PresenceSnapshot(peers)
            }
            EVENT_MESSAGE_INBOUND => {
                let msg: WireMessage = serde_json::from_value(raw.data)
                    .map_err(|e| MurmurError::Serialization(e.to_string()))?;
                ChannelEvent::MessageInbound(msg)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Encode back into a text frame (used by test servers and fixtures).
    pub fn encode(&self) -> Result<String, MurmurError> {
        let raw = match self {
            ChannelEvent::PresenceSnapshot(peers) => RawFrame {
                event: EVENT_PRESENCE_SNAPSHOT.to_string(),
                data: serde_json::to_value(peers)
                    .map_err(|e| MurmurError::Serialization(e.to_string()))?,
            },
            ChannelEvent::MessageInbound(msg) => RawFrame {
                event: EVENT_MESSAGE_INBOUND.to_string(),
                data: serde_json::to_value(msg)
                    .map_err(|e| MurmurError::Serialization(e.to_string()))?,
            },
        };
        serde_json::to_string(&raw).map_err(|e| MurmurError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Message object as the server stores and pushes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: ServerId,
    pub sender_id: UserId,
    #[serde(rename = "receiverId")]
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Correlation id echoed back for messages this client originated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
}

impl WireMessage {
    /// Image wins when both fields are populated, matching how the
    /// server's own clients render such records.
    pub fn payload(&self) -> Result<Payload, MurmurError> {
        match (&self.image, &self.text) {
            (Some(image), _) if !image.is_empty() => Ok(Payload::Image(image.clone())),
            (_, Some(text)) => Ok(Payload::Text(text.clone())),
            _ => Err(MurmurError::InvalidPayload(format!(
                "message {} carries neither text nor image",
                self.id
            ))),
        }
    }

    /// Convert into a confirmed log entry. A fresh local id is minted unless
    /// the server echoed our correlation id.
    pub fn into_message(self) -> Result<Message, MurmurError> {
        let payload = self.payload()?;
        Ok(Message {
            local_id: self.client_id.unwrap_or_default(),
            server_id: Some(self.id),
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            payload,
            created_at: self.created_at,
            delivery: DeliveryState::Confirmed,
        })
    }
}

/// Body of the send request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub client_id: LocalId,
}

impl SendRequest {
    pub fn new(payload: &Payload, client_id: LocalId) -> Self {
        match payload {
            Payload::Text(t) => Self {
                text: Some(t.clone()),
                image: None,
                client_id,
            },
            Payload::Image(i) => Self {
                text: None,
                image: Some(i.clone()),
                client_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_presence_snapshot() {
        let frame = r#"{"event":"getOnlineUsers","data":["a","b"]}"#;
        let event = ChannelEvent::decode(frame).unwrap().unwrap();
        assert_eq!(
            event,
            ChannelEvent::PresenceSnapshot(vec![UserId::from("a"), UserId::from("b")])
        );
        assert_eq!(event.kind(), EventKind::PresenceSnapshot);
    }

    #[test]
    fn test_decode_message_with_correlation() {
        let local = LocalId::new();
        let frame = format!(
            r#"{{"event":"newMessage","data":{{"_id":"m1","senderId":"a","receiverId":"b","text":"hello","createdAt":"2024-05-01T10:00:00Z","clientId":"{}"}}}}"#,
            local
        );
        let Some(ChannelEvent::MessageInbound(msg)) = ChannelEvent::decode(&frame).unwrap() else {
            panic!("expected inbound message");
        };
        assert_eq!(msg.client_id, Some(local));

        let entry = msg.into_message().unwrap();
        assert_eq!(entry.local_id, local);
        assert_eq!(entry.server_id, Some(ServerId::new("m1")));
        assert_eq!(entry.payload, Payload::Text("hello".into()));
        assert_eq!(entry.delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let frame = r#"{"event":"typing","data":{"from":"a"}}"#;
        assert!(ChannelEvent::decode(frame).unwrap().is_none());
    }

    #[test]
    fn test_malformed_frame_is_error() {
        assert!(ChannelEvent::decode("not json").is_err());
        assert!(ChannelEvent::decode(r#"{"event":"getOnlineUsers","data":42}"#).is_err());
    }

    #[test]
    fn test_payload_requires_a_body() {
        let msg = WireMessage {
            id: ServerId::new("m"),
            sender_id: UserId::from("a"),
            recipient_id: UserId::from("b"),
            text: None,
            image: None,
            created_at: Utc::now(),
            client_id: None,
        };
        assert!(msg.payload().is_err());
    }

    #[test]
    fn test_send_request_carries_one_body() {
        let id = LocalId::new();
        let req = SendRequest::new(&Payload::Image("data:image/png;base64,AA==".into()), id);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("text").is_none());
        assert_eq!(json["clientId"], serde_json::json!(id.to_string()));
    }
}
