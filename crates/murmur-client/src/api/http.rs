//! REST implementation of the remote collaborators.
//!
//! Every authenticated call carries the bearer token in the `token` header.
//! Responses share one envelope shape: `{"success": bool, "message": ...}`
//! plus endpoint-specific fields.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use murmur_shared::constants::TOKEN_HEADER;
use murmur_shared::{
    AuthMode, Credential, Credentials, MurmurError, Profile, ProfileUpdate, SendRequest,
    UserId, WireMessage,
};

use super::{
    AuthApi, DirectoryApi, HistoryApi, LoginGrant, SendApi, SendReceipt, UserDirectory,
};

#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MurmurError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MurmurError::Protocol(format!("Invalid API URL {base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(MurmurError::Protocol(format!(
                "API URL must be http or https: {base_url}"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MurmurError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    /// Base URL extended by `segments`, each percent-encoded as one segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        request.header(TOKEN_HEADER, credential.as_str())
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, MurmurError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        debug!(%status, len = body.len(), "API response");
        decode_response(status, &body)
    }
}

fn transport_error(err: reqwest::Error) -> MurmurError {
    if err.is_timeout() {
        MurmurError::Network("request timed out".to_string())
    } else {
        MurmurError::Network(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Map HTTP status onto the error taxonomy, then decode the envelope.
fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, MurmurError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.to_string());
        return Err(MurmurError::AuthRejected(message));
    }
    if status.is_server_error() {
        return Err(MurmurError::Network(format!("server returned {status}")));
    }
    serde_json::from_slice(body).map_err(|e| MurmurError::Serialization(e.to_string()))
}

fn refusal(message: Option<String>, fallback: &str) -> String {
    message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user: Option<Profile>,
}

impl CheckResponse {
    fn into_profile(self) -> Result<Profile, MurmurError> {
        match (self.success, self.user) {
            (true, Some(user)) => Ok(user),
            (true, None) => Err(MurmurError::Protocol("check succeeded without a user".into())),
            (false, _) => Err(MurmurError::AuthRejected(refusal(
                self.message,
                "credential rejected",
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "userData", default)]
    user_data: Option<Profile>,
    #[serde(default)]
    token: Option<String>,
}

impl LoginResponse {
    fn into_grant(self) -> Result<LoginGrant, MurmurError> {
        if !self.success {
            return Err(MurmurError::AuthRejected(refusal(
                self.message,
                "login rejected",
            )));
        }
        match (self.user_data, self.token) {
            (Some(user), Some(token)) if !token.is_empty() => Ok(LoginGrant {
                user,
                credential: Credential::new(token),
                message: self.message,
            }),
            _ => Err(MurmurError::Protocol(
                "login succeeded without user data or token".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    users: Vec<Profile>,
    #[serde(rename = "unseenMessages", default)]
    unseen: HashMap<UserId, u32>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "newMessage", default)]
    new_message: Option<WireMessage>,
}

impl SendResponse {
    fn into_receipt(self) -> Result<SendReceipt, MurmurError> {
        match (self.success, self.new_message) {
            (true, Some(msg)) => Ok(SendReceipt { message_id: msg.id }),
            (true, None) => Err(MurmurError::Protocol("send succeeded without a message".into())),
            (false, _) => Err(MurmurError::Network(refusal(self.message, "send refused"))),
        }
    }
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn validate(&self, credential: &Credential) -> Result<Profile, MurmurError> {
        let request = self.authorized(
            self.http.get(self.endpoint(&["api", "auth", "check"])),
            credential,
        );
        self.call::<CheckResponse>(request).await?.into_profile()
    }

    async fn login(
        &self,
        mode: AuthMode,
        credentials: &Credentials,
    ) -> Result<LoginGrant, MurmurError> {
        let request = self
            .http
            .post(self.endpoint(&["api", "auth", mode.as_path()]))
            .json(credentials);
        self.call::<LoginResponse>(request).await?.into_grant()
    }

    async fn update_profile(
        &self,
        credential: &Credential,
        update: &ProfileUpdate,
    ) -> Result<Profile, MurmurError> {
        let request = self.authorized(
            self.http.put(self.endpoint(&["api", "auth", "update-profile"])).json(update),
            credential,
        );
        let response: CheckResponse = self.call(request).await?;
        if !response.success {
            return Err(MurmurError::Network(refusal(
                response.message,
                "profile update refused",
            )));
        }
        response.into_profile()
    }
}

#[async_trait]
impl HistoryApi for HttpApi {
    async fn fetch_history(
        &self,
        credential: &Credential,
        peer: &UserId,
    ) -> Result<Vec<WireMessage>, MurmurError> {
        let request = self.authorized(
            self.http.get(self.endpoint(&["api", "messages", peer.as_str()])),
            credential,
        );
        let response: MessagesResponse = self.call(request).await?;
        if !response.success {
            return Err(MurmurError::Network(refusal(
                response.message,
                "history refused",
            )));
        }
        Ok(response.messages)
    }
}

#[async_trait]
impl SendApi for HttpApi {
    async fn send_message(
        &self,
        credential: &Credential,
        recipient: &UserId,
        request: &SendRequest,
    ) -> Result<SendReceipt, MurmurError> {
        let http_request = self.authorized(
            self.http
                .post(self.endpoint(&["api", "messages", "send", recipient.as_str()]))
                .json(request),
            credential,
        );
        self.call::<SendResponse>(http_request).await?.into_receipt()
    }
}

#[async_trait]
impl DirectoryApi for HttpApi {
    async fn list_users(&self, credential: &Credential) -> Result<UserDirectory, MurmurError> {
        let request = self.authorized(
            self.http.get(self.endpoint(&["api", "messages", "users"])),
            credential,
        );
        let response: UsersResponse = self.call(request).await?;
        if !response.success {
            return Err(MurmurError::Network(refusal(
                response.message,
                "user list refused",
            )));
        }
        Ok(UserDirectory {
            users: response.users,
            unseen: response.unseen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_status_is_auth_rejected() {
        let body = br#"{"success":false,"message":"jwt expired"}"#;
        let err = decode_response::<CheckResponse>(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert!(matches!(err, MurmurError::AuthRejected(m) if m == "jwt expired"));

        let err = decode_response::<CheckResponse>(StatusCode::FORBIDDEN, b"").unwrap_err();
        assert!(matches!(err, MurmurError::AuthRejected(_)));
    }

    #[test]
    fn test_server_error_is_network() {
        let err =
            decode_response::<CheckResponse>(StatusCode::BAD_GATEWAY, b"<html>").unwrap_err();
        assert!(matches!(err, MurmurError::Network(_)));
    }

    #[test]
    fn test_check_envelope() {
        let ok: CheckResponse = decode_response(
            StatusCode::OK,
            br#"{"success":true,"user":{"_id":"u1","fullName":"Ada","bio":""}}"#,
        )
        .unwrap();
        assert_eq!(ok.into_profile().unwrap().id, UserId::from("u1"));

        let refused: CheckResponse =
            decode_response(StatusCode::OK, br#"{"success":false,"message":"bad token"}"#)
                .unwrap();
        assert!(matches!(
            refused.into_profile(),
            Err(MurmurError::AuthRejected(m)) if m == "bad token"
        ));
    }

    #[test]
    fn test_login_envelope() {
        let grant: LoginResponse = decode_response(
            StatusCode::OK,
            br#"{"success":true,"token":"t-1","message":"Login successful",
                 "userData":{"_id":"u1","fullName":"Ada","bio":"hi"}}"#,
        )
        .unwrap();
        let grant = grant.into_grant().unwrap();
        assert_eq!(grant.credential.as_str(), "t-1");
        assert_eq!(grant.message.as_deref(), Some("Login successful"));

        let refused: LoginResponse =
            decode_response(StatusCode::OK, br#"{"success":false,"message":"Invalid credentials"}"#)
                .unwrap();
        assert!(matches!(refused.into_grant(), Err(MurmurError::AuthRejected(_))));
    }

    #[test]
    fn test_send_envelope_yields_message_id() {
        let response: SendResponse = decode_response(
            StatusCode::OK,
            br#"{"success":true,"newMessage":{"_id":"m9","senderId":"me","receiverId":"you",
                 "text":"hello","createdAt":"2024-03-01T10:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(response.into_receipt().unwrap().message_id.0, "m9");
    }

    #[test]
    fn test_users_envelope() {
        let response: UsersResponse = decode_response(
            StatusCode::OK,
            br#"{"success":true,"users":[{"_id":"u2","fullName":"Bob"}],
                 "unseenMessages":{"u2":3}}"#,
        )
        .unwrap();
        assert!(response.success);
        assert_eq!(response.users.len(), 1);
        assert_eq!(response.unseen.get(&UserId::from("u2")), Some(&3));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let api = HttpApi::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.endpoint(&["api", "auth", "check"]).as_str(),
            "http://localhost:5000/api/auth/check"
        );

        let api = HttpApi::new("https://chat.example/backend", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.endpoint(&["api", "messages", "users"]).as_str(),
            "https://chat.example/backend/api/messages/users"
        );

        assert!(HttpApi::new("ftp://chat.example", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_peer_id_stays_one_path_segment() {
        let api = HttpApi::new("http://localhost:5000", Duration::from_secs(1)).unwrap();
        let peer = UserId::from("a/b?c#d");
        assert_eq!(
            api.endpoint(&["api", "messages", peer.as_str()]).as_str(),
            "http://localhost:5000/api/messages/a%2Fb%3Fc%23d"
        );
    }
}
