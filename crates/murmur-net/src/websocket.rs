//! WebSocket transport for the presence/notification service.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use murmur_shared::constants::CHANNEL_USER_PARAM;
use murmur_shared::{ChannelEvent, UserId};

use crate::error::{NetError, Result};
use crate::transport::{ChannelStream, Connector};

/// Connects to `{url}?userId={id}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(NetError::InvalidUrl(url.to_string()));
        }
        Ok(Self { url: parsed })
    }

    pub fn channel_url(&self, user_id: &UserId) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair(CHANNEL_USER_PARAM, user_id.as_str());
        url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, user_id: &UserId) -> Result<Box<dyn ChannelStream>> {
        let url = self.channel_url(user_id);
        debug!(%url, "Connecting WebSocket");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;
        Ok(Box::new(WsStream { ws }))
    }
}

struct WsStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelStream for WsStream {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        while let Some(frame) = self.ws.next().await {
            match frame.map_err(|e| NetError::Transport(e.to_string()))? {
                Message::Text(text) => match ChannelEvent::decode(&text) {
                    Ok(Some(event)) => return Ok(Some(event)),
                    Ok(None) => debug!(len = text.len(), "Ignoring unknown channel event"),
                    Err(e) => warn!(error = %e, "Skipping malformed channel frame"),
                },
                Message::Close(frame) => {
                    debug!(frame = ?frame, "WebSocket close frame");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself.
                _ => {}
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_channel_url_appends_user() {
        let connector = WsConnector::new("ws://localhost:5000/ws").unwrap();
        assert_eq!(
            connector.channel_url(&UserId::from("65a1f0")).as_str(),
            "ws://localhost:5000/ws?userId=65a1f0"
        );

        let connector = WsConnector::new("wss://chat.example/ws?v=2").unwrap();
        assert_eq!(
            connector.channel_url(&UserId::from("a&b c")).as_str(),
            "wss://chat.example/ws?v=2&userId=a%26b+c"
        );
    }

    #[test]
    fn test_rejects_non_ws_url() {
        assert!(matches!(
            WsConnector::new("http://localhost"),
            Err(NetError::InvalidUrl(_))
        ));
        assert!(matches!(
            WsConnector::new("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_skips_bad_frames_and_ends_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let snapshot = ChannelEvent::PresenceSnapshot(vec![UserId::from("u1"), UserId::from("u2")]);
        let frame = snapshot.encode().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text("{not json".into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"typing","data":{}}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(frame.into())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            // Drain until the client acknowledges the close.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let connector = WsConnector::new(&format!("ws://{addr}/ws")).unwrap();
        let mut stream = connector.connect(&UserId::from("me")).await.unwrap();

        assert_eq!(stream.next_event().await.unwrap(), Some(snapshot));
        assert_eq!(stream.next_event().await.unwrap(), None);
        drop(stream);
        server.await.unwrap();
    }
}
