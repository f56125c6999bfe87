//! Composition root.
//!
//! [`Client`] builds every component once, hands each its collaborators
//! and wires session edges to the channel. Hosts hold one `Client` and read
//! [`ClientEvent`]s from [`Client::events`].

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use murmur_net::{ChannelState, ConnectionManager, Connector, PresenceTracker, WsConnector};
use murmur_shared::media::encode_image;
use murmur_shared::{
    AuthMode, Credential, Credentials, LocalId, MediaError, Message, Payload, Profile,
    ProfileUpdate, UserId,
};
use murmur_store::{CredentialStore, FileCredentialStore};

use crate::api::{AuthApi, DirectoryApi, HistoryApi, HttpApi, SendApi, UserDirectory};
use crate::bridge::{spawn_state_watcher, Bridge};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventSink};
use crate::selector::ConversationSelector;
use crate::session::SessionLifecycle;
use crate::sync::MessageSynchronizer;

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthApi>,
    pub history: Arc<dyn HistoryApi>,
    pub sender: Arc<dyn SendApi>,
    pub directory: Arc<dyn DirectoryApi>,
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl Collaborators {
    /// REST API, WebSocket channel and file-backed credential store.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let api = Arc::new(HttpApi::new(&config.api_url, config.request_timeout)?);
        let connector = Arc::new(WsConnector::new(&config.ws_url)?);
        let credentials = match &config.data_dir {
            Some(dir) => FileCredentialStore::open_at(dir),
            None => FileCredentialStore::new()?,
        };
        debug!(path = %credentials.path().display(), "Credential store");

        Ok(Self {
            auth: api.clone(),
            history: api.clone(),
            sender: api.clone(),
            directory: api,
            connector,
            credentials: Arc::new(credentials),
        })
    }
}

pub struct Client {
    config: ClientConfig,
    events: EventSink,
    session: SessionLifecycle,
    connection: ConnectionManager,
    presence: PresenceTracker,
    sync: MessageSynchronizer,
    selector: ConversationSelector,
    directory: Arc<dyn DirectoryApi>,
    watcher: JoinHandle<()>,
}

impl Client {
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let events = EventSink::new();
        let session = SessionLifecycle::new(
            collaborators.auth,
            collaborators.credentials,
            config.request_timeout,
            events.clone(),
        );
        let connection =
            ConnectionManager::new(collaborators.connector, config.reconnect.clone());
        let presence = PresenceTracker::default();
        let sync = MessageSynchronizer::new(
            session.clone(),
            collaborators.history,
            collaborators.sender,
            config.request_timeout,
            events.clone(),
        );
        let selector = ConversationSelector::new(sync.clone());

        Bridge {
            connection: connection.clone(),
            presence: presence.clone(),
            sync: sync.clone(),
            selector: selector.clone(),
            events: events.clone(),
        }
        .install(&session);
        let watcher = spawn_state_watcher(&connection, session.clone(), events.clone());

        info!(api = %config.api_url, ws = %config.ws_url, "Client ready");

        Self {
            config,
            events,
            session,
            connection,
            presence,
            sync,
            selector,
            directory: collaborators.directory,
            watcher,
        }
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, collaborators))
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionLifecycle {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn sync(&self) -> &MessageSynchronizer {
        &self.sync
    }

    pub fn selector(&self) -> &ConversationSelector {
        &self.selector
    }

    // -- session --

    /// Resume from the stored credential, if any.
    pub async fn restore(&self) -> Result<Option<Profile>> {
        Ok(self.session.restore().await?.map(|s| s.user))
    }

    pub async fn establish(&self, credential: Credential) -> Result<Profile> {
        Ok(self.session.establish(credential).await?.user)
    }

    pub async fn login(&self, mode: AuthMode, credentials: &Credentials) -> Result<Profile> {
        Ok(self.session.login(mode, credentials).await?.user)
    }

    pub fn logout(&self) -> Result<()> {
        self.session.logout()
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        self.session.update_profile(update).await
    }

    // -- directory and presence --

    /// Peers for the sidebar with their unseen-message counts.
    pub async fn users(&self) -> Result<UserDirectory> {
        let credential = self.session.credential().ok_or(ClientError::NoSession)?;
        let directory = tokio::time::timeout(
            self.config.request_timeout,
            self.directory.list_users(&credential),
        )
        .await
        .map_err(|_| ClientError::Timeout("user list"))?;

        directory.map_err(|e| {
            let err = ClientError::from(e);
            self.events.notify_error(err.to_string());
            err
        })
    }

    pub fn is_online(&self, peer: &UserId) -> bool {
        self.presence.is_online(peer)
    }

    pub fn online_peers(&self) -> Vec<UserId> {
        self.presence.online_peers()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.connection.state()
    }

    // -- conversations --

    pub async fn select(&self, peer: UserId) -> Result<()> {
        self.selector.select(peer).await
    }

    pub fn deselect(&self) {
        self.selector.clear();
    }

    pub async fn send_text(&self, text: &str) -> Result<LocalId> {
        self.sync.send(Payload::Text(text.to_string())).await
    }

    /// Encode and send an image. Encoding finishes before the optimistic
    /// insert, so the logged payload is exactly what goes on the wire.
    pub async fn send_image(&self, bytes: &[u8], mime: &str) -> Result<LocalId> {
        let payload = encode_image(bytes, mime, self.config.max_image_bytes)?;
        self.sync.send(payload).await
    }

    /// Send an image file. The mime type is guessed from the extension and
    /// must be an `image/*` type.
    pub async fn send_image_file(&self, path: impl AsRef<Path>) -> Result<LocalId> {
        let path = path.as_ref();
        let mime = mime_guess::from_path(path)
            .first()
            .ok_or_else(|| MediaError::NotAnImage(path.display().to_string()))?;
        if mime.type_() != mime_guess::mime::IMAGE {
            return Err(MediaError::NotAnImage(mime.to_string()).into());
        }
        let bytes = tokio::fs::read(path).await?;
        self.send_image(&bytes, mime.essence_str()).await
    }

    pub async fn retry(&self, local_id: LocalId) -> Result<()> {
        self.sync.retry(local_id).await
    }

    pub fn discard(&self, local_id: LocalId) -> Result<Message> {
        self.sync.discard(local_id)
    }

    pub fn messages(&self, peer: &UserId) -> Vec<Message> {
        self.sync.messages(peer)
    }

    /// Log of the selected conversation; empty when none is selected.
    pub fn active_messages(&self) -> Vec<Message> {
        self.selector
            .selected()
            .map(|peer| self.sync.messages(&peer))
            .unwrap_or_default()
    }

    pub fn media(&self, peer: &UserId) -> Vec<String> {
        self.sync.media(peer)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.watcher.abort();
        self.session.clear_listeners();
        self.connection.close();
    }
}
