//! Session lifecycle.
//!
//! Owns the validated `(credential, profile)` pair. Transitions into and out
//! of the active state are pushed to registered listeners exactly once per
//! edge; the composition root uses them to open and close the channel.
//!
//! Transitions are serialized: a state change and the signals it raises
//! complete before the next transition starts. Each sign-in attempt is
//! tagged with a generation; a later attempt or a termination makes it
//! stale, and a stale success neither persists nor activates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use murmur_shared::{
    AuthMode, Credential, Credentials, MurmurError, Profile, ProfileUpdate, UserId,
};
use murmur_store::CredentialStore;

use crate::api::AuthApi;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventSink};

/// A validated credential and the profile it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub credential: Credential,
    pub user: Profile,
}

/// Edge pushed to session listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Activated(Profile),
    Deactivated,
}

pub type SessionListener = Arc<dyn Fn(&SessionSignal) + Send + Sync>;

#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
    events: EventSink,
    state: Mutex<State>,
    /// Held across a state change and its listener calls.
    transition: Mutex<()>,
    listeners: Mutex<Vec<SessionListener>>,
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    generation: u64,
}

impl SessionLifecycle {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                store,
                timeout,
                events,
                state: Mutex::new(State::default()),
                transition: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener for activity edges. Listeners run synchronously,
    /// in registration order, on the task that caused the transition, and
    /// must not start or end a session themselves.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&SessionSignal) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Drop every listener. Called when the owning client goes away.
    pub(crate) fn clear_listeners(&self) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn current_session(&self) -> Option<Session> {
        self.lock_state().session.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().session.is_some()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.lock_state().session.as_ref().map(|s| s.user.id.clone())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.lock_state()
            .session
            .as_ref()
            .map(|s| s.credential.clone())
    }

    /// Validate `credential` with the auth authority and make it the active
    /// session.
    ///
    /// A refusal ends any session built on the same credential and forgets
    /// it from the store. A network failure or timeout is inconclusive and
    /// leaves the current state untouched. A success that was overtaken by
    /// a logout or a newer sign-in returns [`ClientError::Superseded`].
    pub async fn establish(&self, credential: Credential) -> Result<Session> {
        let generation = self.begin_attempt();
        let outcome = tokio::time::timeout(
            self.inner.timeout,
            self.inner.auth.validate(&credential),
        )
        .await;

        match outcome {
            Ok(Ok(user)) => self.commit(generation, credential, user),
            Ok(Err(MurmurError::AuthRejected(reason))) => {
                warn!(reason = %reason, "Credential rejected");
                self.forget_rejected(&credential);
                self.inner.events.notify_error(reason.clone());
                Err(ClientError::AuthRejected(reason))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Credential validation inconclusive");
                Err(ClientError::ValidationUnknown(e.to_string()))
            }
            Err(_) => {
                warn!(timeout = ?self.inner.timeout, "Credential validation timed out");
                Err(ClientError::ValidationUnknown(
                    "validation timed out".to_string(),
                ))
            }
        }
    }

    /// Establish from the stored credential. `Ok(None)` when nothing is stored.
    pub async fn restore(&self) -> Result<Option<Session>> {
        match self.inner.store.get()? {
            Some(token) => self.establish(Credential::new(token)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Log in or sign up, persist the issued credential and activate.
    pub async fn login(&self, mode: AuthMode, credentials: &Credentials) -> Result<Session> {
        let generation = self.begin_attempt();
        let outcome = tokio::time::timeout(
            self.inner.timeout,
            self.inner.auth.login(mode, credentials),
        )
        .await
        .map_err(|_| ClientError::Timeout("login"));

        let grant = match outcome.and_then(|r| r.map_err(ClientError::from)) {
            Ok(grant) => grant,
            Err(e) => {
                warn!(mode = mode.as_path(), error = %e, "Login failed");
                self.inner.events.notify_error(notice_text(&e));
                return Err(e);
            }
        };

        let session = self.commit(generation, grant.credential, grant.user)?;
        self.inner.events.notify_success(
            grant
                .message
                .unwrap_or_else(|| "Logged in successfully".to_string()),
        );
        Ok(session)
    }

    /// Replace the profile with the authority's answer. Not an activity edge.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let credential = self.credential().ok_or(ClientError::NoSession)?;
        let outcome = tokio::time::timeout(
            self.inner.timeout,
            self.inner.auth.update_profile(&credential, update),
        )
        .await
        .map_err(|_| ClientError::Timeout("profile update"))
        .and_then(|r| r.map_err(ClientError::from));

        let profile = match outcome {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Profile update failed");
                self.inner.events.notify_error(notice_text(&e));
                return Err(e);
            }
        };

        {
            let mut state = self.lock_state();
            match state.session.as_mut() {
                // The session may have changed hands while the call was out.
                Some(s) if s.credential == credential => s.user = profile.clone(),
                _ => return Err(ClientError::NoSession),
            }
        }
        self.inner
            .events
            .emit(ClientEvent::ProfileUpdated(profile.clone()));
        self.inner.events.notify_success("Profile updated successfully");
        Ok(profile)
    }

    /// Drop the session. Listeners tear the channel down before this returns.
    /// Sign-ins still in flight are discarded. The stored credential is kept.
    pub fn terminate(&self) {
        let _transition = self.lock_transition();
        self.end_session();
    }

    /// Terminate and forget the stored credential.
    pub fn logout(&self) -> Result<()> {
        {
            let _transition = self.lock_transition();
            self.end_session();
            self.inner.store.clear()?;
        }
        self.inner.events.notify_success("Logged out successfully");
        Ok(())
    }

    fn begin_attempt(&self) -> u64 {
        let mut state = self.lock_state();
        state.generation += 1;
        state.generation
    }

    /// Persist and activate, unless the attempt went stale meanwhile.
    fn commit(&self, generation: u64, credential: Credential, user: Profile) -> Result<Session> {
        let _transition = self.lock_transition();
        if self.lock_state().generation != generation {
            info!(user = %user.id.short(), "Sign-in superseded, discarded");
            return Err(ClientError::Superseded);
        }
        self.persist(&credential);
        Ok(self.activate(credential, user))
    }

    /// Caller holds the transition lock.
    fn end_session(&self) {
        let previous = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.session.take()
        };
        if let Some(session) = previous {
            info!(user = %session.user.id.short(), "Session inactive");
            self.signal(&SessionSignal::Deactivated);
            self.inner.events.emit(ClientEvent::SessionInactive);
        }
    }

    /// Caller holds the transition lock.
    fn activate(&self, credential: Credential, user: Profile) -> Session {
        let session = Session {
            credential,
            user: user.clone(),
        };

        let previous = self.lock_state().session.replace(session.clone());
        match previous {
            Some(prev) if prev.user.id == user.id => {
                // Same identity; no edge.
                if prev.user != user {
                    self.inner.events.emit(ClientEvent::ProfileUpdated(user));
                }
            }
            Some(prev) => {
                info!(
                    from = %prev.user.id.short(),
                    to = %user.id.short(),
                    "Session switched user"
                );
                self.signal(&SessionSignal::Deactivated);
                self.inner.events.emit(ClientEvent::SessionInactive);
                self.announce(user);
            }
            None => self.announce(user),
        }
        session
    }

    fn announce(&self, user: Profile) {
        info!(user = %user.id.short(), "Session active");
        self.signal(&SessionSignal::Activated(user.clone()));
        self.inner.events.emit(ClientEvent::SessionActive(user));
    }

    fn forget_rejected(&self, credential: &Credential) {
        let holds_rejected = self
            .lock_state()
            .session
            .as_ref()
            .is_some_and(|s| &s.credential == credential);
        if holds_rejected {
            self.terminate();
        }

        match self.inner.store.get() {
            Ok(Some(stored)) if stored == credential.as_str() => {
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear rejected credential");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read credential store"),
        }
    }

    fn persist(&self, credential: &Credential) {
        if let Err(e) = self.inner.store.set(credential.as_str()) {
            warn!(error = %e, "Failed to persist credential");
        }
    }

    fn signal(&self, signal: &SessionSignal) {
        let listeners: Vec<SessionListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(signal);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.inner
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn notice_text(err: &ClientError) -> String {
    match err {
        ClientError::AuthRejected(reason) => reason.clone(),
        other => other.to_string(),
    }
}
