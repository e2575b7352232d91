//! Single source of truth for the current session. The in-memory state lives in a
//! `watch` channel so observers can follow changes; every credential mutation is
//! mirrored to the [`CredentialStore`]. The request pipeline reads and writes
//! credentials only through this type.
//!
//! Mutations never fail: storage errors are logged and the in-memory state still
//! changes, so a broken disk degrades to a session that does not survive restart.

use crate::session::{AuthSession, PersistedState, User};
use crate::storage::{
    CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, SNAPSHOT_KEY, USER_KEY,
};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct AuthStateStore {
    inner: Arc<Inner>,
}

struct Inner {
    session: watch::Sender<AuthSession>,
    storage: Arc<dyn CredentialStore>,
}

impl fmt::Debug for AuthStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStateStore")
            .field("session", &*self.inner.session.borrow())
            .field("storage", &self.inner.storage)
            .finish()
    }
}

impl AuthStateStore {
    /// Store with an empty session. Existing storage contents are left untouched.
    #[must_use]
    pub fn new(storage: Arc<dyn CredentialStore>) -> Self {
        Self::with_session(storage, AuthSession::default())
    }

    /// Rehydrate from the persisted snapshot. A missing or unreadable snapshot yields
    /// the empty session; a snapshot that breaks the session invariants is discarded
    /// and every slot is cleared.
    #[must_use]
    #[instrument(skip_all)]
    pub fn restore(storage: Arc<dyn CredentialStore>) -> Self {
        let persisted = match storage.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(persisted) => Some(persisted),
                Err(err) => {
                    warn!("Discarding unreadable session snapshot: {}", err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Error reading session snapshot: {}", err);
                None
            }
        };

        let Some(persisted) = persisted else {
            return Self::new(storage);
        };

        let session = AuthSession::from(persisted.state);
        if let Some(violation) = session.invariant_violation() {
            warn!("Discarding inconsistent session snapshot: {}", violation);
            let store = Self::new(storage);
            store.clear_auth();
            return store;
        }

        debug!(authenticated = session.is_authenticated, "session restored");
        Self::with_session(storage, session)
    }

    fn with_session(storage: Arc<dyn CredentialStore>, session: AuthSession) -> Self {
        let (session, _) = watch::channel(session);
        Self {
            inner: Arc::new(Inner { session, storage }),
        }
    }

    /// Records a fresh login or registration.
    #[instrument(skip_all, fields(user_id = user.id))]
    pub fn set_auth(&self, user: User, access_token: SecretString, refresh_token: SecretString) {
        self.write_slot(ACCESS_TOKEN_KEY, access_token.expose_secret());
        self.write_slot(REFRESH_TOKEN_KEY, refresh_token.expose_secret());
        self.write_user_slot(&user);

        self.inner.session.send_modify(|session| {
            session.user = Some(user);
            session.access_token = Some(access_token);
            session.refresh_token = Some(refresh_token);
            session.is_authenticated = true;
        });

        self.persist_snapshot();
    }

    /// Replaces the user record only. Credentials and the authenticated flag are left
    /// as they are, so this is accepted on a signed-out session too.
    #[instrument(skip_all, fields(user_id = user.id))]
    pub fn set_user(&self, user: User) {
        self.write_user_slot(&user);
        self.inner.session.send_modify(|session| session.user = Some(user));
        self.persist_snapshot();
    }

    /// Removes every credential slot and resets memory to the empty session.
    #[instrument(skip_all)]
    pub fn clear_auth(&self) {
        for key in SESSION_KEYS {
            if let Err(err) = self.inner.storage.delete(key) {
                warn!("Error removing {} from storage: {}", key, err);
            }
        }

        self.inner.session.send_modify(|session| {
            session.user = None;
            session.access_token = None;
            session.refresh_token = None;
            session.is_authenticated = false;
        });

        debug!("session cleared");
    }

    pub fn set_loading(&self, loading: bool) {
        self.inner
            .session
            .send_modify(|session| session.is_loading = loading);
    }

    /// Stores the result of a refresh exchange. A rotated refresh credential replaces
    /// the old one; otherwise the refresh slot is untouched.
    ///
    /// `exchanged` is the refresh credential the exchange was made with. Returns
    /// `false` without writing anything when the session no longer holds it, i.e. it
    /// was cleared or replaced by a new sign-in while the exchange was in flight.
    #[instrument(skip_all, fields(rotated = refresh_token.is_some()))]
    pub fn replace_tokens(
        &self,
        exchanged: &SecretString,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> bool {
        if !self.holds_refresh_token(exchanged) {
            debug!("session changed during refresh, dropping new access credential");
            return false;
        }

        self.write_slot(ACCESS_TOKEN_KEY, access_token.expose_secret());
        if let Some(refresh_token) = &refresh_token {
            self.write_slot(REFRESH_TOKEN_KEY, refresh_token.expose_secret());
        }

        self.inner.session.send_modify(|session| {
            session.access_token = Some(access_token);
            if let Some(refresh_token) = refresh_token {
                session.refresh_token = Some(refresh_token);
            }
        });

        self.persist_snapshot();
        true
    }

    #[must_use]
    pub fn session(&self) -> AuthSession {
        self.inner.session.borrow().clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.inner.session.borrow().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.inner.session.borrow().refresh_token.clone()
    }

    /// `true` if `token` is the refresh credential of the current session.
    #[must_use]
    pub fn holds_refresh_token(&self, token: &SecretString) -> bool {
        self.inner
            .session
            .borrow()
            .refresh_token
            .as_ref()
            .is_some_and(|held| held.expose_secret() == token.expose_secret())
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.session.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.session.borrow().is_authenticated
    }

    /// Receiver notified on every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.inner.session.subscribe()
    }

    fn write_slot(&self, key: &str, value: &str) {
        if let Err(err) = self.inner.storage.set(key, value) {
            warn!("Error writing {} to storage: {}", key, err);
        }
    }

    fn write_user_slot(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(raw) => self.write_slot(USER_KEY, &raw),
            Err(err) => warn!("Error encoding user record: {}", err),
        }
    }

    fn persist_snapshot(&self) {
        let persisted = PersistedState {
            state: (&*self.inner.session.borrow()).into(),
            version: 0,
        };

        match serde_json::to_string(&persisted) {
            Ok(raw) => self.write_slot(SNAPSHOT_KEY, &raw),
            Err(err) => warn!("Error encoding session snapshot: {}", err),
        }
    }
}
