use std::sync::Arc;

use parking_lot::RwLock;
use shared::{User, UserRole};
use tracing::{debug, info, warn};

use crate::persistence::{PersistedSession, PersistenceError, SessionPersistence};

/// Who is logged in, as seen by the rest of the client.
///
/// `epoch` is bumped every time the session changes hands (login, logout,
/// forced invalidation) so late responses from a previous session can be
/// recognised and dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserSession {
    pub user: Option<User>,
    pub token: Option<String>,
    pub epoch: u64,
}

impl UserSession {
    pub fn logged(&self) -> bool {
        self.user.is_some() && self.token.as_deref().is_some_and(|token| !token.is_empty())
    }

    pub fn role(&self) -> Option<UserRole> {
        self.user.as_ref().map(|user| user.role)
    }

    pub fn is_admin(&self) -> bool {
        self.logged() && self.role() == Some(UserRole::Admin)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("access token must not be empty")]
    EmptyToken,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

struct State {
    session: UserSession,
    hydrated: bool,
}

struct Inner {
    state: RwLock<State>,
    persistence: Arc<dyn SessionPersistence>,
}

/// Single source of truth for the current session. Cloning yields another
/// handle to the same store.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    session: UserSession::default(),
                    hydrated: false,
                }),
                persistence,
            }),
        }
    }

    /// Loads the persisted record into memory. Only the first call reads
    /// storage; a record that cannot be read is discarded.
    pub fn hydrate(&self) -> UserSession {
        let mut state = self.inner.state.write();
        if state.hydrated {
            return state.session.clone();
        }
        match self.inner.persistence.load() {
            Ok(Some(record)) if !record.access_token.is_empty() => {
                // Same session that `credentials` was already handing out,
                // so the epoch stays.
                info!(user_id = %record.user.id, "Session restored from storage");
                state.session.user = Some(record.user);
                state.session.token = Some(record.access_token);
            }
            Ok(_) => {
                debug!("No stored session");
            }
            Err(error) => {
                warn!(%error, "Stored session is unreadable, discarding it");
                if let Err(error) = self.inner.persistence.clear() {
                    warn!(%error, "Fail to discard stored session");
                }
            }
        }
        state.hydrated = true;
        state.session.clone()
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.state.read().hydrated
    }

    pub fn snapshot(&self) -> UserSession {
        self.inner.state.read().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().session.logged()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.read().session.user.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state.read().session.epoch
    }

    /// Token and epoch to stamp an outgoing request with. Before hydration
    /// the token comes straight from storage.
    pub fn credentials(&self) -> (Option<String>, u64) {
        let state = self.inner.state.read();
        if state.hydrated {
            return (state.session.token.clone(), state.session.epoch);
        }
        let token = match self.inner.persistence.load() {
            Ok(record) => record.map(|record| record.access_token),
            Err(error) => {
                warn!(%error, "Fail to read stored session token");
                None
            }
        };
        (token.filter(|token| !token.is_empty()), state.session.epoch)
    }

    pub fn token(&self) -> Option<String> {
        self.credentials().0
    }

    /// Starts a new session. Storage is written first; memory only changes
    /// once the record is durable. Returns the new epoch.
    pub fn set_auth(&self, user: User, token: String) -> Result<u64, SessionError> {
        if token.trim().is_empty() {
            return Err(SessionError::EmptyToken);
        }
        let mut state = self.inner.state.write();
        self.inner.persistence.save(&PersistedSession {
            access_token: token.clone(),
            user: user.clone(),
        })?;
        info!(user_id = %user.id, role = %user.role, "Session started");
        state.session.user = Some(user);
        state.session.token = Some(token);
        state.session.epoch += 1;
        state.hydrated = true;
        Ok(state.session.epoch)
    }

    pub fn clear_auth(&self) {
        let mut state = self.inner.state.write();
        self.reset(&mut state);
    }

    /// Replaces the user of the current session. Ignored when nobody is
    /// logged in.
    pub fn update_user(&self, user: User) -> bool {
        let mut state = self.inner.state.write();
        self.replace_user(&mut state, user)
    }

    /// Same as [`SessionStore::update_user`] but only if the session is still
    /// the one identified by `epoch`.
    pub fn update_user_in_epoch(&self, user: User, epoch: u64) -> bool {
        let mut state = self.inner.state.write();
        if state.session.epoch != epoch {
            debug!(
                user_id = %user.id,
                request_epoch = epoch,
                current_epoch = state.session.epoch,
                "Dropping user update from a previous session"
            );
            return false;
        }
        self.replace_user(&mut state, user)
    }

    /// Ends the session identified by `epoch` after the backend rejected its
    /// credentials. Returns `true` only for the call that actually ended it.
    pub fn invalidate(&self, epoch: u64) -> bool {
        let mut state = self.inner.state.write();
        if state.session.epoch != epoch {
            debug!(
                request_epoch = epoch,
                current_epoch = state.session.epoch,
                "Session already replaced, ignoring invalidation"
            );
            return false;
        }
        if !state.session.logged() && state.hydrated {
            return false;
        }
        warn!("Session invalidated by the backend");
        self.reset(&mut state);
        true
    }

    fn reset(&self, state: &mut State) {
        if let Err(error) = self.inner.persistence.clear() {
            warn!(%error, "Fail to erase stored session");
        }
        // Before hydration the stored record is the session.
        if state.session.logged() || !state.hydrated {
            info!("Session cleared");
            state.session.epoch += 1;
        }
        state.session.user = None;
        state.session.token = None;
        state.hydrated = true;
    }

    fn replace_user(&self, state: &mut State, user: User) -> bool {
        let Some(token) = state.session.token.clone().filter(|_| state.session.logged()) else {
            debug!(user_id = %user.id, "No active session, ignoring user update");
            return false;
        };
        if let Err(error) = self.inner.persistence.save(&PersistedSession {
            access_token: token,
            user: user.clone(),
        }) {
            warn!(%error, "Fail to persist updated user");
        }
        debug!(user_id = %user.id, "Session user updated");
        state.session.user = Some(user);
        true
    }
}
