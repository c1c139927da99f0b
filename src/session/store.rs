use tokio::sync::watch;

use super::machine::{SessionEvent, SessionStatus, transition};
use crate::error::{Error, SessionError};
use crate::types::{AccessToken, RefreshToken, User};

/// Point-in-time view of the session.
///
/// Snapshots are plain values: changing one never affects the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub access_token: Option<AccessToken>,
    pub refresh_token: Option<RefreshToken>,
    pub user: Option<User>,
    pub error: Option<SessionError>,
}

impl Session {
    /// Whether the session currently holds a usable token pair.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status.holds_tokens() && self.access_token.is_some()
    }
}

/// Single source of truth for who is logged in.
///
/// Every write is one state-machine transition applied under the channel's
/// lock, so readers never observe a half-applied intent. Subscribers are
/// notified once per committed transition.
pub(crate) struct CredentialStore {
    tx: watch::Sender<Session>,
}

impl CredentialStore {
    pub(crate) fn new(initial: Session) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.tx.borrow().status
    }

    pub(crate) fn access_token(&self) -> Option<AccessToken> {
        let session = self.tx.borrow();
        if session.status.holds_tokens() {
            session.access_token.clone()
        } else {
            None
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Apply `event`, running `update` on the session first.
    ///
    /// Tokens and the user snapshot are cleared whenever the resulting status
    /// does not hold tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] and leaves the session untouched
    /// if the machine rejects `event` in the current status.
    pub(crate) fn apply(
        &self,
        event: SessionEvent,
        update: impl FnOnce(&mut Session),
    ) -> Result<Session, Error> {
        let mut outcome = Err(SessionStatus::Anonymous);

        self.tx.send_if_modified(|session| {
            let Some(next) = transition(session.status, event) else {
                outcome = Err(session.status);
                return false;
            };

            update(session);
            session.status = next;
            if event.clears_error() {
                session.error = None;
            }
            if !next.holds_tokens() {
                session.access_token = None;
                session.refresh_token = None;
                session.user = None;
            }

            outcome = Ok(session.clone());
            true
        });

        outcome.map_err(|status| Error::InvalidTransition { event, status })
    }
}
