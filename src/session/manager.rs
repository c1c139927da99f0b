use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;

use super::config::SessionConfig;
use super::machine::{SessionEvent, SessionStatus};
use super::store::{CredentialStore, Session};
use super::traits::{IdentityService, Storage};
use crate::error::{Error, ErrorKind, SessionError};
use crate::gate::{self, Decision, Requirement, RouteGuard};
use crate::gateway::{Gateway, TokenSource};
use crate::persist::{CartSnapshot, Persistence};
use crate::types::{
    AccessToken, AuthResponse, CorporateRegistration, Credentials, Email, Password,
    PasswordChange, ProfileUpdate, Registration, User, validate_new_password,
};

type RefreshOutcome = Result<AccessToken, String>;

struct InFlightRefresh {
    id: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

struct Inner<I, S> {
    identity: I,
    store: CredentialStore,
    persistence: Persistence<S>,
    config: SessionConfig,
    /// Serializes store transitions with their persistence mirror.
    writes: Mutex<()>,
    refresh: Mutex<Option<InFlightRefresh>>,
    refresh_ids: AtomicU64,
    /// Advanced whenever a sign-in starts or the session ends. Results tagged
    /// with an older epoch belong to a session that no longer exists.
    epoch: AtomicU64,
}

/// Orchestrates the session: processes intents, owns the credential store,
/// and drives persistence and the refresh protocol.
///
/// Construct once at startup and share by cloning; clones are cheap handles
/// to the same session.
pub struct SessionManager<I, S> {
    inner: Arc<Inner<I, S>>,
}

// Manual Clone: avoid derive adding `I: Clone, S: Clone` bounds.
impl<I, S> Clone for SessionManager<I, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I: IdentityService, S: Storage> SessionManager<I, S> {
    /// Create the manager and synchronously rehydrate persisted state.
    ///
    /// A valid stored snapshot yields an `Authenticated` session pending
    /// revalidation through [`get_current_user`](Self::get_current_user).
    #[must_use]
    pub fn new(identity: I, storage: S, config: SessionConfig) -> Self {
        let persistence = Persistence::new(
            storage,
            config.persist_key.clone(),
            config.persist_refresh_token,
        );
        let restored = persistence.rehydrate();

        let manager = Self {
            inner: Arc::new(Inner {
                identity,
                store: CredentialStore::new(Session::default()),
                persistence,
                config,
                writes: Mutex::new(()),
                refresh: Mutex::new(None),
                refresh_ids: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        };

        if let Some(auth) = restored.auth {
            let user_id = auth.user.id.clone();
            let result = manager.commit(SessionEvent::Rehydrated, |s| {
                s.access_token = Some(auth.access_token);
                s.refresh_token = auth.refresh_token;
                s.user = Some(auth.user);
            });
            match result {
                Ok(_) => tracing::info!(user_id = %user_id, "Session rehydrated from storage"),
                Err(e) => tracing::warn!(error = %e, "Could not restore persisted session"),
            }
        }

        manager
    }

    // ── Read side ──────────────────────────────────────────────────────

    /// Latest session snapshot.
    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.store.snapshot()
    }

    /// Change notifications, one per committed transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.store.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.store.status()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.session().user
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Gateway decorating calls with this session's bearer token.
    #[must_use]
    pub fn gateway(&self) -> Gateway<Self> {
        Gateway::new(self.clone())
    }

    // ── Authorization ──────────────────────────────────────────────────

    /// Guard for signed-in routes, redirecting to the configured login path.
    #[must_use]
    pub fn guard(&self) -> RouteGuard {
        RouteGuard::new(self.inner.config.login_path.clone())
    }

    /// Evaluate `guard` for a navigation to `location` against the latest snapshot.
    #[must_use]
    pub fn authorize(&self, guard: &RouteGuard, location: &str) -> Decision {
        guard.check(&self.session(), location)
    }

    /// Gate an action against the latest snapshot.
    ///
    /// # Errors
    ///
    /// See [`gate::require`].
    pub fn require(&self, requirement: &Requirement) -> Result<(), Error> {
        gate::require(&self.session(), requirement)
    }

    // ── Sign-in ────────────────────────────────────────────────────────

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] if a session is already active or signing in
    /// - [`Error::Superseded`] if the session was signed out (and possibly
    ///   signed in again) while the request was in flight
    /// - [`Error::Validation`] / [`Error::InvalidCredentials`] / network errors,
    ///   after which the session is `Unauthenticated` with `error` set
    pub async fn login(&self, email: &str, password: &str) -> Result<User, Error> {
        let pending = self.begin_auth()?;
        let outcome = match Credentials::new(email, password) {
            Ok(credentials) => self.inner.identity.login(&credentials).await,
            Err(e) => Err(e),
        };
        self.finish_auth(pending, "login", outcome)
    }

    /// Create a customer account and sign in.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register(&self, registration: Registration) -> Result<User, Error> {
        let pending = self.begin_auth()?;
        let outcome = match registration.validate() {
            Ok(()) => self.inner.identity.register(&registration).await,
            Err(e) => Err(e),
        };
        self.finish_auth(pending, "register", outcome)
    }

    /// Create a corporate account and sign in. The account starts unapproved
    /// unless the Identity Service says otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register_corporate(
        &self,
        registration: CorporateRegistration,
    ) -> Result<User, Error> {
        let pending = self.begin_auth()?;
        let outcome = match registration.validate() {
            Ok(()) => self.inner.identity.register_corporate(&registration).await,
            Err(e) => Err(e),
        };
        self.finish_auth(pending, "register_corporate", outcome)
    }

    fn begin_auth(&self) -> Result<PendingAuth<'_, I, S>, Error> {
        let (_, epoch) = self.commit_at(None, SessionEvent::AuthStarted, |_| {})?;
        Ok(PendingAuth {
            manager: self,
            epoch,
            settled: false,
        })
    }

    fn finish_auth(
        &self,
        mut pending: PendingAuth<'_, I, S>,
        intent: &'static str,
        outcome: Result<AuthResponse, Error>,
    ) -> Result<User, Error> {
        pending.settled = true;
        let epoch = Some(pending.epoch);

        match outcome {
            Ok(auth) => {
                let user = auth.user.clone();
                self.commit_at(epoch, SessionEvent::AuthSucceeded, |s| {
                    s.access_token = Some(auth.access_token);
                    s.refresh_token = Some(auth.refresh_token);
                    s.user = Some(auth.user);
                })
                .inspect_err(|e| {
                    tracing::warn!(intent, error = %e, "Discarding sign-in result for a session that changed");
                })?;
                tracing::info!(intent, user_id = %user.id, role = %user.role, "Signed in");
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(intent, error = %e, "Sign-in failed");
                // Rejected only if the session moved on (e.g. logout) meanwhile.
                let _ = self.commit_at(epoch, SessionEvent::AuthFailed, |s| {
                    s.error = Some(SessionError::from(&e));
                });
                Err(e)
            }
        }
    }

    // ── Authenticated operations ───────────────────────────────────────

    /// Re-fetch the user snapshot. Tokens are untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] without an access token
    /// - [`Error::TokenExpired`] if the token is rejected even after a
    ///   refresh; the session is torn down
    /// - [`Error::RefreshFailure`] if the refresh failed; already torn down
    /// - other errors propagate with the session untouched apart from `error`
    pub async fn get_current_user(&self) -> Result<User, Error> {
        if self.inner.store.access_token().is_none() {
            return Err(Error::NotAuthenticated);
        }

        let epoch = self.epoch();
        let identity = &self.inner.identity;
        let result = self
            .gateway()
            .execute(|token| async move {
                let token = token.ok_or(Error::NotAuthenticated)?;
                identity.get_current_user(&token).await
            })
            .await;

        self.settle_user_result(epoch, result)
    }

    /// Update editable profile fields and install the returned snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`get_current_user`](Self::get_current_user).
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, Error> {
        let epoch = self.epoch();
        let identity = &self.inner.identity;
        let update = &update;
        let result = self
            .gateway()
            .execute(|token| async move {
                let token = token.ok_or(Error::NotAuthenticated)?;
                identity.update_profile(&token, update).await
            })
            .await;

        let user = self.settle_user_result(epoch, result)?;
        tracing::info!(user_id = %user.id, "Profile updated");
        Ok(user)
    }

    /// Change the signed-in user's password. Session status is unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a weak or unchanged new password, otherwise as
    /// [`get_current_user`](Self::get_current_user).
    pub async fn change_password(&self, change: PasswordChange) -> Result<(), Error> {
        let epoch = self.epoch();
        if let Err(e) = change.validate() {
            self.record_error(epoch, &e);
            return Err(e);
        }

        let identity = &self.inner.identity;
        let change = &change;
        let result = self
            .gateway()
            .execute(|token| async move {
                let token = token.ok_or(Error::NotAuthenticated)?;
                identity.change_password(&token, change).await
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Password changed");
                Ok(())
            }
            Err(e) => {
                self.settle_failure(epoch, &e);
                Err(e)
            }
        }
    }

    /// Confirm an email address from a verification link.
    ///
    /// When signed in, the user snapshot is re-fetched so `email_verified`
    /// reflects the change.
    ///
    /// # Errors
    ///
    /// Returns the Identity Service error, or a revalidation error.
    pub async fn verify_email(&self, token: &str) -> Result<(), Error> {
        if token.trim().is_empty() {
            return Err(Error::Validation("verification token is required".into()));
        }
        self.inner.identity.verify_email(token).await?;
        tracing::info!("Email verified");

        if self.is_authenticated() {
            self.get_current_user().await?;
        }
        Ok(())
    }

    /// Ask the Identity Service to send a password reset link.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed email, otherwise the Identity Service error.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), Error> {
        let email: Email = email.parse()?;
        self.inner.identity.request_password_reset(&email).await
    }

    /// Set a new password using a reset token. Does not sign in.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a weak password, otherwise the Identity Service error.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), Error> {
        if token.trim().is_empty() {
            return Err(Error::Validation("reset token is required".into()));
        }
        let password = Password::new(new_password);
        validate_new_password(&password)?;
        self.inner.identity.reset_password(token, &password).await
    }

    fn settle_user_result(&self, epoch: u64, result: Result<User, Error>) -> Result<User, Error> {
        match result {
            Ok(user) => {
                self.commit_at(Some(epoch), SessionEvent::UserLoaded, |s| {
                    s.user = Some(user.clone());
                })?;
                Ok(user)
            }
            Err(e) => {
                self.settle_failure(epoch, &e);
                Err(e)
            }
        }
    }

    /// Apply the session consequences of a failed authenticated call started
    /// at `epoch`.
    fn settle_failure(&self, epoch: u64, e: &Error) {
        match e {
            Error::TokenExpired => {
                let rejected = self.commit_at(Some(epoch), SessionEvent::UserRejected, |s| {
                    s.error = Some(SessionError::from(e));
                });
                match rejected {
                    Ok(_) => tracing::warn!("Access token rejected after refresh, ending session"),
                    Err(skipped) => {
                        tracing::warn!(error = %skipped, "Access token rejected, but the session already changed");
                    }
                }
            }
            // Torn down by the refresh itself.
            Error::RefreshFailure(_) => {}
            _ => self.record_error(epoch, e),
        }
    }

    // ── Refresh ────────────────────────────────────────────────────────

    /// Exchange the refresh token for a new pair, joining any refresh
    /// already in flight.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshFailure`] after the session has been torn down.
    pub async fn refresh(&self) -> Result<AccessToken, Error> {
        self.join_refresh(None).await
    }

    async fn join_refresh(&self, stale: Option<&AccessToken>) -> Result<AccessToken, Error> {
        let outcome = {
            let mut slot = self
                .inner
                .refresh
                .lock()
                .map_err(|_| Error::RefreshFailure("refresh state poisoned".into()))?;

            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!(refresh_id = in_flight.id, "Joining in-flight refresh");
                    in_flight.outcome.clone()
                }
                None => {
                    if let Some(stale) = stale {
                        match self.inner.store.access_token() {
                            Some(current) if &current != stale => return Ok(current),
                            Some(_) => {}
                            None => {
                                return Err(Error::RefreshFailure(
                                    "no active session to refresh".into(),
                                ));
                            }
                        }
                    }

                    let id = self.inner.refresh_ids.fetch_add(1, Ordering::Relaxed);
                    let manager = self.clone();
                    // Spawned so that a caller giving up never cancels the token exchange.
                    let task = tokio::spawn(async move { manager.run_refresh(id).await });
                    let outcome = async move {
                        task.await
                            .unwrap_or_else(|e| Err(format!("refresh task failed: {e}")))
                    }
                    .boxed()
                    .shared();

                    *slot = Some(InFlightRefresh {
                        id,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        outcome.await.map_err(Error::RefreshFailure)
    }

    async fn run_refresh(&self, id: u64) -> RefreshOutcome {
        let outcome = self.exchange_tokens().await;

        // The slot was filled before this task could take the lock.
        if let Ok(mut slot) = self.inner.refresh.lock() {
            if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
                *slot = None;
            }
        }

        outcome.map_err(|e| match e {
            Error::RefreshFailure(reason) => reason,
            other => other.to_string(),
        })
    }

    async fn exchange_tokens(&self) -> Result<AccessToken, Error> {
        let (started, epoch) = self
            .commit_at(None, SessionEvent::RefreshStarted, |_| {})
            .map_err(|_| Error::RefreshFailure("no active session to refresh".into()))?;

        let Some(refresh_token) = started.refresh_token else {
            let e = Error::RefreshFailure("no refresh token available".into());
            self.tear_down(Some(epoch), SessionEvent::RefreshFailed, Some(&e));
            return Err(e);
        };

        match self.inner.identity.refresh(&refresh_token).await {
            Ok(pair) => {
                let access_token = pair.access_token.clone();
                self.commit_at(Some(epoch), SessionEvent::RefreshSucceeded, |s| {
                    s.access_token = Some(pair.access_token);
                    s.refresh_token = Some(pair.refresh_token);
                })
                .map_err(|_| Error::RefreshFailure("session ended during refresh".into()))?;
                tracing::debug!("Session tokens refreshed");
                Ok(access_token)
            }
            Err(e) => {
                let e = match e {
                    Error::RefreshFailure(_) => e,
                    other => Error::RefreshFailure(other.to_string()),
                };
                tracing::warn!(error = %e, "Token refresh failed, ending session");
                self.tear_down(Some(epoch), SessionEvent::RefreshFailed, Some(&e));
                Err(e)
            }
        }
    }

    // ── Sign-out ───────────────────────────────────────────────────────

    /// Sign out. Always ends with an `Anonymous` session and purged storage.
    ///
    /// Local credentials are cleared first; the Identity Service is then
    /// notified on a best-effort basis with the captured tokens.
    pub async fn logout(&self) {
        let previous = self.session();

        if let Ok(mut slot) = self.inner.refresh.lock() {
            *slot = None;
        }
        self.tear_down(None, SessionEvent::LoggedOut, None);

        if let (true, Some(access_token)) =
            (previous.status.holds_tokens(), previous.access_token.as_ref())
        {
            if let Err(e) = self
                .inner
                .identity
                .logout(access_token, previous.refresh_token.as_ref())
                .await
            {
                tracing::warn!(error = %e, "Identity Service logout failed; local session already cleared");
            }
        }

        tracing::info!("Signed out");
    }

    // ── Cart persistence ───────────────────────────────────────────────

    /// Cart state restored at startup or last saved.
    #[must_use]
    pub fn cart(&self) -> CartSnapshot {
        self.inner.persistence.cart()
    }

    /// Persist the cart slice alongside the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub fn save_cart(&self, cart: CartSnapshot) -> Result<(), Error> {
        let _serial = self.lock_writes()?;
        self.inner.persistence.save_cart(cart)
    }

    // ── Errors ─────────────────────────────────────────────────────────

    /// Clear the recorded error.
    pub fn dismiss_error(&self) {
        let _ = self.commit(SessionEvent::ErrorDismissed, |_| {});
    }

    fn record_error(&self, epoch: u64, e: &Error) {
        let _ = self.commit_at(Some(epoch), SessionEvent::ErrorRaised, |s| {
            s.error = Some(SessionError::from(e));
        });
    }

    // ── Store writes ───────────────────────────────────────────────────

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>, Error> {
        self.inner
            .writes
            .lock()
            .map_err(|_| Error::Storage("session write lock poisoned".into()))
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// Apply one transition and mirror the result to storage.
    fn commit(
        &self,
        event: SessionEvent,
        update: impl FnOnce(&mut Session),
    ) -> Result<Session, Error> {
        self.commit_at(None, event, update).map(|(session, _)| session)
    }

    /// [`commit`](Self::commit) for a result produced within the session
    /// identified by `expected`. Returns the session and the epoch it now has.
    fn commit_at(
        &self,
        expected: Option<u64>,
        event: SessionEvent,
        update: impl FnOnce(&mut Session),
    ) -> Result<(Session, u64), Error> {
        let _serial = self.lock_writes()?;
        let committed = self.apply_locked(expected, event, update)?;
        if let Err(e) = self.inner.persistence.mirror(&committed.0) {
            tracing::error!(event = %event, error = %e, "Failed to persist session");
        }
        Ok(committed)
    }

    /// Caller must hold the `writes` lock.
    fn apply_locked(
        &self,
        expected: Option<u64>,
        event: SessionEvent,
        update: impl FnOnce(&mut Session),
    ) -> Result<(Session, u64), Error> {
        let current = self.inner.epoch.load(Ordering::Acquire);
        if expected.is_some_and(|epoch| epoch != current) {
            return Err(Error::Superseded { event });
        }

        let session = self.inner.store.apply(event, update)?;
        let epoch = if event.advances_epoch() {
            self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            current
        };
        Ok((session, epoch))
    }

    /// Apply a teardown transition and purge storage, unless the session
    /// already moved on.
    fn tear_down(&self, expected: Option<u64>, event: SessionEvent, error: Option<&Error>) {
        let Ok(_serial) = self.lock_writes() else {
            tracing::error!(event = %event, "Session write lock poisoned during teardown");
            return;
        };

        let applied = self.apply_locked(expected, event, |s| {
            s.error = error.map(SessionError::from);
        });
        if let Err(e) = applied {
            tracing::debug!(error = %e, "Skipping teardown");
            return;
        }
        if let Err(e) = self.inner.persistence.purge() {
            tracing::error!(event = %event, error = %e, "Failed to purge persisted session");
        }
    }
}

impl<I: IdentityService, S: Storage> TokenSource for SessionManager<I, S> {
    fn access_token(&self) -> Option<AccessToken> {
        self.inner.store.access_token()
    }

    async fn refresh_after(&self, stale: &AccessToken) -> Result<AccessToken, Error> {
        self.join_refresh(Some(stale)).await
    }
}

/// Settles a sign-in as failed if the caller stops awaiting it midway.
struct PendingAuth<'a, I: IdentityService, S: Storage> {
    manager: &'a SessionManager<I, S>,
    epoch: u64,
    settled: bool,
}

impl<I: IdentityService, S: Storage> Drop for PendingAuth<'_, I, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!("Sign-in abandoned before completion");
        let _ = self.manager.commit_at(Some(self.epoch), SessionEvent::AuthFailed, |s| {
            s.error = Some(SessionError {
                kind: ErrorKind::Internal,
                message: "sign-in cancelled".into(),
            });
        });
    }
}
