use serde::{Deserialize, Serialize};

/// Lifecycle state of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session. Start state and post-logout state.
    #[default]
    Anonymous,
    /// Login or registration in flight.
    Authenticating,
    /// Holding a token pair.
    Authenticated,
    /// Holding a token pair while a refresh is in flight.
    Refreshing,
    /// A login attempt failed or the session was torn down.
    Unauthenticated,
}

impl SessionStatus {
    /// Whether a token pair is held in this status.
    #[must_use]
    pub fn holds_tokens(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    AuthStarted,
    AuthSucceeded,
    AuthFailed,
    Rehydrated,
    UserLoaded,
    UserRejected,
    RefreshStarted,
    RefreshSucceeded,
    RefreshFailed,
    LoggedOut,
    ErrorRaised,
    ErrorDismissed,
}

impl SessionEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthStarted => "auth_started",
            Self::AuthSucceeded => "auth_succeeded",
            Self::AuthFailed => "auth_failed",
            Self::Rehydrated => "rehydrated",
            Self::UserLoaded => "user_loaded",
            Self::UserRejected => "user_rejected",
            Self::RefreshStarted => "refresh_started",
            Self::RefreshSucceeded => "refresh_succeeded",
            Self::RefreshFailed => "refresh_failed",
            Self::LoggedOut => "logged_out",
            Self::ErrorRaised => "error_raised",
            Self::ErrorDismissed => "error_dismissed",
        }
    }

    /// Events that start a new sign-in or end the current session.
    pub(crate) fn advances_epoch(self) -> bool {
        matches!(
            self,
            Self::AuthStarted
                | Self::AuthFailed
                | Self::UserRejected
                | Self::RefreshFailed
                | Self::LoggedOut
        )
    }

    /// Successful transitions clear the recorded error.
    pub(crate) fn clears_error(self) -> bool {
        matches!(
            self,
            Self::AuthSucceeded
                | Self::Rehydrated
                | Self::UserLoaded
                | Self::RefreshSucceeded
                | Self::LoggedOut
                | Self::ErrorDismissed
        )
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition table: `(status, event) -> status'`.
///
/// Returns `None` for pairs the machine does not accept; callers treat that
/// as a stale or out-of-order intent and commit nothing.
#[must_use]
pub fn transition(status: SessionStatus, event: SessionEvent) -> Option<SessionStatus> {
    use SessionEvent as E;
    use SessionStatus as S;

    match (status, event) {
        (S::Anonymous | S::Unauthenticated, E::AuthStarted) => Some(S::Authenticating),
        (S::Authenticating, E::AuthSucceeded) => Some(S::Authenticated),
        (S::Authenticating, E::AuthFailed) => Some(S::Unauthenticated),
        (S::Anonymous, E::Rehydrated) => Some(S::Authenticated),
        (S::Authenticated | S::Refreshing, E::UserLoaded) => Some(status),
        (S::Authenticated | S::Refreshing, E::UserRejected) => Some(S::Unauthenticated),
        (S::Authenticated, E::RefreshStarted) => Some(S::Refreshing),
        (S::Refreshing, E::RefreshSucceeded) => Some(S::Authenticated),
        (S::Refreshing, E::RefreshFailed) => Some(S::Unauthenticated),
        (_, E::LoggedOut) => Some(S::Anonymous),
        (_, E::ErrorRaised | E::ErrorDismissed) => Some(status),
        _ => None,
    }
}
