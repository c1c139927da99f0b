use serde::{Deserialize, Serialize};

use crate::session::{SessionEvent, SessionStatus};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Login or registration rejected by the Identity Service.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Malformed input, caught client-side or reported by the server.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Access token rejected. Resolved by the gateway through a refresh.
    #[error("Access token expired")]
    TokenExpired,

    /// Refresh token rejected or the refresh could not complete. Terminal.
    #[error("Session refresh failed: {0}")]
    RefreshFailure(String),

    /// Session is valid but the action is not permitted.
    #[error("Not permitted: {0}")]
    Authorization(String),

    /// The operation requires a session and there is none.
    #[error("Not authenticated")]
    NotAuthenticated,

    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Http {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot apply {event} while session is {status}")]
    InvalidTransition {
        event: SessionEvent,
        status: SessionStatus,
    },

    /// Result of a sign-in, refresh or call that began in a session which
    /// has since been signed out or replaced.
    #[error("Discarded {event}: the session changed while it was in flight")]
    Superseded { event: SessionEvent },
}

impl Error {
    /// Coarse classification used for the session's `error` field.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::RefreshFailure(_) => ErrorKind::RefreshFailure,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            #[cfg(feature = "client")]
            Self::Network(_) => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Network,
            Self::Storage(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::Superseded { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// Failure category, cheap to clone into session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidCredentials,
    Validation,
    TokenExpired,
    RefreshFailure,
    Authorization,
    NotAuthenticated,
    Network,
    Internal,
}

impl ErrorKind {
    /// Terminal failures end the session and send the user back to login.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RefreshFailure | Self::NotAuthenticated)
    }

    /// Recoverable failures are shown inline and the user may retry.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        !self.is_terminal()
    }
}

/// Last failure recorded on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for SessionError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_failure_is_terminal() {
        let e = Error::RefreshFailure("rejected".into());
        assert_eq!(e.kind(), ErrorKind::RefreshFailure);
        assert!(e.kind().is_terminal());
    }

    #[test]
    fn inline_errors_are_recoverable() {
        for e in [
            Error::InvalidCredentials("bad password".into()),
            Error::Validation("email".into()),
            Error::Authorization("admin only".into()),
        ] {
            assert!(e.kind().is_recoverable(), "{e}");
        }
    }

    #[test]
    fn http_status_errors_classify_as_network() {
        let e = Error::Http {
            operation: "login",
            status: 503,
            detail: "unavailable".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Network);
        assert_eq!(e.to_string(), "login failed with status 503: unavailable");
    }

    #[test]
    fn superseded_results_are_internal() {
        let e = Error::Superseded {
            event: SessionEvent::AuthSucceeded,
        };
        assert_eq!(e.kind(), ErrorKind::Internal);
        assert_eq!(
            e.to_string(),
            "Discarded auth_succeeded: the session changed while it was in flight"
        );
    }

    #[test]
    fn session_error_captures_message() {
        let e = Error::Validation("password must not be empty".into());
        let recorded = SessionError::from(&e);
        assert_eq!(recorded.kind, ErrorKind::Validation);
        assert_eq!(recorded.message, "Validation error: password must not be empty");
    }
}
