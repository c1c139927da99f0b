//! Route and action authorization.
//!
//! Every check is a pure function of the latest session snapshot and a
//! requirement. Nothing is cached: callers re-evaluate on each navigation.

use crate::error::Error;
use crate::session::Session;
use crate::types::{Role, User};

/// Role-based capability a resource may require. Implies authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleRequirement {
    /// `role == admin`.
    Admin,
    /// `role == corporate_admin` with an approved corporate account.
    ApprovedCorporateAdmin,
}

/// Capability set required by a view or action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Requirement {
    pub authenticated: bool,
    pub role: Option<RoleRequirement>,
}

impl Requirement {
    /// No requirement: everyone is allowed.
    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            role: None,
        }
    }

    #[must_use]
    pub fn admin() -> Self {
        Self {
            authenticated: true,
            role: Some(RoleRequirement::Admin),
        }
    }

    #[must_use]
    pub fn approved_corporate() -> Self {
        Self {
            authenticated: true,
            role: Some(RoleRequirement::ApprovedCorporateAdmin),
        }
    }

    fn needs_session(&self) -> bool {
        self.authenticated || self.role.is_some()
    }
}

/// Why an authenticated user may not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ForbiddenReason {
    #[display("This page requires the {required} role; your account is {actual}.")]
    RoleMismatch { required: Role, actual: Role },
    #[display("Your corporate account is awaiting approval.")]
    CorporateNotApproved,
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Render the guarded view.
    Allow,
    /// Identity unknown: send the user to login, then back to `return_to`.
    RedirectToLogin { login_path: String, return_to: String },
    /// Identity known, capability missing: render an explanation in place.
    Forbidden(ForbiddenReason),
}

impl Decision {
    /// Login URL carrying the original destination, for `RedirectToLogin`.
    #[must_use]
    pub fn login_url(&self) -> Option<String> {
        match self {
            Self::RedirectToLogin {
                login_path,
                return_to,
            } => {
                let separator = if login_path.contains('?') { '&' } else { '?' };
                let encoded = urlencoding::encode(return_to);
                Some(format!("{login_path}{separator}redirect={encoded}"))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

enum Assessment {
    Allowed,
    Unauthenticated,
    Forbidden(ForbiddenReason),
}

fn assess(session: &Session, requirement: &Requirement) -> Assessment {
    if !requirement.needs_session() {
        return Assessment::Allowed;
    }

    let Some(user) = session.user.as_ref().filter(|_| session.is_authenticated()) else {
        return Assessment::Unauthenticated;
    };

    match requirement.role.map(|role| check_role(user, role)) {
        Some(Err(reason)) => Assessment::Forbidden(reason),
        _ => Assessment::Allowed,
    }
}

fn check_role(user: &User, requirement: RoleRequirement) -> Result<(), ForbiddenReason> {
    let required = match requirement {
        RoleRequirement::Admin => Role::Admin,
        RoleRequirement::ApprovedCorporateAdmin => Role::CorporateAdmin,
    };
    if user.role != required {
        return Err(ForbiddenReason::RoleMismatch {
            required,
            actual: user.role,
        });
    }
    if requirement == RoleRequirement::ApprovedCorporateAdmin && !user.is_corporate_approved() {
        return Err(ForbiddenReason::CorporateNotApproved);
    }
    Ok(())
}

/// Evaluate `requirement` for a navigation to `location`.
#[must_use]
pub fn evaluate(
    session: &Session,
    requirement: &Requirement,
    login_path: &str,
    location: &str,
) -> Decision {
    match assess(session, requirement) {
        Assessment::Allowed => Decision::Allow,
        Assessment::Unauthenticated => Decision::RedirectToLogin {
            login_path: login_path.to_owned(),
            return_to: location.to_owned(),
        },
        Assessment::Forbidden(reason) => Decision::Forbidden(reason),
    }
}

/// Gate an action rather than a view.
///
/// # Errors
///
/// Returns [`Error::NotAuthenticated`] when there is no session, or
/// [`Error::Authorization`] when the session lacks the capability.
pub fn require(session: &Session, requirement: &Requirement) -> Result<(), Error> {
    match assess(session, requirement) {
        Assessment::Allowed => Ok(()),
        Assessment::Unauthenticated => Err(Error::NotAuthenticated),
        Assessment::Forbidden(reason) => Err(Error::Authorization(reason.to_string())),
    }
}

/// Route guard handed to the View Layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    pub require_authenticated: bool,
    pub require_role: Option<RoleRequirement>,
    pub redirect_to: String,
}

impl RouteGuard {
    /// Guard requiring a signed-in user, redirecting to `redirect_to` otherwise.
    #[must_use]
    pub fn new(redirect_to: impl Into<String>) -> Self {
        Self {
            require_authenticated: true,
            require_role: None,
            redirect_to: redirect_to.into(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: RoleRequirement) -> Self {
        self.require_role = Some(role);
        self
    }

    #[must_use]
    pub fn requirement(&self) -> Requirement {
        Requirement {
            authenticated: self.require_authenticated,
            role: self.require_role,
        }
    }

    /// Decide whether the navigation to `location` may render.
    #[must_use]
    pub fn check(&self, session: &Session, location: &str) -> Decision {
        evaluate(session, &self.requirement(), &self.redirect_to, location)
    }
}
