#![doc = include_str!("../README.md")]

pub mod email;
pub mod error;
pub mod gate;
pub mod gateway;
#[cfg(feature = "client")]
pub mod identity;
pub mod persist;
pub mod session;
pub mod types;

// Re-exports for convenient access
pub use email::is_valid_email;
pub use error::{Error, ErrorKind, SessionError};
pub use gate::{Decision, ForbiddenReason, Requirement, RoleRequirement, RouteGuard};
pub use gateway::{Gateway, TokenSource};
#[cfg(feature = "client")]
pub use identity::{IdentityClient, IdentityConfig};
pub use persist::{
    AuthSnapshot, CartSnapshot, FileStorage, MemoryStorage, Rehydrated, SCHEMA_VERSION,
};
pub use session::{
    IdentityService, Session, SessionConfig, SessionEvent, SessionManager, SessionStatus,
    Storage,
};
pub use types::{
    AccessToken, AuthResponse, CorporateDetails, CorporateRegistration, Credentials, Email,
    MIN_PASSWORD_LEN, Password, PasswordChange, ProfileUpdate, RefreshToken, Registration, Role,
    TokenPair, User, UserId,
};
