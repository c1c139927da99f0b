use std::future::Future;

use crate::error::Error;
use crate::types::{
    AccessToken, AuthResponse, CorporateRegistration, Credentials, Email, Password,
    PasswordChange, ProfileUpdate, RefreshToken, Registration, TokenPair, User,
};

/// Remote Identity Service consumed by the session manager.
///
/// [`IdentityClient`](crate::IdentityClient) is the HTTP implementation.
/// Implementations report failures with the crate's error taxonomy: a rejected
/// access token is [`Error::TokenExpired`], a rejected refresh token is
/// [`Error::RefreshFailure`], rejected credentials are
/// [`Error::InvalidCredentials`].
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityService for FakeIdentity {
///     async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, Error> {
///         self.accounts.check(credentials).ok_or(Error::InvalidCredentials("unknown".into()))
///     }
///     // ...
/// }
/// ```
pub trait IdentityService: Send + Sync + 'static {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    fn register_corporate(
        &self,
        registration: &CorporateRegistration,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// Exchange a refresh token for a new token pair.
    fn refresh(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = Result<TokenPair, Error>> + Send;

    /// Invalidate the session server-side. Best effort.
    fn logout(
        &self,
        access_token: &AccessToken,
        refresh_token: Option<&RefreshToken>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn get_current_user(
        &self,
        access_token: &AccessToken,
    ) -> impl Future<Output = Result<User, Error>> + Send;

    fn update_profile(
        &self,
        access_token: &AccessToken,
        update: &ProfileUpdate,
    ) -> impl Future<Output = Result<User, Error>> + Send;

    fn change_password(
        &self,
        access_token: &AccessToken,
        change: &PasswordChange,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn verify_email(&self, token: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn request_password_reset(
        &self,
        email: &Email,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn reset_password(
        &self,
        token: &str,
        password: &Password,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Durable client-side key/value storage.
///
/// Calls are synchronous: rehydration must finish before the application
/// becomes interactive.
pub trait Storage: Send + Sync + 'static {
    /// Read the value stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), Error>;
}
