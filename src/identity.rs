use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::session::IdentityService;
use crate::types::{
    AccessToken, AuthResponse, CorporateRegistration, Credentials, Email, Password,
    PasswordChange, ProfileUpdate, RefreshToken, Registration, TokenPair, User,
};

/// Identity Service HTTP configuration.
///
/// Required fields are constructor parameters, so there are no runtime "missing field" errors.
///
/// ```rust,ignore
/// use storefront_session::IdentityConfig;
///
/// let config = IdentityConfig::new("https://shop.example.com/api/".parse()?)
///     .with_timeout(std::time::Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct IdentityConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
}

impl IdentityConfig {
    /// Create a configuration rooted at `base_url`.
    ///
    /// Endpoint paths are joined onto `base_url`, so it should end with `/`
    /// when it carries a path prefix. One is appended if missing.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            timeout: Duration::from_secs(15),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `IDENTITY_BASE_URL`: Identity Service API root (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `IDENTITY_TIMEOUT_SECS`: Per-request timeout in seconds (default 15)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let base_url_str = std::env::var("IDENTITY_BASE_URL")
            .map_err(|_| Error::Config("IDENTITY_BASE_URL is required".into()))?;
        let base_url: Url = base_url_str
            .parse()
            .map_err(|e| Error::Config(format!("IDENTITY_BASE_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Ok(secs) = std::env::var("IDENTITY_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("IDENTITY_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Override the per-request timeout (default: 15 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identity Service API root.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }
}

/// Identity Service operation, used for error mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Login,
    Register,
    RegisterCorporate,
    Refresh,
    Logout,
    CurrentUser,
    UpdateProfile,
    ChangePassword,
    VerifyEmail,
    RequestPasswordReset,
    ResetPassword,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "registration",
            Self::RegisterCorporate => "corporate registration",
            Self::Refresh => "token refresh",
            Self::Logout => "logout",
            Self::CurrentUser => "current user request",
            Self::UpdateProfile => "profile update",
            Self::ChangePassword => "password change",
            Self::VerifyEmail => "email verification",
            Self::RequestPasswordReset => "password reset request",
            Self::ResetPassword => "password reset",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Login => "auth/login",
            Self::Register => "auth/register",
            Self::RegisterCorporate => "auth/register/corporate",
            Self::Refresh => "auth/refresh",
            Self::Logout => "auth/logout",
            Self::CurrentUser => "auth/me",
            Self::UpdateProfile => "auth/profile",
            Self::ChangePassword => "auth/change-password",
            Self::VerifyEmail => "auth/verify-email",
            Self::RequestPasswordReset => "auth/forgot-password",
            Self::ResetPassword => "auth/reset-password",
        }
    }

    /// Error for a 401 response to this operation.
    fn unauthorized(self, detail: String) -> Error {
        match self {
            Self::Login | Self::Register | Self::RegisterCorporate => {
                Error::InvalidCredentials(detail)
            }
            Self::Refresh => Error::RefreshFailure(detail),
            _ => Error::TokenExpired,
        }
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a RefreshToken,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a RefreshToken>,
}

#[derive(Serialize)]
struct VerifyEmailRequest<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct PasswordResetRequest<'a> {
    email: &'a Email,
}

#[derive(Serialize)]
struct ResetPasswordRequest<'a> {
    token: &'a str,
    password: &'a Password,
}

/// HTTP client for the storefront Identity Service.
pub struct IdentityClient {
    config: IdentityConfig,
    http: reqwest::Client,
}

impl IdentityClient {
    /// Create a new Identity Service client.
    #[must_use]
    pub fn new(config: IdentityConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: Operation,
        token: Option<&AccessToken>,
        body: &B,
    ) -> Result<reqwest::Response, Error> {
        let mut request = self
            .http
            .post(self.config.endpoint(operation.path())?)
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        let response = request.send().await?;
        Self::ensure_success(response, operation).await
    }

    /// Checks HTTP response status; returns the response on success or a
    /// classified error otherwise.
    async fn ensure_success(
        response: reqwest::Response,
        operation: Operation,
    ) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        tracing::debug!(
            operation = operation.name(),
            status = status.as_u16(),
            "Identity Service rejected request"
        );

        Err(match status.as_u16() {
            400 | 422 => Error::Validation(if detail.is_empty() {
                format!("{} rejected the input", operation.name())
            } else {
                detail
            }),
            401 => operation.unauthorized(detail),
            403 => Error::Authorization(if detail.is_empty() {
                format!("{} not permitted", operation.name())
            } else {
                detail
            }),
            code => Error::Http {
                operation: operation.name(),
                status: code,
                detail,
            },
        })
    }
}

impl IdentityService for IdentityClient {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, Error> {
        let response = self.post(Operation::Login, None, credentials).await?;
        response.json().await.map_err(Into::into)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, Error> {
        let response = self.post(Operation::Register, None, registration).await?;
        response.json().await.map_err(Into::into)
    }

    async fn register_corporate(
        &self,
        registration: &CorporateRegistration,
    ) -> Result<AuthResponse, Error> {
        let response = self
            .post(Operation::RegisterCorporate, None, registration)
            .await?;
        response.json().await.map_err(Into::into)
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, Error> {
        let response = self
            .post(Operation::Refresh, None, &RefreshRequest { refresh_token })
            .await?;
        response.json().await.map_err(Into::into)
    }

    async fn logout(
        &self,
        access_token: &AccessToken,
        refresh_token: Option<&RefreshToken>,
    ) -> Result<(), Error> {
        self.post(
            Operation::Logout,
            Some(access_token),
            &LogoutRequest { refresh_token },
        )
        .await?;
        Ok(())
    }

    async fn get_current_user(&self, access_token: &AccessToken) -> Result<User, Error> {
        let response = self
            .http
            .get(self.config.endpoint(Operation::CurrentUser.path())?)
            .bearer_auth(access_token.as_str())
            .send()
            .await?;
        let response = Self::ensure_success(response, Operation::CurrentUser).await?;
        let envelope: UserEnvelope = response.json().await?;
        Ok(envelope.user)
    }

    async fn update_profile(
        &self,
        access_token: &AccessToken,
        update: &ProfileUpdate,
    ) -> Result<User, Error> {
        let response = self
            .http
            .patch(self.config.endpoint(Operation::UpdateProfile.path())?)
            .bearer_auth(access_token.as_str())
            .json(update)
            .send()
            .await?;
        let response = Self::ensure_success(response, Operation::UpdateProfile).await?;
        let envelope: UserEnvelope = response.json().await?;
        Ok(envelope.user)
    }

    async fn change_password(
        &self,
        access_token: &AccessToken,
        change: &PasswordChange,
    ) -> Result<(), Error> {
        self.post(Operation::ChangePassword, Some(access_token), change)
            .await?;
        Ok(())
    }

    async fn verify_email(&self, token: &str) -> Result<(), Error> {
        self.post(Operation::VerifyEmail, None, &VerifyEmailRequest { token })
            .await?;
        Ok(())
    }

    async fn request_password_reset(&self, email: &Email) -> Result<(), Error> {
        self.post(
            Operation::RequestPasswordReset,
            None,
            &PasswordResetRequest { email },
        )
        .await?;
        Ok(())
    }

    async fn reset_password(&self, token: &str, password: &Password) -> Result<(), Error> {
        self.post(
            Operation::ResetPassword,
            None,
            &ResetPasswordRequest { token, password },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::Role;

    fn user_json() -> serde_json::Value {
        json!({
            "id": "u-1",
            "email": "a@b.com",
            "role": "customer",
            "emailVerified": true
        })
    }

    async fn client_for(server: &MockServer) -> IdentityClient {
        let base: Url = format!("{}/api", server.uri()).parse().unwrap();
        IdentityClient::new(IdentityConfig::new(base))
    }

    #[test]
    fn test_config_appends_trailing_slash() {
        let config = IdentityConfig::new("https://shop.example.com/api".parse().unwrap());
        assert_eq!(config.base_url().as_str(), "https://shop.example.com/api/");
        assert_eq!(
            config.endpoint("auth/login").unwrap().as_str(),
            "https://shop.example.com/api/auth/login"
        );
    }

    #[test]
    fn test_config_with_overrides() {
        let config = IdentityConfig::new("https://shop.example.com/".parse().unwrap())
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(json!({ "email": "a@b.com", "password": "Secret1!" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": user_json(),
                "accessToken": "access-1",
                "refreshToken": "refresh-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let credentials = Credentials::new("a@b.com", "Secret1!").unwrap();
        let auth = client.login(&credentials).await.unwrap();

        assert_eq!(auth.user.email, "a@b.com");
        assert_eq!(auth.user.role, Role::Customer);
        assert_eq!(auth.access_token.as_str(), "access-1");
        assert_eq!(auth.refresh_token.as_str(), "refresh-1");
    }

    #[tokio::test]
    async fn test_login_rejected_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("wrong password"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let credentials = Credentials::new("a@b.com", "nope").unwrap();
        let err = client.login(&credentials).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(ref d) if d == "wrong password"));
    }

    #[tokio::test]
    async fn test_register_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register"))
            .respond_with(ResponseTemplate::new(422).set_body_string("email already taken"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let registration = Registration::new("a@b.com", "longenough", "Ada", "Lovelace");
        let err = client.register(&registration).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref d) if d == "email already taken"));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(json!({ "refreshToken": "refresh-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "access-2",
                "refreshToken": "refresh-2"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let pair = client.refresh(&RefreshToken::new("refresh-1")).await.unwrap();
        assert_eq!(pair.access_token.as_str(), "access-2");
        assert_eq!(pair.refresh_token.as_str(), "refresh-2");
    }

    #[tokio::test]
    async fn test_refresh_rejected_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.refresh(&RefreshToken::new("revoked")).await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailure(_)));
    }

    #[tokio::test]
    async fn test_current_user_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": user_json() })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let user = client
            .get_current_user(&AccessToken::new("access-1"))
            .await
            .unwrap();
        assert_eq!(user.id.to_string(), "u-1");

        let err = client
            .get_current_user(&AccessToken::new("expired"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExpired));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/auth/profile"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .update_profile(&AccessToken::new("access-1"), &ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_not_reclassified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .logout(&AccessToken::new("access-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Http { status: 502, operation: "logout", .. }
        ));
    }

    #[tokio::test]
    async fn test_logout_sends_refresh_token_for_revocation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .and(header("authorization", "Bearer access-1"))
            .and(body_json(json!({ "refreshToken": "refresh-1" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .logout(
                &AccessToken::new("access-1"),
                Some(&RefreshToken::new("refresh-1")),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_password_reset_flow_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/forgot-password"))
            .and(body_json(json!({ "email": "a@b.com" })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/reset-password"))
            .and(body_json(json!({ "token": "reset-1", "password": "newpassword" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let email: Email = "a@b.com".parse().unwrap();
        client.request_password_reset(&email).await.unwrap();
        client
            .reset_password("reset-1", &Password::new("newpassword"))
            .await
            .unwrap();
    }
}
