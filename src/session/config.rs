use crate::error::Error;

/// Session manager settings.
///
/// All fields have sensible defaults. Override with `with_*` methods, or use
/// [`from_env()`](SessionConfig::from_env) for convention-based setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) persist_key: String,
    pub(crate) login_path: String,
    pub(crate) persist_refresh_token: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_key: "storefront".into(),
            login_path: "/login".into(),
            persist_refresh_token: false,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `STOREFRONT_PERSIST_KEY`: Storage root key (default `storefront`)
    /// - `STOREFRONT_LOGIN_PATH`: Login route used by guards (default `/login`)
    /// - `STOREFRONT_PERSIST_REFRESH_TOKEN`: `"1"` or `"true"` to keep the
    ///   refresh token in durable storage
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is present but invalid.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(key) = std::env::var("STOREFRONT_PERSIST_KEY") {
            if key.trim().is_empty() {
                return Err(Error::Config("STOREFRONT_PERSIST_KEY must not be empty".into()));
            }
            config = config.with_persist_key(key.trim());
        }
        if let Ok(path) = std::env::var("STOREFRONT_LOGIN_PATH") {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "STOREFRONT_LOGIN_PATH must be an absolute path, got {path:?}"
                )));
            }
            config = config.with_login_path(path);
        }

        let persist_refresh_token = matches!(
            std::env::var("STOREFRONT_PERSIST_REFRESH_TOKEN").as_deref(),
            Ok("1") | Ok("true"),
        );

        Ok(config.with_persist_refresh_token(persist_refresh_token))
    }

    #[must_use]
    pub fn with_persist_key(mut self, key: impl Into<String>) -> Self {
        self.persist_key = key.into();
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Keep the refresh token in durable storage (default: memory only).
    ///
    /// Logout always sends the refresh token to the Identity Service for
    /// revocation, so a persisted copy is dead once the user signs out.
    #[must_use]
    pub fn with_persist_refresh_token(mut self, enabled: bool) -> Self {
        self.persist_refresh_token = enabled;
        self
    }

    #[must_use]
    pub fn persist_key(&self) -> &str {
        &self.persist_key
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn persist_refresh_token(&self) -> bool {
        self.persist_refresh_token
    }
}
