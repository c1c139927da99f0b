//! Bearer-token decoration and transparent refresh for outbound calls.
//!
//! The pipeline around every call is:
//!
//! 1. attach the current access token (if any);
//! 2. run the call;
//! 3. on [`Error::TokenExpired`], join the single in-flight refresh (or start it);
//! 4. re-run the call once with the new token.
//!
//! Any other outcome, success or failure, is returned unchanged.

use std::future::Future;

use crate::error::Error;
use crate::types::AccessToken;

/// Supplies access tokens and drives the refresh protocol.
///
/// Implemented by [`SessionManager`](crate::SessionManager); the gateway never
/// writes tokens itself.
pub trait TokenSource: Send + Sync {
    /// Current access token, if the session holds one.
    fn access_token(&self) -> Option<AccessToken>;

    /// Obtain a token newer than `stale`.
    ///
    /// Implementations must be single-flight: concurrent callers share one
    /// refresh and its outcome. If `stale` has already been replaced, the
    /// current token is returned without refreshing.
    fn refresh_after(
        &self,
        stale: &AccessToken,
    ) -> impl Future<Output = Result<AccessToken, Error>> + Send;
}

/// Generic authenticated-call decorator.
#[derive(Clone)]
pub struct Gateway<T> {
    source: T,
}

impl<T: TokenSource> Gateway<T> {
    #[must_use]
    pub fn new(source: T) -> Self {
        Self { source }
    }

    /// Run `call` with the current access token, refreshing and retrying once
    /// if the token is rejected.
    ///
    /// # Errors
    ///
    /// - [`Error::RefreshFailure`] if the token was rejected and the refresh failed
    /// - [`Error::NotAuthenticated`] if the call was rejected and no token was held
    /// - whatever `call` returns otherwise, including a second
    ///   [`Error::TokenExpired`] from the retry
    pub async fn execute<R, F, Fut>(&self, call: F) -> Result<R, Error>
    where
        F: Fn(Option<AccessToken>) -> Fut,
        Fut: Future<Output = Result<R, Error>>,
    {
        let token = self.source.access_token();

        match call(token.clone()).await {
            Err(Error::TokenExpired) => {}
            other => return other,
        }

        let Some(stale) = token else {
            return Err(Error::NotAuthenticated);
        };

        tracing::debug!("Access token rejected, awaiting refresh");
        let fresh = self.source.refresh_after(&stale).await?;

        tracing::debug!("Retrying request with refreshed token");
        call(Some(fresh)).await
    }

    /// Send a raw HTTP request through the pipeline.
    ///
    /// `build` is invoked once per attempt; the bearer header is added here.
    /// Any status other than 401 is returned as a response for the caller to
    /// interpret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] on transport failure, plus the errors of
    /// [`execute`](Self::execute).
    #[cfg(feature = "client")]
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response, Error>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.execute(|token| {
            let request = match &token {
                Some(token) => build().bearer_auth(token.as_str()),
                None => build(),
            };
            async move {
                let response = request.send().await?;
                if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                    return Err(Error::TokenExpired);
                }
                Ok(response)
            }
        })
        .await
    }

    /// The underlying token source.
    #[must_use]
    pub fn source(&self) -> &T {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Token source that rotates `t1 -> t2` on refresh, or fails.
    struct RotatingSource {
        current: Mutex<Option<AccessToken>>,
        refreshes: AtomicUsize,
        refresh_ok: bool,
    }

    impl RotatingSource {
        fn new(token: Option<&str>, refresh_ok: bool) -> Self {
            Self {
                current: Mutex::new(token.map(AccessToken::new)),
                refreshes: AtomicUsize::new(0),
                refresh_ok,
            }
        }
    }

    impl TokenSource for &RotatingSource {
        fn access_token(&self) -> Option<AccessToken> {
            self.current.lock().unwrap().clone()
        }

        async fn refresh_after(&self, _stale: &AccessToken) -> Result<AccessToken, Error> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_ok {
                return Err(Error::RefreshFailure("refresh token revoked".into()));
            }
            let fresh = AccessToken::new("t2");
            *self.current.lock().unwrap() = Some(fresh.clone());
            Ok(fresh)
        }
    }

    /// Protected call accepting only `t2`.
    async fn protected(token: Option<AccessToken>, attempts: &AtomicUsize) -> Result<&'static str, Error> {
        attempts.fetch_add(1, Ordering::SeqCst);
        match token {
            Some(t) if t.as_str() == "t2" => Ok("orders"),
            _ => Err(Error::TokenExpired),
        }
    }

    #[tokio::test]
    async fn valid_token_passes_through() {
        let source = RotatingSource::new(Some("t2"), true);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let result = gateway.execute(|t| protected(t, &attempts)).await.unwrap();
        assert_eq!(result, "orders");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_refreshes_and_retries_once() {
        let source = RotatingSource::new(Some("t1"), true);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let result = gateway.execute(|t| protected(t, &attempts)).await.unwrap();
        assert_eq!(result, "orders");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_aborts_without_retry() {
        let source = RotatingSource::new(Some("t1"), false);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let err = gateway.execute(|t| protected(t, &attempts)).await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailure(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_rejection_is_not_retried_again() {
        let source = RotatingSource::new(Some("t1"), true);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let err = gateway
            .execute(|_| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::TokenExpired)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExpired));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_auth_failures_are_never_retried() {
        let source = RotatingSource::new(Some("t1"), true);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let err = gateway
            .execute(|_| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Http {
                    operation: "orders",
                    status: 503,
                    detail: "maintenance".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_without_token_does_not_refresh() {
        let source = RotatingSource::new(None, true);
        let gateway = Gateway::new(&source);
        let attempts = AtomicUsize::new(0);

        let err = gateway.execute(|t| protected(t, &attempts)).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 0);
    }

    #[cfg(feature = "client")]
    #[tokio::test]
    async fn send_attaches_bearer_and_retries_on_401() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cart"))
            .and(header("authorization", "Bearer t2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cart"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cart"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = RotatingSource::new(Some("t1"), true);
        let gateway = Gateway::new(&source);
        let http = reqwest::Client::new();
        let url = format!("{}/cart", server.uri());

        let response = gateway.send(|| http.get(&url)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "cart");
        assert_eq!(source.refreshes.load(Ordering::SeqCst), 1);
    }
}
