//! Authenticated API client with transparent token refresh.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::http::{ApiRequest, ApiResponse, Attempt, StatusError, Transport};
use crate::session::{
    ACCESS_KEY, CredentialStore, REFRESH_KEY, SessionListener, clear_credentials, mask_token,
};

/// Default backend address.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Path of the token refresh endpoint, relative to the base URL.
pub const REFRESH_PATH: &str = "api/token/refresh/";

/// Error context attached when renewing the access token fails.
///
/// By the time a caller sees it, the stored credentials are gone and the
/// session listener has been notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshFailed;

impl std::fmt::Display for RefreshFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session expired: failed to refresh the access token")
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

/// HTTP client that injects the stored bearer token into every request and
/// renews it once on a 401.
///
/// Concurrent requests that each receive a 401 each perform their own refresh;
/// refreshes are not coalesced.
pub struct ApiClient<T: Transport, S: CredentialStore, L: SessionListener> {
    transport: T,
    store: S,
    listener: L,
    base_url: String,
}

impl<T: Transport, S: CredentialStore, L: SessionListener> ApiClient<T, S, L> {
    pub fn new(transport: T, store: S, listener: L, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            transport,
            store,
            listener,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolves a path against the base URL. Absolute URLs pass through.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends a request, refreshing the access token once if the server
    /// answers 401.
    ///
    /// Non-success statuses are returned as a [`StatusError`] inside the
    /// `anyhow::Error`. If the refresh itself fails, both stored credentials
    /// are removed, the listener is told the session expired, and the refresh
    /// error (with [`RefreshFailed`] context) is returned.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn request(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        request.url = self.resolve_url(&request.url);
        let mut attempt = Attempt::new(request);

        loop {
            let outbound = self.authorize(attempt.request.clone())?;
            let response = self.transport.send(outbound).await?;

            if response.is_success() {
                return Ok(response);
            }

            let error = StatusError::new(&attempt.request.method, &attempt.request.url, &response);
            if !error.is_unauthorized() {
                return Err(error.into());
            }

            if attempt.retried() {
                debug!(
                    "{} {} still unauthorized after refresh, giving up",
                    attempt.request.method, attempt.request.url
                );
                return Err(error.into());
            }

            let refresh = self.store.get(REFRESH_KEY)?.filter(|t| !t.is_empty());
            let Some(refresh) = refresh else {
                debug!("No refresh token stored, returning 401 to caller");
                return Err(error.into());
            };

            attempt.mark_retried();

            let access = match self.refresh_access(&refresh).await {
                Ok(access) => access,
                Err(e) => {
                    self.expire_session();
                    return Err(e);
                }
            };

            self.store.set(ACCESS_KEY, &access)?;
            attempt.request.set_bearer(&access)?;
            info!(
                "Access token refreshed, retrying {} {}",
                attempt.request.method, attempt.request.url
            );
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(ApiRequest::new(Method::GET, path)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.request(with_body(Method::POST, path, body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.request(with_body(Method::PUT, path, body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.request(with_body(Method::PATCH, path, body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(ApiRequest::new(Method::DELETE, path)).await
    }

    /// GET and decode the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.get(path).await?.json()
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        self.post(path, body).await?.json()
    }

    /// Attaches `Authorization: Bearer <access>` when a non-empty access token
    /// is stored.
    fn authorize(&self, mut request: ApiRequest) -> Result<ApiRequest> {
        let access = self
            .store
            .get(ACCESS_KEY)
            .context("Failed to read access token")?;
        if let Some(access) = access.filter(|t| !t.is_empty()) {
            request.set_bearer(&access)?;
        }
        Ok(request)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Goes straight to the transport so a failing refresh never re-enters
    /// the 401 handling.
    async fn refresh_access(&self, refresh: &str) -> Result<String> {
        let url = self.resolve_url(REFRESH_PATH);
        debug!("Refreshing access token with {}", mask_token(refresh));

        let request = ApiRequest::post(url.as_str())
            .with_json(serde_json::to_value(RefreshRequest { refresh })?);

        let response = self.transport.send(request).await.context(RefreshFailed)?;
        if !response.is_success() {
            return Err(
                anyhow::Error::from(StatusError::new(&Method::POST, &url, &response))
                    .context(RefreshFailed),
            );
        }

        let body: RefreshResponse = response
            .json()
            .context("Token refresh response has no access token")
            .context(RefreshFailed)?;
        Ok(body.access)
    }

    fn expire_session(&self) {
        warn!("Token refresh failed, clearing stored credentials");
        if let Err(e) = clear_credentials(&self.store) {
            warn!("Failed to clear stored credentials: {:#}", e);
        }
        self.listener.session_expired();
    }
}

fn with_body<B: Serialize + ?Sized>(method: Method, path: &str, body: &B) -> Result<ApiRequest> {
    let body = serde_json::to_value(body).context("Failed to serialize request body")?;
    Ok(ApiRequest::new(method, path).with_json(body))
}
