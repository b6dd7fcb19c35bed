//! Request and response descriptors exchanged with a [`Transport`](super::Transport).

use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

/// An outbound request: method, URL, mutable headers and an optional JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets `Authorization: Bearer <token>`, replacing any previous value.
    pub fn set_bearer(&mut self, token: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("Access token is not a valid header value")?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A single request attempt as seen by the client's retry logic.
///
/// `retry_count` replaces a mutable "already retried" flag on the request:
/// once it is non-zero the attempt is never refreshed again.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub request: ApiRequest,
    pub retry_count: u32,
}

impl Attempt {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retry_count: 0,
        }
    }

    pub fn retried(&self) -> bool {
        self.retry_count > 0
    }

    pub fn mark_retried(&mut self) {
        self.retry_count += 1;
    }
}

/// A response received from the transport, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON. An empty body decodes as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return serde_json::from_value(serde_json::Value::Null)
                .context("Failed to parse empty response body");
        }
        serde_json::from_slice(&self.body).context("Failed to parse JSON response")
    }
}
