//! Typed HTTP status failures surfaced to callers.

use reqwest::{Method, StatusCode};

use super::request::ApiResponse;

/// Maximum length of a response body kept in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A response that arrived with a non-success status.
///
/// Travels inside `anyhow::Error`; use `downcast_ref::<StatusError>()` to
/// inspect the status.
#[derive(Debug, Clone)]
pub struct StatusError {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}

impl StatusError {
    pub fn new(method: &Method, url: &str, response: &ApiResponse) -> Self {
        Self {
            method: method.clone(),
            url: url.to_string(),
            status: response.status,
            body: truncate_body(&response.text()),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            StatusCode::UNAUTHORIZED => {
                write!(f, "{} {} failed: unauthorized (HTTP 401)", self.method, self.url)
            }
            StatusCode::FORBIDDEN => write!(
                f,
                "{} {} failed: access forbidden (HTTP 403)",
                self.method, self.url
            ),
            StatusCode::NOT_FOUND => {
                write!(f, "{} {} failed: not found (HTTP 404)", self.method, self.url)
            }
            status if self.body.is_empty() => write!(
                f,
                "{} {} failed: HTTP {}",
                self.method,
                self.url,
                status.as_u16()
            ),
            status => write!(
                f,
                "{} {} failed: HTTP {}: {}",
                self.method,
                self.url,
                status.as_u16(),
                self.body
            ),
        }
    }
}

impl std::error::Error for StatusError {}

/// Returns true if the error chain carries a 401 [`StatusError`].
pub fn is_unauthorized(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<StatusError>()
        .is_some_and(StatusError::is_unauthorized)
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
