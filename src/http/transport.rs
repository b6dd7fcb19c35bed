//! The raw request function the authenticated client wraps.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use super::request::{ApiRequest, ApiResponse};

/// Sends a request and returns the response whatever its status.
///
/// Only transport-level faults (connection, DNS, body read) are errors here;
/// status interpretation belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// [`Transport`] backed by a reqwest [`Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with the crate's user agent and transport defaults.
    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!("{} {}...", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", request.url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();

        debug!("{} {} -> {}", request.method, request.url, status);

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
