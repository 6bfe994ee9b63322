//! API client for the VTU backend's auth endpoints.
//!
//! This module provides the `AuthApi` trait the session controller talks to,
//! and the `ApiClient` struct implementing it over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{LoginRequest, LoginResponse, Profile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const PROFILE_PATH: &str = "/user/profile";
const VERIFY_PATH: &str = "/auth/verify";
const LOGOUT_PATH: &str = "/auth/logout";

/// Default HTTP request timeout in seconds.
/// Anything slower is classified as an indeterminate outcome.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backend contracts consumed by the session core.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a bearer token and profile
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;

    /// `GET` the signed-in user's profile
    async fn fetch_profile(&self, token: &str) -> Result<Profile, ApiError>;

    /// Ask the server whether `token` is still honoured. `Ok(())` means valid.
    async fn verify(&self, token: &str) -> Result<(), ApiError>;

    /// Best-effort server-side logout
    async fn logout(&self, token: &str) -> Result<(), ApiError>;
}

/// HTTP client for the VTU backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url` (e.g. `https://host/api`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let text = response.text().await.map_err(Self::classify)?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    fn classify(e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(e)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(Self::classify)?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        debug!(email = %request.email, "Sending login request");
        let response = self
            .send(self.client.post(self.url(LOGIN_PATH)).json(request))
            .await?;
        Self::parse_json(response).await
    }

    async fn fetch_profile(&self, token: &str) -> Result<Profile, ApiError> {
        let response = self
            .send(self.client.get(self.url(PROFILE_PATH)).bearer_auth(token))
            .await?;
        Self::parse_json(response).await
    }

    async fn verify(&self, token: &str) -> Result<(), ApiError> {
        self.send(self.client.get(self.url(VERIFY_PATH)).bearer_auth(token))
            .await?;
        Ok(())
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.send(self.client.post(self.url(LOGOUT_PATH)).bearer_auth(token))
            .await?;
        Ok(())
    }
}
