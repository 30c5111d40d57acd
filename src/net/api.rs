//! REST client for the authoritative backend.
//!
//! ERROR HANDLING
//! ==============
//! A 404 is an answer (`Ok(None)`: the entity is gone), not a failure. Every
//! other non-success status, connection error or undecodable body is an
//! [`ApiError`], which reconciliation treats as "keep what you have".

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::types::{Identity, Poi};
use crate::cache::Authority;
use crate::config::ClientConfig;
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
    #[error("API request failed: {0}")]
    Request(String),
    #[error("API response error: status {status}")]
    Status { status: u16 },
    #[error("API response parse failed: {0}")]
    Parse(String),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Request(_) => "E_API_REQUEST",
            Self::Status { .. } => "E_API_STATUS",
            Self::Parse(_) => "E_API_PARSE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { status: 429 | 500..=599 })
    }
}

fn user_profile_endpoint(base_url: &str, user_id: &str) -> String {
    format!("{base_url}/api/users/{user_id}/profile")
}

fn poi_endpoint(base_url: &str, poi_id: &str) -> String {
    format!("{base_url}/api/pois/{poi_id}")
}

/// Backend profile and POI lookups over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client for `base_url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the TLS/HTTP stack cannot be initialized.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration, connect_timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url })
    }

    /// Build a client from the configured API URL and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a user's profile. `Ok(None)` means the backend has no such user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decode failures.
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Identity>, ApiError> {
        self.get_optional(&user_profile_endpoint(&self.base_url, user_id)).await
    }

    /// Fetch a POI with its authoritative roster. `Ok(None)` means it was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or decode failures.
    pub async fn get_poi(&self, poi_id: &str) -> Result<Option<Poi>, ApiError> {
        self.get_optional(&poi_endpoint(&self.base_url, poi_id)).await
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, ApiError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16() });
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Authority<Identity> for HttpBackend {
    async fn fetch(&self, id: &str) -> Result<Option<Identity>, ApiError> {
        self.get_profile(id).await
    }
}

#[async_trait::async_trait]
impl Authority<Poi> for HttpBackend {
    async fn fetch(&self, id: &str) -> Result<Option<Poi>, ApiError> {
        self.get_poi(id).await
    }
}
