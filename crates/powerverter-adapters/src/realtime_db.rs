// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerverter.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use async_trait::async_trait;
use powerverter_core::{DeviceStateStore, StoreError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::errors::{AdapterError, AdapterResult};

/// REST client for the realtime database holding one device blob per system
#[derive(Debug, Clone)]
pub struct RealtimeDbClient {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RealtimeDbClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_token,
            client,
            max_retries: 2,
            retry_delay: Duration::from_millis(250),
        })
    }

    /// Set custom retry configuration
    #[must_use]
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// The id is a single path segment; `/`, `?` and `#` are escaped
    fn blob_url(&self, system_id: &str) -> String {
        format!("{}/_{}.json", self.base_url, urlencoding::encode(system_id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    /// Fetch the blob; `null` means the system has none yet
    pub async fn get_blob(&self, system_id: &str) -> AdapterResult<Option<Value>> {
        let url = self.blob_url(system_id);
        debug!("🔍 [RTDB] Reading device blob: {}", system_id);

        let response = self
            .retry_request(|| async { self.authorize(self.client.get(&url)).send().await })
            .await?;

        match response.status() {
            StatusCode::OK => {
                let blob = response
                    .json::<Value>()
                    .await
                    .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;
                Ok((!blob.is_null()).then_some(blob))
            }
            status => Err(Self::failure(system_id, status, response).await),
        }
    }

    /// Replace the blob as a whole
    pub async fn put_blob(&self, system_id: &str, blob: &Value) -> AdapterResult<()> {
        let url = self.blob_url(system_id);
        debug!("📝 [RTDB] Writing device blob: {}", system_id);

        let response = self
            .retry_request(|| async {
                self.authorize(self.client.put(&url))
                    .json(blob)
                    .send()
                    .await
            })
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            status => Err(Self::failure(system_id, status, response).await),
        }
    }

    async fn failure(
        system_id: &str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> AdapterError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("❌ [RTDB] Authentication failed for system: {}", system_id);
                AdapterError::AuthenticationFailed
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                error!("❌ [RTDB] Status {}: {}", status, message);
                AdapterError::ApiError {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut>(&self, mut request_fn: F) -> AdapterResult<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            attempts += 1;
            match request_fn().await {
                Ok(response) => return Ok(response),
                Err(e) if attempts >= self.max_retries => {
                    error!("Request failed after {} attempts: {}", attempts, e);
                    return Err(AdapterError::HttpError(e));
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl DeviceStateStore for RealtimeDbClient {
    async fn read(&self, system_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_blob(system_id).await?)
    }

    async fn write(&self, system_id: &str, blob: &Value) -> Result<(), StoreError> {
        Ok(self.put_blob(system_id, blob).await?)
    }
}
