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
use powerverter_core::{ClockError, TimeSource};
use powerverter_types::AuthoritativeTime;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::errors::{AdapterError, AdapterResult};

/// Client for a remote `GET /api/time` endpoint.
///
/// Makes exactly one request per call; the clock service decides what a
/// failure means.
#[derive(Debug, Clone)]
pub struct HttpTimeClient {
    base_url: String,
    client: Client,
}

impl HttpTimeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
        })
    }

    pub async fn fetch(&self) -> AdapterResult<AuthoritativeTime> {
        let url = format!("{}/api/time", self.base_url);
        debug!("🕐 [TIME] Fetching authoritative time from {}", url);

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => response
                .json::<AuthoritativeTime>()
                .await
                .map_err(|e| AdapterError::InvalidResponse(e.to_string())),
            status => Err(AdapterError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl TimeSource for HttpTimeClient {
    async fn authoritative_time(&self) -> Result<AuthoritativeTime, ClockError> {
        Ok(self.fetch().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Server;
    use powerverter_core::{ClockAlignmentService, SystemClock};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_time() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/time")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"time": "2025-01-06T09:05:00Z", "timezone": "UTC"}).to_string())
            .create_async()
            .await;

        let client = HttpTimeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let time = client.authoritative_time().await.unwrap();

        assert_eq!(time.time, Utc.with_ymd_and_hms(2025, 1, 6, 9, 5, 0).unwrap());
        assert_eq!(time.timezone, "UTC");
        assert!(!time.estimated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_estimate_reaches_clock_service() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/time")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"time": "2025-01-06T09:05:00Z", "timezone": "UTC", "estimated": true})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = HttpTimeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let clock = ClockAlignmentService::new(Arc::new(client), Arc::new(SystemClock));
        let sync = clock.sync().await;

        assert!(!sync.is_synced);
        assert!(clock.reference_instant().estimated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_garbage_payload_is_invalid() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/time")
            .with_status(200)
            .with_body("{\"now\": 12}")
            .create_async()
            .await;

        let client = HttpTimeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let result = client.authoritative_time().await;

        assert!(matches!(result, Err(ClockError::InvalidPayload(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/time")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpTimeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let result = client.authoritative_time().await;

        assert!(matches!(result, Err(ClockError::Unreachable(_))));
        mock.assert_async().await;
    }
}
