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

//! Applies power-state changes to the realtime device store.

use powerverter_types::{ActuationRequest, ActuationResponse};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::traits::{Clock, DeviceStateStore};

#[derive(Debug, Clone)]
pub struct ActuationGateway {
    store: Arc<dyn DeviceStateStore>,
    clock: Arc<dyn Clock>,
}

impl ActuationGateway {
    pub fn new(store: Arc<dyn DeviceStateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read-merge-write the system's blob, then read it back to verify `power`.
    ///
    /// Fields the engine does not own are preserved. Concurrent writers are
    /// last-writer-wins; a lost update shows up as `verified = false`.
    pub async fn set_state(
        &self,
        request: &ActuationRequest,
    ) -> Result<ActuationResponse, GatewayError> {
        if request.system_id.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "system_id must not be empty".to_owned(),
            ));
        }

        let power = request.power_value();
        debug!(
            system_id = %request.system_id,
            request_id = %request.request_id,
            "🔌 [GATEWAY] Setting power to {}", power
        );

        let mut blob = match self.store.read(&request.system_id).await? {
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!(
                    system_id = %request.system_id,
                    "⚠️ [GATEWAY] Device blob is not an object ({}), replacing it",
                    other
                );
                Map::new()
            }
            None => Map::new(),
        };

        let now = self.clock.now();
        blob.insert("power".to_owned(), json!(power));
        blob.insert("lastUpdate".to_owned(), json!(now.timestamp_millis()));
        blob.insert(
            "lastUserPower".to_owned(),
            json!(format!(
                "{}:{}",
                request.triggered_by,
                request.schedule_id.as_deref().unwrap_or("manual")
            )),
        );
        blob.insert(
            "scheduledPowerChange".to_owned(),
            json!({
                "timestamp": now.to_rfc3339(),
                "schedule_id": request.schedule_id,
                "triggered_by": request.triggered_by,
                "state": request.target_state,
                "request_id": request.request_id,
            }),
        );

        self.store
            .write(&request.system_id, &Value::Object(blob))
            .await?;

        let verified = self
            .store
            .read(&request.system_id)
            .await?
            .as_ref()
            .and_then(|b| b.get("power"))
            .and_then(Value::as_u64)
            == Some(u64::from(power));

        if verified {
            info!(
                system_id = %request.system_id,
                request_id = %request.request_id,
                "✅ [GATEWAY] Power {} applied and verified", power
            );
        } else {
            warn!(
                system_id = %request.system_id,
                request_id = %request.request_id,
                "⚠️ [GATEWAY] Read-back does not show power {}", power
            );
        }

        Ok(ActuationResponse {
            applied: true,
            verified,
            request_id: request.request_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{InMemoryDeviceStore, ManualClock};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use powerverter_types::TriggeredBy;

    fn gateway(store: Arc<dyn DeviceStateStore>) -> ActuationGateway {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 5, 0).unwrap(),
        ));
        ActuationGateway::new(store, clock)
    }

    fn request(target_state: bool) -> ActuationRequest {
        ActuationRequest {
            system_id: "sys-1".to_owned(),
            target_state,
            schedule_id: Some("sched-1".to_owned()),
            triggered_by: TriggeredBy::Watcher,
            request_id: "req-1".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_set_state_merges_and_preserves_fields() {
        let store = Arc::new(InMemoryDeviceStore::new());
        store.insert_blob(
            "sys-1",
            json!({"power": 0, "batterySoc": 71, "firmware": "3.1"}),
        );

        let response = gateway(store.clone()).set_state(&request(true)).await.unwrap();
        assert!(response.applied);
        assert!(response.verified);
        assert_eq!(response.request_id, "req-1");

        let blob = store.blob("sys-1").unwrap();
        assert_eq!(blob["power"], 1);
        assert_eq!(blob["batterySoc"], 71);
        assert_eq!(blob["firmware"], "3.1");
        assert_eq!(blob["lastUserPower"], "watcher:sched-1");
        assert_eq!(blob["scheduledPowerChange"]["schedule_id"], "sched-1");
        assert_eq!(blob["scheduledPowerChange"]["triggered_by"], "watcher");
        assert_eq!(blob["scheduledPowerChange"]["state"], true);
        assert_eq!(blob["scheduledPowerChange"]["request_id"], "req-1");
        assert_eq!(
            blob["lastUpdate"],
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 5, 0)
                .unwrap()
                .timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_set_state_creates_missing_blob() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let response = gateway(store.clone()).set_state(&request(false)).await.unwrap();
        assert!(response.verified);
        assert_eq!(store.blob("sys-1").unwrap()["power"], 0);
    }

    /// Accepts writes but never persists them
    #[derive(Debug, Default)]
    struct BlackHoleStore;

    #[async_trait]
    impl DeviceStateStore for BlackHoleStore {
        async fn read(&self, _system_id: &str) -> Result<Option<Value>, StoreError> {
            Ok(Some(json!({"power": 0})))
        }

        async fn write(&self, _system_id: &str, _blob: &Value) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lost_write_is_not_verified() {
        let response = gateway(Arc::new(BlackHoleStore))
            .set_state(&request(true))
            .await
            .unwrap();
        assert!(response.applied);
        assert!(!response.verified);
    }

    #[derive(Debug, Default)]
    struct OfflineStore;

    #[async_trait]
    impl DeviceStateStore for OfflineStore {
        async fn read(&self, _system_id: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::Transport("timed out".to_owned()))
        }

        async fn write(&self, _system_id: &str, _blob: &Value) -> Result<(), StoreError> {
            Err(StoreError::Transport("timed out".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let err = gateway(Arc::new(OfflineStore))
            .set_state(&request(true))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Store(StoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_empty_system_id_rejected() {
        let mut req = request(true);
        req.system_id = String::new();
        let err = gateway(Arc::new(InMemoryDeviceStore::new()))
            .set_state(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}
