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

//! Wires the schedule engine to the configured backends.

use anyhow::{Context, Result};
use powerverter_adapters::{HttpTimeClient, RealtimeDbClient};
use powerverter_core::memory::{InMemoryDeviceStore, LocalTimeSource};
use powerverter_core::{
    ActuationGateway, ClockAlignmentService, Clock, DeviceStateStore, ExecutionCoordinator,
    PeriodicRunner, SystemClock, TimeSource, WatcherSupervisor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{DeviceStoreKind, ServerConfig};
use crate::db::Database;

#[derive(Debug, Clone)]
pub struct Engine {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Database>,
    pub clock: Arc<ClockAlignmentService>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub runner: PeriodicRunner,
}

impl Engine {
    /// Build from configuration: realtime or in-memory device store, remote or local time
    pub fn build(config: Arc<ServerConfig>, db: Arc<Database>) -> Result<Self> {
        let device: Arc<dyn DeviceStateStore> = match config.device_store.kind {
            DeviceStoreKind::Memory => {
                info!("Using in-memory device store");
                Arc::new(InMemoryDeviceStore::new())
            }
            DeviceStoreKind::RealtimeDb => {
                let base_url = config
                    .device_store
                    .base_url
                    .clone()
                    .context("device_store.base_url is required for the realtime_db store")?;
                info!(url = %base_url, "Using realtime database device store");
                Arc::new(
                    RealtimeDbClient::new(
                        base_url,
                        config.device_store.auth_token.clone(),
                        Duration::from_secs(config.device_store.timeout_secs),
                    )
                    .context("Failed to create realtime database client")?,
                )
            }
        };

        let local: Arc<dyn Clock> = Arc::new(SystemClock);
        let time_source: Arc<dyn TimeSource> = match &config.clock.time_source_url {
            Some(url) => {
                info!(url = %url, "Using remote authoritative time");
                Arc::new(
                    HttpTimeClient::new(url.clone(), Duration::from_secs(config.clock.timeout_secs))
                        .context("Failed to create time client")?,
                )
            }
            None => Arc::new(LocalTimeSource::new(local.clone())),
        };

        Ok(Self::with_backends(config, db, device, time_source, local))
    }

    pub fn with_backends(
        config: Arc<ServerConfig>,
        db: Arc<Database>,
        device: Arc<dyn DeviceStateStore>,
        time_source: Arc<dyn TimeSource>,
        local: Arc<dyn Clock>,
    ) -> Self {
        let clock = Arc::new(ClockAlignmentService::new(time_source, local));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            ActuationGateway::new(device, clock.clone()),
            db.clone(),
            clock.clone(),
            config.coordinator.to_config(),
        ));
        let runner = PeriodicRunner::new(
            clock.clone(),
            db.clone(),
            coordinator.clone(),
            Duration::from_secs(config.coordinator.dedup_lookback_secs),
        );
        Self {
            config,
            db,
            clock,
            coordinator,
            runner,
        }
    }

    pub fn supervisor(&self) -> WatcherSupervisor {
        WatcherSupervisor::new(
            self.clock.clone(),
            self.db.clone(),
            self.coordinator.clone(),
            self.config.watcher.to_config(),
        )
    }
}
