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

use anyhow::{Context, Result, bail};
use powerverter_core::{CoordinatorConfig, WatcherConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const SHARED_SECRET_ENV: &str = "POWERVERTER_SHARED_SECRET";
pub const DEVICE_TOKEN_ENV: &str = "POWERVERTER_DEVICE_TOKEN";

const PLACEHOLDER_SECRET: &str = "change-me-to-a-strong-random-secret";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub clock: ClockSettings,
    #[serde(default)]
    pub device_store: DeviceStoreSettings,
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub shared_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_record_retention_days")]
    pub record_retention_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockSettings {
    /// Remote authoritative time service; this server is the authority when unset
    #[serde(default)]
    pub time_source_url: Option<String>,
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStoreKind {
    #[default]
    Memory,
    RealtimeDb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStoreSettings {
    #[serde(default)]
    pub kind: DeviceStoreKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_priority_max_attempts")]
    pub priority_max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
    #[serde(default = "default_claim_poll_ms")]
    pub claim_poll_ms: u64,
    #[serde(default = "default_dedup_lookback_secs")]
    pub dedup_lookback_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_baseline_interval_secs")]
    pub baseline_interval_secs: u64,
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,
    #[serde(default = "default_fast_window_secs")]
    pub fast_window_secs: u64,
    #[serde(default = "default_fast_ceiling_secs")]
    pub fast_ceiling_secs: u64,
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSettings {
    /// Built-in cadence; leave off when an external scheduler calls the runner endpoint
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_runner_interval_secs")]
    pub interval_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8110
}

fn default_db_path() -> String {
    "./data/powerverter.db".to_owned()
}

fn default_record_retention_days() -> u32 {
    90
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_priority_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_claim_ttl_secs() -> u64 {
    180
}

fn default_claim_poll_ms() -> u64 {
    500
}

fn default_dedup_lookback_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_baseline_interval_secs() -> u64 {
    10
}

fn default_fast_interval_secs() -> u64 {
    1
}

fn default_fast_window_secs() -> u64 {
    120
}

fn default_fast_ceiling_secs() -> u64 {
    120
}

fn default_failure_cooldown_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_runner_interval_secs() -> u64 {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            record_retention_days: default_record_retention_days(),
        }
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            time_source_url: None,
            resync_interval_secs: default_resync_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DeviceStoreSettings {
    fn default() -> Self {
        Self {
            kind: DeviceStoreKind::default(),
            base_url: None,
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            priority_max_attempts: default_priority_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            claim_ttl_secs: default_claim_ttl_secs(),
            claim_poll_ms: default_claim_poll_ms(),
            dedup_lookback_secs: default_dedup_lookback_secs(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            baseline_interval_secs: default_baseline_interval_secs(),
            fast_interval_secs: default_fast_interval_secs(),
            fast_window_secs: default_fast_window_secs(),
            fast_ceiling_secs: default_fast_ceiling_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_runner_interval_secs(),
        }
    }
}

impl CoordinatorSettings {
    pub fn to_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_attempts: self.max_attempts,
            priority_max_attempts: self.priority_max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            claim_ttl: Duration::from_secs(self.claim_ttl_secs),
            claim_poll: Duration::from_millis(self.claim_poll_ms),
            dedup_lookback: Duration::from_secs(self.dedup_lookback_secs),
        }
    }
}

impl WatcherSettings {
    pub fn to_config(&self) -> WatcherConfig {
        WatcherConfig {
            baseline_interval: Duration::from_secs(self.baseline_interval_secs),
            fast_interval: Duration::from_secs(self.fast_interval_secs),
            fast_window: Duration::from_secs(self.fast_window_secs),
            fast_ceiling: Duration::from_secs(self.fast_ceiling_secs),
            failure_cooldown: Duration::from_secs(self.failure_cooldown_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
        }
    }
}

impl ServerConfig {
    /// Load, apply environment overrides, validate
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::parse(&content)?;
        config.apply_overrides(
            std::env::var(SHARED_SECRET_ENV).ok(),
            std::env::var(DEVICE_TOKEN_ENV).ok(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config TOML")
    }

    /// Secrets from the environment win over the file
    pub fn apply_overrides(&mut self, shared_secret: Option<String>, device_token: Option<String>) {
        if let Some(secret) = shared_secret.filter(|s| !s.is_empty()) {
            self.auth.shared_secret = secret;
        }
        if let Some(token) = device_token.filter(|t| !t.is_empty()) {
            self.device_store.auth_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.shared_secret.is_empty() || self.auth.shared_secret == PLACEHOLDER_SECRET {
            bail!("auth.shared_secret must be set to a strong random value");
        }
        if self.device_store.kind == DeviceStoreKind::RealtimeDb
            && self
                .device_store
                .base_url
                .as_deref()
                .is_none_or(str::is_empty)
        {
            bail!("device_store.base_url is required for the realtime_db store");
        }
        if self.coordinator.max_attempts == 0 || self.coordinator.priority_max_attempts == 0 {
            bail!("coordinator attempts must be at least 1");
        }
        if self.coordinator.claim_ttl_secs == 0 {
            bail!("coordinator.claim_ttl_secs must be positive");
        }
        if self.watcher.fast_interval_secs == 0 || self.watcher.baseline_interval_secs == 0 {
            bail!("watcher intervals must be positive");
        }
        if self.watcher.fast_interval_secs > self.watcher.baseline_interval_secs {
            bail!("watcher.fast_interval_secs must not exceed watcher.baseline_interval_secs");
        }
        if self.clock.resync_interval_secs == 0 {
            bail!("clock.resync_interval_secs must be positive");
        }
        if self.runner.enabled && self.runner.interval_secs == 0 {
            bail!("runner.interval_secs must be positive when the runner is enabled");
        }
        Ok(())
    }
}
