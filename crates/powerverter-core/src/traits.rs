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

//! Seams between the engine and its backends.
//!
//! Every backend is shared as `Arc<dyn Trait>` so evaluators running in
//! separate tasks observe the same schedules and the same audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use powerverter_types::{AuthoritativeTime, NewTriggerRecord, Schedule, TriggerRecord};
use serde_json::Value;
use std::fmt::Debug;

use crate::error::{ClockError, StoreError};

#[async_trait]
pub trait ScheduleStore: Send + Sync + Debug {
    /// Active schedules of one system
    async fn list_active_schedules(&self, system_id: &str) -> Result<Vec<Schedule>, StoreError>;

    /// Active schedules across every system (periodic runner sweep)
    async fn list_all_active_schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    async fn get_schedule(&self, schedule_id: &str) -> Result<Option<Schedule>, StoreError>;
}

/// Append-only, totally ordered log of trigger records
#[async_trait]
pub trait AuditTrail: Send + Sync + Debug {
    /// Append a record; the returned copy carries the assigned sequence id
    async fn insert_trigger_record(
        &self,
        record: NewTriggerRecord,
    ) -> Result<TriggerRecord, StoreError>;

    /// Records created at or after `since`, in ascending sequence order
    async fn query_recent_trigger_records(
        &self,
        system_id: &str,
        schedule_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, StoreError>;
}

/// Realtime key-value store holding one JSON blob per system
#[async_trait]
pub trait DeviceStateStore: Send + Sync + Debug {
    async fn read(&self, system_id: &str) -> Result<Option<Value>, StoreError>;

    async fn write(&self, system_id: &str, blob: &Value) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TimeSource: Send + Sync + Debug {
    async fn authoritative_time(&self) -> Result<AuthoritativeTime, ClockError>;
}

/// Wall clock of the local process
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
