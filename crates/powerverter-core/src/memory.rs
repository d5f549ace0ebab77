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

//! In-process backends.
//!
//! Used by the `memory` device-store kind, by single-node deployments that
//! act as their own time authority, and throughout the test suites.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use powerverter_types::{AuthoritativeTime, NewTriggerRecord, Schedule, TriggerRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ClockError, StoreError};
use crate::traits::{AuditTrail, Clock, DeviceStateStore, ScheduleStore, TimeSource};

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<HashMap<String, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedules(schedules: impl IntoIterator<Item = Schedule>) -> Self {
        let store = Self::new();
        for schedule in schedules {
            store.upsert(schedule);
        }
        store
    }

    pub fn upsert(&self, schedule: Schedule) {
        self.schedules.write().insert(schedule.id.clone(), schedule);
    }

    /// Returns false when the schedule does not exist
    pub fn set_active(&self, schedule_id: &str, active: bool) -> bool {
        match self.schedules.write().get_mut(schedule_id) {
            Some(schedule) => {
                schedule.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, schedule_id: &str) -> Option<Schedule> {
        self.schedules.write().remove(schedule_id)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn list_active_schedules(&self, system_id: &str) -> Result<Vec<Schedule>, StoreError> {
        let mut active: Vec<Schedule> = self
            .schedules
            .read()
            .values()
            .filter(|s| s.is_active && s.system_id == system_id)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.trigger_time.cmp(&b.trigger_time));
        Ok(active)
    }

    async fn list_all_active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let mut active: Vec<Schedule> = self
            .schedules
            .read()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            (a.system_id.as_str(), a.trigger_time.as_str())
                .cmp(&(b.system_id.as_str(), b.trigger_time.as_str()))
        });
        Ok(active)
    }

    async fn get_schedule(&self, schedule_id: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.read().get(schedule_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    records: Mutex<Vec<TriggerRecord>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in sequence order
    pub fn records(&self) -> Vec<TriggerRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn insert_trigger_record(
        &self,
        record: NewTriggerRecord,
    ) -> Result<TriggerRecord, StoreError> {
        let mut records = self.records.lock();
        let next_id = records.last().map_or(1, |last| last.id + 1);
        let stored = record.into_record(next_id);
        records.push(stored.clone());
        Ok(stored)
    }

    async fn query_recent_trigger_records(
        &self,
        system_id: &str,
        schedule_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.system_id == system_id && r.created_at >= since)
            .filter(|r| schedule_id.is_none_or(|id| r.schedule_id.as_deref() == Some(id)))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct DeviceBlobs {
    blobs: HashMap<String, Value>,
    writes: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryDeviceStore {
    inner: Mutex<DeviceBlobs>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_blob(&self, system_id: impl Into<String>, blob: Value) {
        self.inner.lock().blobs.insert(system_id.into(), blob);
    }

    pub fn blob(&self, system_id: &str) -> Option<Value> {
        self.inner.lock().blobs.get(system_id).cloned()
    }

    /// Number of writes accepted since creation
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryDeviceStore {
    async fn read(&self, system_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.blob(system_id))
    }

    async fn write(&self, system_id: &str, blob: &Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.blobs.insert(system_id.to_owned(), blob.clone());
        inner.writes += 1;
        Ok(())
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Serves a clock, optionally shifted, as the authoritative time
#[derive(Debug, Clone)]
pub struct LocalTimeSource {
    clock: Arc<dyn Clock>,
    offset: TimeDelta,
    estimated: bool,
}

impl LocalTimeSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset: TimeDelta::zero(),
            estimated: false,
        }
    }

    #[must_use]
    pub fn with_offset(mut self, offset: TimeDelta) -> Self {
        self.offset = offset;
        self
    }

    /// Report every reading as an estimate, like an unsynced upstream server
    #[must_use]
    pub fn as_estimate(mut self) -> Self {
        self.estimated = true;
        self
    }
}

#[async_trait]
impl TimeSource for LocalTimeSource {
    async fn authoritative_time(&self) -> Result<AuthoritativeTime, ClockError> {
        Ok(AuthoritativeTime {
            time: self.clock.now() + self.offset,
            timezone: "UTC".to_owned(),
            estimated: self.estimated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use powerverter_types::{AuditAction, TriggeredBy};

    fn schedule(id: &str, system_id: &str, active: bool) -> Schedule {
        Schedule {
            id: id.to_owned(),
            system_id: system_id.to_owned(),
            trigger_time: "09:05".to_owned(),
            days_of_week: vec!["Monday".to_owned()],
            target_state: true,
            is_active: active,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_schedule_store_filters_inactive_and_foreign_systems() {
        let store = InMemoryScheduleStore::with_schedules([
            schedule("a", "sys-1", true),
            schedule("b", "sys-1", false),
            schedule("c", "sys-2", true),
        ]);

        let active = store.list_active_schedules("sys-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");

        assert_eq!(store.list_all_active_schedules().await.unwrap().len(), 2);

        assert!(store.set_active("b", true));
        assert!(!store.set_active("missing", true));
        assert_eq!(store.list_active_schedules("sys-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_audit_trail_assigns_increasing_ids_and_filters() {
        let trail = InMemoryAuditTrail::new();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();

        let first = trail
            .insert_trigger_record(
                NewTriggerRecord::new("sys-1", AuditAction::ScheduleCheck, TriggeredBy::Runner, t0)
                    .with_schedule("a"),
            )
            .await
            .unwrap();
        let second = trail
            .insert_trigger_record(
                NewTriggerRecord::new(
                    "sys-1",
                    AuditAction::ScheduleCheck,
                    TriggeredBy::Runner,
                    t0 + TimeDelta::minutes(5),
                )
                .with_schedule("b"),
            )
            .await
            .unwrap();
        assert!(second.id > first.id);

        let since_later = trail
            .query_recent_trigger_records("sys-1", None, t0 + TimeDelta::minutes(1))
            .await
            .unwrap();
        assert_eq!(since_later.len(), 1);
        assert_eq!(since_later[0].id, second.id);

        let only_a = trail
            .query_recent_trigger_records("sys-1", Some("a"), t0)
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].schedule_id.as_deref(), Some("a"));

        assert!(
            trail
                .query_recent_trigger_records("sys-2", None, t0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_local_time_source_applies_offset() {
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let source = LocalTimeSource::new(clock.clone()).with_offset(TimeDelta::seconds(30));

        let time = source.authoritative_time().await.unwrap();
        assert_eq!(time.time, now + TimeDelta::seconds(30));
        assert_eq!(time.timezone, "UTC");

        clock.advance(TimeDelta::seconds(10));
        let time = source.authoritative_time().await.unwrap();
        assert_eq!(time.time, now + TimeDelta::seconds(40));
    }
}
