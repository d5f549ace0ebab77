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

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use powerverter_core::{AuditTrail, ScheduleStore, StoreError};
use powerverter_types::{NewTriggerRecord, Schedule, TriggerRecord};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Mutex;

const SCHEDULE_COLUMNS: &str =
    "id, system_id, trigger_time, days_of_week, state, is_active, updated_at";
const RECORD_COLUMNS: &str =
    "id, schedule_id, system_id, action, triggered_by, request_id, details, created_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<rusqlite::Connection>,
}

/// Fixed-width UTC timestamps so text comparison matches time order
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let days_json: String = row.get(3)?;
    let days_of_week: Vec<String> =
        serde_json::from_str(&days_json).map_err(|e| conversion_error(3, e))?;
    Ok(Schedule {
        id: row.get(0)?,
        system_id: row.get(1)?,
        trigger_time: row.get(2)?,
        days_of_week,
        target_state: row.get(4)?,
        is_active: row.get(5)?,
        updated_at: Some(parse_timestamp(row, 6)?),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TriggerRecord> {
    let action: String = row.get(3)?;
    let triggered_by: String = row.get(4)?;
    let details: String = row.get(6)?;
    Ok(TriggerRecord {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        system_id: row.get(2)?,
        action: action.parse().map_err(|e: String| {
            conversion_error(3, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?,
        triggered_by: triggered_by.parse().map_err(|e: String| {
            conversion_error(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?,
        request_id: row.get(5)?,
        details: serde_json::from_str(&details).map_err(|e| conversion_error(6, e))?,
        created_at: parse_timestamp(row, 7)?,
    })
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open database: {path}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inverter_schedules (
                id             TEXT PRIMARY KEY,
                system_id      TEXT NOT NULL,
                trigger_time   TEXT NOT NULL,
                days_of_week   TEXT NOT NULL,
                state          BOOLEAN NOT NULL,
                is_active      BOOLEAN NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_system_active
                ON inverter_schedules(system_id, is_active);

            CREATE TABLE IF NOT EXISTS scheduled_actions_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id    TEXT,
                system_id      TEXT NOT NULL,
                action         TEXT NOT NULL,
                triggered_by   TEXT NOT NULL,
                request_id     TEXT,
                details        TEXT NOT NULL,
                created_at     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_actions_log_lookup
                ON scheduled_actions_log(system_id, schedule_id, created_at);",
        )
        .context("Failed to initialize database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<Schedule> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let now = Utc::now();
        let days = serde_json::to_string(&schedule.days_of_week)?;
        conn.execute(
            "INSERT INTO inverter_schedules (id, system_id, trigger_time, days_of_week, state, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                schedule.id,
                schedule.system_id,
                schedule.trigger_time,
                days,
                schedule.target_state,
                schedule.is_active,
                timestamp(now),
            ],
        )?;

        let mut stored = schedule.clone();
        stored.updated_at = Some(now);
        Ok(stored)
    }

    pub fn get_schedule(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let schedule = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM inverter_schedules WHERE id = ?1"),
                params![schedule_id],
                schedule_from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    pub fn list_schedules(&self, system_id: &str, active_only: bool) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM inverter_schedules
             WHERE system_id = ?1 AND (is_active = 1 OR ?2 = 0)
             ORDER BY trigger_time, id"
        ))?;
        let rows = stmt
            .query_map(params![system_id, active_only], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_all_active_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM inverter_schedules
             WHERE is_active = 1
             ORDER BY system_id, trigger_time, id"
        ))?;
        let rows = stmt
            .query_map([], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Returns false when no schedule has this id
    pub fn set_schedule_active(&self, schedule_id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let updated = conn.execute(
            "UPDATE inverter_schedules SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, timestamp(Utc::now()), schedule_id],
        )?;
        Ok(updated > 0)
    }

    pub fn update_trigger_time(&self, schedule_id: &str, trigger_time: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let updated = conn.execute(
            "UPDATE inverter_schedules SET trigger_time = ?1, updated_at = ?2 WHERE id = ?3",
            params![trigger_time, timestamp(Utc::now()), schedule_id],
        )?;
        Ok(updated > 0)
    }

    pub fn insert_trigger_record(&self, record: NewTriggerRecord) -> Result<TriggerRecord> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let details = serde_json::to_string(&record.details)?;
        conn.execute(
            "INSERT INTO scheduled_actions_log (schedule_id, system_id, action, triggered_by, request_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.schedule_id,
                record.system_id,
                record.action.as_str(),
                record.triggered_by.as_str(),
                record.request_id,
                details,
                timestamp(record.created_at),
            ],
        )?;
        Ok(record.into_record(conn.last_insert_rowid()))
    }

    /// Records since `since`, oldest first
    pub fn query_trigger_records(
        &self,
        system_id: &str,
        schedule_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_actions_log
             WHERE system_id = ?1 AND (?2 IS NULL OR schedule_id = ?2) AND created_at >= ?3
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(
                params![system_id, schedule_id, timestamp(since)],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent records first
    pub fn recent_trigger_records(
        &self,
        system_id: &str,
        schedule_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TriggerRecord>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_actions_log
             WHERE system_id = ?1 AND (?2 IS NULL OR schedule_id = ?2)
             ORDER BY id DESC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![system_id, schedule_id, limit], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cleanup_old_trigger_records(&self, retention_days: u32) -> Result<u64> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = conn.execute(
            "DELETE FROM scheduled_actions_log WHERE created_at < ?1",
            params![timestamp(cutoff)],
        )?;
        Ok(deleted as u64)
    }
}

fn backend(e: &anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

#[async_trait]
impl ScheduleStore for Database {
    async fn list_active_schedules(&self, system_id: &str) -> Result<Vec<Schedule>, StoreError> {
        self.list_schedules(system_id, true).map_err(|e| backend(&e))
    }

    async fn list_all_active_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Database::list_all_active_schedules(self).map_err(|e| backend(&e))
    }

    async fn get_schedule(&self, schedule_id: &str) -> Result<Option<Schedule>, StoreError> {
        Database::get_schedule(self, schedule_id).map_err(|e| backend(&e))
    }
}

#[async_trait]
impl AuditTrail for Database {
    async fn insert_trigger_record(
        &self,
        record: NewTriggerRecord,
    ) -> Result<TriggerRecord, StoreError> {
        Database::insert_trigger_record(self, record).map_err(|e| backend(&e))
    }

    async fn query_recent_trigger_records(
        &self,
        system_id: &str,
        schedule_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, StoreError> {
        self.query_trigger_records(system_id, schedule_id, since)
            .map_err(|e| backend(&e))
    }
}
