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

//! Append-only trigger records.
//!
//! Records double as the audit trail shown to operators and as the
//! de-duplication signal shared by every evaluator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Written before the first gateway call; orders concurrent executions
    ExecutionAttempted,
    ExecutionSucceeded,
    ExecutionFailed,
    /// Terminal no-op: another evaluator already handled the window
    DuplicateSuppressed,
    ScheduleCheck,
    ScheduleInvalid,
    TimeDiagnostics,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionAttempted => "execution_attempted",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::ExecutionFailed => "execution_failed",
            Self::DuplicateSuppressed => "duplicate_suppressed",
            Self::ScheduleCheck => "schedule_check",
            Self::ScheduleInvalid => "schedule_invalid",
            Self::TimeDiagnostics => "time_diagnostics",
        }
    }

    /// Terminal records close an execution attempt
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ExecutionSucceeded | Self::ExecutionFailed | Self::DuplicateSuppressed
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execution_attempted" => Ok(Self::ExecutionAttempted),
            "execution_succeeded" => Ok(Self::ExecutionSucceeded),
            "execution_failed" => Ok(Self::ExecutionFailed),
            "duplicate_suppressed" => Ok(Self::DuplicateSuppressed),
            "schedule_check" => Ok(Self::ScheduleCheck),
            "schedule_invalid" => Ok(Self::ScheduleInvalid),
            "time_diagnostics" => Ok(Self::TimeDiagnostics),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Which kind of evaluator produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Watcher,
    Runner,
    Manual,
    System,
}

impl TriggeredBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watcher => "watcher",
            Self::Runner => "runner",
            Self::Manual => "manual",
            Self::System => "system",
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watcher" => Ok(Self::Watcher),
            "runner" => Ok(Self::Runner),
            "manual" => Ok(Self::Manual),
            "system" => Ok(Self::System),
            other => Err(format!("unknown trigger source: {other}")),
        }
    }
}

/// A record as submitted by the coordinator, before the store assigns an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTriggerRecord {
    pub schedule_id: Option<String>,
    pub system_id: String,
    pub action: AuditAction,
    pub triggered_by: TriggeredBy,
    pub request_id: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// A stored, immutable trigger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Monotonic sequence assigned by the store; orders concurrent appends
    pub id: i64,
    pub schedule_id: Option<String>,
    pub system_id: String,
    pub action: AuditAction,
    pub triggered_by: TriggeredBy,
    pub request_id: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl NewTriggerRecord {
    pub fn new(
        system_id: impl Into<String>,
        action: AuditAction,
        triggered_by: TriggeredBy,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schedule_id: None,
            system_id: system_id.into(),
            action,
            triggered_by,
            request_id: None,
            details: Value::Null,
            created_at,
        }
    }

    #[must_use]
    pub fn with_schedule(mut self, schedule_id: impl Into<String>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self
    }

    #[must_use]
    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Attach the store-assigned sequence
    pub fn into_record(self, id: i64) -> TriggerRecord {
        TriggerRecord {
            id,
            schedule_id: self.schedule_id,
            system_id: self.system_id,
            action: self.action,
            triggered_by: self.triggered_by,
            request_id: self.request_id,
            details: self.details,
            created_at: self.created_at,
        }
    }
}
