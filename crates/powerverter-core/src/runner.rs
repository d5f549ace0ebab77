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

//! Stateless sweep over every active schedule.
//!
//! Invoked on a fixed cadence by an external scheduler (or the server's
//! built-in timer). Each invocation re-syncs the clock and keeps no memory
//! between runs; the audit trail is the only shared state.

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use powerverter_types::{
    AuditAction, InvalidReason, NewTriggerRecord, Schedule, TriggeredBy, weekday_name,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{ClockAlignmentService, ClockSync, ReferenceInstant};
use crate::coordinator::{
    ExecutionCoordinator, ExecutionOutcome, ExecutionPriority, ExecutionRequest,
};
use crate::error::StoreError;
use crate::matcher::{DUE_TOLERANCE_SECS, DueCheck, format_countdown, is_due};
use crate::traits::ScheduleStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Limit the sweep to one system
    #[serde(default)]
    pub system_id: Option<String>,
    /// Evaluate only; never actuate
    #[serde(default)]
    pub test_mode: bool,
    /// Override the reference instant (diagnostics); implies an estimate
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleVerdict {
    NotDue,
    Invalid,
    Deactivated,
    AlreadyHandled,
    WouldExecute,
    Executed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub schedule_id: String,
    pub system_id: String,
    pub trigger_time: String,
    pub days_of_week: Vec<String>,
    pub target_state: bool,
    pub verdict: ScheduleVerdict,
    pub seconds_to_next: Option<i64>,
    pub countdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScheduleReport {
    fn new(schedule: &Schedule, check: &DueCheck, verdict: ScheduleVerdict) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            system_id: schedule.system_id.clone(),
            trigger_time: schedule.trigger_time.clone(),
            days_of_week: schedule.days_of_week.clone(),
            target_state: schedule.target_state,
            verdict,
            seconds_to_next: check.seconds_to_next,
            countdown: check.seconds_to_next.map(format_countdown),
            reason: check.reason,
            outcome: None,
            error: None,
        }
    }
}

/// UTC breakdown of a reference instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBreakdown {
    pub iso: DateTime<Utc>,
    pub hours_utc: u32,
    pub minutes_utc: u32,
    pub weekday: String,
    pub formatted_hhmm: String,
}

impl TimeBreakdown {
    pub fn of(instant: DateTime<Utc>) -> Self {
        Self {
            iso: instant,
            hours_utc: instant.hour(),
            minutes_utc: instant.minute(),
            weekday: weekday_name(instant.weekday()).to_owned(),
            formatted_hhmm: format!("{:02}:{:02}", instant.hour(), instant.minute()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reference_time: TimeBreakdown,
    pub estimated: bool,
    pub clock: ClockSync,
    pub test_mode: bool,
    pub schedules_checked: usize,
    pub executed: usize,
    pub results: Vec<ScheduleReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub reference_time: TimeBreakdown,
    pub estimated: bool,
    pub clock: ClockSync,
    pub skew_description: String,
}

#[derive(Debug, Clone)]
pub struct PeriodicRunner {
    clock: Arc<ClockAlignmentService>,
    store: Arc<dyn ScheduleStore>,
    coordinator: Arc<ExecutionCoordinator>,
    lookback: Duration,
}

impl PeriodicRunner {
    pub fn new(
        clock: Arc<ClockAlignmentService>,
        store: Arc<dyn ScheduleStore>,
        coordinator: Arc<ExecutionCoordinator>,
        lookback: Duration,
    ) -> Self {
        Self {
            clock,
            store,
            coordinator,
            lookback,
        }
    }

    async fn reference(&self, request: &RunRequest) -> (ClockSync, ReferenceInstant) {
        let sync = self.clock.sync().await;
        let reference = match request.at {
            Some(at) => ReferenceInstant::estimated(at),
            None => self.clock.reference_instant(),
        };
        (sync, reference)
    }

    /// One sweep; only a failure to list schedules is an error
    pub async fn run_once(&self, request: &RunRequest) -> Result<RunReport, StoreError> {
        let (sync, reference) = self.reference(request).await;

        let schedules = match &request.system_id {
            Some(system_id) => self.store.list_active_schedules(system_id).await?,
            None => self.store.list_all_active_schedules().await?,
        };
        info!(
            estimated = reference.estimated,
            test_mode = request.test_mode,
            "🔄 [RUNNER] Checking {} schedules at {}",
            schedules.len(),
            reference.instant.format("%H:%M:%S")
        );

        let mut results = Vec::with_capacity(schedules.len());
        for schedule in schedules.iter().filter(|s| s.is_active) {
            results.push(self.evaluate(schedule, &reference, request.test_mode).await);
        }

        let executed = results
            .iter()
            .filter(|r| r.verdict == ScheduleVerdict::Executed)
            .count();

        self.record_summary(request, &reference, &results).await;

        Ok(RunReport {
            reference_time: TimeBreakdown::of(reference.instant),
            estimated: reference.estimated,
            clock: sync,
            test_mode: request.test_mode,
            schedules_checked: results.len(),
            executed,
            results,
        })
    }

    /// Time breakdown only; logs a `time_diagnostics` record
    pub async fn diagnostics(&self, request: &RunRequest) -> DiagnosticsReport {
        let (sync, reference) = self.reference(request).await;
        let report = DiagnosticsReport {
            reference_time: TimeBreakdown::of(reference.instant),
            estimated: reference.estimated,
            skew_description: crate::clock::describe_skew(sync.skew_ms),
            clock: sync,
        };

        let record = NewTriggerRecord::new(
            request.system_id.clone().unwrap_or_else(|| "all".to_owned()),
            AuditAction::TimeDiagnostics,
            TriggeredBy::Runner,
            reference.instant,
        )
        .with_details(json!(report));
        if let Err(e) = self.coordinator.audit().insert_trigger_record(record).await {
            warn!("⚠️ [RUNNER] Failed to record time diagnostics: {}", e);
        }
        report
    }

    async fn evaluate(
        &self,
        schedule: &Schedule,
        reference: &ReferenceInstant,
        test_mode: bool,
    ) -> ScheduleReport {
        let check = is_due(schedule, reference);

        if let Some(reason) = check.reason {
            warn!(
                schedule_id = %schedule.id,
                "⚠️ [RUNNER] Invalid schedule: {}", reason
            );
            self.record_invalid(schedule, reason, reference).await;
            return ScheduleReport::new(schedule, &check, ScheduleVerdict::Invalid);
        }
        let Some(target) = check.target.filter(|_| check.due) else {
            return ScheduleReport::new(schedule, &check, ScheduleVerdict::NotDue);
        };

        let mut report = ScheduleReport::new(schedule, &check, ScheduleVerdict::Failed);

        let lookback = TimeDelta::from_std(self.lookback).unwrap_or(TimeDelta::MAX);
        let since = (target - TimeDelta::seconds(DUE_TOLERANCE_SECS))
            .max(reference.instant - lookback);
        match self
            .coordinator
            .audit()
            .query_recent_trigger_records(&schedule.system_id, Some(&schedule.id), since)
            .await
        {
            Ok(records) if records.iter().any(|r| r.action == AuditAction::ExecutionSucceeded) => {
                debug!(schedule_id = %schedule.id, "[RUNNER] Already handled");
                report.verdict = ScheduleVerdict::AlreadyHandled;
                return report;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    schedule_id = %schedule.id,
                    "⚠️ [RUNNER] Audit trail unavailable, skipping: {}", e
                );
                report.error = Some(e.to_string());
                return report;
            }
        }

        if test_mode {
            info!(
                schedule_id = %schedule.id,
                "🧪 [RUNNER] Test mode: would set power {}",
                schedule.state_label()
            );
            report.verdict = ScheduleVerdict::WouldExecute;
            return report;
        }

        let current = match self.store.get_schedule(&schedule.id).await {
            Ok(Some(current)) if current.is_active => current,
            Ok(_) => {
                report.verdict = ScheduleVerdict::Deactivated;
                return report;
            }
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };

        // Edited since the sweep listed it: only the stored version may fire
        let target = if current.fires_like(schedule) {
            target
        } else {
            let recheck = is_due(&current, reference);
            match recheck.target.filter(|_| recheck.due) {
                Some(target) => {
                    report = ScheduleReport::new(&current, &recheck, ScheduleVerdict::Failed);
                    target
                }
                None => {
                    info!(
                        schedule_id = %current.id,
                        trigger_time = %current.trigger_time,
                        "[RUNNER] Schedule edited during sweep, no longer due"
                    );
                    let verdict = if recheck.reason.is_some() {
                        ScheduleVerdict::Invalid
                    } else {
                        ScheduleVerdict::NotDue
                    };
                    return ScheduleReport::new(&current, &recheck, verdict);
                }
            }
        };

        let outcome = self
            .coordinator
            .execute(ExecutionRequest {
                schedule: current,
                target,
                triggered_by: TriggeredBy::Runner,
                priority: ExecutionPriority::Normal,
            })
            .await;

        report.verdict = if outcome.duplicate {
            ScheduleVerdict::AlreadyHandled
        } else if outcome.success {
            ScheduleVerdict::Executed
        } else {
            ScheduleVerdict::Failed
        };
        report.error.clone_from(&outcome.error);
        report.outcome = Some(outcome);
        report
    }

    async fn record_invalid(
        &self,
        schedule: &Schedule,
        reason: InvalidReason,
        reference: &ReferenceInstant,
    ) {
        // Once per version of the row; without an edit timestamp, once a day
        let since = schedule.updated_at.map_or_else(
            || reference.instant - TimeDelta::days(1),
            |updated| updated.min(reference.instant),
        );
        let audit = self.coordinator.audit();
        match audit
            .query_recent_trigger_records(&schedule.system_id, Some(&schedule.id), since)
            .await
        {
            Ok(records)
                if records.iter().any(|r| {
                    r.action == AuditAction::ScheduleInvalid
                        && r.details["trigger_time"] == schedule.trigger_time.as_str()
                        && r.details["days_of_week"] == json!(schedule.days_of_week)
                }) =>
            {
                debug!(schedule_id = %schedule.id, "[RUNNER] Invalid schedule already recorded");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    schedule_id = %schedule.id,
                    "⚠️ [RUNNER] Audit trail unavailable, not recording invalid schedule: {}", e
                );
                return;
            }
        }

        let record = NewTriggerRecord::new(
            schedule.system_id.clone(),
            AuditAction::ScheduleInvalid,
            TriggeredBy::Runner,
            reference.instant,
        )
        .with_schedule(schedule.id.clone())
        .with_details(json!({
            "reason": reason,
            "trigger_time": schedule.trigger_time,
            "days_of_week": schedule.days_of_week,
        }));
        if let Err(e) = audit.insert_trigger_record(record).await {
            warn!(
                schedule_id = %schedule.id,
                "⚠️ [RUNNER] Failed to record invalid schedule: {}", e
            );
        }
    }

    /// One `schedule_check` record per system touched by the sweep
    async fn record_summary(
        &self,
        request: &RunRequest,
        reference: &ReferenceInstant,
        results: &[ScheduleReport],
    ) {
        let mut per_system: BTreeMap<&str, Vec<&ScheduleReport>> = BTreeMap::new();
        if let Some(system_id) = &request.system_id {
            per_system.entry(system_id.as_str()).or_default();
        }
        for result in results {
            per_system.entry(result.system_id.as_str()).or_default().push(result);
        }

        for (system_id, reports) in per_system {
            let record = NewTriggerRecord::new(
                system_id,
                AuditAction::ScheduleCheck,
                TriggeredBy::Runner,
                reference.instant,
            )
            .with_details(json!({
                "reference_time": reference.instant,
                "estimated": reference.estimated,
                "test_mode": request.test_mode,
                "schedules_checked": reports.len(),
                "results": reports
                    .iter()
                    .map(|r| json!({ "schedule_id": r.schedule_id, "verdict": r.verdict }))
                    .collect::<Vec<_>>(),
            }));
            if let Err(e) = self.coordinator.audit().insert_trigger_record(record).await {
                warn!(system_id, "⚠️ [RUNNER] Failed to record schedule check: {}", e);
            }
        }
    }
}
