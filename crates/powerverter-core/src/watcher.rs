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

//! Client-side watchers: one polling task per active schedule.
//!
//! Each watcher polls the matcher on a baseline interval, tightens to a fast
//! interval while its window approaches, and hands due windows to the
//! coordinator. The supervisor owns every task and its cancellation handle.

use chrono::{DateTime, TimeDelta, Utc};
use powerverter_types::{AuditAction, InvalidReason, NewTriggerRecord, Schedule, TriggeredBy};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::ClockAlignmentService;
use crate::coordinator::{ExecutionCoordinator, ExecutionOutcome, ExecutionPriority, ExecutionRequest};
use crate::matcher::{DUE_TOLERANCE_SECS, is_due};
use crate::traits::ScheduleStore;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub baseline_interval: Duration,
    pub fast_interval: Duration,
    /// Fast polling starts this long before the target
    pub fast_window: Duration,
    /// Longest continuous stretch of fast polling per approach
    pub fast_ceiling: Duration,
    pub failure_cooldown: Duration,
    /// How often the supervisor reloads schedules
    pub refresh_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            baseline_interval: Duration::from_secs(10),
            fast_interval: Duration::from_secs(1),
            fast_window: Duration::from_secs(120),
            fast_ceiling: Duration::from_secs(120),
            failure_cooldown: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Per-watcher memory of the current due window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptState {
    /// Set once the window has been served
    pub attempted: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Waiting { seconds_to_next: i64 },
    Executed(ExecutionOutcome),
    /// Due, but already served or cooling down
    Skipped,
    Invalid(InvalidReason),
    Deactivated,
    /// The stored schedule was edited; the watcher now follows the new version
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    Cancelled,
    Invalid(InvalidReason),
    Deactivated,
}

#[derive(Debug)]
pub struct ScheduleWatcher {
    schedule: Schedule,
    clock: Arc<ClockAlignmentService>,
    store: Arc<dyn ScheduleStore>,
    coordinator: Arc<ExecutionCoordinator>,
    config: WatcherConfig,
    state: AttemptState,
    last_seconds_to_next: Option<i64>,
    fast_since: Option<Instant>,
}

impl ScheduleWatcher {
    pub fn new(
        schedule: Schedule,
        clock: Arc<ClockAlignmentService>,
        store: Arc<dyn ScheduleStore>,
        coordinator: Arc<ExecutionCoordinator>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            schedule,
            clock,
            store,
            coordinator,
            config,
            state: AttemptState::default(),
            last_seconds_to_next: None,
            fast_since: None,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// One evaluation of the schedule
    pub async fn tick(&mut self) -> TickOutcome {
        let reference = self.clock.reference_instant();
        let check = is_due(&self.schedule, &reference);
        self.last_seconds_to_next = check.seconds_to_next;

        if let Some(reason) = check.reason {
            return TickOutcome::Invalid(reason);
        }
        let (Some(seconds_to_next), Some(target)) = (check.seconds_to_next, check.target) else {
            return TickOutcome::Skipped;
        };

        if !check.due {
            if seconds_to_next > DUE_TOLERANCE_SECS && self.state != AttemptState::default() {
                debug!(
                    schedule_id = %self.schedule.id,
                    "[WATCHER] Window closed, re-arming for next occurrence"
                );
                self.state = AttemptState::default();
            }
            return TickOutcome::Waiting { seconds_to_next };
        }

        if self.state.attempted {
            return TickOutcome::Skipped;
        }
        let now = reference.instant;
        if let Some(until) = self.state.cooldown_until
            && now < until
        {
            return TickOutcome::Skipped;
        }

        let current = match self.store.get_schedule(&self.schedule.id).await {
            Ok(Some(current)) if current.is_active => current,
            Ok(_) => {
                info!(
                    schedule_id = %self.schedule.id,
                    "[WATCHER] Schedule deactivated or removed, not executing"
                );
                return TickOutcome::Deactivated;
            }
            Err(e) => {
                warn!(
                    schedule_id = %self.schedule.id,
                    "⚠️ [WATCHER] Could not confirm schedule is active: {}", e
                );
                return TickOutcome::Skipped;
            }
        };

        if !current.fires_like(&self.schedule) {
            info!(
                schedule_id = %current.id,
                trigger_time = %current.trigger_time,
                state = current.state_label(),
                "[WATCHER] Schedule edited, re-evaluating before execution"
            );
            self.schedule = current;
            self.state = AttemptState::default();
            self.last_seconds_to_next = None;
            return TickOutcome::Changed;
        }

        info!(
            schedule_id = %self.schedule.id,
            system_id = %self.schedule.system_id,
            estimated = reference.estimated,
            "⏰ [WATCHER] Schedule due ({}s to target), executing", seconds_to_next
        );
        self.state.last_attempt_at = Some(now);
        let outcome = self
            .coordinator
            .execute(ExecutionRequest {
                schedule: current,
                target,
                triggered_by: TriggeredBy::Watcher,
                priority: ExecutionPriority::Normal,
            })
            .await;

        if outcome.success {
            self.state.attempted = true;
        } else {
            let cooldown = TimeDelta::from_std(self.config.failure_cooldown)
                .unwrap_or_else(|_| TimeDelta::seconds(60));
            self.state.cooldown_until = Some(now + cooldown);
            warn!(
                schedule_id = %self.schedule.id,
                "⚠️ [WATCHER] Execution failed, cooling down for {}s: {}",
                cooldown.num_seconds(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        TickOutcome::Executed(outcome)
    }

    /// Delay before the next tick
    pub fn next_interval(&mut self) -> Duration {
        let fast_window = i64::try_from(self.config.fast_window.as_secs()).unwrap_or(i64::MAX);
        let approaching = !self.state.attempted
            && self
                .last_seconds_to_next
                .is_some_and(|secs| (-DUE_TOLERANCE_SECS..=fast_window).contains(&secs));

        if !approaching {
            self.fast_since = None;
            return self.config.baseline_interval;
        }

        let started = *self.fast_since.get_or_insert_with(Instant::now);
        if started.elapsed() >= self.config.fast_ceiling {
            self.config.baseline_interval
        } else {
            self.config.fast_interval
        }
    }

    /// Poll until cancelled, deactivated, or found invalid
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> WatchExit {
        debug!(
            schedule_id = %self.schedule.id,
            "[WATCHER] Watching {} on {:?}",
            self.schedule.trigger_time, self.schedule.days_of_week
        );

        loop {
            if *cancel.borrow() {
                return WatchExit::Cancelled;
            }

            match self.tick().await {
                TickOutcome::Invalid(reason) => {
                    warn!(
                        schedule_id = %self.schedule.id,
                        "⚠️ [WATCHER] Invalid schedule ({}), watcher stopped", reason
                    );
                    self.record_invalid(reason).await;
                    return WatchExit::Invalid(reason);
                }
                TickOutcome::Deactivated => return WatchExit::Deactivated,
                TickOutcome::Waiting { .. }
                | TickOutcome::Executed(_)
                | TickOutcome::Skipped
                | TickOutcome::Changed => {}
            }

            let interval = self.next_interval();
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return WatchExit::Cancelled;
                    }
                }
            }
        }
    }

    async fn record_invalid(&self, reason: InvalidReason) {
        let record = NewTriggerRecord::new(
            self.schedule.system_id.clone(),
            AuditAction::ScheduleInvalid,
            TriggeredBy::Watcher,
            self.clock.reference_instant().instant,
        )
        .with_schedule(self.schedule.id.clone())
        .with_details(json!({
            "reason": reason,
            "trigger_time": self.schedule.trigger_time,
            "days_of_week": self.schedule.days_of_week,
        }));
        if let Err(e) = self.coordinator.audit().insert_trigger_record(record).await {
            warn!(
                schedule_id = %self.schedule.id,
                "⚠️ [WATCHER] Failed to record invalid schedule: {}", e
            );
        }
    }
}

#[derive(Debug)]
struct WatchTask {
    schedule: Schedule,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<WatchExit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub running: usize,
}

/// Owns one watcher task per active schedule
#[derive(Debug)]
pub struct WatcherSupervisor {
    clock: Arc<ClockAlignmentService>,
    store: Arc<dyn ScheduleStore>,
    coordinator: Arc<ExecutionCoordinator>,
    config: WatcherConfig,
    tasks: HashMap<String, WatchTask>,
}

impl WatcherSupervisor {
    pub fn new(
        clock: Arc<ClockAlignmentService>,
        store: Arc<dyn ScheduleStore>,
        coordinator: Arc<ExecutionCoordinator>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            clock,
            store,
            coordinator,
            config,
            tasks: HashMap::new(),
        }
    }

    /// Ids of schedules with a watcher task, finished or not
    pub fn watched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Align running tasks with `schedules`.
    ///
    /// New or changed schedules get a fresh task; removed, changed and
    /// inactive ones are cancelled. A task that exited on its own (invalid
    /// schedule) stays parked until its schedule changes.
    pub async fn reconcile(&mut self, schedules: &[Schedule]) -> ReconcileSummary {
        let desired: HashMap<&str, &Schedule> = schedules
            .iter()
            .filter(|s| s.is_active)
            .map(|s| (s.id.as_str(), s))
            .collect();

        let mut summary = ReconcileSummary::default();

        let stale: Vec<String> = self
            .tasks
            .iter()
            .filter(|(id, task)| {
                desired
                    .get(id.as_str())
                    .is_none_or(|wanted| **wanted != task.schedule)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(task) = self.tasks.remove(&id) {
                stop_task(&id, task).await;
                summary.stopped.push(id);
            }
        }

        for schedule in desired.values() {
            if !self.tasks.contains_key(&schedule.id) {
                self.spawn(Schedule::clone(schedule));
                summary.started.push(schedule.id.clone());
            }
        }

        summary.started.sort();
        summary.stopped.sort();
        summary.running = self
            .tasks
            .values()
            .filter(|t| !t.handle.is_finished())
            .count();

        if !summary.started.is_empty() || !summary.stopped.is_empty() {
            info!(
                "👀 [SUPERVISOR] Reconciled: {} started, {} stopped, {} running",
                summary.started.len(),
                summary.stopped.len(),
                summary.running
            );
        }
        summary
    }

    fn spawn(&mut self, schedule: Schedule) {
        let (cancel, cancel_rx) = watch::channel(false);
        let watcher = ScheduleWatcher::new(
            schedule.clone(),
            self.clock.clone(),
            self.store.clone(),
            self.coordinator.clone(),
            self.config.clone(),
        );
        let handle = tokio::spawn(watcher.run(cancel_rx));
        self.tasks.insert(
            schedule.id.clone(),
            WatchTask {
                schedule,
                cancel,
                handle,
            },
        );
    }

    /// Cancel every task and wait for all of them to finish
    pub async fn shutdown(&mut self) {
        let tasks: Vec<(String, WatchTask)> = self.tasks.drain().collect();
        for (_, task) in &tasks {
            let _ = task.cancel.send(true);
        }
        for (id, task) in tasks {
            stop_task(&id, task).await;
        }
        info!("👀 [SUPERVISOR] All watchers stopped");
    }

    /// Reload schedules on the refresh interval until cancelled, then shut down.
    ///
    /// `system_id = None` watches every system.
    pub async fn run(mut self, system_id: Option<String>, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let schedules = match &system_id {
                        Some(id) => self.store.list_active_schedules(id).await,
                        None => self.store.list_all_active_schedules().await,
                    };
                    match schedules {
                        Ok(schedules) => {
                            self.reconcile(&schedules).await;
                        }
                        Err(e) => warn!("⚠️ [SUPERVISOR] Failed to load schedules: {}", e),
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }
}

async fn stop_task(id: &str, task: WatchTask) {
    let _ = task.cancel.send(true);
    match task.handle.await {
        Ok(exit) => debug!(schedule_id = id, "[SUPERVISOR] Watcher exited: {:?}", exit),
        Err(e) => warn!(schedule_id = id, "⚠️ [SUPERVISOR] Watcher task failed: {}", e),
    }
}
