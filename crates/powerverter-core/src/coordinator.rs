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

//! Turns a due schedule into exactly one successful actuation.
//!
//! Evaluators never talk to each other. They coordinate through the audit
//! trail only:
//!
//! 1. A success already recorded for the due window suppresses the call.
//! 2. Otherwise the coordinator appends an `execution_attempted` claim.
//! 3. Claims for the window are resolved in sequence order. The first claim
//!    that is still live or has succeeded wins; failed and expired claims are
//!    skipped so a crashed evaluator cannot block the window forever.
//! 4. The winner drives the gateway with bounded retries and closes its claim
//!    with exactly one terminal record.

use chrono::{DateTime, TimeDelta, Utc};
use powerverter_types::{
    ActuationRequest, AuditAction, NewTriggerRecord, Schedule, TriggerRecord, TriggeredBy,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::gateway::ActuationGateway;
use crate::matcher::DUE_TOLERANCE_SECS;
use crate::traits::{AuditTrail, Clock};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_attempts: u32,
    /// Attempts for manual and other priority executions
    pub priority_max_attempts: u32,
    pub base_backoff: Duration,
    /// Unterminated claims older than this are considered abandoned
    pub claim_ttl: Duration,
    pub claim_poll: Duration,
    /// How far past the target a success still counts for the window
    pub dedup_lookback: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            priority_max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            claim_ttl: Duration::from_secs(180),
            claim_poll: Duration::from_millis(500),
            dedup_lookback: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPriority {
    #[default]
    Normal,
    Priority,
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub schedule: Schedule,
    /// Occurrence instant of the due window being executed
    pub target: DateTime<Utc>,
    pub triggered_by: TriggeredBy,
    pub priority: ExecutionPriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub attempts: u32,
    pub verified: bool,
    /// Another evaluator already handled this window
    pub duplicate: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    fn suppressed(request_id: String) -> Self {
        Self {
            success: true,
            attempts: 0,
            verified: false,
            duplicate: true,
            request_id,
            error: None,
        }
    }

    fn failed(request_id: String, attempts: u32, error: String) -> Self {
        Self {
            success: false,
            attempts,
            verified: false,
            duplicate: false,
            request_id,
            error: Some(error),
        }
    }
}

/// How the claim walk ended for one coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClaimState {
    /// Our claim is first in line
    Mine,
    /// The window was already served by this request
    Succeeded(String),
    /// An earlier claim is still in flight
    Waiting(String),
}

fn resolve_claims(
    records: &[TriggerRecord],
    claim: &TriggerRecord,
    now: DateTime<Utc>,
    ttl: TimeDelta,
) -> ClaimState {
    let terminal_for = |request_id: &str| {
        records
            .iter()
            .filter(|r| r.action.is_terminal() && r.request_id.as_deref() == Some(request_id))
            .map(|r| r.action)
            .next_back()
    };

    if let Some(success) = records
        .iter()
        .find(|r| r.action == AuditAction::ExecutionSucceeded)
    {
        return ClaimState::Succeeded(success.request_id.clone().unwrap_or_default());
    }

    let mut attempts: Vec<&TriggerRecord> = records
        .iter()
        .filter(|r| r.action == AuditAction::ExecutionAttempted)
        .collect();
    attempts.sort_by_key(|r| r.id);

    for attempt in attempts {
        if attempt.id == claim.id {
            return ClaimState::Mine;
        }
        let Some(request_id) = attempt.request_id.as_deref() else {
            continue;
        };
        match terminal_for(request_id) {
            Some(AuditAction::ExecutionSucceeded) => {
                return ClaimState::Succeeded(request_id.to_owned());
            }
            Some(_) => continue,
            None if now - attempt.created_at > ttl => {
                debug!(
                    request_id,
                    "[COORDINATOR] Skipping abandoned claim from {}", attempt.created_at
                );
                continue;
            }
            None => return ClaimState::Waiting(request_id.to_owned()),
        }
    }

    // Our own claim is not visible yet; nothing earlier blocks us
    ClaimState::Mine
}

#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    gateway: ActuationGateway,
    audit: Arc<dyn AuditTrail>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl ExecutionCoordinator {
    pub fn new(
        gateway: ActuationGateway,
        audit: Arc<dyn AuditTrail>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            gateway,
            audit,
            clock,
            config,
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditTrail> {
        &self.audit
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Execute one due window of a schedule. Never fails; every problem is
    /// reported through the outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let request_id = uuid::Uuid::new_v4().to_string();
        let schedule = &request.schedule;
        let window_start = request.target - TimeDelta::seconds(DUE_TOLERANCE_SECS);

        // 1. Already served?
        match self.find_success(schedule, window_start, request.target).await {
            Ok(Some(existing)) => {
                info!(
                    schedule_id = %schedule.id,
                    system_id = %schedule.system_id,
                    request_id = %request_id,
                    "⏭️ [COORDINATOR] Window already handled by {}, suppressing", existing
                );
                self.record_suppressed(&request, &request_id, &existing).await;
                return ExecutionOutcome::suppressed(request_id);
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    schedule_id = %schedule.id,
                    "❌ [COORDINATOR] Audit trail unavailable, not executing: {}", e
                );
                let reason = format!("audit trail unavailable: {e}");
                return ExecutionOutcome::failed(request_id, 0, reason);
            }
        }

        // 2. Claim
        let claim = match self
            .append(
                &request,
                &request_id,
                AuditAction::ExecutionAttempted,
                json!({
                    "target": request.target,
                    "target_state": schedule.target_state,
                    "priority": request.priority,
                }),
            )
            .await
        {
            Ok(claim) => claim,
            Err(e) => {
                error!(
                    schedule_id = %schedule.id,
                    "❌ [COORDINATOR] Could not record claim, not executing: {}", e
                );
                let reason = format!("could not record claim: {e}");
                return ExecutionOutcome::failed(request_id, 0, reason);
            }
        };

        // 3. Resolve
        match self.await_claim(&request, &claim, window_start).await {
            Ok(None) => {}
            Ok(Some(winner)) => {
                info!(
                    schedule_id = %schedule.id,
                    system_id = %schedule.system_id,
                    request_id = %request_id,
                    "⏭️ [COORDINATOR] Concurrent execution {} won the window, suppressing",
                    winner
                );
                self.record_suppressed(&request, &request_id, &winner).await;
                return ExecutionOutcome::suppressed(request_id);
            }
            Err(reason) => {
                warn!(
                    schedule_id = %schedule.id,
                    request_id = %request_id,
                    "⚠️ [COORDINATOR] {}", reason
                );
                let mut outcome = ExecutionOutcome::failed(request_id.clone(), 0, reason.clone());
                if let Err(e) = self
                    .append(
                        &request,
                        &request_id,
                        AuditAction::ExecutionFailed,
                        json!({ "error": reason }),
                    )
                    .await
                {
                    outcome.error = Some(format!("{reason}; terminal record not written: {e}"));
                }
                return outcome;
            }
        }

        // 4. Actuate
        let actuation = ActuationRequest {
            system_id: schedule.system_id.clone(),
            target_state: schedule.target_state,
            schedule_id: Some(schedule.id.clone()),
            triggered_by: request.triggered_by,
            request_id: request_id.clone(),
        };
        let (attempts, result) = self.actuate_with_retry(&actuation, request.priority).await;

        // 5. Exactly one terminal record
        let (mut outcome, action, details) = match result {
            Ok(()) => (
                ExecutionOutcome {
                    success: true,
                    attempts,
                    verified: true,
                    duplicate: false,
                    request_id: request_id.clone(),
                    error: None,
                },
                AuditAction::ExecutionSucceeded,
                json!({ "attempts": attempts, "target_state": schedule.target_state }),
            ),
            Err(reason) => (
                ExecutionOutcome::failed(request_id.clone(), attempts, reason.clone()),
                AuditAction::ExecutionFailed,
                json!({ "attempts": attempts, "error": reason }),
            ),
        };

        if let Err(e) = self.append(&request, &request_id, action, details).await {
            error!(
                schedule_id = %schedule.id,
                request_id = %request_id,
                "❌ [COORDINATOR] Failed to write {} record: {}", action, e
            );
            let note = format!("terminal record not written: {e}");
            outcome.error = Some(match outcome.error.take() {
                Some(reason) => format!("{reason}; {note}"),
                None => note,
            });
        }

        outcome
    }

    /// Request id of a success already recorded for this window
    async fn find_success(
        &self,
        schedule: &Schedule,
        window_start: DateTime<Utc>,
        target: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let window_end = target + lookback(&self.config);
        let records = self
            .audit
            .query_recent_trigger_records(&schedule.system_id, Some(&schedule.id), window_start)
            .await?;
        Ok(records
            .into_iter()
            .find(|r| r.action == AuditAction::ExecutionSucceeded && r.created_at <= window_end)
            .map(|r| r.request_id.unwrap_or_default()))
    }

    /// Wait until our claim is first in line.
    ///
    /// `Ok(None)`: proceed. `Ok(Some(id))`: request `id` served the window.
    async fn await_claim(
        &self,
        request: &ExecutionRequest,
        claim: &TriggerRecord,
        window_start: DateTime<Utc>,
    ) -> Result<Option<String>, String> {
        let ttl = TimeDelta::from_std(self.config.claim_ttl).unwrap_or(TimeDelta::MAX);
        // A blocking claim goes stale within one TTL; the extra polls absorb clock jitter
        let deadline =
            tokio::time::Instant::now() + self.config.claim_ttl + self.config.claim_poll * 2;

        loop {
            let records = self
                .audit
                .query_recent_trigger_records(
                    &request.schedule.system_id,
                    Some(&request.schedule.id),
                    window_start,
                )
                .await
                .map_err(|e| format!("audit trail unavailable during claim resolution: {e}"))?;

            match resolve_claims(&records, claim, self.clock.now(), ttl) {
                ClaimState::Mine => return Ok(None),
                ClaimState::Succeeded(winner) => return Ok(Some(winner)),
                ClaimState::Waiting(holder) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(format!("claim held by {holder} did not resolve in time"));
                    }
                    debug!(
                        schedule_id = %request.schedule.id,
                        "[COORDINATOR] Waiting for in-flight execution {}", holder
                    );
                    tokio::time::sleep(self.config.claim_poll).await;
                }
            }
        }
    }

    /// Drive the gateway until a verified write or the attempt budget runs out
    async fn actuate_with_retry(
        &self,
        actuation: &ActuationRequest,
        priority: ExecutionPriority,
    ) -> (u32, Result<(), String>) {
        let max_attempts = match priority {
            ExecutionPriority::Normal => self.config.max_attempts,
            ExecutionPriority::Priority => self.config.priority_max_attempts,
        }
        .max(1);
        let mut delay = self.config.base_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.gateway.set_state(actuation).await {
                Ok(response) if response.applied && response.verified => {
                    info!(
                        system_id = %actuation.system_id,
                        request_id = %actuation.request_id,
                        attempt,
                        "✅ [COORDINATOR] Power {} applied",
                        if actuation.target_state { "ON" } else { "OFF" }
                    );
                    return (attempt, Ok(()));
                }
                Ok(_) => {
                    last_error = "verification failed: read-back does not match".to_owned();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                warn!(
                    request_id = %actuation.request_id,
                    attempt,
                    "Actuation failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempt, max_attempts, last_error, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            } else {
                error!(
                    request_id = %actuation.request_id,
                    "❌ [COORDINATOR] Actuation failed after {} attempts: {}",
                    attempt, last_error
                );
            }
        }

        (max_attempts, Err(last_error))
    }

    async fn record_suppressed(&self, request: &ExecutionRequest, request_id: &str, winner: &str) {
        if let Err(e) = self
            .append(
                request,
                request_id,
                AuditAction::DuplicateSuppressed,
                json!({ "handled_by": winner }),
            )
            .await
        {
            warn!(
                request_id,
                "⚠️ [COORDINATOR] Failed to record duplicate suppression: {}", e
            );
        }
    }

    async fn append(
        &self,
        request: &ExecutionRequest,
        request_id: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<TriggerRecord, StoreError> {
        let record = NewTriggerRecord::new(
            request.schedule.system_id.clone(),
            action,
            request.triggered_by,
            self.clock.now(),
        )
        .with_schedule(request.schedule.id.clone())
        .with_request(request_id)
        .with_details(details);
        self.audit.insert_trigger_record(record).await
    }
}

fn lookback(config: &CoordinatorConfig) -> TimeDelta {
    TimeDelta::from_std(config.dedup_lookback).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{InMemoryAuditTrail, InMemoryDeviceStore, ManualClock};
    use crate::traits::DeviceStateStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::Value;

    fn target() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 5, 0).unwrap()
    }

    fn schedule() -> Schedule {
        Schedule {
            id: "sched-1".to_owned(),
            system_id: "sys-1".to_owned(),
            trigger_time: "09:05".to_owned(),
            days_of_week: vec!["Monday".to_owned()],
            target_state: true,
            is_active: true,
            updated_at: None,
        }
    }

    fn request(triggered_by: TriggeredBy) -> ExecutionRequest {
        ExecutionRequest {
            schedule: schedule(),
            target: target(),
            triggered_by,
            priority: ExecutionPriority::Normal,
        }
    }

    fn coordinator(
        store: Arc<dyn DeviceStateStore>,
        audit: Arc<InMemoryAuditTrail>,
    ) -> ExecutionCoordinator {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(target()));
        ExecutionCoordinator::new(
            ActuationGateway::new(store, clock.clone()),
            audit,
            clock,
            CoordinatorConfig::default(),
        )
    }

    fn count(audit: &InMemoryAuditTrail, action: AuditAction) -> usize {
        audit.records().iter().filter(|r| r.action == action).count()
    }

    /// Device store that yields on every call so concurrent callers interleave
    #[derive(Debug, Default)]
    struct YieldingStore {
        inner: InMemoryDeviceStore,
    }

    #[async_trait]
    impl DeviceStateStore for YieldingStore {
        async fn read(&self, system_id: &str) -> Result<Option<Value>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.read(system_id).await
        }

        async fn write(&self, system_id: &str, blob: &Value) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.write(system_id, blob).await
        }
    }

    /// Drops the first `lose` writes, so their read-back fails verification
    #[derive(Debug, Default)]
    struct LossyStore {
        inner: InMemoryDeviceStore,
        lose: Mutex<u32>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl DeviceStateStore for LossyStore {
        async fn read(&self, system_id: &str) -> Result<Option<Value>, StoreError> {
            self.inner.read(system_id).await
        }

        async fn write(&self, system_id: &str, blob: &Value) -> Result<(), StoreError> {
            *self.calls.lock() += 1;
            {
                let mut lose = self.lose.lock();
                if *lose > 0 {
                    *lose -= 1;
                    return Ok(());
                }
            }
            self.inner.write(system_id, blob).await
        }
    }

    #[derive(Debug, Default)]
    struct OfflineStore {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl DeviceStateStore for OfflineStore {
        async fn read(&self, _system_id: &str) -> Result<Option<Value>, StoreError> {
            *self.calls.lock() += 1;
            Err(StoreError::Transport("connection reset".to_owned()))
        }

        async fn write(&self, _system_id: &str, _blob: &Value) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection reset".to_owned()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_execution_succeeds_first_try() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let outcome = coordinator(store.clone(), audit.clone())
            .execute(request(TriggeredBy::Watcher))
            .await;

        assert!(outcome.success);
        assert!(outcome.verified);
        assert!(!outcome.duplicate);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(store.write_count(), 1);

        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, AuditAction::ExecutionAttempted);
        assert_eq!(records[1].action, AuditAction::ExecutionSucceeded);
        assert_eq!(records[1].request_id.as_deref(), Some(outcome.request_id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_executions_actuate_once() {
        let store = Arc::new(YieldingStore::default());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let watcher = coordinator(store.clone(), audit.clone());
        let runner = coordinator(store.clone(), audit.clone());

        let (first, second) = tokio::join!(
            watcher.execute(request(TriggeredBy::Watcher)),
            runner.execute(request(TriggeredBy::Runner)),
        );

        assert!(first.success && second.success);
        assert_eq!(store.inner.write_count(), 1);
        assert_eq!(count(&audit, AuditAction::ExecutionSucceeded), 1);
        assert_eq!(count(&audit, AuditAction::DuplicateSuppressed), 1);

        let (winner, loser) = if first.duplicate { (second, first) } else { (first, second) };
        assert_eq!(winner.attempts, 1);
        assert!(!winner.duplicate);
        assert_eq!(loser.attempts, 0);
        assert!(loser.duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_duplicate_is_suppressed() {
        let store = Arc::new(InMemoryDeviceStore::new());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let coordinator = coordinator(store.clone(), audit.clone());

        let first = coordinator.execute(request(TriggeredBy::Watcher)).await;
        let second = coordinator.execute(request(TriggeredBy::Runner)).await;

        assert!(first.success && !first.duplicate);
        assert!(second.success && second.duplicate);
        assert_eq!(second.attempts, 0);
        assert_eq!(store.write_count(), 1);

        let suppressed = audit
            .records()
            .into_iter()
            .find(|r| r.action == AuditAction::DuplicateSuppressed)
            .unwrap();
        assert_eq!(suppressed.triggered_by, TriggeredBy::Runner);
        assert_eq!(suppressed.details["handled_by"], first.request_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_retried_until_success() {
        let store = Arc::new(LossyStore {
            lose: Mutex::new(2),
            ..LossyStore::default()
        });
        let audit = Arc::new(InMemoryAuditTrail::new());
        let started = tokio::time::Instant::now();

        let outcome = coordinator(store.clone(), audit.clone())
            .execute(request(TriggeredBy::Watcher))
            .await;

        assert!(outcome.success);
        assert!(outcome.verified);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(*store.calls.lock(), 3);
        // 500 ms + 1 s of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
        assert_eq!(count(&audit, AuditAction::ExecutionSucceeded), 1);
        assert_eq!(count(&audit, AuditAction::ExecutionFailed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_once() {
        let store = Arc::new(OfflineStore::default());
        let audit = Arc::new(InMemoryAuditTrail::new());

        let outcome = coordinator(store.clone(), audit.clone())
            .execute(request(TriggeredBy::Runner))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.unwrap().contains("connection reset"));
        assert_eq!(*store.calls.lock(), 3);
        assert_eq!(count(&audit, AuditAction::ExecutionFailed), 1);
        assert_eq!(count(&audit, AuditAction::ExecutionSucceeded), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_gets_more_attempts() {
        let store = Arc::new(OfflineStore::default());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let mut req = request(TriggeredBy::Manual);
        req.priority = ExecutionPriority::Priority;

        let outcome = coordinator(store.clone(), audit).execute(req).await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(*store.calls.lock(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_window_can_be_retried() {
        let audit = Arc::new(InMemoryAuditTrail::new());
        let failed = coordinator(Arc::new(OfflineStore::default()), audit.clone())
            .execute(request(TriggeredBy::Watcher))
            .await;
        assert!(!failed.success);

        let store = Arc::new(InMemoryDeviceStore::new());
        let retried = coordinator(store.clone(), audit.clone())
            .execute(request(TriggeredBy::Runner))
            .await;
        assert!(retried.success);
        assert!(!retried.duplicate);
        assert_eq!(store.write_count(), 1);
    }

    fn record(id: i64, action: AuditAction, request_id: &str, at: DateTime<Utc>) -> TriggerRecord {
        NewTriggerRecord::new("sys-1", action, TriggeredBy::Watcher, at)
            .with_schedule("sched-1")
            .with_request(request_id)
            .into_record(id)
    }

    #[test]
    fn test_resolve_claims() {
        let t = target();
        let ttl = TimeDelta::seconds(180);
        let mine = record(3, AuditAction::ExecutionAttempted, "me", t);

        // Alone
        assert_eq!(
            resolve_claims(std::slice::from_ref(&mine), &mine, t, ttl),
            ClaimState::Mine
        );

        // Earlier live claim blocks
        let other = record(1, AuditAction::ExecutionAttempted, "other", t);
        let records = vec![other.clone(), mine.clone()];
        assert_eq!(
            resolve_claims(&records, &mine, t, ttl),
            ClaimState::Waiting("other".to_owned())
        );

        // ...until it expires
        assert_eq!(
            resolve_claims(&records, &mine, t + TimeDelta::seconds(181), ttl),
            ClaimState::Mine
        );

        // ...or fails
        let failed = record(2, AuditAction::ExecutionFailed, "other", t);
        let records = vec![other.clone(), failed, mine.clone()];
        assert_eq!(resolve_claims(&records, &mine, t, ttl), ClaimState::Mine);

        // ...or succeeds
        let succeeded = record(4, AuditAction::ExecutionSucceeded, "other", t);
        let records = vec![other, mine.clone(), succeeded];
        assert_eq!(
            resolve_claims(&records, &mine, t, ttl),
            ClaimState::Succeeded("other".to_owned())
        );

        // Later claims never block
        let later = record(5, AuditAction::ExecutionAttempted, "later", t);
        let records = vec![mine.clone(), later];
        assert_eq!(resolve_claims(&records, &mine, t, ttl), ClaimState::Mine);
    }
}
