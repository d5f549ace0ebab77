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

//! Aligns local time with the authoritative time service.
//!
//! Schedules are expressed in UTC and compared against the authoritative
//! clock, not the host clock. The service keeps the last known skew and
//! keeps serving estimates from it while the time source is unreachable.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::{Clock, TimeSource};

/// Result of one synchronization attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockSync {
    /// authoritative - local, in milliseconds
    pub skew_ms: i64,
    pub authoritative_time: Option<DateTime<Utc>>,
    pub is_synced: bool,
}

/// Instant all schedule comparisons are made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceInstant {
    pub instant: DateTime<Utc>,
    /// True when derived from a stale or never-confirmed skew
    pub estimated: bool,
}

impl ReferenceInstant {
    pub fn exact(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            estimated: false,
        }
    }

    pub fn estimated(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            estimated: true,
        }
    }
}

#[derive(Debug, Default)]
struct AlignmentState {
    skew_ms: i64,
    synced: bool,
    last_sync_at: Option<DateTime<Utc>>,
}

/// Snapshot for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ClockStatus {
    pub skew_ms: i64,
    pub is_synced: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub description: String,
}

#[derive(Debug)]
pub struct ClockAlignmentService {
    source: Arc<dyn TimeSource>,
    local: Arc<dyn Clock>,
    state: RwLock<AlignmentState>,
}

impl ClockAlignmentService {
    pub fn new(source: Arc<dyn TimeSource>, local: Arc<dyn Clock>) -> Self {
        Self {
            source,
            local,
            state: RwLock::new(AlignmentState::default()),
        }
    }

    /// Fetch authoritative time once and update the skew estimate.
    ///
    /// Never fails: an unreachable source marks the service unsynced and
    /// keeps the previous skew.
    pub async fn sync(&self) -> ClockSync {
        let sent_at = self.local.now();
        match self.source.authoritative_time().await {
            Ok(authoritative) if authoritative.estimated => {
                let mut state = self.state.write();
                state.synced = false;
                warn!(
                    retained_skew_ms = state.skew_ms,
                    "⚠️ [CLOCK] Time source is itself unsynced, using local clock estimate"
                );
                ClockSync {
                    skew_ms: state.skew_ms,
                    authoritative_time: Some(authoritative.time),
                    is_synced: false,
                }
            }
            Ok(authoritative) => {
                let received_at = self.local.now();
                let midpoint = sent_at + (received_at - sent_at) / 2;
                let skew_ms = (authoritative.time - midpoint).num_milliseconds();

                let mut state = self.state.write();
                state.skew_ms = skew_ms;
                state.synced = true;
                state.last_sync_at = Some(received_at);

                debug!(
                    skew_ms,
                    timezone = %authoritative.timezone,
                    "🕐 [CLOCK] Synchronized with authoritative time"
                );
                ClockSync {
                    skew_ms,
                    authoritative_time: Some(authoritative.time),
                    is_synced: true,
                }
            }
            Err(e) => {
                let mut state = self.state.write();
                state.synced = false;
                warn!(
                    retained_skew_ms = state.skew_ms,
                    "⚠️ [CLOCK] Time sync failed, using local clock estimate: {}", e
                );
                ClockSync {
                    skew_ms: state.skew_ms,
                    authoritative_time: None,
                    is_synced: false,
                }
            }
        }
    }

    /// Local time corrected by the current skew estimate
    pub fn reference_instant(&self) -> ReferenceInstant {
        let state = self.state.read();
        ReferenceInstant {
            instant: self.local.now() + chrono::TimeDelta::milliseconds(state.skew_ms),
            estimated: !state.synced,
        }
    }

    pub fn skew_ms(&self) -> i64 {
        self.state.read().skew_ms
    }

    pub fn is_synced(&self) -> bool {
        self.state.read().synced
    }

    pub fn status(&self) -> ClockStatus {
        let state = self.state.read();
        ClockStatus {
            skew_ms: state.skew_ms,
            is_synced: state.synced,
            last_sync_at: state.last_sync_at,
            description: describe_skew(state.skew_ms),
        }
    }

    /// Re-sync on a fixed cadence until `cancel` flips to true or its sender drops
    pub fn spawn_resync(
        self: Arc<Self>,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "🕐 [CLOCK] Re-sync loop started (every {}s)",
                interval.as_secs()
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sync().await;
                    }
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("🕐 [CLOCK] Re-sync loop stopped");
        })
    }
}

impl Clock for ClockAlignmentService {
    fn now(&self) -> DateTime<Utc> {
        self.reference_instant().instant
    }
}

/// Human readable description of a skew, from the local clock's point of view
#[expect(
    clippy::integer_division,
    reason = "Splitting whole seconds into display units"
)]
pub fn describe_skew(skew_ms: i64) -> String {
    let total_secs = skew_ms.abs() / 1000;
    if total_secs < 1 {
        return "in sync with the server".to_owned();
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let unit = |value: i64, name: &str| {
        if value == 1 {
            format!("1 {name}")
        } else {
            format!("{value} {name}s")
        }
    };

    let amount = if hours > 0 {
        if minutes > 0 {
            format!("{} and {}", unit(hours, "hour"), unit(minutes, "minute"))
        } else {
            unit(hours, "hour")
        }
    } else if minutes > 0 {
        if seconds > 0 {
            format!("{} and {}", unit(minutes, "minute"), unit(seconds, "second"))
        } else {
            unit(minutes, "minute")
        }
    } else {
        unit(seconds, "second")
    };

    // Positive skew: the server is ahead, so the local clock lags behind it
    if skew_ms > 0 {
        format!("behind server time by {amount}")
    } else {
        format!("ahead of server time by {amount}")
    }
}
