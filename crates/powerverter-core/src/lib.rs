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

//! Powerverter schedule engine.
//!
//! Decides when a weekly power schedule is due against an aligned clock and
//! turns each due window into exactly one verified actuation, whichever
//! evaluator (watcher, runner or manual request) gets there first.

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod memory;
pub mod runner;
pub mod traits;
pub mod watcher;

pub use clock::{ClockAlignmentService, ClockStatus, ClockSync, ReferenceInstant, describe_skew};
pub use coordinator::{
    CoordinatorConfig, ExecutionCoordinator, ExecutionOutcome, ExecutionPriority,
    ExecutionRequest,
};
pub use error::{ClockError, GatewayError, StoreError};
pub use gateway::ActuationGateway;
pub use matcher::{DUE_TOLERANCE_SECS, DueCheck, format_countdown, is_due};
pub use runner::{
    DiagnosticsReport, PeriodicRunner, RunReport, RunRequest, ScheduleReport, ScheduleVerdict,
    TimeBreakdown,
};
pub use traits::{AuditTrail, Clock, DeviceStateStore, ScheduleStore, SystemClock, TimeSource};
pub use watcher::{
    AttemptState, ReconcileSummary, ScheduleWatcher, TickOutcome, WatchExit, WatcherConfig,
    WatcherSupervisor,
};
