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

pub mod actuation;
pub mod audit;
pub mod schedule;
pub mod time;

// Re-export common types for convenience
pub use actuation::{ActuationRequest, ActuationResponse};
pub use audit::{AuditAction, NewTriggerRecord, TriggerRecord, TriggeredBy};
pub use schedule::{
    InvalidReason, Schedule, ScheduleError, ScheduleIssue, TriggerTime, WEEKDAY_NAMES,
    normalize_trigger_time, parse_weekday, weekday_name,
};
pub use time::AuthoritativeTime;
