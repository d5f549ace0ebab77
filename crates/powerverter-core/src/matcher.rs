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

//! Decides whether a schedule is due at a reference instant.
//!
//! A schedule fires inside a symmetric window of [`DUE_TOLERANCE_SECS`]
//! around its weekly target instant. All arithmetic is done in UTC with
//! calendar dates, so midnight and week rollovers need no special casing.

use chrono::{DateTime, Datelike, Days, TimeDelta, Utc};
use powerverter_types::{InvalidReason, Schedule};
use serde::Serialize;

use crate::clock::ReferenceInstant;

/// Half-width of the due window, in seconds
pub const DUE_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueCheck {
    pub due: bool,
    /// Signed whole seconds from the reference to the target.
    /// Negative only inside the window after the target; `None` when invalid.
    pub seconds_to_next: Option<i64>,
    pub target: Option<DateTime<Utc>>,
    pub estimated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

impl DueCheck {
    fn invalid(reason: InvalidReason, estimated: bool) -> Self {
        Self {
            due: false,
            seconds_to_next: None,
            target: None,
            estimated,
            reason: Some(reason),
        }
    }
}

/// Evaluate `schedule` against `reference`. Pure; never fails.
pub fn is_due(schedule: &Schedule, reference: &ReferenceInstant) -> DueCheck {
    let trigger = match schedule.trigger() {
        Ok(trigger) => trigger,
        Err(e) => return DueCheck::invalid(e.reason(), reference.estimated),
    };
    let weekdays = match schedule.weekdays() {
        Ok(days) => days,
        Err(e) => return DueCheck::invalid(e.reason(), reference.estimated),
    };

    let window_start = reference.instant - TimeDelta::seconds(DUE_TOLERANCE_SECS);
    let first_date = window_start.date_naive();

    // Eight days cover the case where today's occurrence already passed
    let target = (0..=7_u64).find_map(|offset| {
        let date = first_date.checked_add_days(Days::new(offset))?;
        if !weekdays.contains(&date.weekday()) {
            return None;
        }
        let candidate = date
            .and_hms_opt(trigger.hour, trigger.minute, 0)?
            .and_utc();
        (candidate >= window_start).then_some(candidate)
    });

    match target {
        Some(target) => {
            let delta = target - reference.instant;
            DueCheck {
                due: delta.num_milliseconds().abs() <= DUE_TOLERANCE_SECS * 1000,
                seconds_to_next: Some(delta.num_seconds()),
                target: Some(target),
                estimated: reference.estimated,
                reason: None,
            }
        }
        // Only reachable at the edge of the representable calendar
        None => DueCheck {
            due: false,
            seconds_to_next: None,
            target: None,
            estimated: reference.estimated,
            reason: None,
        },
    }
}

/// Countdown text for status displays
#[expect(
    clippy::integer_division,
    reason = "Splitting whole seconds into display units"
)]
pub fn format_countdown(seconds_to_next: i64) -> String {
    if seconds_to_next <= 0 {
        return "Triggering...".to_owned();
    }
    if seconds_to_next < 60 {
        return "Triggering soon".to_owned();
    }

    let days = seconds_to_next / 86_400;
    let hours = (seconds_to_next % 86_400) / 3600;
    let minutes = (seconds_to_next % 3600) / 60;

    if days > 0 {
        format!("in {days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("in {hours}h {minutes}m")
    } else {
        format!("in {minutes}m")
    }
}
