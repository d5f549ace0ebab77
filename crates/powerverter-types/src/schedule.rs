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

//! Weekly power schedules and their validation rules.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical weekday names accepted in `days_of_week`, matched case-sensitively.
pub const WEEKDAY_NAMES: [(&str, Weekday); 7] = [
    ("Monday", Weekday::Mon),
    ("Tuesday", Weekday::Tue),
    ("Wednesday", Weekday::Wed),
    ("Thursday", Weekday::Thu),
    ("Friday", Weekday::Fri),
    ("Saturday", Weekday::Sat),
    ("Sunday", Weekday::Sun),
];

/// A weekly trigger that switches an inverter system's power on or off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub system_id: String,

    /// "HH:MM", UTC, 24h, zero padded
    pub trigger_time: String,

    /// Weekday names ("Monday".."Sunday")
    pub days_of_week: Vec<String>,

    /// Power state to apply when the schedule fires
    #[serde(alias = "state")]
    pub target_state: bool,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// Why a schedule can never become due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    InvalidTimeFormat,
    InvalidDayFormat,
    NoDays,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTimeFormat => "invalid_time_format",
            Self::InvalidDayFormat => "invalid_day_format",
            Self::NoDays => "no_days",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid trigger time '{0}', expected HH:MM in 24-hour format")]
    InvalidTimeFormat(String),

    #[error("invalid day '{0}', expected one of Monday..Sunday")]
    InvalidDay(String),

    #[error("schedule has no days selected")]
    NoDays,
}

impl ScheduleError {
    pub fn reason(&self) -> InvalidReason {
        match self {
            Self::InvalidTimeFormat(_) => InvalidReason::InvalidTimeFormat,
            Self::InvalidDay(_) => InvalidReason::InvalidDayFormat,
            Self::NoDays => InvalidReason::NoDays,
        }
    }
}

/// Parsed `HH:MM` trigger time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerTime {
    pub hour: u32,
    pub minute: u32,
}

impl FromStr for TriggerTime {
    type Err = ScheduleError;

    /// Strict parse: exactly `^([01]\d|2[0-3]):([0-5]\d)$`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTimeFormat(s.to_owned());
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let hour = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
        let minute = u32::from(bytes[3] - b'0') * 10 + u32::from(bytes[4] - b'0');
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for TriggerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse a canonical weekday name. Case-sensitive.
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    WEEKDAY_NAMES
        .iter()
        .find(|(canonical, _)| *canonical == name)
        .map(|(_, day)| *day)
}

/// Canonical name for a weekday
pub fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAY_NAMES
        .iter()
        .find(|(_, d)| *d == day)
        .map_or("Unknown", |(name, _)| name)
}

/// Repair a loosely formatted trigger time ("9:5", "09:5", " 9:05") into "HH:MM".
///
/// Values that cannot be read as a valid 24-hour time are rejected rather than guessed.
pub fn normalize_trigger_time(raw: &str) -> Result<String, ScheduleError> {
    let invalid = || ScheduleError::InvalidTimeFormat(raw.to_owned());
    let (hours, minutes) = raw.trim().split_once(':').ok_or_else(invalid)?;

    let parse_part = |part: &str| -> Option<u32> {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };

    let hour = parse_part(hours).ok_or_else(invalid)?;
    let minute = parse_part(minutes).ok_or_else(invalid)?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }

    Ok(TriggerTime { hour, minute }.to_string())
}

/// A single validation finding for a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleIssue {
    pub field: String,
    pub reason: InvalidReason,
    pub message: String,
}

impl Schedule {
    /// Parsed trigger time, or the reason it is unusable
    pub fn trigger(&self) -> Result<TriggerTime, ScheduleError> {
        self.trigger_time.parse()
    }

    /// Parsed weekdays in declaration order, rejecting unknown names and empty sets
    pub fn weekdays(&self) -> Result<Vec<Weekday>, ScheduleError> {
        if self.days_of_week.is_empty() {
            return Err(ScheduleError::NoDays);
        }
        self.days_of_week
            .iter()
            .map(|name| parse_weekday(name).ok_or_else(|| ScheduleError::InvalidDay(name.clone())))
            .collect()
    }

    /// Collect every validation issue (not just the first one)
    pub fn validate(&self) -> Vec<ScheduleIssue> {
        let mut issues = Vec::new();

        if let Err(e) = self.trigger() {
            issues.push(ScheduleIssue {
                field: "trigger_time".to_owned(),
                reason: e.reason(),
                message: e.to_string(),
            });
        }

        if self.days_of_week.is_empty() {
            issues.push(ScheduleIssue {
                field: "days_of_week".to_owned(),
                reason: InvalidReason::NoDays,
                message: ScheduleError::NoDays.to_string(),
            });
        }
        for day in &self.days_of_week {
            if parse_weekday(day).is_none() {
                issues.push(ScheduleIssue {
                    field: "days_of_week".to_owned(),
                    reason: InvalidReason::InvalidDayFormat,
                    message: ScheduleError::InvalidDay(day.clone()).to_string(),
                });
            }
        }

        issues
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Same system, time, days and target state; activity and timestamps are ignored
    pub fn fires_like(&self, other: &Schedule) -> bool {
        self.system_id == other.system_id
            && self.trigger_time == other.trigger_time
            && self.days_of_week == other.days_of_week
            && self.target_state == other.target_state
    }

    /// "ON"/"OFF" label used in logs and audit details
    pub fn state_label(&self) -> &'static str {
        if self.target_state { "ON" } else { "OFF" }
    }
}
