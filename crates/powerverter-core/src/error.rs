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

use thiserror::Error;

/// Failures talking to a schedule, audit or device-state backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Device store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid actuation request: {0}")]
    InvalidRequest(String),
}

/// Failures fetching authoritative time; never escape `ClockAlignmentService::sync`
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Time source unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid time payload: {0}")]
    InvalidPayload(String),
}
