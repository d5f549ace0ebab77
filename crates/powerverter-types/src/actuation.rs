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

//! Wire shapes exchanged with the actuation gateway.

use serde::{Deserialize, Serialize};

use crate::audit::TriggeredBy;

/// Request to drive a system into a power state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationRequest {
    pub system_id: String,
    pub target_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    pub triggered_by: TriggeredBy,
    /// Caller-generated id for tracing; not used for de-duplication
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationResponse {
    /// The write reached the device-state store
    pub applied: bool,
    /// A read-back confirmed the written power value
    pub verified: bool,
    pub request_id: String,
}

impl ActuationRequest {
    /// Device blob encoding of the target state
    pub fn power_value(&self) -> u8 {
        u8::from(self.target_state)
    }
}
