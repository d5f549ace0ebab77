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

use powerverter_core::{ClockError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<AdapterError> for StoreError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::HttpError(_) => StoreError::Transport(e.to_string()),
            AdapterError::AuthenticationFailed
            | AdapterError::ApiError { .. }
            | AdapterError::InvalidResponse(_)
            | AdapterError::ConfigError(_) => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<AdapterError> for ClockError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::InvalidResponse(_) => ClockError::InvalidPayload(e.to_string()),
            AdapterError::HttpError(_)
            | AdapterError::AuthenticationFailed
            | AdapterError::ApiError { .. }
            | AdapterError::ConfigError(_) => ClockError::Unreachable(e.to_string()),
        }
    }
}
