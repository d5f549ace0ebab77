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

//! HTTP backends for the schedule engine: the realtime device-state
//! database and a remote authoritative time source.

pub mod errors;
pub mod realtime_db;
pub mod time_client;

pub use errors::{AdapterError, AdapterResult};
pub use realtime_db::RealtimeDbClient;
pub use time_client::HttpTimeClient;
