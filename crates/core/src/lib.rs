//! Core functionality for the Vetline dispatch system.
//!
//! This crate provides the fundamental types, errors, configuration,
//! logging setup and distance functions used across the workspace.

pub mod config;
pub mod error;
pub mod geodesy;
pub mod logging;
pub mod types;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{Error, Result};
pub use geodesy::{geodesic_distance_m, haversine_km, GeoPoint};
pub use types::{
    AiAnalysis, CaseOrigin, CaseStatus, Caller, DistressCase, LocationSlot, Party,
    ResponderProfile, Response, ResponseMode, Role, Severity,
};
