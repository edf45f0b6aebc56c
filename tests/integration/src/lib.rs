//! End-to-end scenarios for the Vetline dispatch core
//!
//! This test suite validates:
//! - The full distress lifecycle with live notifications
//! - Race guards on selection, responses and active cases
//! - Push and poll delivery of live locations
//! - Abuse control on distress calls

pub mod test_utils;

#[cfg(test)]
mod dispatch_scenarios;

#[cfg(test)]
mod race_tests;

#[cfg(test)]
mod polling_tests;

#[cfg(test)]
mod rate_limit_tests;
