//! Core types: errors, configuration, presentation units.

pub mod config;
pub mod errors;
pub mod units;
