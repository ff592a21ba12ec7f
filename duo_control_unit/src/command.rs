//! Command and telemetry protocol handling.

pub mod dispatcher;
pub mod service;
