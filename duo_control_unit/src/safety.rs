//! Safety supervision: limit, hardware and watchdog checks.

pub mod monitor;
