//! Duo Common Library
//!
//! Shared definitions for every crate in the dual-actuator drive workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Numeric limits and firmware defaults
//! - [`config`] - `DriveConfig` TOML configuration and validation
//! - [`state`] - Operating state and control mode enums
//! - [`fault`] - `FaultFlags` bitmask
//! - [`hal`] - Hardware and transport collaborator traits
//! - [`protocol`] - Command / status / broadcast wire catalog
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod fault;
pub mod hal;
pub mod prelude;
pub mod protocol;
pub mod state;
