//! H-bridge output stage.

pub mod driver;
