//! Cross-context state exchange.
//!
//! Two single-writer field groups, each published through a versioned
//! snapshot cell:
//!
//! | Group               | Writer   | Reader   | Contents                          |
//! |---------------------|----------|----------|-----------------------------------|
//! | [`ControlTelemetry`]| control  | dispatch | sensors, outputs, stats, state    |
//! | [`CommandSet`]      | dispatch | control  | targets, gains, limits, requests  |
//!
//! Operating state, fault bits and the emergency-stop latch are atomics in
//! [`SharedCore`], writable by either side.

pub mod data;
pub mod shared;

pub use data::{
    ActuatorState, ClearScope, CommandSet, ControlTelemetry, LoopStats, PidSnapshot, TrajectoryStatus,
};
pub use shared::{
    ClearTicket, ControlPort, ControlSnapshot, DispatchPort, FaultLatch, SharedControlState, SharedCore,
};
