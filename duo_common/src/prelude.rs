//! Common re-exports.
//!
//! ```rust
//! use duo_common::prelude::*;
//! ```

pub use crate::config::{ConfigError, DriveConfig};
pub use crate::consts::*;
pub use crate::fault::FaultFlags;
pub use crate::hal::{Clock, Direction, FrameTransport, HBridge, PulseCounter, TransportError};
pub use crate::protocol::{
    Broadcast, Command, DecodeError, InboundFrame, Payload, StatusRecord,
};
pub use crate::state::{ControlMode, SystemOperatingState};
