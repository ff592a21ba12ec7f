//! Operating state and control mode enums.
//!
//! Both use `#[repr(u8)]` so they fit into a single atomic cell and map
//! directly onto the heartbeat wire record.

use serde::{Deserialize, Serialize};

// ─── Operating State ────────────────────────────────────────────────

/// Canonical operating state of the drive node.
///
/// Exactly one value is active at any time. Transitions are owned by the
/// control unit's `SystemStateMachine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemOperatingState {
    /// Boot, before startup has completed.
    Init = 0,
    /// Ready, actuators disabled.
    Idle = 1,
    /// Actuators enabled, holding zero target.
    Enabled = 2,
    /// Closed-loop motion toward a nonzero target.
    Running = 3,
    /// Safety violation latched, outputs forced safe.
    Fault = 4,
    /// Non-maskable stop, outputs braked.
    EmergencyStop = 5,
    /// Moving toward the stored home positions.
    Homing = 6,
    /// Consuming buffered trajectory points.
    Trajectory = 7,
}

impl SystemOperatingState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Idle),
            2 => Some(Self::Enabled),
            3 => Some(Self::Running),
            4 => Some(Self::Fault),
            5 => Some(Self::EmergencyStop),
            6 => Some(Self::Homing),
            7 => Some(Self::Trajectory),
            _ => None,
        }
    }

    /// Fault or EmergencyStop: outputs are forced safe.
    #[inline]
    pub const fn is_safe_stop(self) -> bool {
        matches!(self, Self::Fault | Self::EmergencyStop)
    }

    /// States in which actuators are energised and the watchdog is armed.
    #[inline]
    pub const fn is_energised(self) -> bool {
        matches!(
            self,
            Self::Enabled | Self::Running | Self::Homing | Self::Trajectory
        )
    }
}

impl Default for SystemOperatingState {
    fn default() -> Self {
        Self::Init
    }
}

// ─── Control Mode ───────────────────────────────────────────────────

/// Control law selected for the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlMode {
    /// Velocity setpoint fed directly to the velocity PID.
    Velocity = 0,
    /// Outer position loop producing a velocity setpoint.
    Position = 1,
    /// Interpolated setpoint sequence from the trajectory buffer.
    Trajectory = 2,
    /// Reserved. Accepted on the wire, rejected by `SET_MODE`.
    Torque = 3,
}

impl ControlMode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Velocity),
            1 => Some(Self::Position),
            2 => Some(Self::Trajectory),
            3 => Some(Self::Torque),
            _ => None,
        }
    }
}

impl Default for ControlMode {
    fn default() -> Self {
        Self::Velocity
    }
}
