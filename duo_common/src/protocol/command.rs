//! Inbound command records (host → node).

use super::{DecodeError, Payload, Reader, Writer, ids};
use crate::consts::MOTOR_COUNT;
use crate::state::ControlMode;

/// Decoded MOTOR_ENABLE flags byte. Bits 4..=7 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnableFlags {
    pub enable: [bool; MOTOR_COUNT],
    pub brake: [bool; MOTOR_COUNT],
}

impl EnableFlags {
    const RESERVED_MASK: u8 = 0xF0;

    pub fn from_byte(id: u16, raw: u8) -> Result<Self, DecodeError> {
        if raw & Self::RESERVED_MASK != 0 {
            return Err(DecodeError::ReservedBits { id, field: "flags" });
        }
        Ok(Self {
            enable: [raw & 0x01 != 0, raw & 0x02 != 0],
            brake: [raw & 0x04 != 0, raw & 0x08 != 0],
        })
    }

    pub fn to_byte(self) -> u8 {
        (self.enable[0] as u8)
            | (self.enable[1] as u8) << 1
            | (self.brake[0] as u8) << 2
            | (self.brake[1] as u8) << 3
    }

    pub fn any_enabled(&self) -> bool {
        self.enable.iter().any(|&e| e)
    }
}

/// Which actuator(s) a SET_PID_GAINS applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GainSelector {
    Motor1 = 0,
    Motor2 = 1,
    Both = 2,
}

impl GainSelector {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Motor1),
            1 => Some(Self::Motor2),
            2 => Some(Self::Both),
            _ => None,
        }
    }

    /// True if actuator `index` is addressed.
    #[inline]
    pub const fn applies_to(self, index: usize) -> bool {
        matches!(
            (self, index),
            (Self::Both, _) | (Self::Motor1, 0) | (Self::Motor2, 1)
        )
    }
}

/// One trajectory sample: position deltas [counts] relative to the
/// previous point, reached at `timestamp_ms`.
///
/// Layout (8 bytes): `u8 seq, u32 timestamp_ms, i16 delta1, i8 delta2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrajectoryPoint {
    pub seq: u8,
    pub timestamp_ms: u32,
    pub delta1: i16,
    pub delta2: i8,
}

impl TrajectoryPoint {
    pub const LEN: usize = 8;

    #[inline]
    pub fn deltas(&self) -> [i32; MOTOR_COUNT] {
        [i32::from(self.delta1), i32::from(self.delta2)]
    }
}

/// Typed inbound command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SystemReset,
    MotorEnable(EnableFlags),
    /// Target velocities [RPM].
    SetVelocity([f32; MOTOR_COUNT]),
    /// Target positions [counts].
    SetPosition([i32; MOTOR_COUNT]),
    SetPidGains {
        selector: GainSelector,
        kp: f32,
        ki: f32,
        kd: f32,
    },
    EmergencyStop,
    ResetPosition,
    /// [RPM/s]
    SetAccelLimit(f32),
    /// [A]
    SetCurrentLimit(f32),
    ClearFault,
    SetMode(ControlMode),
    TrajectoryPoint(TrajectoryPoint),
    TrajectoryStart,
    TrajectoryStop,
    SetHomePosition([i32; MOTOR_COUNT]),
    GoToHome,
    /// Ask for one status record by id.
    RequestStatus(u16),
    Ping(u32),
}

impl Command {
    pub fn id(&self) -> u16 {
        match self {
            Self::SystemReset => ids::SYSTEM_RESET,
            Self::MotorEnable(_) => ids::MOTOR_ENABLE,
            Self::SetVelocity(_) => ids::SET_VELOCITY,
            Self::SetPosition(_) => ids::SET_POSITION,
            Self::SetPidGains { .. } => ids::SET_PID_GAINS,
            Self::EmergencyStop => ids::EMERGENCY_STOP,
            Self::ResetPosition => ids::RESET_POSITION,
            Self::SetAccelLimit(_) => ids::SET_ACCEL_LIMIT,
            Self::SetCurrentLimit(_) => ids::SET_CURRENT_LIMIT,
            Self::ClearFault => ids::CLEAR_FAULT,
            Self::SetMode(_) => ids::SET_MODE,
            Self::TrajectoryPoint(_) => ids::TRAJECTORY_POINT,
            Self::TrajectoryStart => ids::TRAJECTORY_START,
            Self::TrajectoryStop => ids::TRAJECTORY_STOP,
            Self::SetHomePosition(_) => ids::SET_HOME_POSITION,
            Self::GoToHome => ids::GO_TO_HOME,
            Self::RequestStatus(_) => ids::REQUEST_STATUS,
            Self::Ping(_) => ids::PING,
        }
    }

    pub fn decode(id: u16, bytes: &[u8]) -> Result<Self, DecodeError> {
        let cmd = match id {
            ids::SYSTEM_RESET => empty(id, bytes, Self::SystemReset)?,
            ids::MOTOR_ENABLE => {
                let mut r = Reader::exact(id, bytes, 1)?;
                Self::MotorEnable(EnableFlags::from_byte(id, r.u8())?)
            }
            ids::SET_VELOCITY => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::SetVelocity([r.f32("rpm1")?, r.f32("rpm2")?])
            }
            ids::SET_POSITION => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::SetPosition([r.i32(), r.i32()])
            }
            ids::SET_PID_GAINS => {
                let mut r = Reader::exact(id, bytes, 13)?;
                let selector = GainSelector::from_u8(r.u8()).ok_or(DecodeError::InvalidField {
                    id,
                    field: "selector",
                })?;
                Self::SetPidGains {
                    selector,
                    kp: r.f32("kp")?,
                    ki: r.f32("ki")?,
                    kd: r.f32("kd")?,
                }
            }
            ids::EMERGENCY_STOP => empty(id, bytes, Self::EmergencyStop)?,
            ids::RESET_POSITION => empty(id, bytes, Self::ResetPosition)?,
            ids::SET_ACCEL_LIMIT => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Self::SetAccelLimit(r.f32("accel")?)
            }
            ids::SET_CURRENT_LIMIT => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Self::SetCurrentLimit(r.f32("current")?)
            }
            ids::CLEAR_FAULT => empty(id, bytes, Self::ClearFault)?,
            ids::SET_MODE => {
                let mut r = Reader::exact(id, bytes, 1)?;
                let mode = ControlMode::from_u8(r.u8())
                    .ok_or(DecodeError::InvalidField { id, field: "mode" })?;
                Self::SetMode(mode)
            }
            ids::TRAJECTORY_POINT => {
                let mut r = Reader::exact(id, bytes, TrajectoryPoint::LEN)?;
                Self::TrajectoryPoint(TrajectoryPoint {
                    seq: r.u8(),
                    timestamp_ms: r.u32(),
                    delta1: r.i16(),
                    delta2: r.i8(),
                })
            }
            ids::TRAJECTORY_START => empty(id, bytes, Self::TrajectoryStart)?,
            ids::TRAJECTORY_STOP => empty(id, bytes, Self::TrajectoryStop)?,
            ids::SET_HOME_POSITION => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::SetHomePosition([r.i32(), r.i32()])
            }
            ids::GO_TO_HOME => empty(id, bytes, Self::GoToHome)?,
            ids::REQUEST_STATUS => {
                let mut r = Reader::exact(id, bytes, 2)?;
                let requested = r.u16();
                if !ids::is_status(requested) {
                    return Err(DecodeError::InvalidField {
                        id,
                        field: "status_id",
                    });
                }
                Self::RequestStatus(requested)
            }
            ids::PING => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Self::Ping(r.u32())
            }
            _ => return Err(DecodeError::UnknownId(id)),
        };
        Ok(cmd)
    }

    pub fn encode(&self) -> Payload {
        let w = Writer::default();
        match *self {
            Self::SystemReset
            | Self::EmergencyStop
            | Self::ResetPosition
            | Self::ClearFault
            | Self::TrajectoryStart
            | Self::TrajectoryStop
            | Self::GoToHome => w,
            Self::MotorEnable(flags) => w.u8(flags.to_byte()),
            Self::SetVelocity([a, b]) => w.f32(a).f32(b),
            Self::SetPosition([a, b]) | Self::SetHomePosition([a, b]) => w.i32(a).i32(b),
            Self::SetPidGains {
                selector,
                kp,
                ki,
                kd,
            } => w.u8(selector as u8).f32(kp).f32(ki).f32(kd),
            Self::SetAccelLimit(v) | Self::SetCurrentLimit(v) => w.f32(v),
            Self::SetMode(mode) => w.u8(mode as u8),
            Self::TrajectoryPoint(p) => w
                .u8(p.seq)
                .u32(p.timestamp_ms)
                .i16(p.delta1)
                .i8(p.delta2),
            Self::RequestStatus(id) => w.u16(id),
            Self::Ping(seq) => w.u32(seq),
        }
        .finish()
    }

    /// Emergency stop bypasses every state gate.
    #[inline]
    pub fn is_emergency_stop(&self) -> bool {
        matches!(self, Self::EmergencyStop)
    }
}

fn empty(id: u16, bytes: &[u8], cmd: Command) -> Result<Command, DecodeError> {
    Reader::exact(id, bytes, 0).map(|_| cmd)
}
