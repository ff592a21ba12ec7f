//! Outbound status records (node → host).

use bitflags::bitflags;

use super::{DecodeError, Payload, Reader, Writer, ids};
use crate::consts::MOTOR_COUNT;
use crate::fault::FaultFlags;
use crate::state::{ControlMode, SystemOperatingState};

bitflags! {
    /// MOTOR_STATUS flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MotorStatusFlags: u16 {
        const ENABLED_1   = 1 << 0;
        const ENABLED_2   = 1 << 1;
        const AT_TARGET_1 = 1 << 2;
        const AT_TARGET_2 = 1 << 3;
        const FAULT_1     = 1 << 4;
        const FAULT_2     = 1 << 5;
        const BRAKE_1     = 1 << 6;
        const BRAKE_2     = 1 << 7;
        /// Home positions have been stored.
        const HOME_SET    = 1 << 8;
        /// Trajectory buffer holds at least one point.
        const TRAJ_ACTIVE = 1 << 9;
    }
}

impl MotorStatusFlags {
    /// Per-actuator flag from a pair of bits.
    #[inline]
    pub fn for_motor(first: Self, second: Self, index: usize) -> Self {
        match index {
            0 => first,
            1 => second,
            _ => Self::empty(),
        }
    }
}

impl Default for MotorStatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Reason code carried by ERROR_LOG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Parameter out of range.
    InvalidParameter = 1,
    /// Not permitted in the current operating state.
    StateRejected = 2,
    /// Command requires a different control mode.
    ModeMismatch = 3,
    /// Unknown id, bad length or reserved bits.
    Malformed = 4,
    /// Trajectory buffer full.
    BufferFull = 5,
}

impl ErrorCode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::InvalidParameter),
            2 => Some(Self::StateRejected),
            3 => Some(Self::ModeMismatch),
            4 => Some(Self::Malformed),
            5 => Some(Self::BufferFull),
            _ => None,
        }
    }
}

/// Typed outbound record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusRecord {
    Heartbeat {
        state: SystemOperatingState,
        mode: ControlMode,
    },
    MotorStatus {
        flags: MotorStatusFlags,
        error_counts: [u16; MOTOR_COUNT],
        uptime_s: u16,
    },
    /// [counts]
    Position([i32; MOTOR_COUNT]),
    /// [RPM]
    Velocity([f32; MOTOR_COUNT]),
    Fault(FaultFlags),
    PidDebug {
        motor: u8,
        p: f32,
        i: f32,
        d: f32,
    },
    /// [A]
    Current([f32; MOTOR_COUNT]),
    /// [°C]
    Temperature([f32; MOTOR_COUNT]),
    BufferStatus {
        len: u8,
        capacity: u8,
        last_seq: u8,
        epoch: u8,
    },
    LimitSwitch(u8),
    ErrorLog {
        code: ErrorCode,
        command_id: u16,
        state: SystemOperatingState,
        count: u16,
    },
    Performance {
        loop_count: u32,
        last_us: u16,
        max_us: u16,
        overruns: u16,
    },
    Pong(u32),
}

impl StatusRecord {
    pub fn id(&self) -> u16 {
        match self {
            Self::Heartbeat { .. } => ids::HEARTBEAT,
            Self::MotorStatus { .. } => ids::MOTOR_STATUS,
            Self::Position(_) => ids::POSITION_REPORT,
            Self::Velocity(_) => ids::VELOCITY_REPORT,
            Self::Fault(_) => ids::FAULT_REPORT,
            Self::PidDebug { .. } => ids::PID_DEBUG,
            Self::Current(_) => ids::CURRENT_REPORT,
            Self::Temperature(_) => ids::TEMPERATURE_REPORT,
            Self::BufferStatus { .. } => ids::BUFFER_STATUS,
            Self::LimitSwitch(_) => ids::LIMIT_SWITCH_STATUS,
            Self::ErrorLog { .. } => ids::ERROR_LOG,
            Self::Performance { .. } => ids::PERFORMANCE_METRICS,
            Self::Pong(_) => ids::PONG,
        }
    }

    pub fn encode(&self) -> Payload {
        let w = Writer::default();
        match *self {
            Self::Heartbeat { state, mode } => w.u8(state as u8).u8(mode as u8),
            Self::MotorStatus {
                flags,
                error_counts,
                uptime_s,
            } => w
                .u16(flags.bits())
                .u16(error_counts[0])
                .u16(error_counts[1])
                .u16(uptime_s),
            Self::Position([a, b]) => w.i32(a).i32(b),
            Self::Velocity([a, b]) | Self::Current([a, b]) | Self::Temperature([a, b]) => {
                w.f32(a).f32(b)
            }
            Self::Fault(flags) => w.u32(flags.bits()),
            Self::PidDebug { motor, p, i, d } => w.u8(motor).f32(p).f32(i).f32(d),
            Self::BufferStatus {
                len,
                capacity,
                last_seq,
                epoch,
            } => w.u8(len).u8(capacity).u8(last_seq).u8(epoch),
            Self::LimitSwitch(flags) => w.u8(flags),
            Self::ErrorLog {
                code,
                command_id,
                state,
                count,
            } => w.u8(code as u8).u16(command_id).u8(state as u8).u16(count),
            Self::Performance {
                loop_count,
                last_us,
                max_us,
                overruns,
            } => w.u32(loop_count).u16(last_us).u16(max_us).u16(overruns),
            Self::Pong(seq) => w.u32(seq),
        }
        .finish()
    }

    /// Host-side decode, used by monitoring tools and tests.
    pub fn decode(id: u16, bytes: &[u8]) -> Result<Self, DecodeError> {
        let rec = match id {
            ids::HEARTBEAT => {
                let mut r = Reader::exact(id, bytes, 2)?;
                let state = SystemOperatingState::from_u8(r.u8())
                    .ok_or(DecodeError::InvalidField { id, field: "state" })?;
                let mode = ControlMode::from_u8(r.u8())
                    .ok_or(DecodeError::InvalidField { id, field: "mode" })?;
                Self::Heartbeat { state, mode }
            }
            ids::MOTOR_STATUS => {
                let mut r = Reader::exact(id, bytes, 8)?;
                let flags = MotorStatusFlags::from_bits(r.u16())
                    .ok_or(DecodeError::ReservedBits { id, field: "flags" })?;
                Self::MotorStatus {
                    flags,
                    error_counts: [r.u16(), r.u16()],
                    uptime_s: r.u16(),
                }
            }
            ids::POSITION_REPORT => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::Position([r.i32(), r.i32()])
            }
            ids::VELOCITY_REPORT => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::Velocity([r.f32("rpm1")?, r.f32("rpm2")?])
            }
            ids::FAULT_REPORT => {
                let mut r = Reader::exact(id, bytes, 4)?;
                let flags = FaultFlags::from_bits(r.u32())
                    .ok_or(DecodeError::ReservedBits { id, field: "faults" })?;
                Self::Fault(flags)
            }
            ids::PID_DEBUG => {
                let mut r = Reader::exact(id, bytes, 13)?;
                Self::PidDebug {
                    motor: r.u8(),
                    p: r.f32("p")?,
                    i: r.f32("i")?,
                    d: r.f32("d")?,
                }
            }
            ids::CURRENT_REPORT => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::Current([r.f32("current1")?, r.f32("current2")?])
            }
            ids::TEMPERATURE_REPORT => {
                let mut r = Reader::exact(id, bytes, 8)?;
                Self::Temperature([r.f32("temp1")?, r.f32("temp2")?])
            }
            ids::BUFFER_STATUS => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Self::BufferStatus {
                    len: r.u8(),
                    capacity: r.u8(),
                    last_seq: r.u8(),
                    epoch: r.u8(),
                }
            }
            ids::LIMIT_SWITCH_STATUS => {
                let mut r = Reader::exact(id, bytes, 1)?;
                Self::LimitSwitch(r.u8())
            }
            ids::ERROR_LOG => {
                let mut r = Reader::exact(id, bytes, 6)?;
                let code = ErrorCode::from_u8(r.u8())
                    .ok_or(DecodeError::InvalidField { id, field: "code" })?;
                let command_id = r.u16();
                let state = SystemOperatingState::from_u8(r.u8())
                    .ok_or(DecodeError::InvalidField { id, field: "state" })?;
                Self::ErrorLog {
                    code,
                    command_id,
                    state,
                    count: r.u16(),
                }
            }
            ids::PERFORMANCE_METRICS => {
                let mut r = Reader::exact(id, bytes, 10)?;
                Self::Performance {
                    loop_count: r.u32(),
                    last_us: r.u16(),
                    max_us: r.u16(),
                    overruns: r.u16(),
                }
            }
            ids::PONG => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Self::Pong(r.u32())
            }
            _ => return Err(DecodeError::UnknownId(id)),
        };
        Ok(rec)
    }
}
