//! Message identifiers.
//!
//! Ranges: `0x080..=0x091` commands (host → node), `0x100..=0x111` status
//! (node → host), `0x200..=0x202` broadcast.

// ─── Commands ───────────────────────────────────────────────────────

pub const SYSTEM_RESET: u16 = 0x080;
pub const MOTOR_ENABLE: u16 = 0x081;
pub const SET_VELOCITY: u16 = 0x082;
pub const SET_POSITION: u16 = 0x083;
pub const SET_PID_GAINS: u16 = 0x084;
pub const EMERGENCY_STOP: u16 = 0x085;
pub const RESET_POSITION: u16 = 0x086;
pub const SET_ACCEL_LIMIT: u16 = 0x087;
pub const SET_CURRENT_LIMIT: u16 = 0x088;
pub const CLEAR_FAULT: u16 = 0x089;
pub const SET_MODE: u16 = 0x08A;
pub const TRAJECTORY_POINT: u16 = 0x08B;
pub const TRAJECTORY_START: u16 = 0x08C;
pub const TRAJECTORY_STOP: u16 = 0x08D;
pub const SET_HOME_POSITION: u16 = 0x08E;
pub const GO_TO_HOME: u16 = 0x08F;
pub const REQUEST_STATUS: u16 = 0x090;
pub const PING: u16 = 0x091;

// ─── Status ─────────────────────────────────────────────────────────

pub const HEARTBEAT: u16 = 0x100;
pub const MOTOR_STATUS: u16 = 0x101;
pub const POSITION_REPORT: u16 = 0x102;
pub const VELOCITY_REPORT: u16 = 0x103;
pub const FAULT_REPORT: u16 = 0x104;
pub const PID_DEBUG: u16 = 0x105;
pub const CURRENT_REPORT: u16 = 0x106;
pub const TEMPERATURE_REPORT: u16 = 0x107;
pub const BUFFER_STATUS: u16 = 0x108;
pub const LIMIT_SWITCH_STATUS: u16 = 0x109;
pub const ERROR_LOG: u16 = 0x10A;
pub const PERFORMANCE_METRICS: u16 = 0x10B;
pub const PONG: u16 = 0x111;

// ─── Broadcast ──────────────────────────────────────────────────────

pub const GLOBAL_ESTOP: u16 = 0x200;
pub const WATCHDOG_ALERT: u16 = 0x201;
pub const SYNC_PULSE: u16 = 0x202;

#[inline]
pub const fn is_command(id: u16) -> bool {
    id >= SYSTEM_RESET && id <= PING
}

#[inline]
pub const fn is_status(id: u16) -> bool {
    (id >= HEARTBEAT && id <= PERFORMANCE_METRICS) || id == PONG
}

#[inline]
pub const fn is_broadcast(id: u16) -> bool {
    id >= GLOBAL_ESTOP && id <= SYNC_PULSE
}
