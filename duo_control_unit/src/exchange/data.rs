//! Plain-data snapshot records. All `Copy`, fixed size, no heap.

use duo_common::config::DriveConfig;
use duo_common::consts::MOTOR_COUNT;
use duo_common::fault::FaultFlags;
use duo_common::state::{ControlMode, SystemOperatingState};

use crate::control::pid::{PidGains, PidTerms};
use static_assertions::assert_impl_all;

// ─── Control → dispatch ─────────────────────────────────────────────

/// PID internals for debug telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidSnapshot {
    pub gains: PidGains,
    pub integral: f32,
    pub previous_error: f32,
    pub filtered_derivative: f32,
    pub terms: PidTerms,
    pub output: f32,
}

/// Sensor and output state of one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActuatorState {
    /// [counts]
    pub position: i32,
    /// Unfiltered [counts/s].
    pub velocity: f32,
    /// Filtered [RPM].
    pub velocity_rpm: f32,
    /// [A]
    pub current: f32,
    /// [°C]
    pub temperature: f32,
    /// Applied duty ∈ [-1, 1].
    pub commanded_duty: f32,
    /// Slewed velocity setpoint fed to the PID [RPM].
    pub velocity_setpoint: f32,
    /// Position the outer loop is tracking [counts].
    pub position_setpoint: i32,
    pub at_target: bool,
    pub enabled: bool,
    pub braking: bool,
    pub encoder_error: bool,
    pub pid: PidSnapshot,
    /// Driver rejections and fault latches involving this actuator.
    pub error_count: u16,
}

/// Tick timing statistics. O(1) update, no allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopStats {
    pub loop_count: u64,
    /// [µs]
    pub last_us: u32,
    pub min_us: u32,
    pub max_us: u32,
    pub sum_us: u64,
    /// Ticks that took longer than the period.
    pub overruns: u64,
    pub consecutive_overruns: u32,
    /// Command snapshots that could not be read within the retry bound.
    pub command_conflicts: u64,
}

impl Default for LoopStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStats {
    pub const fn new() -> Self {
        Self {
            loop_count: 0,
            last_us: 0,
            min_us: u32::MAX,
            max_us: 0,
            sum_us: 0,
            overruns: 0,
            consecutive_overruns: 0,
            command_conflicts: 0,
        }
    }

    /// Record one tick. Returns `true` if it overran `period_us`.
    #[inline]
    pub fn record(&mut self, duration_us: u32, period_us: u32) -> bool {
        self.loop_count += 1;
        self.last_us = duration_us;
        self.min_us = self.min_us.min(duration_us);
        self.max_us = self.max_us.max(duration_us);
        self.sum_us += u64::from(duration_us);
        let overrun = duration_us > period_us;
        if overrun {
            self.overruns += 1;
            self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
        } else {
            self.consecutive_overruns = 0;
        }
        overrun
    }

    /// Average tick duration [µs] (0 if no ticks).
    #[inline]
    pub fn avg_us(&self) -> u32 {
        if self.loop_count == 0 {
            0
        } else {
            (self.sum_us / self.loop_count) as u32
        }
    }
}

/// Trajectory follower state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrajectoryStatus {
    pub active: bool,
    pub epoch: u8,
    pub buffered: u8,
    pub last_seq: u8,
    pub consumed: u32,
}

/// Everything the control context publishes once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlTelemetry {
    pub state: SystemOperatingState,
    pub mode: ControlMode,
    /// Latched (sticky) fault bits.
    pub faults: FaultFlags,
    /// Conditions active on this tick.
    pub active_conditions: FaultFlags,
    pub actuators: [ActuatorState; MOTOR_COUNT],
    pub stats: LoopStats,
    pub trajectory: TrajectoryStatus,
    pub estop_active: bool,
    /// Milliseconds since the control loop started.
    pub uptime_ms: u64,
    /// Last `CommandSet::clear_fault_seq` the control loop acted on.
    pub clear_fault_seq: u32,
    /// Last `CommandSet::reset_position_seq` the control loop acted on.
    pub reset_position_seq: u32,
}

// ─── Dispatch → control ─────────────────────────────────────────────

/// What a CLEAR_FAULT request was issued against. The control loop refuses
/// the clear if a stop or fault latched after the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearScope {
    pub faults: FaultFlags,
    pub estop_triggers: u32,
}

impl ClearScope {
    pub const NONE: Self = Self {
        faults: FaultFlags::empty(),
        estop_triggers: 0,
    };
}

/// Targets, gains and runtime limits written by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandSet {
    pub mode: ControlMode,
    pub enabled: [bool; MOTOR_COUNT],
    /// Brake instead of coasting while disabled.
    pub brake: [bool; MOTOR_COUNT],
    /// [RPM]
    pub target_velocity: [f32; MOTOR_COUNT],
    /// [counts]
    pub target_position: [i32; MOTOR_COUNT],
    pub gains: [PidGains; MOTOR_COUNT],
    /// [RPM/s]
    pub accel_limit: f32,
    /// [A]
    pub current_limit: f32,
    pub home_position: [i32; MOTOR_COUNT],
    pub home_set: bool,
    /// Watchdog reference [ms, control clock].
    pub last_command_ms: u64,
    /// Bumped to request a position reset at the next tick.
    pub reset_position_seq: u32,
    /// Bumped to request a fault clear at the next tick.
    pub clear_fault_seq: u32,
    pub clear_scope: ClearScope,
    /// Current trajectory epoch; points tagged with an older epoch are stale.
    pub trajectory_epoch: u8,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::from_config(&DriveConfig::default())
    }
}

impl CommandSet {
    pub fn from_config(config: &DriveConfig) -> Self {
        let gains = PidGains {
            kp: config.pid.kp,
            ki: config.pid.ki,
            kd: config.pid.kd,
        };
        Self {
            mode: ControlMode::Velocity,
            enabled: [false; MOTOR_COUNT],
            brake: [false; MOTOR_COUNT],
            target_velocity: [0.0; MOTOR_COUNT],
            target_position: [0; MOTOR_COUNT],
            gains: [gains; MOTOR_COUNT],
            accel_limit: config.limits.max_accel_rpm_s,
            current_limit: config.limits.max_current_amps,
            home_position: [0; MOTOR_COUNT],
            home_set: false,
            last_command_ms: 0,
            reset_position_seq: 0,
            clear_fault_seq: 0,
            clear_scope: ClearScope::NONE,
            trajectory_epoch: 0,
        }
    }

    #[inline]
    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }
}

// Both groups travel through `snapshot_channel`.
assert_impl_all!(ControlTelemetry: Copy, Send);
assert_impl_all!(CommandSet: Copy, Send);
