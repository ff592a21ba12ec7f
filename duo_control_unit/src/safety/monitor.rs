//! Per-tick safety evaluation.
//!
//! [`SafetyMonitor::evaluate`] returns the set of fault conditions that are
//! active *right now*. Latching (sticky bits) and the state transition are
//! the caller's job; the same evaluation also decides whether a pending
//! clear request can be accepted.

use duo_common::config::DriveConfig;
use duo_common::consts::MOTOR_COUNT;
use duo_common::fault::FaultFlags;
use duo_common::state::SystemOperatingState;

/// The rate demanded by an outstanding request may exceed the limit by this
/// factor before the accel-limit bit is raised.
const ACCEL_MARGIN: f32 = 1.05;

/// Inputs sampled by the control loop for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyInputs {
    pub state: SystemOperatingState,
    pub position: [i32; MOTOR_COUNT],
    pub velocity_rpm: [f32; MOTOR_COUNT],
    /// Requested (pre-slew) velocity minus the slewed setpoint, as left by
    /// the previous tick [RPM].
    pub setpoint_lag: [f32; MOTOR_COUNT],
    pub current: [f32; MOTOR_COUNT],
    pub temperature: [f32; MOTOR_COUNT],
    pub encoder_error: [bool; MOTOR_COUNT],
    /// Previous tick exceeded the loop period.
    pub overrun: bool,
    pub now_ms: u64,
    pub last_command_ms: u64,
    /// Runtime acceleration limit [RPM/s].
    pub accel_limit: f32,
    /// Runtime current limit [A].
    pub current_limit: f32,
}

/// Stateful monitor, owned by the control context.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    max_velocity_rpm: f32,
    max_position: i32,
    max_temperature: f32,
    watchdog_timeout_ms: u64,
    overrun_threshold: u32,
    standstill_rpm: f32,
    accel_window_s: f32,
    consecutive_overruns: u32,
}

impl SafetyMonitor {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            max_velocity_rpm: config.limits.max_velocity_rpm,
            max_position: config.limits.max_position_counts,
            max_temperature: config.limits.max_temperature_c,
            watchdog_timeout_ms: u64::from(config.safety.watchdog_timeout_ms),
            overrun_threshold: config.safety.overrun_fault_threshold.max(1),
            standstill_rpm: config.control.standstill_rpm,
            accel_window_s: config.safety.accel_window_ms.max(1) as f32 / 1000.0,
            consecutive_overruns: 0,
        }
    }

    /// Evaluate all checks in order and return the active conditions.
    pub fn evaluate(&mut self, input: &SafetyInputs) -> FaultFlags {
        let mut active = FaultFlags::empty();

        for m in 0..MOTOR_COUNT {
            // Velocity
            if !input.velocity_rpm[m].is_finite()
                || input.velocity_rpm[m].abs() > self.max_velocity_rpm
            {
                active |= FaultFlags::VELOCITY_LIMIT;
            }

            // Acceleration: rate needed to close the outstanding request
            // within the window.
            if self.requested_rate(input.setpoint_lag[m]) > input.accel_limit * ACCEL_MARGIN {
                active |= FaultFlags::ACCEL_LIMIT;
            }

            // Current
            if !input.current[m].is_finite() || input.current[m].abs() > input.current_limit {
                active |= FaultFlags::overcurrent(m);
            }

            // Temperature
            if input.temperature[m] > self.max_temperature {
                active |= FaultFlags::overtemp(m);
            }

            // Encoder / hardware
            if input.encoder_error[m] {
                active |= FaultFlags::encoder_error(m);
            }

            // Position
            if input.position[m].unsigned_abs() > self.max_position.unsigned_abs() {
                active |= FaultFlags::POSITION_LIMIT;
            }
        }

        // Loop overrun: counted every time, faulted only when sustained.
        if input.overrun {
            self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
        } else {
            self.consecutive_overruns = 0;
        }
        if self.consecutive_overruns >= self.overrun_threshold {
            active |= FaultFlags::LOOP_OVERRUN;
        }

        // Command freshness
        if self.watchdog_expired(input.state, input.now_ms, input.last_command_ms) {
            active |= FaultFlags::COMMAND_WATCHDOG;
        }

        active
    }

    /// Watchdog is armed only while actuators may be energised.
    #[inline]
    pub fn watchdog_expired(
        &self,
        state: SystemOperatingState,
        now_ms: u64,
        last_command_ms: u64,
    ) -> bool {
        state.is_energised() && now_ms.saturating_sub(last_command_ms) > self.watchdog_timeout_ms
    }

    /// Rate [RPM/s] at which the setpoint would have to move to close `lag`
    /// within the accel window.
    #[inline]
    pub fn requested_rate(&self, lag: f32) -> f32 {
        if lag.is_finite() {
            lag.abs() / self.accel_window_s
        } else {
            f32::INFINITY
        }
    }

    /// Every actuator below the standstill threshold.
    #[inline]
    pub fn at_standstill(&self, velocity_rpm: &[f32; MOTOR_COUNT]) -> bool {
        velocity_rpm.iter().all(|v| v.abs() < self.standstill_rpm)
    }

    pub fn consecutive_overruns(&self) -> u32 {
        self.consecutive_overruns
    }
}
