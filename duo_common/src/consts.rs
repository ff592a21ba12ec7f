//! System-wide constants for the drive workspace.
//!
//! Single source of truth for numeric limits and configuration defaults.
//! Imported by all crates; no duplication permitted.

/// Number of actuators driven by one node.
pub const MOTOR_COUNT: usize = 2;

/// Default control loop frequency [Hz].
pub const CONTROL_LOOP_FREQ_HZ: u32 = 2000;
/// Lowest accepted loop frequency [Hz].
pub const CONTROL_LOOP_FREQ_MIN: u32 = 100;
/// Highest accepted loop frequency [Hz].
pub const CONTROL_LOOP_FREQ_MAX: u32 = 20_000;

/// Default velocity limit [RPM].
pub const MAX_VELOCITY_RPM: f32 = 120.0;
/// Default acceleration limit [RPM/s].
pub const MAX_ACCEL_RPM_S: f32 = 1000.0;
/// Default current limit [A].
pub const MAX_CURRENT_AMPS: f32 = 5.0;
/// Default position limit [counts], applied symmetrically.
pub const MAX_POSITION_COUNTS: i32 = 1_000_000;
/// Default temperature limit [°C].
pub const MAX_TEMPERATURE_C: f32 = 80.0;

/// Hard ceiling for a runtime acceleration limit [RPM/s].
pub const ACCEL_LIMIT_CEILING: f32 = 100_000.0;
/// Hard ceiling for a runtime current limit [A].
pub const CURRENT_LIMIT_CEILING: f32 = 50.0;

/// Default proportional gain.
pub const DEFAULT_KP: f32 = 1.0;
/// Default integral gain.
pub const DEFAULT_KI: f32 = 0.1;
/// Default derivative gain.
pub const DEFAULT_KD: f32 = 0.01;

/// PID output bounds (signed duty).
pub const PID_OUTPUT_MIN: f32 = -1.0;
pub const PID_OUTPUT_MAX: f32 = 1.0;
/// Anti-windup integral bound.
pub const PID_INTEGRAL_MAX: f32 = 100.0;
/// Derivative low-pass coefficient α.
pub const PID_DERIVATIVE_FILTER: f32 = 0.1;

/// Outer position loop gain [RPM per count].
pub const POSITION_KP: f32 = 0.05;
/// Position window for `at_target` and homing completion [counts].
pub const POSITION_TOLERANCE_COUNTS: i32 = 10;
/// Velocity window for `at_target` [RPM].
pub const VELOCITY_TOLERANCE_RPM: f32 = 1.0;
/// Velocity below which an actuator counts as stopped [RPM].
pub const STANDSTILL_RPM: f32 = 0.5;

/// Encoder counts per revolution.
pub const ENCODER_CPR: u32 = 4096;
/// Measured-velocity low-pass coefficient.
pub const VELOCITY_FILTER: f32 = 0.1;
/// Hardware pulse counter limit; the counter resets to zero at ±limit.
pub const COUNTER_LIMIT: i16 = i16::MAX;

/// PWM resolution: 10-bit.
pub const PWM_MAX_DUTY: u16 = 1023;
/// PWM carrier frequency [Hz].
pub const PWM_FREQUENCY_HZ: u32 = 20_000;

/// Current sense chain: shunt [Ω], op-amp gain, ADC reference [V], ADC full scale.
pub const CURRENT_SENSE_OHMS: f32 = 0.1;
pub const CURRENT_SENSE_GAIN: f32 = 20.0;
pub const ADC_VREF: f32 = 3.3;
pub const ADC_MAX_VALUE: u16 = 4095;
/// Samples averaged by zero-offset calibration.
pub const CURRENT_CALIBRATION_SAMPLES: u32 = 64;

/// Command watchdog timeout [ms].
pub const WATCHDOG_TIMEOUT_MS: u32 = 500;
pub const WATCHDOG_TIMEOUT_MIN_MS: u32 = 10;
pub const WATCHDOG_TIMEOUT_MAX_MS: u32 = 60_000;

/// Telemetry interval [ms].
pub const TELEMETRY_INTERVAL_MS: u32 = 100;

/// Consecutive overruns before the LOOP_OVERRUN fault latches.
pub const OVERRUN_FAULT_THRESHOLD: u32 = 10;

/// Window within which a velocity request must be reachable at the
/// acceleration limit [ms].
pub const ACCEL_WINDOW_MS: u32 = 500;
pub const ACCEL_WINDOW_MIN_MS: u32 = 10;
pub const ACCEL_WINDOW_MAX_MS: u32 = 10_000;

/// Trajectory ring slots (one slot is kept free by the SPSC ring).
pub const TRAJECTORY_QUEUE_SLOTS: usize = 64;
pub const TRAJECTORY_QUEUE_CAPACITY: usize = TRAJECTORY_QUEUE_SLOTS - 1;

/// Largest encoded record payload [bytes].
pub const MAX_PAYLOAD: usize = 16;

/// Bounded retries for a Context A snapshot read.
pub const RT_READ_RETRIES: u32 = 8;

static_assertions::const_assert!(MOTOR_COUNT == 2);
static_assertions::const_assert!(TRAJECTORY_QUEUE_SLOTS.is_power_of_two());
static_assertions::const_assert!(PWM_MAX_DUTY > 0);
