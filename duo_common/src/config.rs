//! Drive configuration (`DriveConfig`).
//!
//! Loaded from TOML at startup and immutable afterwards. Every field has a
//! `#[serde(default)]` backed by [`crate::consts`], so an empty file yields
//! the firmware defaults. Runtime-mutable limits (acceleration, current) are
//! only *initialised* from here.
//!
//! # TOML Example
//!
//! ```toml
//! [control]
//! loop_frequency_hz = 2000
//!
//! [limits]
//! max_velocity_rpm = 90.0
//!
//! [pid]
//! kp = 0.8
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::*;

/// Error type for configuration loading.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// Read or TOML parse failure.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

// ─── Sections ───────────────────────────────────────────────────────

/// Loop timing and outer-loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop frequency [Hz] (default: 2000).
    pub loop_frequency_hz: u32,
    /// Outer position loop gain [RPM per count].
    pub position_kp: f32,
    /// Position window for `at_target` and homing completion [counts].
    pub position_tolerance_counts: i32,
    /// Velocity window for `at_target` [RPM].
    pub velocity_tolerance_rpm: f32,
    /// Below this speed an actuator is at standstill [RPM].
    pub standstill_rpm: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_frequency_hz: CONTROL_LOOP_FREQ_HZ,
            position_kp: POSITION_KP,
            position_tolerance_counts: POSITION_TOLERANCE_COUNTS,
            velocity_tolerance_rpm: VELOCITY_TOLERANCE_RPM,
            standstill_rpm: STANDSTILL_RPM,
        }
    }
}

/// Physical limits checked by the safety monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_velocity_rpm: f32,
    /// Initial acceleration limit [RPM/s], adjustable at runtime.
    pub max_accel_rpm_s: f32,
    /// Initial current limit [A], adjustable at runtime.
    pub max_current_amps: f32,
    /// Symmetric position limit [counts].
    pub max_position_counts: i32,
    pub max_temperature_c: f32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_velocity_rpm: MAX_VELOCITY_RPM,
            max_accel_rpm_s: MAX_ACCEL_RPM_S,
            max_current_amps: MAX_CURRENT_AMPS,
            max_position_counts: MAX_POSITION_COUNTS,
            max_temperature_c: MAX_TEMPERATURE_C,
        }
    }
}

/// Velocity PID defaults, applied to both actuators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub output_min: f32,
    pub output_max: f32,
    pub integral_max: f32,
    /// Derivative low-pass coefficient α ∈ (0, 1].
    pub derivative_filter: f32,
    pub integral_clamping: bool,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
            output_min: PID_OUTPUT_MIN,
            output_max: PID_OUTPUT_MAX,
            integral_max: PID_INTEGRAL_MAX,
            derivative_filter: PID_DERIVATIVE_FILTER,
            integral_clamping: true,
        }
    }
}

/// Quadrature encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub counts_per_rev: u32,
    /// Low-pass coefficient for the measured velocity, 1.0 = unfiltered.
    pub velocity_filter: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            counts_per_rev: ENCODER_CPR,
            velocity_filter: VELOCITY_FILTER,
        }
    }
}

/// Current sense chain: shunt, amplifier and ADC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentSenseConfig {
    pub shunt_ohms: f32,
    pub amplifier_gain: f32,
    pub adc_vref: f32,
    pub adc_max: u16,
}

impl CurrentSenseConfig {
    /// Amps represented by one ADC count.
    pub fn amps_per_count(&self) -> f32 {
        self.adc_vref / f32::from(self.adc_max) / (self.shunt_ohms * self.amplifier_gain)
    }
}

impl Default for CurrentSenseConfig {
    fn default() -> Self {
        Self {
            shunt_ohms: CURRENT_SENSE_OHMS,
            amplifier_gain: CURRENT_SENSE_GAIN,
            adc_vref: ADC_VREF,
            adc_max: ADC_MAX_VALUE,
        }
    }
}

/// Watchdog and overrun supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub watchdog_timeout_ms: u32,
    /// Consecutive overruns before LOOP_OVERRUN latches.
    pub overrun_fault_threshold: u32,
    /// ACCEL_LIMIT latches when the outstanding velocity request cannot be
    /// slewed to within this window at the acceleration limit.
    pub accel_window_ms: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_ms: WATCHDOG_TIMEOUT_MS,
            overrun_fault_threshold: OVERRUN_FAULT_THRESHOLD,
            accel_window_ms: ACCEL_WINDOW_MS,
        }
    }
}

/// Outbound telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u32,
    /// Node identifier reported in WATCHDOG_ALERT broadcasts.
    pub node_id: u8,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: TELEMETRY_INTERVAL_MS,
            node_id: 1,
        }
    }
}

// ─── Top-Level Config ───────────────────────────────────────────────

/// Top-level drive configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub control: ControlConfig,
    pub limits: LimitsConfig,
    pub pid: PidConfig,
    pub encoder: EncoderConfig,
    pub current_sense: CurrentSenseConfig,
    pub safety: SafetyConfig,
    pub telemetry: TelemetryConfig,
}

impl DriveConfig {
    /// Parse from a TOML string without validating.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Read and parse a TOML file without validating.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// Control period [µs].
    #[inline]
    pub fn period_us(&self) -> u64 {
        1_000_000 / u64::from(self.control.loop_frequency_hz.max(1))
    }

    /// Control period [s].
    #[inline]
    pub fn period_s(&self) -> f32 {
        1.0 / self.control.loop_frequency_hz.max(1) as f32
    }

    /// Validate bounds and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.control;
        if !(CONTROL_LOOP_FREQ_MIN..=CONTROL_LOOP_FREQ_MAX).contains(&c.loop_frequency_hz) {
            return Err(invalid(format!(
                "control.loop_frequency_hz {} out of range [{CONTROL_LOOP_FREQ_MIN}, {CONTROL_LOOP_FREQ_MAX}]",
                c.loop_frequency_hz
            )));
        }
        positive("control.position_kp", c.position_kp)?;
        if c.position_tolerance_counts < 0 {
            return Err(invalid("control.position_tolerance_counts must be >= 0".into()));
        }
        positive("control.velocity_tolerance_rpm", c.velocity_tolerance_rpm)?;
        positive("control.standstill_rpm", c.standstill_rpm)?;

        let l = &self.limits;
        positive("limits.max_velocity_rpm", l.max_velocity_rpm)?;
        positive("limits.max_accel_rpm_s", l.max_accel_rpm_s)?;
        if l.max_accel_rpm_s > ACCEL_LIMIT_CEILING {
            return Err(invalid(format!(
                "limits.max_accel_rpm_s {} exceeds {ACCEL_LIMIT_CEILING}",
                l.max_accel_rpm_s
            )));
        }
        positive("limits.max_current_amps", l.max_current_amps)?;
        if l.max_current_amps > CURRENT_LIMIT_CEILING {
            return Err(invalid(format!(
                "limits.max_current_amps {} exceeds {CURRENT_LIMIT_CEILING}",
                l.max_current_amps
            )));
        }
        if l.max_position_counts <= 0 {
            return Err(invalid("limits.max_position_counts must be > 0".into()));
        }
        positive("limits.max_temperature_c", l.max_temperature_c)?;

        let p = &self.pid;
        for (name, gain) in [("pid.kp", p.kp), ("pid.ki", p.ki), ("pid.kd", p.kd)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(invalid(format!("{name} must be finite and >= 0, got {gain}")));
            }
        }
        if !(p.output_min.is_finite() && p.output_max.is_finite()) || p.output_min >= p.output_max
        {
            return Err(invalid(format!(
                "pid.output_min {} must be < pid.output_max {}",
                p.output_min, p.output_max
            )));
        }
        if p.output_min < PID_OUTPUT_MIN || p.output_max > PID_OUTPUT_MAX {
            return Err(invalid("pid output limits must lie within [-1, 1]".into()));
        }
        positive("pid.integral_max", p.integral_max)?;
        if !(p.derivative_filter > 0.0 && p.derivative_filter <= 1.0) {
            return Err(invalid(format!(
                "pid.derivative_filter {} must be in (0, 1]",
                p.derivative_filter
            )));
        }

        if self.encoder.counts_per_rev == 0 {
            return Err(invalid("encoder.counts_per_rev must be > 0".into()));
        }
        let vf = self.encoder.velocity_filter;
        if !(vf > 0.0 && vf <= 1.0) {
            return Err(invalid(format!("encoder.velocity_filter {vf} must be in (0, 1]")));
        }

        let cs = &self.current_sense;
        positive("current_sense.shunt_ohms", cs.shunt_ohms)?;
        positive("current_sense.amplifier_gain", cs.amplifier_gain)?;
        positive("current_sense.adc_vref", cs.adc_vref)?;
        if cs.adc_max == 0 {
            return Err(invalid("current_sense.adc_max must be > 0".into()));
        }

        let s = &self.safety;
        if !(WATCHDOG_TIMEOUT_MIN_MS..=WATCHDOG_TIMEOUT_MAX_MS).contains(&s.watchdog_timeout_ms) {
            return Err(invalid(format!(
                "safety.watchdog_timeout_ms {} out of range [{WATCHDOG_TIMEOUT_MIN_MS}, {WATCHDOG_TIMEOUT_MAX_MS}]",
                s.watchdog_timeout_ms
            )));
        }
        if s.overrun_fault_threshold == 0 {
            return Err(invalid("safety.overrun_fault_threshold must be >= 1".into()));
        }
        if !(ACCEL_WINDOW_MIN_MS..=ACCEL_WINDOW_MAX_MS).contains(&s.accel_window_ms) {
            return Err(invalid(format!(
                "safety.accel_window_ms {} out of range [{ACCEL_WINDOW_MIN_MS}, {ACCEL_WINDOW_MAX_MS}]",
                s.accel_window_ms
            )));
        }

        if self.telemetry.interval_ms == 0 {
            return Err(invalid("telemetry.interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

fn positive(name: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be finite and > 0, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_firmware_header() {
        let cfg = DriveConfig::default();
        assert_eq!(cfg.control.loop_frequency_hz, 2000);
        assert_eq!(cfg.limits.max_velocity_rpm, 120.0);
        assert_eq!(cfg.limits.max_accel_rpm_s, 1000.0);
        assert_eq!(cfg.limits.max_current_amps, 5.0);
        assert_eq!(cfg.limits.max_position_counts, 1_000_000);
        assert_eq!(cfg.pid.kp, 1.0);
        assert_eq!(cfg.pid.ki, 0.1);
        assert_eq!(cfg.pid.kd, 0.01);
        assert_eq!(cfg.encoder.counts_per_rev, 4096);
        assert_eq!(cfg.period_us(), 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = DriveConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.safety.watchdog_timeout_ms, WATCHDOG_TIMEOUT_MS);
        assert!(cfg.pid.integral_clamping);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = DriveConfig::from_toml_str(
            r#"
[limits]
max_velocity_rpm = 90.0

[pid]
kp = 0.5
"#,
        )
        .unwrap();
        assert_eq!(cfg.limits.max_velocity_rpm, 90.0);
        assert_eq!(cfg.limits.max_current_amps, MAX_CURRENT_AMPS);
        assert_eq!(cfg.pid.kp, 0.5);
        assert_eq!(cfg.pid.ki, DEFAULT_KI);
    }

    #[test]
    fn rejects_out_of_range_frequency() {
        let mut cfg = DriveConfig::default();
        cfg.control.loop_frequency_hz = 50;
        assert!(matches!(cfg.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_negative_gain_and_inverted_limits() {
        let mut cfg = DriveConfig::default();
        cfg.pid.ki = -0.1;
        assert!(cfg.validate().is_err());

        let mut cfg = DriveConfig::default();
        cfg.pid.output_min = 0.5;
        cfg.pid.output_max = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_overrun_threshold() {
        let mut cfg = DriveConfig::default();
        cfg.safety.overrun_fault_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_accel_window() {
        let mut cfg = DriveConfig::default();
        assert_eq!(cfg.safety.accel_window_ms, ACCEL_WINDOW_MS);
        cfg.safety.accel_window_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.safety.accel_window_ms = ACCEL_WINDOW_MAX_MS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn amps_per_count_from_sense_chain() {
        let cs = CurrentSenseConfig::default();
        let expected = 3.3 / 4095.0 / 2.0;
        assert!((cs.amps_per_count() - expected).abs() < 1e-7);
    }

    #[test]
    fn load_missing_file() {
        let result = DriveConfig::load(Path::new("/nonexistent/drive.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn load_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[control\nloop_frequency_hz = ").unwrap();
        let result = DriveConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
