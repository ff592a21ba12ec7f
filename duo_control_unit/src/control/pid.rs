//! Discrete PID controller with clamped-integral anti-windup and a
//! first-order low-pass on the derivative term.
//!
//! Units are caller-defined; the control loop feeds velocity in RPM and
//! receives signed duty in `[output_min, output_max]`.

use duo_common::config::PidConfig;
use duo_common::consts::{
    PID_DERIVATIVE_FILTER, PID_INTEGRAL_MAX, PID_OUTPUT_MAX, PID_OUTPUT_MIN,
};
use thiserror::Error;

/// Rejected PID parameter.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PidError {
    #[error("gain {name} must be finite and >= 0, got {value}")]
    InvalidGain { name: &'static str, value: f32 },

    #[error("output limits must be finite with min < max, got [{min}, {max}]")]
    InvalidLimits { min: f32, max: f32 },

    #[error("integral bound must be finite and > 0, got {0}")]
    InvalidIntegralBound(f32),

    #[error("feedforward must be finite, got {0}")]
    NonFiniteFeedforward(f32),

    #[error("Ziegler-Nichols needs ku > 0 and tu > 0, got ku={ku}, tu={tu}")]
    InvalidTuning { ku: f32, tu: f32 },
}

/// PID gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    /// Gains checked for finiteness and non-negativity.
    pub fn new(kp: f32, ki: f32, kd: f32) -> Result<Self, PidError> {
        for (name, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(PidError::InvalidGain { name, value });
            }
        }
        Ok(Self { kp, ki, kd })
    }

    /// Classic Ziegler–Nichols PID rule from the ultimate gain `ku` and
    /// oscillation period `tu` [s].
    pub fn ziegler_nichols(ku: f32, tu: f32) -> Result<Self, PidError> {
        if !(ku.is_finite() && tu.is_finite() && ku > 0.0 && tu > 0.0) {
            return Err(PidError::InvalidTuning { ku, tu });
        }
        let kp = 0.6 * ku;
        Self::new(kp, 2.0 * kp / tu, kp * tu / 8.0)
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: duo_common::consts::DEFAULT_KP,
            ki: duo_common::consts::DEFAULT_KI,
            kd: duo_common::consts::DEFAULT_KD,
        }
    }
}

/// Per-term contributions of the last positional update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

/// PID controller state and parameters.
///
/// Must be [`reset`](Self::reset) on disable, fault and mode change so no
/// stale integral carries into the next motion.
#[derive(Debug, Clone, Copy)]
pub struct PidController {
    gains: PidGains,
    output_min: f32,
    output_max: f32,
    integral_max: f32,
    /// Derivative low-pass coefficient α.
    alpha: f32,
    integral_clamping: bool,
    enabled: bool,
    feedforward: f32,

    integral: f32,
    previous_error: f32,
    /// Error two updates back (velocity form only).
    previous_error2: f32,
    filtered_derivative: f32,
    output: f32,
    terms: PidTerms,
    update_count: u32,
}

impl PidController {
    /// Controller with the given gains and default limits.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            output_min: PID_OUTPUT_MIN,
            output_max: PID_OUTPUT_MAX,
            integral_max: PID_INTEGRAL_MAX,
            alpha: PID_DERIVATIVE_FILTER,
            integral_clamping: true,
            enabled: true,
            feedforward: 0.0,
            integral: 0.0,
            previous_error: 0.0,
            previous_error2: 0.0,
            filtered_derivative: 0.0,
            output: 0.0,
            terms: PidTerms::default(),
            update_count: 0,
        }
    }

    /// Controller built from validated configuration.
    pub fn from_config(cfg: &PidConfig) -> Result<Self, PidError> {
        let mut pid = Self::new(PidGains::new(cfg.kp, cfg.ki, cfg.kd)?);
        pid.set_limits(cfg.output_min, cfg.output_max)?;
        pid.set_integral_max(cfg.integral_max)?;
        pid.alpha = cfg.derivative_filter.clamp(f32::EPSILON, 1.0);
        pid.integral_clamping = cfg.integral_clamping;
        Ok(pid)
    }

    /// Clear integral, error history, filtered derivative and last output.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.previous_error2 = 0.0;
        self.filtered_derivative = 0.0;
        self.output = 0.0;
        self.terms = PidTerms::default();
    }

    /// Positional-form update. Returns the clamped output.
    ///
    /// Returns 0 and leaves every field untouched when disabled, when
    /// `dt <= 0`, or when any input is non-finite.
    #[inline]
    pub fn update(&mut self, setpoint: f32, measurement: f32, dt: f32) -> f32 {
        if !self.enabled || !(dt > 0.0) || !dt.is_finite() {
            return 0.0;
        }
        let error = setpoint - measurement;
        if !error.is_finite() {
            return 0.0;
        }

        let raw_derivative = (error - self.previous_error) / dt;
        self.filtered_derivative += self.alpha * (raw_derivative - self.filtered_derivative);

        self.integral += error * dt;
        if self.integral_clamping {
            self.integral = self.integral.clamp(-self.integral_max, self.integral_max);
        }

        self.terms = PidTerms {
            p: self.gains.kp * error,
            i: self.gains.ki * self.integral,
            d: self.gains.kd * self.filtered_derivative,
        };
        let raw = self.terms.p + self.terms.i + self.terms.d + self.feedforward;
        // A NaN sum clamps to NaN; fall back to the neutral output.
        let output = if raw.is_finite() {
            raw.clamp(self.output_min, self.output_max)
        } else {
            0.0_f32.clamp(self.output_min, self.output_max)
        };

        self.previous_error2 = self.previous_error;
        self.previous_error = error;
        self.output = output;
        self.update_count = self.update_count.wrapping_add(1);
        output
    }

    /// Velocity (incremental) form. Applies
    /// `Δ = kp·(e−e₁) + ki·e·dt + kd·(e−2e₁+e₂)/dt` to the held output,
    /// clamps, and returns the change actually applied.
    ///
    /// Shares error history with [`update`](Self::update); reset before
    /// switching forms.
    #[inline]
    pub fn update_velocity_form(&mut self, setpoint: f32, measurement: f32, dt: f32) -> f32 {
        if !self.enabled || !(dt > 0.0) || !dt.is_finite() {
            return 0.0;
        }
        let error = setpoint - measurement;
        if !error.is_finite() {
            return 0.0;
        }

        let p = self.gains.kp * (error - self.previous_error);
        let i = self.gains.ki * error * dt;
        let d = self.gains.kd * (error - 2.0 * self.previous_error + self.previous_error2) / dt;
        let delta = p + i + d;
        if !delta.is_finite() {
            return 0.0;
        }

        let next = (self.output + delta).clamp(self.output_min, self.output_max);
        let applied = next - self.output;
        self.terms = PidTerms { p, i, d };
        self.previous_error2 = self.previous_error;
        self.previous_error = error;
        self.output = next;
        self.update_count = self.update_count.wrapping_add(1);
        applied
    }

    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) -> Result<(), PidError> {
        self.gains = PidGains::new(kp, ki, kd)?;
        Ok(())
    }

    /// Install pre-validated gains.
    #[inline]
    pub fn apply_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn set_limits(&mut self, min: f32, max: f32) -> Result<(), PidError> {
        if !(min.is_finite() && max.is_finite()) || min >= max {
            return Err(PidError::InvalidLimits { min, max });
        }
        self.output_min = min;
        self.output_max = max;
        self.output = self.output.clamp(min, max);
        Ok(())
    }

    pub fn set_integral_max(&mut self, bound: f32) -> Result<(), PidError> {
        if !bound.is_finite() || bound <= 0.0 {
            return Err(PidError::InvalidIntegralBound(bound));
        }
        self.integral_max = bound;
        if self.integral_clamping {
            self.integral = self.integral.clamp(-bound, bound);
        }
        Ok(())
    }

    pub fn set_integral_clamping(&mut self, enabled: bool) {
        self.integral_clamping = enabled;
    }

    pub fn set_feedforward(&mut self, value: f32) -> Result<(), PidError> {
        if !value.is_finite() {
            return Err(PidError::NonFiniteFeedforward(value));
        }
        self.feedforward = value;
        Ok(())
    }

    /// Tune with Ziegler–Nichols and install the resulting gains.
    pub fn autotune_ziegler_nichols(&mut self, ku: f32, tu: f32) -> Result<PidGains, PidError> {
        let gains = PidGains::ziegler_nichols(ku, tu)?;
        self.gains = gains;
        self.reset();
        Ok(gains)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    #[inline]
    pub fn limits(&self) -> (f32, f32) {
        (self.output_min, self.output_max)
    }

    #[inline]
    pub fn integral_max(&self) -> f32 {
        self.integral_max
    }

    #[inline]
    pub fn integral(&self) -> f32 {
        self.integral
    }

    #[inline]
    pub fn previous_error(&self) -> f32 {
        self.previous_error
    }

    #[inline]
    pub fn filtered_derivative(&self) -> f32 {
        self.filtered_derivative
    }

    /// Last output (either form).
    #[inline]
    pub fn output(&self) -> f32 {
        self.output
    }

    /// `(p, i, d)` contributions of the last update.
    #[inline]
    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    #[inline]
    pub fn update_count(&self) -> u32 {
        self.update_count
    }
}

impl Default for PidController {
    fn default() -> Self {
        Self::new(PidGains::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.0005; // 2 kHz cycle

    fn p_only(kp: f32) -> PidController {
        PidController::new(PidGains::new(kp, 0.0, 0.0).unwrap())
    }

    #[test]
    fn pure_proportional_matches_clamped_error() {
        let mut pid = p_only(0.01);
        let out = pid.update(50.0, 20.0, DT);
        assert!((out - 0.3).abs() < 1e-6);

        let out = pid.update(500.0, 0.0, DT);
        assert_eq!(out, 1.0);
        let out = pid.update(-500.0, 0.0, DT);
        assert_eq!(out, -1.0);
    }

    #[test]
    fn integral_accumulates_error_times_dt() {
        let mut pid = PidController::new(PidGains::new(0.0, 1.0, 0.0).unwrap());
        for _ in 0..10 {
            pid.update(1.0, 0.0, DT);
        }
        assert!((pid.integral() - 10.0 * DT).abs() < 1e-6);
        assert!((pid.output() - 10.0 * DT).abs() < 1e-6);
    }

    #[test]
    fn integral_is_clamped_when_enabled() {
        let mut pid = PidController::new(PidGains::new(0.0, 0.001, 0.0).unwrap());
        pid.set_integral_max(2.0).unwrap();
        for _ in 0..100 {
            pid.update(100.0, 0.0, 0.01);
        }
        assert_eq!(pid.integral(), 2.0);

        pid.set_integral_clamping(false);
        pid.update(100.0, 0.0, 0.01);
        assert!(pid.integral() > 2.0);
    }

    #[test]
    fn derivative_is_low_pass_filtered() {
        let mut pid = PidController::new(PidGains::new(0.0, 0.0, 1.0).unwrap());
        pid.set_limits(-1e9, 1e9).unwrap();
        pid.update(0.0, 0.0, 1.0);
        // Step of 1.0: raw derivative 1.0, filtered α·1.0.
        let out = pid.update(1.0, 0.0, 1.0);
        assert!((out - PID_DERIVATIVE_FILTER).abs() < 1e-6);
        assert!((pid.filtered_derivative() - PID_DERIVATIVE_FILTER).abs() < 1e-6);
    }

    #[test]
    fn disabled_returns_zero_and_keeps_state() {
        let mut pid = PidController::default();
        pid.update(10.0, 0.0, DT);
        let before = (pid.integral(), pid.previous_error(), pid.filtered_derivative());

        pid.set_enabled(false);
        assert_eq!(pid.update(50.0, 0.0, DT), 0.0);
        assert_eq!(
            (pid.integral(), pid.previous_error(), pid.filtered_derivative()),
            before
        );
        assert!(!pid.is_enabled());
    }

    #[test]
    fn non_positive_dt_is_ignored() {
        let mut pid = PidController::default();
        assert_eq!(pid.update(1.0, 0.0, 0.0), 0.0);
        assert_eq!(pid.update(1.0, 0.0, -1.0), 0.0);
        assert_eq!(pid.update_count(), 0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn nan_measurement_yields_zero() {
        let mut pid = PidController::default();
        assert_eq!(pid.update(1.0, f32::NAN, DT), 0.0);
        assert_eq!(pid.update_count(), 0);
    }

    #[test]
    fn reset_clears_history() {
        let mut pid = PidController::default();
        for _ in 0..5 {
            pid.update(3.0, 1.0, DT);
        }
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.previous_error(), 0.0);
        assert_eq!(pid.filtered_derivative(), 0.0);
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn feedforward_is_added_before_clamp() {
        let mut pid = p_only(0.0);
        pid.set_feedforward(0.25).unwrap();
        assert!((pid.update(0.0, 0.0, DT) - 0.25).abs() < 1e-6);
        pid.set_feedforward(5.0).unwrap();
        assert_eq!(pid.update(0.0, 0.0, DT), 1.0);
        assert!(pid.set_feedforward(f32::INFINITY).is_err());
    }

    #[test]
    fn velocity_form_returns_applied_change() {
        let mut pid = p_only(0.5);
        let d1 = pid.update_velocity_form(1.0, 0.0, DT);
        assert!((d1 - 0.5).abs() < 1e-6);
        // Saturates at 1.0: only 0.5 more can be applied.
        let d2 = pid.update_velocity_form(3.0, 0.0, DT);
        assert!((d2 - 0.5).abs() < 1e-6);
        assert_eq!(pid.output(), 1.0);
    }

    #[test]
    fn limits_and_gains_are_validated() {
        let mut pid = PidController::default();
        assert!(matches!(
            pid.set_limits(1.0, -1.0),
            Err(PidError::InvalidLimits { .. })
        ));
        assert!(matches!(
            pid.set_gains(1.0, -0.1, 0.0),
            Err(PidError::InvalidGain { name: "ki", .. })
        ));
        assert!(pid.set_gains(2.0, 0.0, 0.0).is_ok());
        assert_eq!(pid.gains().kp, 2.0);
    }

    #[test]
    fn ziegler_nichols_rule() {
        let mut pid = PidController::default();
        let g = pid.autotune_ziegler_nichols(2.0, 0.5).unwrap();
        assert!((g.kp - 1.2).abs() < 1e-6);
        assert!((g.ki - 4.8).abs() < 1e-5);
        assert!((g.kd - 0.075).abs() < 1e-6);
        assert_eq!(pid.gains(), g);
        assert!(PidGains::ziegler_nichols(0.0, 1.0).is_err());
        assert!(PidGains::ziegler_nichols(1.0, -1.0).is_err());
    }

    #[test]
    fn from_config_applies_limits() {
        let cfg = PidConfig {
            output_min: -0.5,
            output_max: 0.5,
            ..PidConfig::default()
        };
        let mut pid = PidController::from_config(&cfg).unwrap();
        assert_eq!(pid.limits(), (-0.5, 0.5));
        assert_eq!(pid.update(100.0, 0.0, DT), 0.5);
    }
}
