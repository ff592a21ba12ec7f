//! Acceleration (slew) limiting of the commanded velocity setpoint.

/// Rate-limited setpoint follower.
///
/// `step` moves the held value toward the request by at most
/// `max_rate · dt` and records the rate actually applied. What remains
/// between the request and [`SlewLimiter::value`] is the lag the safety
/// monitor checks against the acceleration limit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlewLimiter {
    value: f32,
    rate: f32,
}

impl SlewLimiter {
    pub const fn new(initial: f32) -> Self {
        Self {
            value: initial,
            rate: 0.0,
        }
    }

    /// Advance toward `target`. Non-finite or non-positive `max_rate`
    /// freezes the setpoint.
    #[inline]
    pub fn step(&mut self, target: f32, max_rate: f32, dt: f32) -> f32 {
        if !(dt > 0.0) || !target.is_finite() || !(max_rate > 0.0) || !max_rate.is_finite() {
            self.rate = 0.0;
            return self.value;
        }
        let max_step = max_rate * dt;
        let next = self.value + (target - self.value).clamp(-max_step, max_step);
        self.rate = (next - self.value) / dt;
        self.value = next;
        next
    }

    /// Jump to `value` with zero rate (used after a stop).
    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.value = value;
        self.rate = 0.0;
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Rate applied by the last `step` [units/s].
    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }
}
