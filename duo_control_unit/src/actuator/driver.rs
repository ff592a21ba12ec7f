//! Actuator driver: signed duty → direction + PWM magnitude, current and
//! temperature sensing, and the emergency-stop latch.
//!
//! # Emergency stop
//!
//! [`EmergencyStop`] is a cloneable handle that writes Brake straight to the
//! H-bridge, bypassing [`ActuatorDriver::set_duty`]. It can be triggered
//! from the dispatch context, a signal handler or an interrupt. The normal
//! duty path re-checks the latch after every hardware write, so a duty
//! write racing with a trigger is overwritten with Brake before it returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use duo_common::config::CurrentSenseConfig;
use duo_common::consts::{CURRENT_CALIBRATION_SAMPLES, MOTOR_COUNT, PWM_MAX_DUTY};
use duo_common::hal::{Direction, HBridge};

/// Driver-level errors. None of these touch the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DriverError {
    #[error("invalid actuator index {0}")]
    InvalidActuator(usize),

    #[error("duty {0} outside [-1, 1]")]
    DutyOutOfRange(f32),

    #[error("emergency stop latched")]
    EmergencyStopLatched,

    #[error("actuator {0} must be disabled for current calibration")]
    CalibrationWhileEnabled(usize),
}

// ─── Emergency stop ─────────────────────────────────────────────────

/// Active while `triggers` is ahead of `released`. A release names the
/// trigger count it covers, so a trigger that lands after the count was
/// observed keeps the latch set.
#[derive(Debug, Default)]
struct EstopLatch {
    triggers: AtomicU32,
    released: AtomicU32,
}

/// Non-maskable stop handle. `Clone + Send + Sync`.
#[derive(Clone)]
pub struct EmergencyStop {
    bridge: Arc<dyn HBridge>,
    latch: Arc<EstopLatch>,
}

impl EmergencyStop {
    pub fn new(bridge: Arc<dyn HBridge>) -> Self {
        Self {
            bridge,
            latch: Arc::new(EstopLatch::default()),
        }
    }

    /// Latch and brake every actuator. Idempotent, wait-free.
    #[inline]
    pub fn trigger(&self) {
        self.latch.triggers.fetch_add(1, Ordering::SeqCst);
        for motor in 0..MOTOR_COUNT {
            self.bridge.set_output(motor, Direction::Brake, 0);
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.latch.triggers.load(Ordering::SeqCst) != self.latch.released.load(Ordering::SeqCst)
    }

    /// Total triggers since startup (wrapping).
    #[inline]
    pub fn trigger_count(&self) -> u32 {
        self.latch.triggers.load(Ordering::SeqCst)
    }

    /// Release every trigger up to `observed` (a prior [`trigger_count`]).
    /// Returns `false` if a later trigger keeps the latch set.
    ///
    /// [`trigger_count`]: EmergencyStop::trigger_count
    pub fn release(&self, observed: u32) -> bool {
        self.latch.released.store(observed, Ordering::SeqCst);
        !self.is_active()
    }
}

impl std::fmt::Debug for EmergencyStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyStop")
            .field("active", &self.is_active())
            .field("triggers", &self.trigger_count())
            .finish()
    }
}

// ─── Driver ─────────────────────────────────────────────────────────

/// Observable per-actuator output state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelState {
    pub enabled: bool,
    /// Hold Brake instead of Coast while disabled.
    pub brake_when_disabled: bool,
    pub direction: Direction,
    /// Last applied signed duty ∈ [-1, 1].
    pub duty: f32,
    pub pwm: u16,
    /// Last sensed current [A].
    pub current: f32,
    /// Last sensed driver temperature [°C].
    pub temperature: f32,
    /// `|current|` above the driver's current limit.
    pub overcurrent: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    state: ChannelState,
    /// Raw ADC value at zero current.
    current_offset: f32,
}

/// Dual-channel driver, owned by the control context.
pub struct ActuatorDriver {
    bridge: Arc<dyn HBridge>,
    estop: EmergencyStop,
    channels: [Channel; MOTOR_COUNT],
    amps_per_count: f32,
    current_limit: f32,
}

impl ActuatorDriver {
    pub fn new(
        bridge: Arc<dyn HBridge>,
        estop: EmergencyStop,
        sense: &CurrentSenseConfig,
        current_limit: f32,
    ) -> Self {
        Self {
            bridge,
            estop,
            channels: [Channel::default(); MOTOR_COUNT],
            amps_per_count: sense.amps_per_count(),
            current_limit,
        }
    }

    #[inline]
    fn channel(&mut self, id: usize) -> Result<&mut Channel, DriverError> {
        self.channels
            .get_mut(id)
            .ok_or(DriverError::InvalidActuator(id))
    }

    #[inline]
    fn write(&mut self, id: usize, direction: Direction, pwm: u16, duty: f32) {
        self.bridge.set_output(id, direction, pwm);
        let st = &mut self.channels[id].state;
        st.direction = direction;
        st.pwm = pwm;
        st.duty = duty;
    }

    /// Apply signed duty. Disabled channels are held at Coast (or Brake if
    /// configured); duty 0 on an enabled channel brakes.
    pub fn set_duty(&mut self, id: usize, duty: f32) -> Result<(), DriverError> {
        let enabled = self.channel(id)?.state.enabled;
        if !duty.is_finite() || !(-1.0..=1.0).contains(&duty) {
            return Err(DriverError::DutyOutOfRange(duty));
        }
        if self.estop.is_active() {
            self.write(id, Direction::Brake, 0, 0.0);
            return Err(DriverError::EmergencyStopLatched);
        }

        if !enabled {
            self.hold_disabled(id);
        } else if duty == 0.0 {
            self.write(id, Direction::Brake, 0, 0.0);
        } else {
            let direction = if duty > 0.0 {
                Direction::Forward
            } else {
                Direction::Reverse
            };
            let pwm = (duty.abs() * f32::from(PWM_MAX_DUTY)).round() as u16;
            self.write(id, direction, pwm.min(PWM_MAX_DUTY), duty);
        }

        // A trigger may have landed between the latch check and the write.
        if self.estop.is_active() {
            self.write(id, Direction::Brake, 0, 0.0);
            return Err(DriverError::EmergencyStopLatched);
        }
        Ok(())
    }

    fn hold_disabled(&mut self, id: usize) {
        let direction = if self.channels[id].state.brake_when_disabled || self.estop.is_active() {
            Direction::Brake
        } else {
            Direction::Coast
        };
        self.write(id, direction, 0, 0.0);
    }

    pub fn enable(&mut self, id: usize) -> Result<(), DriverError> {
        self.channel(id)?.state.enabled = true;
        Ok(())
    }

    /// Disable and immediately release the output.
    pub fn disable(&mut self, id: usize) -> Result<(), DriverError> {
        self.channel(id)?.state.enabled = false;
        self.hold_disabled(id);
        Ok(())
    }

    pub fn set_brake_when_disabled(&mut self, id: usize, brake: bool) -> Result<(), DriverError> {
        self.channel(id)?.state.brake_when_disabled = brake;
        Ok(())
    }

    pub fn brake(&mut self, id: usize) -> Result<(), DriverError> {
        self.channel(id)?;
        self.write(id, Direction::Brake, 0, 0.0);
        Ok(())
    }

    pub fn coast(&mut self, id: usize) -> Result<(), DriverError> {
        self.channel(id)?;
        if self.estop.is_active() {
            self.write(id, Direction::Brake, 0, 0.0);
            return Err(DriverError::EmergencyStopLatched);
        }
        self.write(id, Direction::Coast, 0, 0.0);
        Ok(())
    }

    /// Brake all channels through the latch.
    pub fn emergency_stop(&mut self) {
        self.estop.trigger();
        for id in 0..MOTOR_COUNT {
            let st = &mut self.channels[id].state;
            st.direction = Direction::Brake;
            st.pwm = 0;
            st.duty = 0.0;
        }
    }

    /// Stop handle for other contexts.
    pub fn estop_handle(&self) -> EmergencyStop {
        self.estop.clone()
    }

    // ─── Sensing ────────────────────────────────────────────────────

    /// Sample current [A] for one channel.
    pub fn read_current(&mut self, id: usize) -> Result<f32, DriverError> {
        self.channel(id)?;
        let apc = self.amps_per_count;
        let limit = self.current_limit;
        let raw = f32::from(self.bridge.read_current_raw(id));
        let ch = &mut self.channels[id];
        let amps = (raw - ch.current_offset) * apc;
        ch.state.current = amps;
        ch.state.overcurrent = amps.abs() > limit;
        Ok(amps)
    }

    /// Sample driver temperature [°C].
    pub fn read_temperature(&mut self, id: usize) -> Result<f32, DriverError> {
        self.channel(id)?;
        let t = self.bridge.read_temperature(id);
        self.channels[id].state.temperature = t;
        Ok(t)
    }

    /// Sample current and temperature of every channel.
    pub fn sense_all(&mut self) {
        for id in 0..MOTOR_COUNT {
            let _ = self.read_current(id);
            let _ = self.read_temperature(id);
        }
    }

    /// `|last sensed current| > threshold`.
    #[inline]
    pub fn check_overcurrent(&self, id: usize, threshold: f32) -> bool {
        self.channels
            .get(id)
            .is_some_and(|ch| ch.state.current.abs() > threshold)
    }

    /// Average the zero-current ADC reading into the offset. Returns the
    /// new offset in raw counts.
    pub fn calibrate_current_sensor(&mut self, id: usize) -> Result<f32, DriverError> {
        if self.channel(id)?.state.enabled {
            return Err(DriverError::CalibrationWhileEnabled(id));
        }
        let sum: u32 = (0..CURRENT_CALIBRATION_SAMPLES)
            .map(|_| u32::from(self.bridge.read_current_raw(id)))
            .sum();
        let offset = sum as f32 / CURRENT_CALIBRATION_SAMPLES as f32;
        self.channels[id].current_offset = offset;
        Ok(offset)
    }

    pub fn set_current_limit(&mut self, amps: f32) {
        self.current_limit = amps;
    }

    pub fn current_limit(&self) -> f32 {
        self.current_limit
    }

    pub fn state(&self, id: usize) -> Result<ChannelState, DriverError> {
        self.channels
            .get(id)
            .map(|ch| ch.state)
            .ok_or(DriverError::InvalidActuator(id))
    }

    #[inline]
    pub fn is_enabled(&self, id: usize) -> bool {
        self.channels.get(id).is_some_and(|ch| ch.state.enabled)
    }
}
