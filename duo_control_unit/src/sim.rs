//! Simulation hardware: pulse counters, H-bridge, manual clock, a
//! first-order motor plant, and a fully wired single-node assembly.
//!
//! Used by the binary (no real hardware layer) and by every test.

use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

use duo_common::config::DriveConfig;
use duo_common::consts::{COUNTER_LIMIT, MOTOR_COUNT, PWM_MAX_DUTY};
use duo_common::hal::{Clock, Direction, FrameTransport, HBridge, PulseCounter};

use crate::actuator::driver::{ActuatorDriver, EmergencyStop};
use crate::command::dispatcher::ProtocolDispatcher;
use crate::control::trajectory::trajectory_channel;
use crate::cycle::{ControlHardware, ControlLoop, CycleError};
use crate::exchange::SharedControlState;
use crate::sensor::encoder::{CountDirection, EncoderIrq, QuadratureDecoder};
use crate::transport::RecordingTransport;

// ─── Pulse counter ──────────────────────────────────────────────────

/// Bounded edge counter. `pulse` plays the role of the quadrature input
/// and the counter-limit interrupt.
#[derive(Debug, Default)]
pub struct SimCounter {
    raw: AtomicI16,
}

impl SimCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `n` signed edges one at a time, firing the limit handler at
    /// ±`COUNTER_LIMIT`.
    pub fn pulse(&self, n: i32, irq: &EncoderIrq) {
        let (step, direction) = if n >= 0 {
            (1i16, CountDirection::Up)
        } else {
            (-1i16, CountDirection::Down)
        };
        for _ in 0..n.unsigned_abs() {
            let next = self.raw.load(Ordering::Relaxed) + step;
            self.raw.store(next, Ordering::Release);
            if next == COUNTER_LIMIT || next == -COUNTER_LIMIT {
                irq.on_counter_limit(direction, || self.raw.store(0, Ordering::Release));
            }
        }
    }
}

impl PulseCounter for SimCounter {
    #[inline]
    fn read(&self) -> i16 {
        self.raw.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.raw.store(0, Ordering::Release);
    }
}

/// Counter plus its limit handler, with sub-count accumulation for
/// driving a constant rate.
#[derive(Debug)]
pub struct SimEncoder {
    pub counter: Arc<SimCounter>,
    pub irq: EncoderIrq,
    residual: f64,
}

impl SimEncoder {
    pub fn new(counter: Arc<SimCounter>, irq: EncoderIrq) -> Self {
        Self {
            counter,
            irq,
            residual: 0.0,
        }
    }

    /// Emit the whole edges covered by `counts_per_s` over `dt`.
    pub fn advance(&mut self, counts_per_s: f64, dt: f64) {
        self.residual += counts_per_s * dt;
        let whole = self.residual.trunc();
        self.residual -= whole;
        self.pulse(whole as i32);
    }

    pub fn pulse(&self, n: i32) {
        self.counter.pulse(n, &self.irq);
    }
}

// ─── H-bridge ───────────────────────────────────────────────────────

#[derive(Debug)]
struct SimChannel {
    direction: AtomicU8,
    pwm: AtomicU16,
    current_raw: AtomicU16,
    temperature: AtomicU32,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            direction: AtomicU8::new(Direction::Coast as u8),
            pwm: AtomicU16::new(0),
            current_raw: AtomicU16::new(0),
            temperature: AtomicU32::new(25.0f32.to_bits()),
        }
    }
}

/// Lock-free H-bridge model. Outputs are stored, sense values are set by
/// the plant or by tests.
#[derive(Debug, Default)]
pub struct SimBridge {
    channels: [SimChannel; MOTOR_COUNT],
    writes: AtomicU64,
}

impl SimBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied `(direction, pwm)`.
    pub fn output(&self, motor: usize) -> (Direction, u16) {
        self.channels.get(motor).map_or((Direction::Coast, 0), |ch| {
            (
                Direction::from_u8(ch.direction.load(Ordering::Acquire)).unwrap_or_default(),
                ch.pwm.load(Ordering::Acquire),
            )
        })
    }

    /// Signed duty implied by the last output.
    pub fn duty(&self, motor: usize) -> f32 {
        let (direction, pwm) = self.output(motor);
        let magnitude = f32::from(pwm) / f32::from(PWM_MAX_DUTY);
        match direction {
            Direction::Forward => magnitude,
            Direction::Reverse => -magnitude,
            Direction::Brake | Direction::Coast => 0.0,
        }
    }

    pub fn set_current_raw(&self, motor: usize, raw: u16) {
        if let Some(ch) = self.channels.get(motor) {
            ch.current_raw.store(raw, Ordering::Release);
        }
    }

    pub fn set_temperature(&self, motor: usize, celsius: f32) {
        if let Some(ch) = self.channels.get(motor) {
            ch.temperature.store(celsius.to_bits(), Ordering::Release);
        }
    }

    /// Total `set_output` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl HBridge for SimBridge {
    fn set_output(&self, motor: usize, direction: Direction, pwm: u16) {
        if let Some(ch) = self.channels.get(motor) {
            ch.pwm.store(pwm.min(PWM_MAX_DUTY), Ordering::Release);
            ch.direction.store(direction as u8, Ordering::Release);
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn read_current_raw(&self, motor: usize) -> u16 {
        self.channels
            .get(motor)
            .map_or(0, |ch| ch.current_raw.load(Ordering::Acquire))
    }

    fn read_temperature(&self, motor: usize) -> f32 {
        self.channels
            .get(motor)
            .map_or(0.0, |ch| f32::from_bits(ch.temperature.load(Ordering::Acquire)))
    }
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Manually advanced clock. With auto-advance set, every `now_us` call
/// moves time forward by that amount (simulates slow ticks).
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
    auto_advance_us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::AcqRel);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }

    pub fn set_auto_advance_us(&self, us: u64) {
        self.auto_advance_us.store(us, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        let step = self.auto_advance_us.load(Ordering::Acquire);
        self.now_us.fetch_add(step, Ordering::AcqRel)
    }
}

// ─── Plant ──────────────────────────────────────────────────────────

/// First-order motor model per channel: duty drives speed toward
/// `duty · free_speed`; Brake decays fast, Coast slowly.
#[derive(Debug)]
pub struct SimPlant {
    bridge: Arc<SimBridge>,
    encoders: [SimEncoder; MOTOR_COUNT],
    velocity: [f64; MOTOR_COUNT],
    free_speed: f64,
    amps_per_count: f64,
    amps_at_full_duty: f64,
}

impl SimPlant {
    const TAU_DRIVE_S: f64 = 0.05;
    const TAU_BRAKE_S: f64 = 0.01;
    const TAU_COAST_S: f64 = 0.5;
    /// Free-running speed at full duty [RPM].
    const FREE_SPEED_RPM: f64 = 100.0;

    pub fn new(bridge: Arc<SimBridge>, encoders: [SimEncoder; MOTOR_COUNT], config: &DriveConfig) -> Self {
        Self {
            bridge,
            encoders,
            velocity: [0.0; MOTOR_COUNT],
            free_speed: Self::FREE_SPEED_RPM * f64::from(config.encoder.counts_per_rev) / 60.0,
            amps_per_count: f64::from(config.current_sense.amps_per_count()),
            amps_at_full_duty: 1.0,
        }
    }

    /// Advance the model by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        for m in 0..MOTOR_COUNT {
            let (direction, _) = self.bridge.output(m);
            let duty = f64::from(self.bridge.duty(m));
            let (target, tau) = match direction {
                Direction::Forward | Direction::Reverse => (duty * self.free_speed, Self::TAU_DRIVE_S),
                Direction::Brake => (0.0, Self::TAU_BRAKE_S),
                Direction::Coast => (0.0, Self::TAU_COAST_S),
            };
            let v = &mut self.velocity[m];
            *v += (target - *v) * (dt / tau).min(1.0);
            self.encoders[m].advance(*v, dt);

            let amps = duty.abs() * self.amps_at_full_duty;
            let raw = (amps / self.amps_per_count).round().min(f64::from(u16::MAX));
            self.bridge.set_current_raw(m, raw as u16);
        }
    }

    /// Speed of one channel [counts/s].
    pub fn velocity(&self, motor: usize) -> f64 {
        self.velocity.get(motor).copied().unwrap_or(0.0)
    }

    /// Force the speed of one channel (disturbance injection).
    pub fn set_velocity(&mut self, motor: usize, counts_per_s: f64) {
        if let Some(v) = self.velocity.get_mut(motor) {
            *v = counts_per_s;
        }
    }

    pub fn encoder(&mut self, motor: usize) -> Option<&mut SimEncoder> {
        self.encoders.get_mut(motor)
    }
}

// ─── Assembly ───────────────────────────────────────────────────────

/// Both contexts wired to simulation hardware.
pub struct Assembly<T: FrameTransport> {
    pub control: ControlLoop,
    pub dispatcher: ProtocolDispatcher<T>,
    pub bridge: Arc<SimBridge>,
    pub plant: SimPlant,
}

/// Build decoders, driver, shared state, trajectory ring, control loop and
/// dispatcher, then run startup (current calibration, Init → Idle).
pub fn assemble<T: FrameTransport>(
    config: &DriveConfig,
    clock: Arc<dyn Clock>,
    transport: T,
) -> Result<Assembly<T>, CycleError> {
    let bridge = Arc::new(SimBridge::new());
    let estop = EmergencyStop::new(bridge.clone());
    let counters: [Arc<SimCounter>; MOTOR_COUNT] = core::array::from_fn(|_| Arc::new(SimCounter::new()));
    let decoders: [QuadratureDecoder; MOTOR_COUNT] = core::array::from_fn(|m| {
        QuadratureDecoder::new(
            counters[m].clone(),
            config.encoder.counts_per_rev,
            config.encoder.velocity_filter,
        )
    });
    let encoders: [SimEncoder; MOTOR_COUNT] =
        core::array::from_fn(|m| SimEncoder::new(counters[m].clone(), decoders[m].irq_handle()));
    let driver = ActuatorDriver::new(
        bridge.clone(),
        estop.clone(),
        &config.current_sense,
        config.limits.max_current_amps,
    );

    let (control_port, dispatch_port) = SharedControlState::create(config, estop);
    let (producer, follower) = trajectory_channel();
    let hardware = ControlHardware {
        decoders,
        driver,
        clock: clock.clone(),
    };
    let mut control = ControlLoop::new(config, control_port, hardware, follower)?;
    control.startup()?;
    let dispatcher = ProtocolDispatcher::new(config, dispatch_port, transport, producer, clock);
    let plant = SimPlant::new(bridge.clone(), encoders, config);

    Ok(Assembly {
        control,
        dispatcher,
        bridge,
        plant,
    })
}

/// Single-threaded node on a manual clock with a recording transport.
pub struct SimNode {
    pub control: ControlLoop,
    pub dispatcher: ProtocolDispatcher<RecordingTransport>,
    pub observer: SharedControlState,
    pub bridge: Arc<SimBridge>,
    pub plant: SimPlant,
    pub clock: Arc<ManualClock>,
    period_us: u64,
}

impl SimNode {
    pub fn new(config: DriveConfig) -> Result<Self, CycleError> {
        let clock = Arc::new(ManualClock::new());
        let assembly = assemble(&config, clock.clone(), RecordingTransport::new())?;
        let observer = assembly.control.observer();
        Ok(Self {
            period_us: config.period_us(),
            control: assembly.control,
            dispatcher: assembly.dispatcher,
            observer,
            bridge: assembly.bridge,
            plant: assembly.plant,
            clock,
        })
    }

    pub fn period_s(&self) -> f64 {
        self.period_us as f64 / 1e6
    }

    /// Advance time one period and run a tick (plant frozen).
    pub fn tick(&mut self) {
        self.clock.advance_us(self.period_us);
        self.control.tick();
    }

    /// Step the plant, advance time one period and run a tick.
    pub fn step(&mut self) {
        self.plant.step(self.period_s());
        self.tick();
    }

    pub fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Feed a constant encoder rate for one tick, bypassing the plant.
    pub fn drive(&mut self, motor: usize, counts_per_s: f64) {
        let dt = self.period_s();
        if let Some(enc) = self.plant.encoder(motor) {
            enc.advance(counts_per_s, dt);
        }
        self.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_through_limit_handler() {
        let counter = Arc::new(SimCounter::new());
        let dec = QuadratureDecoder::new(counter.clone(), 4096, 1.0);
        let irq = dec.irq_handle();
        counter.pulse(i32::from(COUNTER_LIMIT), &irq);
        assert_eq!(counter.read(), 0);
        assert_eq!(dec.overflow_count(), 1);
    }

    #[test]
    fn bridge_records_output() {
        let b = SimBridge::new();
        b.set_output(1, Direction::Reverse, 2000);
        assert_eq!(b.output(1), (Direction::Reverse, PWM_MAX_DUTY));
        assert_eq!(b.duty(1), -1.0);
        assert_eq!(b.writes(), 1);
        b.set_output(5, Direction::Forward, 1);
        assert_eq!(b.writes(), 1);
    }

    #[test]
    fn manual_clock_auto_advance() {
        let c = ManualClock::new();
        c.advance_ms(2);
        assert_eq!(c.now_us(), 2000);
        c.set_auto_advance_us(10);
        assert_eq!(c.now_us(), 2000);
        assert_eq!(c.now_us(), 2010);
    }

    #[test]
    fn plant_spins_up_under_duty() {
        let node = SimNode::new(DriveConfig::default()).unwrap();
        let mut plant = node.plant;
        node.bridge.set_output(0, Direction::Forward, PWM_MAX_DUTY / 2);
        for _ in 0..2000 {
            plant.step(0.0005);
        }
        let expected = 0.5 * 100.0 * 4096.0 / 60.0;
        assert!((plant.velocity(0) - expected).abs() < expected * 0.05);
        assert_eq!(plant.velocity(1), 0.0);
    }
}
