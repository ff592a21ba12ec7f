//! Fixed-rate control loop (Context A).
//!
//! ## RT Setup
//! 1. Pre-allocate all loop state (zero heap in the tick).
//! 2. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 3. Prefault stack pages.
//! 4. `sched_setaffinity`: pin to the configured CPU core.
//! 5. `sched_setscheduler(SCHED_FIFO, prio)`: RT priority.
//!
//! ## Tick
//! commands → sensors → safety → clear → outputs → publish → timing.
//!
//! An overrun is counted and fed to the safety monitor on the next tick;
//! the overrunning tick's output is still applied. The tick never blocks,
//! allocates or logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use duo_common::config::DriveConfig;
use duo_common::consts::MOTOR_COUNT;
use duo_common::fault::FaultFlags;
use duo_common::hal::{Clock, Direction};
use duo_common::state::{ControlMode, SystemOperatingState};

use crate::actuator::driver::{ActuatorDriver, DriverError};
use crate::control::pid::{PidController, PidError, PidGains};
use crate::control::slew::SlewLimiter;
use crate::control::trajectory::TrajectoryFollower;
use crate::exchange::{
    ClearScope, CommandSet, ControlPort, ControlTelemetry, PidSnapshot, SharedControlState,
};
use crate::safety::monitor::{SafetyInputs, SafetyMonitor};
use crate::sensor::encoder::QuadratureDecoder;
use crate::state::machine::{SystemEvent, TransitionResult};

/// Errors during setup. The tick itself is infallible.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    #[error("controller setup: {0}")]
    Pid(#[from] PidError),

    #[error("driver setup: {0}")]
    Driver(#[from] DriverError),

    #[error("startup rejected: {0}")]
    Startup(&'static str),
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch 256 KiB of stack so the tick never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xA5) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup sequence. Call on the control thread before [`ControlLoop::run`].
/// Without the `rt` feature every step except stack prefault is a no-op.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Control loop ───────────────────────────────────────────────────

/// Values last taken over from the command group.
#[derive(Debug, Clone, Copy)]
struct Applied {
    gains: [PidGains; MOTOR_COUNT],
    brake: [bool; MOTOR_COUNT],
    current_limit: f32,
    accel_limit: f32,
    reset_position_seq: u32,
    clear_fault_seq: u32,
}

/// Hardware owned by the control context.
pub struct ControlHardware {
    pub decoders: [QuadratureDecoder; MOTOR_COUNT],
    pub driver: ActuatorDriver,
    pub clock: Arc<dyn Clock>,
}

/// The fixed-rate scheduler. Owns every leaf component; all state is
/// allocated in [`ControlLoop::new`].
pub struct ControlLoop {
    port: ControlPort,
    decoders: [QuadratureDecoder; MOTOR_COUNT],
    driver: ActuatorDriver,
    clock: Arc<dyn Clock>,
    pids: [PidController; MOTOR_COUNT],
    slews: [SlewLimiter; MOTOR_COUNT],
    monitor: SafetyMonitor,
    trajectory: TrajectoryFollower,
    telemetry: ControlTelemetry,
    applied: Applied,
    /// Position held in Running/Trajectory mode once a trajectory ends.
    hold_position: [i32; MOTOR_COUNT],
    /// Pre-slew velocity requested on the last tick [RPM].
    requested_velocity: [f32; MOTOR_COUNT],
    previous_state: SystemOperatingState,
    previous_faults: FaultFlags,
    clear_pending: bool,
    last_overrun: bool,
    start_us: u64,
    period_us: u32,
    dt: f32,
    max_velocity_rpm: f32,
    position_kp: f32,
    position_tolerance: i32,
    velocity_tolerance: f32,
}

impl ControlLoop {
    pub fn new(
        config: &DriveConfig,
        port: ControlPort,
        hardware: ControlHardware,
        trajectory: TrajectoryFollower,
    ) -> Result<Self, CycleError> {
        let pid = PidController::from_config(&config.pid)?;
        let commands = CommandSet::from_config(config);
        let start_us = hardware.clock.now_us();
        Ok(Self {
            port,
            decoders: hardware.decoders,
            driver: hardware.driver,
            clock: hardware.clock,
            pids: [pid; MOTOR_COUNT],
            slews: [SlewLimiter::new(0.0); MOTOR_COUNT],
            monitor: SafetyMonitor::new(config),
            trajectory,
            telemetry: ControlTelemetry::default(),
            applied: Applied {
                gains: commands.gains,
                brake: commands.brake,
                current_limit: commands.current_limit,
                accel_limit: commands.accel_limit,
                reset_position_seq: commands.reset_position_seq,
                clear_fault_seq: commands.clear_fault_seq,
            },
            hold_position: [0; MOTOR_COUNT],
            requested_velocity: [0.0; MOTOR_COUNT],
            previous_state: SystemOperatingState::Init,
            previous_faults: FaultFlags::empty(),
            clear_pending: false,
            last_overrun: false,
            start_us,
            period_us: config.period_us() as u32,
            dt: config.period_s(),
            max_velocity_rpm: config.limits.max_velocity_rpm,
            position_kp: config.control.position_kp,
            position_tolerance: config.control.position_tolerance_counts,
            velocity_tolerance: config.control.velocity_tolerance_rpm,
        })
    }

    /// Calibrate current sensors with outputs off, then Init → Idle.
    pub fn startup(&mut self) -> Result<(), CycleError> {
        for m in 0..MOTOR_COUNT {
            self.driver.disable(m)?;
            self.driver.calibrate_current_sensor(m)?;
        }
        match self.port.core().machine.handle_event(SystemEvent::StartupComplete) {
            TransitionResult::Ok(_) => {
                self.previous_state = SystemOperatingState::Idle;
                Ok(())
            }
            TransitionResult::Rejected(reason) => Err(CycleError::Startup(reason)),
        }
    }

    /// Observer over the shared state this loop publishes to.
    pub fn observer(&self) -> SharedControlState {
        self.port.observer()
    }

    /// Loop period [µs].
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Telemetry published by the last tick.
    pub fn telemetry(&self) -> &ControlTelemetry {
        &self.telemetry
    }

    pub fn decoder(&self, id: usize) -> Option<&QuadratureDecoder> {
        self.decoders.get(id)
    }

    pub fn decoder_mut(&mut self, id: usize) -> Option<&mut QuadratureDecoder> {
        self.decoders.get_mut(id)
    }

    pub fn pid(&self, id: usize) -> Option<&PidController> {
        self.pids.get(id)
    }

    /// Execute one tick.
    pub fn tick(&mut self) {
        let start = self.clock.now_us();
        let core_estop = self.port.core().estop().is_active();

        // ── Commands ──
        let (cmd, conflict) = self.port.read_commands();
        if conflict {
            self.telemetry.stats.command_conflicts += 1;
        }
        self.take_requests(&cmd);

        // ── Sensors ──
        let dt = self.dt;
        for d in self.decoders.iter_mut() {
            d.update_velocity(dt);
        }
        self.driver.sense_all();
        let position: [i32; MOTOR_COUNT] = core::array::from_fn(|m| self.decoders[m].sampled_position());
        let rpm: [f32; MOTOR_COUNT] = core::array::from_fn(|m| self.decoders[m].velocity_rpm());
        // Limits are checked on the unfiltered measurement.
        let raw_rpm: [f32; MOTOR_COUNT] = core::array::from_fn(|m| {
            let d = &self.decoders[m];
            d.counts_per_sec_to_rpm(d.velocity())
        });

        // ── Safety ──
        if core_estop && self.port.core().state() != SystemOperatingState::EmergencyStop {
            self.port.core().machine.handle_event(SystemEvent::EmergencyStop);
        }
        let inputs = SafetyInputs {
            state: self.port.core().state(),
            position,
            velocity_rpm: raw_rpm,
            setpoint_lag: core::array::from_fn(|m| {
                self.requested_velocity[m] - self.slews[m].value()
            }),
            current: core::array::from_fn(|m| self.driver.state(m).map_or(0.0, |s| s.current)),
            temperature: core::array::from_fn(|m| {
                self.driver.state(m).map_or(0.0, |s| s.temperature)
            }),
            encoder_error: self.decoders.each_ref().map(|d| d.has_error()),
            overrun: self.last_overrun,
            now_ms: start / 1000,
            last_command_ms: cmd.last_command_ms,
            accel_limit: self.applied.accel_limit,
            current_limit: cmd.current_limit,
        };
        let active = self.monitor.evaluate(&inputs);
        if !active.is_empty() {
            self.port.core().raise_fault(active);
        }
        if self.clear_pending {
            self.clear_pending = false;
            self.try_clear(active, &raw_rpm, cmd.clear_scope);
        }

        // ── Outputs ──
        self.sync_outputs(&cmd);
        let state = self.port.core().state();
        self.on_state_change(state, &position);
        let targets = self.run_control(state, &cmd, &position, &rpm);
        self.applied.accel_limit = cmd.accel_limit;

        // ── Publish ──
        self.fill_telemetry(state, &cmd, active, &position, &targets, start);
        self.port.publish(&self.telemetry);
        self.previous_state = state;

        // ── Timing ──
        let end = self.clock.now_us();
        let duration = end.saturating_sub(start).min(u64::from(u32::MAX)) as u32;
        self.last_overrun = self.telemetry.stats.record(duration, self.period_us);
    }

    /// Take over sequence-numbered requests and configuration changes.
    fn take_requests(&mut self, cmd: &CommandSet) {
        if cmd.reset_position_seq != self.applied.reset_position_seq {
            self.applied.reset_position_seq = cmd.reset_position_seq;
            for d in self.decoders.iter_mut() {
                d.reset_position();
            }
            for p in self.pids.iter_mut() {
                p.reset();
            }
            self.hold_position = [0; MOTOR_COUNT];
        }
        if cmd.clear_fault_seq != self.applied.clear_fault_seq {
            self.applied.clear_fault_seq = cmd.clear_fault_seq;
            // Hardware re-asserts the flag if the condition persists.
            for d in self.decoders.iter() {
                d.clear_error();
            }
            self.clear_pending = true;
        }
        for m in 0..MOTOR_COUNT {
            if cmd.gains[m] != self.applied.gains[m] {
                self.pids[m].apply_gains(cmd.gains[m]);
                self.applied.gains[m] = cmd.gains[m];
            }
            if cmd.brake[m] != self.applied.brake[m] {
                let _ = self.driver.set_brake_when_disabled(m, cmd.brake[m]);
                self.applied.brake[m] = cmd.brake[m];
            }
        }
        if cmd.current_limit != self.applied.current_limit {
            self.driver.set_current_limit(cmd.current_limit);
            self.applied.current_limit = cmd.current_limit;
        }
    }

    /// Accept a pending clear if nothing is active and nothing latched since
    /// the request. EmergencyStop also needs every actuator at standstill.
    fn try_clear(&mut self, active: FaultFlags, rpm: &[f32; MOTOR_COUNT], scope: ClearScope) -> bool {
        let core = self.port.core();
        if !active.is_empty() {
            return false;
        }
        let Some(ticket) = core.begin_clear(scope) else {
            return false;
        };
        if ticket.state() == SystemOperatingState::EmergencyStop && !self.monitor.at_standstill(rpm) {
            return false;
        }
        if !core.commit_clear(ticket).is_ok() {
            return false;
        }
        for m in 0..MOTOR_COUNT {
            self.pids[m].reset();
            self.slews[m].reset(0.0);
        }
        self.trajectory.cancel();
        true
    }

    /// Driver enable follows the command group, but only while energised.
    fn sync_outputs(&mut self, cmd: &CommandSet) {
        let energised = self.port.core().state().is_energised();
        for m in 0..MOTOR_COUNT {
            let desired = cmd.enabled[m] && energised;
            if desired != self.driver.is_enabled(m) {
                let _ = if desired {
                    self.driver.enable(m)
                } else {
                    self.driver.disable(m)
                };
                self.pids[m].reset();
                self.slews[m].reset(0.0);
            }
        }
    }

    fn on_state_change(&mut self, state: SystemOperatingState, position: &[i32; MOTOR_COUNT]) {
        use SystemOperatingState::*;
        let prev = self.previous_state;
        if state == prev {
            return;
        }
        if prev == Trajectory && self.trajectory.is_active() {
            self.hold_position = self.trajectory.hold_position().map(|p| p.round() as i32);
            self.trajectory.cancel();
        } else if state == Running {
            self.hold_position = *position;
        }
    }

    /// Per-state control. Returns the requested (pre-slew) velocity and the
    /// tracked position per actuator.
    fn run_control(
        &mut self,
        state: SystemOperatingState,
        cmd: &CommandSet,
        position: &[i32; MOTOR_COUNT],
        rpm: &[f32; MOTOR_COUNT],
    ) -> [(f32, i32); MOTOR_COUNT] {
        use SystemOperatingState::*;
        let mut targets = [(0.0, 0); MOTOR_COUNT];

        match state {
            Fault | EmergencyStop => {
                self.requested_velocity = [0.0; MOTOR_COUNT];
                for m in 0..MOTOR_COUNT {
                    let _ = self.driver.brake(m);
                    self.pids[m].reset();
                    self.slews[m].reset(0.0);
                }
                self.trajectory.cancel();
                return targets;
            }
            Init | Idle => {
                self.requested_velocity = [0.0; MOTOR_COUNT];
                for m in 0..MOTOR_COUNT {
                    let _ = self.driver.set_duty(m, 0.0);
                    self.pids[m].reset();
                    self.slews[m].reset(0.0);
                }
                return targets;
            }
            Enabled => {
                for (m, t) in targets.iter_mut().enumerate() {
                    *t = (0.0, position[m]);
                }
            }
            Running => {
                for (m, t) in targets.iter_mut().enumerate() {
                    *t = match cmd.mode {
                        ControlMode::Velocity => (
                            cmd.target_velocity[m].clamp(-self.max_velocity_rpm, self.max_velocity_rpm),
                            position[m],
                        ),
                        ControlMode::Position => (
                            self.position_loop(cmd.target_position[m], position[m]),
                            cmd.target_position[m],
                        ),
                        ControlMode::Trajectory => (
                            self.position_loop(self.hold_position[m], position[m]),
                            self.hold_position[m],
                        ),
                        ControlMode::Torque => (0.0, position[m]),
                    };
                }
            }
            Homing => {
                let mut done = true;
                for (m, t) in targets.iter_mut().enumerate() {
                    let home = cmd.home_position[m];
                    *t = (self.position_loop(home, position[m]), home);
                    if cmd.enabled[m] && !self.within_position(home, position[m]) {
                        done = false;
                    }
                }
                if done {
                    self.port.core().machine.handle_event(SystemEvent::HomingComplete);
                }
            }
            Trajectory => {
                if !self.trajectory.is_active() || self.trajectory.epoch() != cmd.trajectory_epoch {
                    self.trajectory.purge_stale(cmd.trajectory_epoch);
                    self.trajectory.start(cmd.trajectory_epoch, *position);
                }
                let sp = self.trajectory.advance(self.dt);
                for (m, t) in targets.iter_mut().enumerate() {
                    let ff = self.decoders[m].counts_per_sec_to_rpm(sp.velocity[m]);
                    let error = sp.position[m] - position[m] as f32;
                    let v = (ff + self.position_kp * error)
                        .clamp(-self.max_velocity_rpm, self.max_velocity_rpm);
                    *t = (v, sp.position[m].round() as i32);
                }
                if sp.exhausted {
                    self.hold_position = sp.position.map(|p| p.round() as i32);
                    self.trajectory.cancel();
                    self.port.core().machine.handle_event(SystemEvent::TrajectoryExhausted);
                }
            }
        }

        let dt = self.dt;
        let scale = self.max_velocity_rpm;
        for m in 0..MOTOR_COUNT {
            if !self.driver.is_enabled(m) {
                self.requested_velocity[m] = 0.0;
                self.pids[m].reset();
                self.slews[m].reset(0.0);
                let _ = self.driver.set_duty(m, 0.0);
                continue;
            }
            self.requested_velocity[m] = targets[m].0;
            let v_sp = self.slews[m].step(targets[m].0, cmd.accel_limit, dt);
            // Normalised to full-scale speed so kp = 1 is full duty at full-scale error.
            let duty = self.pids[m].update(v_sp / scale, rpm[m] / scale, dt);
            if self.driver.set_duty(m, duty).is_err() {
                self.telemetry.actuators[m].error_count =
                    self.telemetry.actuators[m].error_count.wrapping_add(1);
            }
        }
        targets
    }

    #[inline]
    fn position_loop(&self, target: i32, position: i32) -> f32 {
        let error = (i64::from(target) - i64::from(position)) as f32;
        (self.position_kp * error).clamp(-self.max_velocity_rpm, self.max_velocity_rpm)
    }

    #[inline]
    fn within_position(&self, target: i32, position: i32) -> bool {
        (i64::from(target) - i64::from(position)).abs() <= i64::from(self.position_tolerance)
    }

    fn fill_telemetry(
        &mut self,
        state: SystemOperatingState,
        cmd: &CommandSet,
        active: FaultFlags,
        position: &[i32; MOTOR_COUNT],
        targets: &[(f32, i32); MOTOR_COUNT],
        start_us: u64,
    ) {
        let core = self.port.core();
        let faults = core.faults.load();
        let new_faults = faults.difference(self.previous_faults);
        self.previous_faults = faults;

        let t = &mut self.telemetry;
        t.state = state;
        t.mode = cmd.mode;
        t.faults = faults;
        t.active_conditions = active;
        t.estop_active = core.estop().is_active();
        t.uptime_ms = start_us.saturating_sub(self.start_us) / 1000;
        t.clear_fault_seq = self.applied.clear_fault_seq;
        t.reset_position_seq = self.applied.reset_position_seq;
        t.trajectory.active = self.trajectory.is_active();
        t.trajectory.epoch = self.trajectory.epoch();
        t.trajectory.buffered = self.trajectory.buffered().min(usize::from(u8::MAX)) as u8;
        t.trajectory.last_seq = self.trajectory.last_seq();
        t.trajectory.consumed = self.trajectory.consumed();

        for m in 0..MOTOR_COUNT {
            let out = self.driver.state(m).unwrap_or_default();
            let dec = &self.decoders[m];
            let pid = &self.pids[m];
            let a = &mut t.actuators[m];
            a.position = position[m];
            a.velocity = dec.velocity();
            a.velocity_rpm = dec.velocity_rpm();
            a.current = out.current;
            a.temperature = out.temperature;
            a.commanded_duty = out.duty;
            a.enabled = out.enabled;
            a.braking = out.direction == Direction::Brake;
            a.encoder_error = dec.has_error();
            a.velocity_setpoint = self.slews[m].value();
            a.position_setpoint = targets[m].1;
            a.at_target = match (state, cmd.mode) {
                (SystemOperatingState::Running, ControlMode::Velocity) => {
                    (a.velocity_rpm - cmd.target_velocity[m]).abs() <= self.velocity_tolerance
                }
                (SystemOperatingState::Running | SystemOperatingState::Homing, _) => {
                    (i64::from(targets[m].1) - i64::from(position[m])).abs()
                        <= i64::from(self.position_tolerance)
                }
                _ => false,
            };
            a.pid = PidSnapshot {
                gains: pid.gains(),
                integral: pid.integral(),
                previous_error: pid.previous_error(),
                filtered_derivative: pid.filtered_derivative(),
                terms: pid.terms(),
                output: pid.output(),
            };
            if new_faults.intersects(FaultFlags::motor_mask(m)) {
                a.error_count = a.error_count.wrapping_add(1);
            }
        }
    }

    /// Run ticks until `running` is cleared. `before_tick` runs first on
    /// every tick (simulation plant stepping, test hooks).
    pub fn run(&mut self, running: &AtomicBool, before_tick: impl FnMut()) -> Result<(), CycleError> {
        #[cfg(feature = "rt")]
        {
            self.run_rt_loop(running, before_tick)
        }

        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop(running, before_tick)
        }
    }

    /// RT loop using `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(
        &mut self,
        running: &AtomicBool,
        mut before_tick: impl FnMut(),
    ) -> Result<(), CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let period_ns = i64::from(self.period_us) * 1000;
        let mut next_wake = clock_gettime(clock)
            .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;

        while running.load(Ordering::Acquire) {
            next_wake = timespec_add_ns(next_wake, period_ns);
            before_tick();
            self.tick();
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        Ok(())
    }

    /// Simulation loop using `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(
        &mut self,
        running: &AtomicBool,
        mut before_tick: impl FnMut(),
    ) -> Result<(), CycleError> {
        use std::time::{Duration, Instant};

        let period = Duration::from_micros(u64::from(self.period_us));
        while running.load(Ordering::Acquire) {
            let tick_start = Instant::now();
            before_tick();
            self.tick();
            if let Some(remaining) = period.checked_sub(tick_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}
