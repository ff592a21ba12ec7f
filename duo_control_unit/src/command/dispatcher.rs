//! Protocol dispatcher (Context B).
//!
//! Decodes inbound frames, gates each command on the operating state and
//! control mode, validates parameters, and applies accepted commands as a
//! state transition followed by one atomic update of the command group.
//! Rejected commands never mutate shared state; they are answered with an
//! ERROR_LOG record.
//!
//! Emergency stop (command or broadcast) bypasses all gating.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use duo_common::config::DriveConfig;
use duo_common::consts::{
    ACCEL_LIMIT_CEILING, CURRENT_LIMIT_CEILING, MOTOR_COUNT, TRAJECTORY_QUEUE_CAPACITY,
};
use duo_common::fault::FaultFlags;
use duo_common::hal::{Clock, FrameTransport, TransportError};
use duo_common::protocol::{
    Broadcast, Command, DecodeError, ErrorCode, InboundFrame, MotorStatusFlags, StatusRecord, ids,
};
use duo_common::state::{ControlMode, SystemOperatingState};

use crate::control::pid::PidGains;
use crate::control::trajectory::TrajectoryProducer;
use crate::exchange::{CommandSet, ControlTelemetry, DispatchPort, SharedControlState};
use crate::state::machine::{SystemEvent, TransitionResult};

/// Dispatcher-level failure of one frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("command 0x{command_id:03X} rejected: {code:?}")]
    Rejected { command_id: u16, code: ErrorCode },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Last SYNC_PULSE seen on the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncInfo {
    pub pulses: u32,
    pub remote_ms: u32,
    pub local_ms: u64,
}

pub struct ProtocolDispatcher<T: FrameTransport> {
    port: DispatchPort,
    transport: T,
    trajectory: TrajectoryProducer,
    clock: Arc<dyn Clock>,
    defaults: CommandSet,
    max_velocity_rpm: f32,
    max_position: i32,
    node_id: u8,
    rejected: u16,
    last_error: Option<StatusRecord>,
    sync: SyncInfo,
    seen_state: SystemOperatingState,
    seen_faults: FaultFlags,
    seen_overruns: u64,
}

impl<T: FrameTransport> ProtocolDispatcher<T> {
    pub fn new(
        config: &DriveConfig,
        port: DispatchPort,
        transport: T,
        trajectory: TrajectoryProducer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            port,
            transport,
            trajectory,
            clock,
            defaults: CommandSet::from_config(config),
            max_velocity_rpm: config.limits.max_velocity_rpm,
            max_position: config.limits.max_position_counts,
            node_id: config.telemetry.node_id,
            rejected: 0,
            last_error: None,
            sync: SyncInfo::default(),
            seen_state: SystemOperatingState::Init,
            seen_faults: FaultFlags::empty(),
            seen_overruns: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn observer(&self) -> SharedControlState {
        self.port.observer()
    }

    /// Commands rejected since startup.
    pub fn rejected_count(&self) -> u16 {
        self.rejected
    }

    pub fn sync_info(&self) -> SyncInfo {
        self.sync
    }

    // ─── Inbound ────────────────────────────────────────────────────

    /// Decode and handle one inbound frame.
    pub fn handle_frame(&mut self, id: u16, bytes: &[u8]) -> Result<(), DispatchError> {
        match InboundFrame::decode(id, bytes) {
            Ok(InboundFrame::Command(cmd)) => self.handle_command(cmd),
            Ok(InboundFrame::Broadcast(b)) => {
                self.handle_broadcast(b);
                Ok(())
            }
            Err(e) => {
                warn!(id, error = %e, "Malformed frame");
                self.report(id, ErrorCode::Malformed);
                Err(DispatchError::Decode(e))
            }
        }
    }

    /// Gate, validate and apply one command.
    pub fn handle_command(&mut self, cmd: Command) -> Result<(), DispatchError> {
        let now_ms = self.clock.now_ms();

        if cmd.is_emergency_stop() {
            self.port.core().emergency_stop();
            self.port.apply(|c| c.last_command_ms = now_ms);
            warn!("Emergency stop command");
            return Ok(());
        }

        let state = self.port.core().state();
        if state.is_safe_stop()
            && !matches!(
                cmd,
                Command::ClearFault
                    | Command::RequestStatus(_)
                    | Command::Ping(_)
                    | Command::ResetPosition
            )
        {
            return Err(self.reject(&cmd, ErrorCode::StateRejected));
        }

        let mut next = self.port.commands();
        if let Err(code) = self.execute(&cmd, state, &mut next) {
            return Err(self.reject(&cmd, code));
        }
        next.last_command_ms = now_ms;
        self.port.apply(|c| *c = next);
        debug!(id = cmd.id(), "Command applied");
        Ok(())
    }

    fn execute(
        &mut self,
        cmd: &Command,
        state: SystemOperatingState,
        next: &mut CommandSet,
    ) -> Result<(), ErrorCode> {
        use SystemOperatingState as S;

        match *cmd {
            Command::SystemReset => {
                transition(self.port.core().machine.handle_event(SystemEvent::SystemReset))?;
                let keep = *next;
                *next = self.defaults;
                next.home_position = keep.home_position;
                next.home_set = keep.home_set;
                next.reset_position_seq = keep.reset_position_seq;
                next.clear_fault_seq = keep.clear_fault_seq;
                next.clear_scope = keep.clear_scope;
                next.trajectory_epoch = keep.trajectory_epoch.wrapping_add(1);
                info!("System reset");
            }

            Command::MotorEnable(flags) => {
                let event = if flags.any_enabled() {
                    SystemEvent::Enable
                } else {
                    SystemEvent::Disable
                };
                transition(self.port.core().machine.handle_event(event))?;
                next.enabled = flags.enable;
                next.brake = flags.brake;
                for m in 0..MOTOR_COUNT {
                    if !flags.enable[m] {
                        next.target_velocity[m] = 0.0;
                    }
                }
                if !flags.any_enabled() {
                    next.trajectory_epoch = next.trajectory_epoch.wrapping_add(1);
                }
            }

            Command::SetVelocity(rpm) => {
                require_mode(next.mode, ControlMode::Velocity)?;
                require_state(state, &[S::Enabled, S::Running])?;
                if rpm
                    .iter()
                    .any(|v| !v.is_finite() || v.abs() > self.max_velocity_rpm)
                {
                    return Err(ErrorCode::InvalidParameter);
                }
                if rpm.iter().any(|&v| v != 0.0) {
                    transition(self.port.core().machine.handle_event(SystemEvent::TargetApplied))?;
                }
                next.target_velocity = rpm;
            }

            Command::SetPosition(pos) => {
                require_mode(next.mode, ControlMode::Position)?;
                require_state(state, &[S::Enabled, S::Running])?;
                self.check_position(&pos)?;
                transition(self.port.core().machine.handle_event(SystemEvent::TargetApplied))?;
                next.target_position = pos;
            }

            Command::SetPidGains {
                selector,
                kp,
                ki,
                kd,
            } => {
                let gains = PidGains::new(kp, ki, kd).map_err(|_| ErrorCode::InvalidParameter)?;
                for (m, g) in next.gains.iter_mut().enumerate() {
                    if selector.applies_to(m) {
                        *g = gains;
                    }
                }
            }

            Command::EmergencyStop => {}

            Command::ResetPosition => {
                require_state(
                    state,
                    &[S::Idle, S::Enabled, S::Fault, S::EmergencyStop],
                )?;
                next.reset_position_seq = next.reset_position_seq.wrapping_add(1);
                next.target_position = [0; MOTOR_COUNT];
            }

            Command::SetAccelLimit(limit) => {
                if !(limit > 0.0 && limit <= ACCEL_LIMIT_CEILING) {
                    return Err(ErrorCode::InvalidParameter);
                }
                next.accel_limit = limit;
            }

            Command::SetCurrentLimit(limit) => {
                if !(limit > 0.0 && limit <= CURRENT_LIMIT_CEILING) {
                    return Err(ErrorCode::InvalidParameter);
                }
                next.current_limit = limit;
            }

            Command::ClearFault => {
                // Scope first: a stop latched after this point is not covered.
                let scope = self.port.core().clear_scope();
                if !self.port.core().state().is_safe_stop() {
                    return Err(ErrorCode::StateRejected);
                }
                next.clear_fault_seq = next.clear_fault_seq.wrapping_add(1);
                next.clear_scope = scope;
                next.enabled = [false; MOTOR_COUNT];
                next.target_velocity = [0.0; MOTOR_COUNT];
                next.trajectory_epoch = next.trajectory_epoch.wrapping_add(1);
                info!(faults = ?self.port.core().faults.load(), "Fault clear requested");
            }

            Command::SetMode(mode) => {
                if mode == ControlMode::Torque {
                    return Err(ErrorCode::InvalidParameter);
                }
                require_state(state, &[S::Idle, S::Enabled])?;
                if mode != next.mode {
                    next.mode = mode;
                    next.target_velocity = [0.0; MOTOR_COUNT];
                    next.trajectory_epoch = next.trajectory_epoch.wrapping_add(1);
                    info!(?mode, "Control mode changed");
                }
            }

            Command::TrajectoryPoint(point) => {
                require_mode(next.mode, ControlMode::Trajectory)?;
                require_state(state, &[S::Enabled, S::Running, S::Trajectory])?;
                self.trajectory
                    .push(next.trajectory_epoch, point)
                    .map_err(|_| ErrorCode::BufferFull)?;
            }

            Command::TrajectoryStart => {
                require_mode(next.mode, ControlMode::Trajectory)?;
                require_state(state, &[S::Enabled, S::Running, S::Trajectory])?;
                let machine = &self.port.core().machine;
                if state == S::Enabled {
                    transition(machine.handle_event(SystemEvent::TargetApplied))?;
                }
                transition(machine.handle_event(SystemEvent::TrajectoryStart))?;
                info!(epoch = next.trajectory_epoch, buffered = self.trajectory.len(), "Trajectory started");
            }

            Command::TrajectoryStop => match state {
                S::Homing => {
                    transition(self.port.core().machine.handle_event(SystemEvent::HomingAborted))?;
                    info!("Homing aborted");
                }
                S::Trajectory => {
                    transition(self.port.core().machine.handle_event(SystemEvent::TrajectoryStop))?;
                    next.trajectory_epoch = next.trajectory_epoch.wrapping_add(1);
                    info!("Trajectory stopped");
                }
                S::Enabled | S::Running if next.mode == ControlMode::Trajectory => {
                    next.trajectory_epoch = next.trajectory_epoch.wrapping_add(1);
                }
                _ => return Err(ErrorCode::StateRejected),
            },

            Command::SetHomePosition(home) => {
                self.check_position(&home)?;
                next.home_position = home;
                next.home_set = true;
            }

            Command::GoToHome => {
                if !next.home_set {
                    return Err(ErrorCode::InvalidParameter);
                }
                require_state(state, &[S::Enabled, S::Running])?;
                transition(self.port.core().machine.handle_event(SystemEvent::HomeRequested))?;
                info!(home = ?next.home_position, "Homing started");
            }

            Command::RequestStatus(id) => {
                let telemetry = self.port.telemetry();
                if id == ids::PID_DEBUG {
                    for m in 0..MOTOR_COUNT {
                        let rec = pid_debug(&telemetry, m);
                        self.send_logged(rec);
                    }
                } else {
                    let rec = self
                        .status_record(id, &telemetry)
                        .ok_or(ErrorCode::InvalidParameter)?;
                    self.send_logged(rec);
                }
            }

            Command::Ping(seq) => self.send_logged(StatusRecord::Pong(seq)),
        }
        Ok(())
    }

    fn check_position(&self, pos: &[i32; MOTOR_COUNT]) -> Result<(), ErrorCode> {
        if pos
            .iter()
            .any(|p| p.unsigned_abs() > self.max_position.unsigned_abs())
        {
            return Err(ErrorCode::InvalidParameter);
        }
        Ok(())
    }

    fn reject(&mut self, cmd: &Command, code: ErrorCode) -> DispatchError {
        let command_id = cmd.id();
        warn!(
            id = command_id,
            ?code,
            state = ?self.port.core().state(),
            "Command rejected"
        );
        self.report(command_id, code);
        DispatchError::Rejected { command_id, code }
    }

    /// Count and transmit an ERROR_LOG record.
    fn report(&mut self, command_id: u16, code: ErrorCode) {
        self.rejected = self.rejected.wrapping_add(1);
        let rec = StatusRecord::ErrorLog {
            code,
            command_id,
            state: self.port.core().state(),
            count: self.rejected,
        };
        self.last_error = Some(rec);
        self.send_logged(rec);
    }

    // ─── Broadcast ──────────────────────────────────────────────────

    pub fn handle_broadcast(&mut self, b: Broadcast) {
        match b {
            Broadcast::GlobalEstop => {
                self.port.core().emergency_stop();
                warn!("Global emergency stop broadcast");
            }
            Broadcast::WatchdogAlert { node } if node != self.node_id => {
                let result = self.port.core().raise_fault(FaultFlags::COMMAND_WATCHDOG);
                warn!(node, ?result, "Watchdog alert from peer");
            }
            Broadcast::WatchdogAlert { .. } => {}
            Broadcast::SyncPulse { timestamp_ms } => {
                self.sync = SyncInfo {
                    pulses: self.sync.pulses.wrapping_add(1),
                    remote_ms: timestamp_ms,
                    local_ms: self.clock.now_ms(),
                };
                debug!(timestamp_ms, "Sync pulse");
            }
        }
    }

    // ─── Outbound ───────────────────────────────────────────────────

    fn send(&self, rec: StatusRecord) -> Result<(), DispatchError> {
        let payload = rec.encode();
        self.transport.transmit(rec.id(), &payload)?;
        Ok(())
    }

    fn send_logged(&self, rec: StatusRecord) {
        if let Err(e) = self.send(rec) {
            warn!(id = rec.id(), error = %e, "Transmit failed");
        }
    }

    /// Build one status record from a telemetry snapshot.
    pub fn status_record(&self, id: u16, t: &ControlTelemetry) -> Option<StatusRecord> {
        let rec = match id {
            ids::HEARTBEAT => StatusRecord::Heartbeat {
                state: t.state,
                mode: t.mode,
            },
            ids::MOTOR_STATUS => StatusRecord::MotorStatus {
                flags: self.motor_status_flags(t),
                error_counts: t.actuators.map(|a| a.error_count),
                uptime_s: (t.uptime_ms / 1000).min(u64::from(u16::MAX)) as u16,
            },
            ids::POSITION_REPORT => StatusRecord::Position(t.actuators.map(|a| a.position)),
            ids::VELOCITY_REPORT => StatusRecord::Velocity(t.actuators.map(|a| a.velocity_rpm)),
            ids::FAULT_REPORT => StatusRecord::Fault(t.faults),
            ids::PID_DEBUG => pid_debug(t, 0),
            ids::CURRENT_REPORT => StatusRecord::Current(t.actuators.map(|a| a.current)),
            ids::TEMPERATURE_REPORT => {
                StatusRecord::Temperature(t.actuators.map(|a| a.temperature))
            }
            ids::BUFFER_STATUS => StatusRecord::BufferStatus {
                len: self.trajectory.len().min(usize::from(u8::MAX)) as u8,
                capacity: TRAJECTORY_QUEUE_CAPACITY as u8,
                last_seq: t.trajectory.last_seq,
                epoch: self.port.commands().trajectory_epoch,
            },
            ids::LIMIT_SWITCH_STATUS => StatusRecord::LimitSwitch(self.limit_bits(t)),
            ids::ERROR_LOG => self.last_error?,
            ids::PERFORMANCE_METRICS => StatusRecord::Performance {
                loop_count: t.stats.loop_count.min(u64::from(u32::MAX)) as u32,
                last_us: t.stats.last_us.min(u32::from(u16::MAX)) as u16,
                max_us: t.stats.max_us.min(u32::from(u16::MAX)) as u16,
                overruns: t.stats.overruns.min(u64::from(u16::MAX)) as u16,
            },
            _ => return None,
        };
        Some(rec)
    }

    fn motor_status_flags(&self, t: &ControlTelemetry) -> MotorStatusFlags {
        use MotorStatusFlags as F;
        let mut flags = F::empty();
        for (m, a) in t.actuators.iter().enumerate() {
            if a.enabled {
                flags |= F::for_motor(F::ENABLED_1, F::ENABLED_2, m);
            }
            if a.at_target {
                flags |= F::for_motor(F::AT_TARGET_1, F::AT_TARGET_2, m);
            }
            if t.faults.intersects(FaultFlags::motor_mask(m)) {
                flags |= F::for_motor(F::FAULT_1, F::FAULT_2, m);
            }
            if a.braking {
                flags |= F::for_motor(F::BRAKE_1, F::BRAKE_2, m);
            }
        }
        let commands = self.port.commands();
        if commands.home_set {
            flags |= F::HOME_SET;
        }
        if t.trajectory.active {
            flags |= F::TRAJ_ACTIVE;
        }
        flags
    }

    /// Soft limit flags: bit 2m = at +max, bit 2m+1 = at −max.
    fn limit_bits(&self, t: &ControlTelemetry) -> u8 {
        let mut bits = 0u8;
        for (m, a) in t.actuators.iter().enumerate() {
            if a.position >= self.max_position {
                bits |= 1 << (2 * m);
            }
            if a.position <= -self.max_position {
                bits |= 1 << (2 * m + 1);
            }
        }
        bits
    }

    /// Periodic telemetry: heartbeat, actuator status, position, velocity,
    /// current and fault report. Also logs state changes observed since the
    /// previous call. Returns the first transmit error, if any.
    pub fn publish_telemetry(&mut self) -> Result<(), DispatchError> {
        let t = self.port.telemetry();
        self.log_changes(&t);

        let mut first_err = None;
        for id in [
            ids::HEARTBEAT,
            ids::MOTOR_STATUS,
            ids::POSITION_REPORT,
            ids::VELOCITY_REPORT,
            ids::CURRENT_REPORT,
            ids::FAULT_REPORT,
        ] {
            if let Some(rec) = self.status_record(id, &t) {
                if let Err(e) = self.send(rec) {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn log_changes(&mut self, t: &ControlTelemetry) {
        let state = self.port.core().state();
        if state != self.seen_state {
            info!(from = ?self.seen_state, to = ?state, "Operating state changed");
            self.seen_state = state;
        }

        let faults = self.port.core().faults.load();
        let raised = faults.difference(self.seen_faults);
        if !raised.is_empty() {
            warn!(?raised, latched = ?faults, "Fault latched");
            if raised.contains(FaultFlags::COMMAND_WATCHDOG) {
                self.send_logged(StatusRecord::Fault(faults));
                let alert = Broadcast::WatchdogAlert { node: self.node_id };
                if let Err(e) = self.transport.transmit(alert.id(), &alert.encode()) {
                    warn!(error = %e, "Watchdog alert broadcast failed");
                }
            }
        } else if faults.is_empty() && !self.seen_faults.is_empty() {
            info!("Faults cleared");
        }
        self.seen_faults = faults;

        if t.stats.overruns > self.seen_overruns {
            warn!(
                overruns = t.stats.overruns,
                max_us = t.stats.max_us,
                "Control loop overrun"
            );
            self.seen_overruns = t.stats.overruns;
        }
    }
}

/// Map a transition result to a wire error code.
#[inline]
fn transition(result: TransitionResult) -> Result<SystemOperatingState, ErrorCode> {
    match result {
        TransitionResult::Ok(s) => Ok(s),
        TransitionResult::Rejected(_) => Err(ErrorCode::StateRejected),
    }
}

#[inline]
fn require_mode(current: ControlMode, required: ControlMode) -> Result<(), ErrorCode> {
    if current == required {
        Ok(())
    } else {
        Err(ErrorCode::ModeMismatch)
    }
}

#[inline]
fn require_state(
    state: SystemOperatingState,
    allowed: &[SystemOperatingState],
) -> Result<(), ErrorCode> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(ErrorCode::StateRejected)
    }
}

fn pid_debug(t: &ControlTelemetry, motor: usize) -> StatusRecord {
    let terms = t.actuators.get(motor).map(|a| a.pid.terms).unwrap_or_default();
    StatusRecord::PidDebug {
        motor: motor as u8,
        p: terms.p,
        i: terms.i,
        d: terms.d,
    }
}
