//! Shared control state: field-group ports and the atomic core.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use duo_common::config::DriveConfig;
use duo_common::consts::RT_READ_RETRIES;
use duo_common::fault::FaultFlags;
use duo_common::state::SystemOperatingState;
use duo_shared_state::{SnapshotReader, SnapshotWriter, snapshot_channel};

use super::data::{ClearScope, CommandSet, ControlTelemetry};
use crate::actuator::driver::EmergencyStop;
use crate::state::machine::{SystemEvent, SystemStateMachine, TransitionResult};

// ─── Fault latch ────────────────────────────────────────────────────

/// Sticky fault bits. Set by either context, cleared only by the control
/// loop after a clear request is accepted.
#[derive(Debug, Default)]
pub struct FaultLatch {
    bits: AtomicU32,
}

impl FaultLatch {
    #[inline]
    pub fn raise(&self, flags: FaultFlags) -> FaultFlags {
        FaultFlags::from_bits_retain(self.bits.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn load(&self) -> FaultFlags {
        FaultFlags::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    /// Clear if the latch still holds exactly `observed`. Fails when the
    /// other context raised a bit after `observed` was evaluated.
    #[inline]
    pub fn try_clear(&self, observed: FaultFlags) -> bool {
        self.bits
            .compare_exchange(observed.bits(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ─── Core ───────────────────────────────────────────────────────────

/// State writable from both contexts.
#[derive(Debug)]
pub struct SharedCore {
    pub machine: SystemStateMachine,
    pub faults: FaultLatch,
    estop: EmergencyStop,
}

impl SharedCore {
    pub fn new(estop: EmergencyStop) -> Self {
        Self {
            machine: SystemStateMachine::new(),
            faults: FaultLatch::default(),
            estop,
        }
    }

    #[inline]
    pub fn state(&self) -> SystemOperatingState {
        self.machine.state()
    }

    /// Brake all actuators now and enter EmergencyStop. Wait-free; callable
    /// from any context.
    #[inline]
    pub fn emergency_stop(&self) {
        self.estop.trigger();
        self.machine.force_emergency_stop();
    }

    /// Latch `flags` and request Fault.
    #[inline]
    pub fn raise_fault(&self, flags: FaultFlags) -> TransitionResult {
        self.faults.raise(flags);
        self.machine.handle_event(SystemEvent::SafetyViolation)
    }

    pub fn estop(&self) -> &EmergencyStop {
        &self.estop
    }

    // ── Clear ──

    /// Latched faults and stop count a clear request issued now covers.
    pub fn clear_scope(&self) -> ClearScope {
        ClearScope {
            faults: self.faults.load(),
            estop_triggers: self.estop.trigger_count(),
        }
    }

    /// First half of a clear: observe the safe stop being left. `None` when
    /// there is nothing to clear or something latched after `scope` was
    /// taken.
    pub fn begin_clear(&self, scope: ClearScope) -> Option<ClearTicket> {
        let state = self.state();
        if !state.is_safe_stop() {
            return None;
        }
        let triggers = self.estop.trigger_count();
        let faults = self.faults.load();
        if triggers != scope.estop_triggers || !scope.faults.contains(faults) {
            return None;
        }
        // A stop that has latched but not yet reached the state cell.
        if state == SystemOperatingState::Fault && self.estop.is_active() {
            return None;
        }
        Some(ClearTicket {
            state,
            faults,
            triggers,
        })
    }

    /// Second half: leave the observed safe stop for Idle. Anything latched
    /// since [`SharedCore::begin_clear`] wins and the safe stop is restored.
    pub fn commit_clear(&self, ticket: ClearTicket) -> TransitionResult {
        if let TransitionResult::Rejected(reason) = self.machine.clear_from(ticket.state) {
            return TransitionResult::Rejected(reason);
        }
        if !self.faults.try_clear(ticket.faults) {
            self.restore(ticket.state);
            return TransitionResult::Rejected("fault latched during clear");
        }
        if ticket.state == SystemOperatingState::EmergencyStop {
            self.estop.release(ticket.triggers);
        }
        if self.estop.is_active() {
            self.machine.force_emergency_stop();
            return TransitionResult::Rejected("emergency stop during clear");
        }
        if !self.faults.load().is_empty() {
            self.machine.handle_event(SystemEvent::SafetyViolation);
            return TransitionResult::Rejected("fault latched during clear");
        }
        TransitionResult::Ok(SystemOperatingState::Idle)
    }

    fn restore(&self, state: SystemOperatingState) {
        if state == SystemOperatingState::EmergencyStop {
            self.machine.force_emergency_stop();
        } else {
            self.machine.handle_event(SystemEvent::SafetyViolation);
        }
    }
}

/// A safe stop observed by [`SharedCore::begin_clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearTicket {
    state: SystemOperatingState,
    faults: FaultFlags,
    triggers: u32,
}

impl ClearTicket {
    pub fn state(&self) -> SystemOperatingState {
        self.state
    }

    pub fn faults(&self) -> FaultFlags {
        self.faults
    }
}

// ─── Ports ──────────────────────────────────────────────────────────

/// Control-context side: publishes telemetry, consumes commands.
pub struct ControlPort {
    core: Arc<SharedCore>,
    telemetry: SnapshotWriter<ControlTelemetry>,
    commands: SnapshotReader<CommandSet>,
    last_commands: CommandSet,
}

impl ControlPort {
    #[inline]
    pub fn core(&self) -> &SharedCore {
        &self.core
    }

    /// Latest command set, with bounded retries. On a version conflict the
    /// previous good copy is returned together with `true`.
    #[inline]
    pub fn read_commands(&mut self) -> (CommandSet, bool) {
        match self.commands.try_read(RT_READ_RETRIES) {
            Ok(c) => {
                self.last_commands = c;
                (c, false)
            }
            Err(_) => (self.last_commands, true),
        }
    }

    /// Publish one tick's telemetry. Wait-free.
    #[inline]
    pub fn publish(&mut self, telemetry: &ControlTelemetry) -> u64 {
        self.telemetry.write(*telemetry)
    }

    pub fn observer(&self) -> SharedControlState {
        SharedControlState {
            core: Arc::clone(&self.core),
            telemetry: self.telemetry.reader(),
            commands: self.commands.clone(),
        }
    }
}

/// Dispatch-context side: applies commands, reads telemetry.
pub struct DispatchPort {
    core: Arc<SharedCore>,
    telemetry: SnapshotReader<ControlTelemetry>,
    commands: SnapshotWriter<CommandSet>,
}

impl DispatchPort {
    #[inline]
    pub fn core(&self) -> &SharedCore {
        &self.core
    }

    pub fn core_handle(&self) -> Arc<SharedCore> {
        Arc::clone(&self.core)
    }

    /// Consistent telemetry snapshot.
    pub fn telemetry(&mut self) -> ControlTelemetry {
        self.telemetry.read()
    }

    /// Current command set (the writer's own copy).
    pub fn commands(&self) -> CommandSet {
        self.commands.latest()
    }

    /// Apply a mutation as one atomic update of the command group.
    pub fn apply(&mut self, f: impl FnOnce(&mut CommandSet)) -> u64 {
        self.commands.update(f)
    }

    pub fn observer(&self) -> SharedControlState {
        SharedControlState {
            core: Arc::clone(&self.core),
            telemetry: self.telemetry.clone(),
            commands: self.commands.reader(),
        }
    }
}

// ─── Observer ───────────────────────────────────────────────────────

/// Both field groups read together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSnapshot {
    pub telemetry: ControlTelemetry,
    pub commands: CommandSet,
    pub state: SystemOperatingState,
    pub faults: FaultFlags,
}

/// The shared control state. Created once at startup; split into the two
/// context ports. The value itself is a read-only observer.
#[derive(Clone)]
pub struct SharedControlState {
    core: Arc<SharedCore>,
    telemetry: SnapshotReader<ControlTelemetry>,
    commands: SnapshotReader<CommandSet>,
}

impl SharedControlState {
    /// Allocate both field groups and the core, returning the two ports.
    pub fn create(config: &DriveConfig, estop: EmergencyStop) -> (ControlPort, DispatchPort) {
        let core = Arc::new(SharedCore::new(estop));
        let initial_commands = CommandSet::from_config(config);
        let (telemetry_writer, telemetry_reader) = snapshot_channel(ControlTelemetry::default());
        let (command_writer, command_reader) = snapshot_channel(initial_commands);
        let control = ControlPort {
            core: Arc::clone(&core),
            telemetry: telemetry_writer,
            commands: command_reader,
            last_commands: initial_commands,
        };
        let dispatch = DispatchPort {
            core,
            telemetry: telemetry_reader,
            commands: command_writer,
        };
        (control, dispatch)
    }

    pub fn snapshot(&mut self) -> ControlSnapshot {
        ControlSnapshot {
            telemetry: self.telemetry.read(),
            commands: self.commands.read(),
            state: self.core.state(),
            faults: self.core.faults.load(),
        }
    }

    pub fn core(&self) -> &SharedCore {
        &self.core
    }
}
