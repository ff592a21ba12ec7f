//! System operating-state machine.
//!
//! Init → Idle ↔ Enabled ↔ Running ↔ Trajectory, with Homing off
//! Enabled/Running and the two safe stops (Fault, EmergencyStop) reachable
//! from everywhere.
//!
//! The state lives in one `AtomicU8` shared by the control and dispatch
//! contexts. Transitions are computed by the pure [`next_state`] table and
//! installed with compare-exchange: if the other context changed the state
//! in between, the event is re-evaluated against the new state. A
//! lower-priority event computed from a stale `Running` can therefore never
//! overwrite a `Fault` or `EmergencyStop` installed concurrently.

use std::sync::atomic::{AtomicU8, Ordering};

use duo_common::state::SystemOperatingState;

/// Result of a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded (or was a no-op re-request): resulting state.
    Ok(SystemOperatingState),
    /// Transition rejected: reason.
    Rejected(&'static str),
}

impl TransitionResult {
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Event that can trigger a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// Hardware, config and shared state initialised.
    StartupComplete,
    /// At least one actuator enabled.
    Enable,
    /// All actuators disabled.
    Disable,
    /// SYSTEM_RESET command.
    SystemReset,
    /// Nonzero target applied.
    TargetApplied,
    HomeRequested,
    HomingComplete,
    /// Homing cancelled by command.
    HomingAborted,
    TrajectoryStart,
    TrajectoryStop,
    /// Point buffer ran dry.
    TrajectoryExhausted,
    /// Limit, watchdog or hardware fault.
    SafetyViolation,
    /// Explicit or broadcast stop.
    EmergencyStop,
    /// Clear request accepted with no active condition.
    ClearAccepted,
}

/// Transition table. `Ok(state)` with an unchanged state is a no-op.
pub fn next_state(
    state: SystemOperatingState,
    event: SystemEvent,
) -> Result<SystemOperatingState, &'static str> {
    use SystemEvent::*;
    use SystemOperatingState::*;

    let next = match (state, event) {
        // Non-maskable.
        (_, SystemEvent::EmergencyStop) => SystemOperatingState::EmergencyStop,
        (SystemOperatingState::EmergencyStop, SafetyViolation) => {
            return Err("emergency stop outranks fault");
        }
        (_, SafetyViolation) => Fault,

        (Init, StartupComplete) => Idle,

        (Idle | Enabled, Enable) => Enabled,
        (Running | Homing | Trajectory, Enable) => state,

        (Enabled | Running, TargetApplied) => Running,

        (Enabled | Running, HomeRequested) => Homing,
        (Homing, HomeRequested) => Homing,
        (Homing, HomingComplete | HomingAborted) => Enabled,

        (Running, TrajectoryStart) => Trajectory,
        (Trajectory, TrajectoryStart) => Trajectory,
        (Trajectory, TrajectoryStop | TrajectoryExhausted) => Running,

        (Idle | Enabled | Running | Homing | Trajectory, Disable | SystemReset) => Idle,

        (Fault | SystemOperatingState::EmergencyStop, ClearAccepted) => Idle,

        _ => return Err(invalid_transition_reason(state, event)),
    };
    Ok(next)
}

/// Shared, lock-free state cell.
#[derive(Debug)]
pub struct SystemStateMachine {
    state: AtomicU8,
}

impl Default for SystemStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStateMachine {
    /// New machine in `Init`.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SystemOperatingState::Init as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> SystemOperatingState {
        SystemOperatingState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(SystemOperatingState::Fault)
    }

    /// Apply `event` atomically against the current state.
    pub fn handle_event(&self, event: SystemEvent) -> TransitionResult {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = SystemOperatingState::from_u8(current).unwrap_or(SystemOperatingState::Fault);
            let next = match next_state(state, event) {
                Ok(next) => next,
                Err(reason) => return TransitionResult::Rejected(reason),
            };
            if next == state {
                return TransitionResult::Ok(next);
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return TransitionResult::Ok(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// Leave the safe stop `expected` for Idle, only if the state is still
    /// `expected`. A stop or fault installed since `expected` was observed
    /// makes this fail instead of being overwritten.
    pub fn clear_from(&self, expected: SystemOperatingState) -> TransitionResult {
        let next = match next_state(expected, SystemEvent::ClearAccepted) {
            Ok(next) => next,
            Err(reason) => return TransitionResult::Rejected(reason),
        };
        match self.state.compare_exchange(
            expected as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => TransitionResult::Ok(next),
            Err(_) => TransitionResult::Rejected("state changed during clear"),
        }
    }

    /// Unconditional emergency stop.
    #[inline]
    pub fn force_emergency_stop(&self) {
        self.state
            .store(SystemOperatingState::EmergencyStop as u8, Ordering::Release);
    }

    /// Whether `event` would be accepted from the current state.
    #[inline]
    pub fn permits(&self, event: SystemEvent) -> bool {
        next_state(self.state(), event).is_ok()
    }

    #[inline]
    pub fn is_safe_stop(&self) -> bool {
        self.state().is_safe_stop()
    }
}

fn invalid_transition_reason(state: SystemOperatingState, event: SystemEvent) -> &'static str {
    use SystemEvent::*;
    use SystemOperatingState::*;

    match (state, event) {
        (Fault | SystemOperatingState::EmergencyStop, _) => "safe stop: clear required",
        (Init, _) => "startup not complete",
        (_, StartupComplete) => "already started",
        (_, ClearAccepted) => "no fault to clear",
        (Idle, TargetApplied | HomeRequested) => "actuators not enabled",
        (Enabled, TrajectoryStart) => "trajectory requires running",
        (Homing, TargetApplied | TrajectoryStart) => "homing in progress",
        (Trajectory, TargetApplied | HomeRequested) => "trajectory in progress",
        (_, HomingComplete | HomingAborted) => "not homing",
        (_, TrajectoryStop | TrajectoryExhausted) => "no trajectory active",
        _ => "invalid transition",
    }
}
