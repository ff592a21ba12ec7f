//! Integration test: fault and emergency-stop lifecycle.
//!
//! 1. Limit violation → Fault, outputs forced to zero within one tick
//! 2. Watchdog expiry without any command → Fault
//! 3. Emergency stop from Running → brake, EmergencyStop
//! 4. Clear accepted only on request with no active condition
//! 5. A stop or fault latched after the clear request wins over it

use duo_common::config::DriveConfig;
use duo_common::fault::FaultFlags;
use duo_common::hal::Direction;
use duo_common::protocol::{Broadcast, Command, ErrorCode, InboundFrame, StatusRecord};
use duo_common::state::SystemOperatingState;
use duo_control_unit::command::dispatcher::DispatchError;
use duo_control_unit::sim::SimNode;

use super::{enable_both, run_fed, send, snapshot, started, tracking_config};

// ── Helpers ─────────────────────────────────────────────────────────

/// 10 counts per tick at 2 kHz, ~293 RPM.
const OVERSPEED_CPS: f64 = 20_000.0;

fn faulted_by_overspeed() -> SimNode {
    let mut node = started(DriveConfig::default());
    send(&mut node, enable_both());
    node.drive(0, OVERSPEED_CPS);
    node
}

fn duty_limited_config() -> DriveConfig {
    let mut cfg = DriveConfig::default();
    cfg.pid.kp = 1000.0;
    cfg.pid.ki = 0.0;
    cfg.pid.kd = 0.0;
    cfg.pid.output_max = 0.8;
    cfg
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn overspeed_faults_within_one_tick() {
    let mut node = faulted_by_overspeed();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::VELOCITY_LIMIT));
    assert!(snap.telemetry.active_conditions.contains(FaultFlags::VELOCITY_LIMIT));
    for (m, a) in snap.telemetry.actuators.iter().enumerate() {
        assert_eq!(a.commanded_duty, 0.0);
        assert!(a.braking);
        assert_eq!(node.bridge.output(m).0, Direction::Brake);
    }
}

#[test]
fn set_velocity_in_fault_is_rejected() {
    let mut node = faulted_by_overspeed();
    let before = snapshot(&mut node).commands;

    let err = node
        .dispatcher
        .handle_command(Command::SetVelocity([10.0, 10.0]))
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected {
            code: ErrorCode::StateRejected,
            ..
        }
    ));

    let after = snapshot(&mut node).commands;
    assert_eq!(after.target_velocity, before.target_velocity);
    assert_eq!(after.last_command_ms, before.last_command_ms);
    assert_eq!(node.dispatcher.rejected_count(), 1);
    assert!(
        node.dispatcher
            .transport()
            .status_records()
            .iter()
            .any(|r| matches!(r, StatusRecord::ErrorLog { code: ErrorCode::StateRejected, .. }))
    );
}

#[test]
fn watchdog_expires_without_commands() {
    let mut node = started(DriveConfig::default());
    send(&mut node, enable_both());

    for _ in 0..900 {
        node.step();
    }
    assert_eq!(node.observer.core().state(), SystemOperatingState::Enabled);

    for _ in 0..200 {
        node.step();
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::COMMAND_WATCHDOG));
    assert!(snap.telemetry.actuators.iter().all(|a| a.commanded_duty == 0.0));

    node.dispatcher.transport().take();
    node.dispatcher.publish_telemetry().unwrap();
    let frames = node.dispatcher.transport().take();
    assert!(frames.iter().any(|f| matches!(
        f.inbound(),
        Some(InboundFrame::Broadcast(Broadcast::WatchdogAlert { node: 1 }))
    )));
    assert!(frames.iter().any(|f| matches!(
        f.status(),
        Some(StatusRecord::Fault(flags)) if flags.contains(FaultFlags::COMMAND_WATCHDOG)
    )));
}

#[test]
fn watchdog_is_disarmed_while_idle() {
    let mut node = started(DriveConfig::default());
    for _ in 0..2000 {
        node.step();
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Idle);
    assert!(snap.faults.is_empty());
}

#[test]
fn emergency_stop_from_running() {
    let mut node = started(duty_limited_config());
    send(&mut node, enable_both());
    send(&mut node, Command::SetVelocity([100.0, 100.0]));
    for _ in 0..3 {
        node.tick();
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Running);
    assert!((snap.telemetry.actuators[0].commanded_duty - 0.8).abs() < 1e-6);
    assert_eq!(node.bridge.output(0).0, Direction::Forward);

    send(&mut node, Command::EmergencyStop);
    // Hardware brakes before the next tick.
    for m in 0..2 {
        assert_eq!(node.bridge.output(m), (Direction::Brake, 0));
    }

    node.tick();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::EmergencyStop);
    assert!(snap.telemetry.estop_active);
    for (m, a) in snap.telemetry.actuators.iter().enumerate() {
        assert_eq!(a.commanded_duty, 0.0);
        assert_eq!(node.bridge.output(m).0, Direction::Brake);
    }

    assert!(node.dispatcher.handle_command(enable_both()).is_err());
}

#[test]
fn clear_after_emergency_stop_returns_to_idle() {
    let mut node = started(duty_limited_config());
    send(&mut node, enable_both());
    send(&mut node, Command::EmergencyStop);
    node.tick();
    assert_eq!(node.observer.core().state(), SystemOperatingState::EmergencyStop);

    send(&mut node, Command::ClearFault);
    node.tick();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Idle);
    assert!(snap.faults.is_empty());
    assert!(!snap.telemetry.estop_active);
    assert_eq!(snap.commands.enabled, [false, false]);
}

#[test]
fn emergency_stop_after_clear_request_wins() {
    let mut node = faulted_by_overspeed();
    for _ in 0..3 {
        node.drive(0, 0.0);
    }
    send(&mut node, Command::ClearFault);
    node.dispatcher.handle_broadcast(Broadcast::GlobalEstop);
    node.tick();

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::EmergencyStop);
    assert!(snap.telemetry.estop_active);
    assert!(snap.faults.contains(FaultFlags::VELOCITY_LIMIT));
    for m in 0..2 {
        assert_eq!(node.bridge.output(m).0, Direction::Brake);
    }
}

#[test]
fn repeated_stop_during_estop_clear_stays_latched() {
    let mut node = started(duty_limited_config());
    send(&mut node, enable_both());
    send(&mut node, Command::EmergencyStop);
    node.tick();

    send(&mut node, Command::ClearFault);
    node.dispatcher.handle_broadcast(Broadcast::GlobalEstop);
    node.tick();

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::EmergencyStop);
    assert!(snap.telemetry.estop_active);

    // A fresh request covers the second stop.
    send(&mut node, Command::ClearFault);
    node.tick();
    assert_eq!(node.observer.core().state(), SystemOperatingState::Idle);
    assert!(!node.observer.core().estop().is_active());
}

#[test]
fn fault_raised_after_clear_request_stays_latched() {
    let mut node = faulted_by_overspeed();
    for _ in 0..3 {
        node.drive(0, 0.0);
    }
    send(&mut node, Command::ClearFault);
    node.dispatcher.handle_broadcast(Broadcast::WatchdogAlert { node: 3 });
    node.tick();

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::VELOCITY_LIMIT | FaultFlags::COMMAND_WATCHDOG));
    assert!(snap.telemetry.active_conditions.is_empty());
}

#[test]
fn unreachable_velocity_request_faults_on_accel() {
    let mut node = started(DriveConfig::default());
    send(&mut node, enable_both());
    send(&mut node, Command::SetAccelLimit(1.0));
    send(&mut node, Command::SetVelocity([100.0, -100.0]));
    for _ in 0..3 {
        node.tick();
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::ACCEL_LIMIT));

    // Nothing is requested while stopped, so the condition is gone.
    send(&mut node, Command::ClearFault);
    node.tick();
    assert_eq!(node.observer.core().state(), SystemOperatingState::Idle);
}

#[test]
fn reversal_within_accel_limit_does_not_fault() {
    let mut node = started(tracking_config());
    send(&mut node, enable_both());
    send(&mut node, Command::SetVelocity([30.0, -30.0]));
    run_fed(&mut node, 1000);
    send(&mut node, Command::SetVelocity([-30.0, 30.0]));
    run_fed(&mut node, 1000);

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Running);
    assert!(!snap.faults.contains(FaultFlags::ACCEL_LIMIT), "faults: {:?}", snap.faults);
}

#[test]
fn clear_refused_while_condition_persists() {
    let mut node = faulted_by_overspeed();

    send(&mut node, Command::ClearFault);
    node.drive(0, OVERSPEED_CPS);
    assert_eq!(node.observer.core().state(), SystemOperatingState::Fault);

    // Condition gone, but faults stay latched until the next request.
    for _ in 0..3 {
        node.drive(0, 0.0);
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::VELOCITY_LIMIT));
    assert!(snap.telemetry.active_conditions.is_empty());

    send(&mut node, Command::ClearFault);
    node.tick();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Idle);
    assert!(snap.faults.is_empty());
}

#[test]
fn clear_fault_outside_safe_stop_is_rejected() {
    let mut node = started(DriveConfig::default());
    let err = node.dispatcher.handle_command(Command::ClearFault).unwrap_err();
    assert!(matches!(err, DispatchError::Rejected { .. }));
}

#[test]
fn overtemperature_latches_per_motor_bit() {
    let mut node = started(DriveConfig::default());
    node.bridge.set_temperature(1, 95.0);
    node.tick();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert_eq!(snap.faults, FaultFlags::OVERTEMP_2);

    node.bridge.set_temperature(1, 40.0);
    send(&mut node, Command::ClearFault);
    node.tick();
    assert_eq!(node.observer.core().state(), SystemOperatingState::Idle);
}

#[test]
fn runtime_current_limit_is_enforced() {
    let mut node = started(DriveConfig::default());
    send(&mut node, Command::SetCurrentLimit(1.0));
    node.bridge.set_current_raw(0, 4095);
    node.tick();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::OVERCURRENT_1));
    assert!(!snap.faults.contains(FaultFlags::OVERCURRENT_2));
}

#[test]
fn sustained_overruns_fault() {
    let mut node = SimNode::new(DriveConfig::default()).unwrap();
    node.clock.set_auto_advance_us(600);
    for _ in 0..12 {
        node.tick();
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::LOOP_OVERRUN));
    assert!(snap.telemetry.stats.overruns >= 10);
}

#[test]
fn broadcast_stop_and_peer_watchdog() {
    let mut node = started(DriveConfig::default());
    node.dispatcher.handle_broadcast(Broadcast::WatchdogAlert { node: 7 });
    assert_eq!(node.observer.core().state(), SystemOperatingState::Fault);
    assert!(node.observer.core().faults.load().contains(FaultFlags::COMMAND_WATCHDOG));

    node.dispatcher.handle_broadcast(Broadcast::GlobalEstop);
    assert_eq!(node.observer.core().state(), SystemOperatingState::EmergencyStop);
    assert!(node.observer.core().estop().is_active());
}
