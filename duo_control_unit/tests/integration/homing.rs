//! Integration test: homing, position mode and position reset.

use duo_common::config::DriveConfig;
use duo_common::fault::FaultFlags;
use duo_common::protocol::{Command, ErrorCode};
use duo_common::state::{ControlMode, SystemOperatingState};
use duo_control_unit::command::dispatcher::DispatchError;

use super::{enable_both, run_fed, run_until, send, snapshot, started, tracking_config};

#[test]
fn go_to_home_reaches_home_and_returns_to_enabled() {
    let mut node = started(tracking_config());
    send(&mut node, Command::SetHomePosition([100, -100]));
    send(&mut node, enable_both());
    send(&mut node, Command::GoToHome);
    assert_eq!(node.observer.core().state(), SystemOperatingState::Homing);

    let ticks = run_until(&mut node, 12_000, |n| {
        n.observer.core().state() == SystemOperatingState::Enabled
    });
    assert!(ticks.is_some(), "homing never completed");
    node.step();

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Enabled);
    assert!(snap.faults.is_empty(), "faults: {:?}", snap.faults);
    assert!((snap.telemetry.actuators[0].position - 100).abs() <= 30);
    assert!((snap.telemetry.actuators[1].position + 100).abs() <= 30);
}

#[test]
fn go_to_home_without_home_is_rejected() {
    let mut node = started(DriveConfig::default());
    send(&mut node, enable_both());
    let err = node.dispatcher.handle_command(Command::GoToHome).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected {
            code: ErrorCode::InvalidParameter,
            ..
        }
    ));
    assert_eq!(node.observer.core().state(), SystemOperatingState::Enabled);
}

#[test]
fn trajectory_stop_aborts_homing() {
    let mut node = started(tracking_config());
    send(&mut node, Command::SetHomePosition([5000, 5000]));
    send(&mut node, enable_both());
    send(&mut node, Command::GoToHome);
    run_fed(&mut node, 50);

    send(&mut node, Command::TrajectoryStop);
    assert_eq!(node.observer.core().state(), SystemOperatingState::Enabled);
    node.step();
    assert_eq!(snapshot(&mut node).state, SystemOperatingState::Enabled);
}

#[test]
fn position_mode_moves_to_target() {
    let mut node = started(tracking_config());
    send(&mut node, Command::SetMode(ControlMode::Position));
    send(&mut node, enable_both());
    send(&mut node, Command::SetPosition([300, -150]));
    assert_eq!(node.observer.core().state(), SystemOperatingState::Running);

    let reached = run_until(&mut node, 12_000, |n| {
        let snap = n.observer.snapshot();
        snap.telemetry.actuators.iter().all(|a| a.at_target)
    });
    assert!(reached.is_some(), "position never reached");
    let snap = snapshot(&mut node);
    assert!((snap.telemetry.actuators[0].position - 300).abs() <= 10);
    assert!((snap.telemetry.actuators[1].position + 150).abs() <= 10);
    assert_eq!(snap.telemetry.actuators[0].position_setpoint, 300);
}

#[test]
fn position_target_beyond_limit_is_rejected() {
    let mut node = started(DriveConfig::default());
    send(&mut node, Command::SetMode(ControlMode::Position));
    send(&mut node, enable_both());
    let err = node
        .dispatcher
        .handle_command(Command::SetPosition([2_000_000, 0]))
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected {
            code: ErrorCode::InvalidParameter,
            ..
        }
    ));
    assert_eq!(snapshot(&mut node).commands.target_position, [0, 0]);
}

#[test]
fn reset_position_recovers_from_position_limit() {
    let mut cfg = DriveConfig::default();
    cfg.limits.max_position_counts = 50;
    let mut node = started(cfg);
    // 2 counts per tick: over the position limit, under the speed limit.
    for _ in 0..30 {
        node.drive(0, 4000.0);
    }
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Fault);
    assert!(snap.faults.contains(FaultFlags::POSITION_LIMIT));
    assert!(!snap.faults.contains(FaultFlags::VELOCITY_LIMIT));

    send(&mut node, Command::ResetPosition);
    node.tick();
    assert_eq!(snapshot(&mut node).telemetry.actuators[0].position, 0);

    send(&mut node, Command::ClearFault);
    node.tick();
    assert_eq!(node.observer.core().state(), SystemOperatingState::Idle);
}
