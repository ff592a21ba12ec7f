//! Integration test: buffered trajectory execution and cancellation.

use duo_common::consts::TRAJECTORY_QUEUE_CAPACITY;
use duo_common::protocol::{Command, ErrorCode, TrajectoryPoint};
use duo_common::state::{ControlMode, SystemOperatingState};
use duo_control_unit::command::dispatcher::DispatchError;
use duo_control_unit::sim::SimNode;

use super::{enable_both, run_fed, run_until, send, snapshot, started, tracking_config};

fn point(seq: u8, timestamp_ms: u32, delta1: i16, delta2: i8) -> Command {
    Command::TrajectoryPoint(TrajectoryPoint {
        seq,
        timestamp_ms,
        delta1,
        delta2,
    })
}

fn armed() -> SimNode {
    let mut node = started(tracking_config());
    send(&mut node, Command::SetMode(ControlMode::Trajectory));
    send(&mut node, enable_both());
    node
}

#[test]
fn runs_to_exhaustion_then_holds() {
    let mut node = armed();
    send(&mut node, point(1, 100, 200, -50));
    send(&mut node, point(2, 200, 200, -50));
    send(&mut node, Command::TrajectoryStart);
    assert_eq!(node.observer.core().state(), SystemOperatingState::Trajectory);

    run_fed(&mut node, 100);
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Trajectory);
    assert!(snap.telemetry.trajectory.active);
    assert_eq!(snap.telemetry.trajectory.last_seq, 1);

    let ticks = run_until(&mut node, 1000, |n| {
        n.observer.core().state() == SystemOperatingState::Running
    });
    assert!(ticks.is_some(), "trajectory never exhausted");
    node.step();

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Running);
    assert!(snap.faults.is_empty(), "faults: {:?}", snap.faults);
    let status = snap.telemetry.trajectory;
    assert!(!status.active);
    assert_eq!(status.consumed, 2);
    assert_eq!(status.last_seq, 2);
    assert_eq!(status.buffered, 0);
    assert!(snap.telemetry.actuators[0].position > 100);
    assert!(snap.telemetry.actuators[1].position < -20);
}

#[test]
fn stop_discards_remaining_points() {
    let mut node = armed();
    send(&mut node, point(1, 1000, 100, 0));
    send(&mut node, point(2, 2000, 100, 0));
    send(&mut node, Command::TrajectoryStart);
    run_fed(&mut node, 100);

    send(&mut node, Command::TrajectoryStop);
    assert_eq!(node.observer.core().state(), SystemOperatingState::Running);
    node.step();
    let snap = snapshot(&mut node);
    assert!(!snap.telemetry.trajectory.active);
    assert_eq!(snap.telemetry.trajectory.consumed, 1);

    // Restart: the leftover point belongs to the cancelled run.
    send(&mut node, Command::TrajectoryStart);
    node.step();
    node.step();
    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Running);
    assert_eq!(snap.telemetry.trajectory.consumed, 1);
    assert_eq!(snap.telemetry.trajectory.buffered, 0);
}

#[test]
fn points_need_trajectory_mode() {
    let mut node = started(tracking_config());
    send(&mut node, enable_both());
    let err = node.dispatcher.handle_command(point(1, 10, 1, 1)).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected {
            code: ErrorCode::ModeMismatch,
            ..
        }
    ));
}

#[test]
fn full_buffer_rejects_point() {
    let mut node = armed();
    for i in 0..TRAJECTORY_QUEUE_CAPACITY {
        send(&mut node, point(i as u8, (i as u32 + 1) * 10, 1, 0));
    }
    let err = node
        .dispatcher
        .handle_command(point(200, 10_000, 1, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Rejected {
            code: ErrorCode::BufferFull,
            ..
        }
    ));
}

#[test]
fn mode_change_refused_while_running() {
    let mut node = started(tracking_config());
    send(&mut node, enable_both());
    send(&mut node, Command::SetVelocity([5.0, 5.0]));
    let err = node
        .dispatcher
        .handle_command(Command::SetMode(ControlMode::Trajectory))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Rejected { .. }));
    assert_eq!(snapshot(&mut node).commands.mode, ControlMode::Velocity);
}
