//! Integration test: control accuracy.
//!
//! PID bounds under arbitrary constant inputs, overflow-extended encoder
//! counting, and closed-loop velocity tracking on the simulated plant.

use std::sync::Arc;

use duo_common::config::{DriveConfig, PidConfig};
use duo_common::consts::COUNTER_LIMIT;
use duo_common::protocol::Command;
use duo_common::state::SystemOperatingState;
use duo_control_unit::control::pid::{PidController, PidGains};
use duo_control_unit::sensor::encoder::QuadratureDecoder;
use duo_control_unit::sim::{SimCounter, SimNode};
use proptest::prelude::*;

use super::{enable_both, plant_rpm, run_fed, send, snapshot, started, tracking_config};

proptest! {
    #[test]
    fn pid_stays_within_bounds(
        setpoint in -1000.0f32..1000.0,
        measurement in -1000.0f32..1000.0,
        kp in 0.0f32..50.0,
        ki in 0.0f32..50.0,
        kd in 0.0f32..5.0,
        steps in 1usize..400,
    ) {
        let cfg = PidConfig { kp, ki, kd, ..PidConfig::default() };
        let mut pid = PidController::from_config(&cfg).unwrap();
        for _ in 0..steps {
            let out = pid.update(setpoint, measurement, 0.0005);
            prop_assert!((cfg.output_min..=cfg.output_max).contains(&out));
            prop_assert!(pid.integral().abs() <= cfg.integral_max);
        }
    }

    #[test]
    fn proportional_only_is_clamped_error(
        setpoint in -10.0f32..10.0,
        measurement in -10.0f32..10.0,
        kp in 0.0f32..10.0,
    ) {
        let mut pid = PidController::new(PidGains::new(kp, 0.0, 0.0).unwrap());
        let out = pid.update(setpoint, measurement, 0.001);
        let expected = (kp * (setpoint - measurement)).clamp(-1.0, 1.0);
        prop_assert!((out - expected).abs() <= 1e-6);
    }
}

#[test]
fn decoder_counts_across_overflow() {
    let counter = Arc::new(SimCounter::new());
    let decoder = QuadratureDecoder::new(counter.clone(), 4096, 1.0);
    let irq = decoder.irq_handle();

    let forward = i32::from(COUNTER_LIMIT) * 2 + 1234;
    let backward = i32::from(COUNTER_LIMIT) + 99;
    counter.pulse(forward, &irq);
    assert_eq!(decoder.overflow_count(), 2);
    counter.pulse(-backward, &irq);
    assert_eq!(decoder.position(), forward - backward);

    counter.pulse(-forward, &irq);
    assert_eq!(decoder.position(), -backward);
    assert!(decoder.overflow_count() < 0);
}

#[test]
fn constant_rate_integrates_to_expected_position() {
    let mut node = started(DriveConfig::default());
    // 500 counts/s for 0.1 s at 2 kHz.
    for _ in 0..200 {
        node.drive(0, 500.0);
    }
    let snap = snapshot(&mut node);
    assert!((snap.telemetry.actuators[0].position - 50).abs() <= 1);
    assert_eq!(snap.telemetry.actuators[1].position, 0);
    assert_eq!(snap.state, SystemOperatingState::Idle);
    assert!(snap.faults.is_empty());
}

#[test]
fn velocity_loop_tracks_opposite_targets() {
    let mut node = started(tracking_config());
    send(&mut node, enable_both());
    send(&mut node, Command::SetVelocity([30.0, -30.0]));
    assert_eq!(node.observer.core().state(), SystemOperatingState::Running);

    run_fed(&mut node, 4000);

    let snap = snapshot(&mut node);
    assert_eq!(snap.state, SystemOperatingState::Running);
    assert!(snap.faults.is_empty(), "faults: {:?}", snap.faults);
    assert!((plant_rpm(&node, 0) - 30.0).abs() < 3.0, "m0 {}", plant_rpm(&node, 0));
    assert!((plant_rpm(&node, 1) + 30.0).abs() < 3.0, "m1 {}", plant_rpm(&node, 1));
    assert!(snap.telemetry.actuators[0].commanded_duty > 0.0);
    assert!(snap.telemetry.actuators[1].commanded_duty < 0.0);
    for a in &snap.telemetry.actuators {
        assert!((-1.0..=1.0).contains(&a.commanded_duty));
        assert!(a.enabled);
    }
}

#[test]
fn setpoint_is_slew_limited() {
    let mut node = started(tracking_config());
    send(&mut node, enable_both());
    send(&mut node, Command::SetVelocity([100.0, 0.0]));
    node.step();
    let first = snapshot(&mut node).telemetry.actuators[0].velocity_setpoint;
    // 1000 RPM/s at 0.5 ms per tick.
    assert!((first - 0.5).abs() < 1e-4, "setpoint {first}");
    for _ in 0..9 {
        node.step();
    }
    let tenth = snapshot(&mut node).telemetry.actuators[0].velocity_setpoint;
    assert!((tenth - 5.0).abs() < 1e-3, "setpoint {tenth}");
}

#[test]
fn loop_statistics_are_published() {
    let mut node = SimNode::new(DriveConfig::default()).unwrap();
    node.clock.set_auto_advance_us(100);
    for _ in 0..10 {
        node.tick();
    }
    let stats = snapshot(&mut node).telemetry.stats;
    assert_eq!(stats.loop_count, 9);
    assert!(stats.max_us >= stats.min_us);
    assert_eq!(stats.overruns, 0);
}
