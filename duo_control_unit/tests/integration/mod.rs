mod control_accuracy;
mod exchange;
mod homing;
mod safety_stop;
mod trajectory;

use duo_common::config::DriveConfig;
use duo_common::protocol::{Command, EnableFlags};
use duo_control_unit::exchange::ControlSnapshot;
use duo_control_unit::sim::SimNode;

// ── Helpers ─────────────────────────────────────────────────────────

/// Ticks between keep-alive pings (100 ms at 2 kHz).
pub const PING_EVERY: usize = 200;

/// Node after startup with one tick published.
pub fn started(config: DriveConfig) -> SimNode {
    let mut node = SimNode::new(config).unwrap();
    node.tick();
    node
}

/// Gains that make the simulated plant track within a second.
pub fn tracking_config() -> DriveConfig {
    let mut cfg = DriveConfig::default();
    cfg.pid.kp = 2.0;
    cfg.pid.ki = 10.0;
    cfg.pid.kd = 0.0;
    cfg
}

pub fn enable_both() -> Command {
    Command::MotorEnable(EnableFlags {
        enable: [true, true],
        brake: [false, false],
    })
}

pub fn send(node: &mut SimNode, cmd: Command) {
    node.dispatcher
        .handle_command(cmd)
        .unwrap_or_else(|e| panic!("{cmd:?} rejected: {e}"));
}

pub fn snapshot(node: &mut SimNode) -> ControlSnapshot {
    node.observer.snapshot()
}

/// Step plant and loop for `n` ticks, pinging to keep the watchdog fed.
pub fn run_fed(node: &mut SimNode, n: usize) {
    for i in 0..n {
        if i % PING_EVERY == 0 {
            send(node, Command::Ping(i as u32));
        }
        node.step();
    }
}

/// Like [`run_fed`] but stops early once `done` holds. Returns the ticks run.
pub fn run_until(node: &mut SimNode, max: usize, mut done: impl FnMut(&mut SimNode) -> bool) -> Option<usize> {
    for i in 0..max {
        if done(node) {
            return Some(i);
        }
        if i % PING_EVERY == 0 {
            send(node, Command::Ping(i as u32));
        }
        node.step();
    }
    None
}

/// Plant speed in RPM at the default encoder resolution.
pub fn plant_rpm(node: &SimNode, motor: usize) -> f64 {
    node.plant.velocity(motor) * 60.0 / 4096.0
}
