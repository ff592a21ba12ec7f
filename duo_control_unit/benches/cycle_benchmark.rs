//! Control tick benchmark.
//!
//! Runs complete ticks on simulation hardware: command read, sensing,
//! safety evaluation, PID, output and snapshot publish. The 2 kHz period
//! leaves 500 µs per tick.

use criterion::{Criterion, criterion_group, criterion_main};

use duo_common::config::DriveConfig;
use duo_common::protocol::{Command, EnableFlags};
use duo_control_unit::sim::SimNode;

fn running_node() -> SimNode {
    let mut node = SimNode::new(DriveConfig::default()).unwrap();
    node.dispatcher
        .handle_command(Command::MotorEnable(EnableFlags {
            enable: [true, true],
            brake: [false, false],
        }))
        .unwrap();
    node.dispatcher
        .handle_command(Command::SetVelocity([30.0, -30.0]))
        .unwrap();
    node
}

fn bench_tick_idle(c: &mut Criterion) {
    let mut node = SimNode::new(DriveConfig::default()).unwrap();
    c.bench_function("tick_idle", |b| {
        b.iter(|| node.control.tick());
    });
}

fn bench_tick_running(c: &mut Criterion) {
    let mut node = running_node();
    let mut cycle = 0u32;
    c.bench_function("tick_running", |b| {
        b.iter(|| {
            // Keep the watchdog fed on the frozen manual clock.
            cycle = cycle.wrapping_add(1);
            if cycle % 1000 == 0 {
                let _ = node.dispatcher.handle_command(Command::Ping(cycle));
                node.dispatcher.transport().take();
            }
            node.control.tick()
        });
    });
}

fn bench_publish_telemetry(c: &mut Criterion) {
    let mut node = running_node();
    node.control.tick();
    c.bench_function("publish_telemetry", |b| {
        b.iter(|| {
            let _ = node.dispatcher.publish_telemetry();
            node.dispatcher.transport().take()
        });
    });
}

criterion_group!(benches, bench_tick_idle, bench_tick_running, bench_publish_telemetry);
criterion_main!(benches);
