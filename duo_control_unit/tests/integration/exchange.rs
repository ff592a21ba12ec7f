//! Integration test: both contexts on separate threads.
//!
//! The control loop ticks freely on one thread while the dispatcher applies
//! commands on another; a third reader checks every snapshot is whole.

use std::sync::atomic::{AtomicBool, Ordering};

use duo_common::config::DriveConfig;
use duo_common::fault::FaultFlags;
use duo_common::protocol::{Command, EnableFlags, GainSelector};
use duo_common::state::SystemOperatingState;
use duo_control_unit::control::pid::PidGains;
use duo_control_unit::sim::SimNode;

use super::started;

fn consistent(g: &PidGains) -> bool {
    (g.kp == g.ki && g.ki == g.kd) || *g == PidGains::default()
}

#[test]
fn gain_updates_are_never_torn() {
    let SimNode {
        mut control,
        mut dispatcher,
        mut observer,
        ..
    } = started(DriveConfig::default());
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                control.tick();
            }
        });
        let writer = s.spawn(|| {
            for i in 1..=2000u32 {
                let g = i as f32 * 0.001;
                dispatcher
                    .handle_command(Command::SetPidGains {
                        selector: GainSelector::Both,
                        kp: g,
                        ki: g,
                        kd: g,
                    })
                    .unwrap();
            }
        });

        for _ in 0..5000 {
            let snap = observer.snapshot();
            for a in &snap.telemetry.actuators {
                assert!(consistent(&a.pid.gains), "torn telemetry gains {:?}", a.pid.gains);
            }
            for g in &snap.commands.gains {
                assert!(consistent(g), "torn command gains {g:?}");
            }
        }
        writer.join().unwrap();
        stop.store(true, Ordering::Release);
    });

    let last = 2000.0 * 0.001;
    let snap = observer.snapshot();
    assert_eq!(snap.commands.gains[0], PidGains { kp: last, ki: last, kd: last });
}

#[test]
fn fault_is_never_overwritten_by_enable() {
    let SimNode {
        mut dispatcher,
        observer,
        ..
    } = started(DriveConfig::default());
    let raised = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            let mut on = true;
            while !raised.load(Ordering::Acquire) {
                let _ = dispatcher.handle_command(Command::MotorEnable(EnableFlags {
                    enable: [on, on],
                    brake: [false, false],
                }));
                on = !on;
            }
            for _ in 0..1000 {
                let _ = dispatcher.handle_command(Command::MotorEnable(EnableFlags {
                    enable: [on, on],
                    brake: [false, false],
                }));
                on = !on;
            }
        });

        std::thread::sleep(std::time::Duration::from_millis(5));
        observer.core().raise_fault(FaultFlags::MEMORY_ERROR);
        raised.store(true, Ordering::Release);
    });

    assert_eq!(observer.core().state(), SystemOperatingState::Fault);
    assert!(observer.core().faults.load().contains(FaultFlags::MEMORY_ERROR));
}
