//! # Duo Control Unit
//!
//! Runs one drive node on simulation hardware:
//!
//! - **Context A**: dedicated control thread (RT-configured with `--features rt`)
//!   stepping the motor plant and running the fixed-rate tick.
//! - **Context B**: tokio runtime serving inbound frames and periodic
//!   telemetry through the protocol dispatcher.
//!
//! `--demo` attaches a scripted host that enables both actuators, spins them
//! in opposite directions and keeps the command watchdog fed.

use clap::Parser;
use duo_common::protocol::{Command, EnableFlags};
use duo_common::state::ControlMode;
use duo_control_unit::clock::MonotonicClock;
use duo_control_unit::command::service::serve;
use duo_control_unit::config::load_or_default;
use duo_control_unit::cycle::rt_setup;
use duo_control_unit::sim::assemble;
use duo_control_unit::transport::{ChannelTransport, Frame};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Frames buffered in each direction between host and dispatcher.
const FRAME_QUEUE_DEPTH: usize = 256;

/// Duo Control Unit: dual-actuator closed-loop drive
#[derive(Parser, Debug)]
#[command(name = "duo_control_unit")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Dual-actuator closed-loop drive node")]
struct Args {
    /// Path to drive configuration TOML (defaults apply when omitted).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CPU core to pin the control thread to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,

    /// Drive the node with a scripted host.
    #[arg(long)]
    demo: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("Duo Control Unit v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Duo Control Unit shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_or_default(args.config.as_deref(), Path::new("config/duo.toml"))?;
    info!(
        "Config OK: period={}µs, watchdog={}ms, telemetry={}ms",
        config.period_us(),
        config.safety.watchdog_timeout_ms,
        config.telemetry.interval_ms,
    );

    // ── Assemble both contexts ──
    let (out_tx, out_rx) = mpsc::channel::<Frame>(FRAME_QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Frame>(FRAME_QUEUE_DEPTH);
    let assembly = assemble(&config, Arc::new(MonotonicClock::new()), ChannelTransport::new(out_tx))?;
    let mut control = assembly.control;
    let mut plant = assembly.plant;
    let dispatcher = assembly.dispatcher;
    let mut observer = control.observer();
    let period_s = config.period_s() as f64;

    // ── Signal handling ──
    let running = Arc::new(AtomicBool::new(true));
    let (stop_tx, stop_rx) = watch::channel(false);
    {
        let running = running.clone();
        let observer = observer.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal, engaging emergency stop");
            observer.core().emergency_stop();
            running.store(false, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        })?;
    }

    // ── Context A ──
    let cpu_core = args.cpu_core;
    let rt_priority = args.rt_priority;
    let control_running = running.clone();
    let control_thread = std::thread::Builder::new()
        .name("duo-control".into())
        .spawn(move || {
            rt_setup(cpu_core, rt_priority)?;
            info!(cpu_core, rt_priority, "Control loop entering cycle");
            control.run(&control_running, || plant.step(period_s))
        })?;

    // ── Context B ──
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("duo-dispatch")
        .build()?;
    let telemetry_interval = Duration::from_millis(u64::from(config.telemetry.interval_ms));
    let demo = args.demo;
    let host_period = Duration::from_millis(u64::from(config.safety.watchdog_timeout_ms / 4).max(1));

    runtime.block_on(async move {
        tokio::spawn(drain_outbound(out_rx));
        // Without a host the sender is held so the inbound queue stays open
        // until shutdown.
        let _idle_bus = if demo {
            tokio::spawn(demo_host(in_tx, host_period));
            None
        } else {
            Some(in_tx)
        };
        serve(dispatcher, in_rx, telemetry_interval, stop_rx).await;
    });

    running.store(false, Ordering::SeqCst);
    match control_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err("control thread panicked".into()),
    }
    let snapshot = observer.snapshot();
    info!(
        state = ?snapshot.state,
        faults = ?snapshot.faults,
        loops = snapshot.telemetry.stats.loop_count,
        overruns = snapshot.telemetry.stats.overruns,
        "Control loop stopped"
    );
    Ok(())
}

/// Log outbound status records; stands in for the bus.
async fn drain_outbound(mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        match frame.status() {
            Some(record) => debug!(id = frame.id, ?record, "tx"),
            None => debug!(id = frame.id, len = frame.payload.len(), "tx (broadcast)"),
        }
    }
}

/// Scripted host: velocity mode, enable both, counter-rotate, then ping to
/// keep the command watchdog fed.
async fn demo_host(tx: mpsc::Sender<Frame>, period: Duration) {
    let script = [
        Command::SetMode(ControlMode::Velocity),
        Command::MotorEnable(EnableFlags {
            enable: [true, true],
            brake: [false, false],
        }),
        Command::SetVelocity([30.0, -30.0]),
    ];
    for cmd in script {
        if !send(&tx, &cmd).await {
            return;
        }
    }
    info!("Demo host: actuators commanded to ±30 RPM");

    let mut sequence = 0u32;
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        sequence = sequence.wrapping_add(1);
        if !send(&tx, &Command::Ping(sequence)).await {
            return;
        }
    }
}

async fn send(tx: &mpsc::Sender<Frame>, cmd: &Command) -> bool {
    let frame = match Frame::new(cmd.id(), &cmd.encode()) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "Demo host: frame rejected");
            return false;
        }
    };
    tx.send(frame).await.is_ok()
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
