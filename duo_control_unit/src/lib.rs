//! # Duo Control Unit Library
//!
//! Closed-loop drive for two DC actuators with quadrature feedback. Two
//! execution contexts share one node:
//!
//! - **Context A** ([`cycle::ControlLoop`]): fixed-rate tick that samples the
//!   encoders, runs safety checks and the state machine, computes the PID
//!   outputs and drives the H-bridge. Never blocks, never allocates.
//! - **Context B** ([`command::dispatcher::ProtocolDispatcher`]): decodes bus
//!   frames, validates and gates commands against the operating state,
//!   writes targets, and emits status records.
//!
//! The contexts meet only in [`exchange`]: versioned snapshots for the two
//! field groups plus atomics for state, faults and the emergency-stop latch.
//!
//! ## Safety Levels
//!
//! 1. **EStop latch**: brakes every channel from any thread, immediately
//! 2. **Fault latch**: sticky `FaultFlags`, cleared only by command
//! 3. **Operating state**: gates which commands and outputs are allowed

pub mod actuator;
pub mod clock;
pub mod command;
pub mod config;
pub mod control;
pub mod cycle;
pub mod exchange;
pub mod safety;
pub mod sensor;
pub mod sim;
pub mod state;
pub mod transport;
