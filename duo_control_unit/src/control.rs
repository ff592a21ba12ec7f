//! Control engine root.
//!
//! Velocity PID per actuator, setpoint slew limiting, and trajectory
//! interpolation. Everything here runs inside the control tick and is
//! allocation-free.

pub mod pid;
pub mod slew;
pub mod trajectory;
