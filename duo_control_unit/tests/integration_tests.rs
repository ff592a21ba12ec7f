//! Integration tests for the Duo Control Unit.
//!
//! These tests run both contexts together on simulation hardware with a
//! manual clock: dispatcher commands in, control ticks, published
//! snapshots out.

mod integration;
