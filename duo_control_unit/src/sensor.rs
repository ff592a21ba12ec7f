//! Feedback sensing.

pub mod encoder;
