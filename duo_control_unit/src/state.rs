//! Operating-state supervision.

pub mod machine;
