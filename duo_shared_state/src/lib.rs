//! # Duo Shared State
//!
//! Lock-free, single-writer multi-reader snapshot exchange for passing
//! fixed-size `Copy` records between a hard real-time context and any
//! number of asynchronous readers.
//!
//! ## Guarantees
//!
//! - **Wait-free writes**: a write is two atomic stores, two fences and a
//!   copy. The writer never observes readers.
//! - **Tear-free reads**: a reader retries whenever the version counter was
//!   odd or changed across its copy, so it never returns a partially
//!   written value.
//! - **Bounded or unbounded retry**: [`SnapshotReader::try_read`] gives up
//!   after a caller-chosen number of attempts (for RT callers);
//!   [`SnapshotReader::read`] retries until a stable copy is obtained.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Writer        │    │  SnapshotCell   │    │   Reader 1      │
//! │ SnapshotWriter  ├───►│ [Version|Data]  ├───►│ SnapshotReader  │
//! └─────────────────┘    └────────┬────────┘    └─────────────────┘
//!                                 │             ┌─────────────────┐
//!                                 └────────────►│   Reader N      │
//!                                               └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use duo_shared_state::snapshot_channel;
//!
//! #[derive(Clone, Copy, Default)]
//! struct Telemetry { position: i32, velocity: f32 }
//!
//! let (mut writer, mut reader) = snapshot_channel(Telemetry::default());
//! writer.write(Telemetry { position: 10, velocity: 1.5 });
//! let snap = reader.read();
//! assert_eq!(snap.position, 10);
//! ```

pub mod error;
pub mod seqlock;
pub mod version;

pub use error::{SharedStateError, SharedStateResult};
pub use seqlock::{SnapshotReader, SnapshotWriter, snapshot_channel};
pub use version::VersionCounter;
