//! Error types for snapshot exchange

use thiserror::Error;

/// Errors that can occur during snapshot exchange
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedStateError {
    /// Every attempt overlapped a write
    #[error("Version conflict after {attempts} attempts - retry recommended")]
    VersionConflict {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Result type for snapshot exchange
pub type SharedStateResult<T> = Result<T, SharedStateError>;
