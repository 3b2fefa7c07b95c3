//! Error types shared by the solver engine and its binaries.

use thiserror::Error;

/// Result alias used throughout the solver.
pub type SolverResult<T> = Result<T, SolverError>;

/// Failures the engine can surface to callers.
///
/// Storage faults are not retried here; the backend is expected to handle
/// transient I/O internally. A failed batch aborts the current phase and the
/// run resumes from the last committed checkpoint on the next invocation.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Read or write failure from the key-value backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// On-disk data that violates the database schema (truncated records,
    /// out-of-range result bytes, mismatched id mappings).
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Legacy checkpoint file rejected during import.
    #[error("checkpoint import failed: {0}")]
    Import(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
