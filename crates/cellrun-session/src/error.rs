//! Error types for cellrun sessions.

use crate::cell::CellId;

/// Session error type.
///
/// Execution outcomes are never errors; these cover misuse of the session
/// API (unknown cells, running a markdown cell).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Cell not found.
    #[error("Cell not found: {0}")]
    CellNotFound(CellId),

    /// The cell kind cannot be executed.
    #[error("Cell {0} is not runnable")]
    NotRunnable(CellId),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
