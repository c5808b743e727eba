//! Error types for cellrun-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for cellrun-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running a cell.
///
/// These never reach the UI layer directly: [`crate::Engine::execute`]
/// folds every variant into an [`crate::ExecutionResult`].
#[derive(Debug, Error)]
pub enum Error {
    /// No executable could be located for the language.
    #[error("{language} toolchain not found. {hint}")]
    ToolchainNotFound { language: String, hint: String },

    /// No runner is registered for the language tag.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Compile phase exited unsuccessfully.
    #[error("{language} compilation failed")]
    Compilation { language: String, diagnostics: String },

    /// IO error (temp-file write, workspace creation).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Execution was cancelled by the caller.
    #[error("execution aborted")]
    Aborted,

    /// Execution exceeded the configured wall-clock limit.
    #[error("execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl Error {
    /// Build a `ToolchainNotFound` error.
    pub fn toolchain_not_found(language: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolchainNotFound {
            language: language.into(),
            hint: hint.into(),
        }
    }
}
