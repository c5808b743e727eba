//! Language runners.
//!
//! Two variants drive every language:
//! - [`interpreted`]: write the composed source to a temp file and hand it
//!   to the interpreter.
//! - [`compiled`]: compile the source to a temp binary, then run it.
//!
//! Both produce an [`EventStream`]; buffered execution is the same stream
//! consumed without intermediate flushes (see [`crate::stream::pump`]).

mod compiled;
mod interpreted;
mod template;

pub use template::{BridgeProvider, compose_source};

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::AbortHandle;
use crate::error::{Error, Result};
use crate::language::{LanguageSpec, RunnerKind};
use crate::output::{self, ClassifiedOutput};
use crate::process::EventStream;
use crate::workspace::Workspace;

/// A fully prepared run: language resolved, toolchain located, source
/// composed.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Fresh identifier used in every per-run artifact name.
    pub run_id: Uuid,
    pub language: &'static LanguageSpec,
    /// Resolved interpreter or compiler.
    pub executable: PathBuf,
    /// Cell source with preamble/epilogue applied.
    pub source: String,
    pub cancel: AbortHandle,
    /// Wall-clock limit for each phase.
    pub timeout: Option<Duration>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exit code 0.
    Success,
    /// The program ran and failed (non-zero exit, killed, timed out).
    RuntimeFailure,
    /// The compile phase failed; the program never ran.
    CompileFailure,
    /// No toolchain (or no runner) for the language.
    ToolchainNotFound,
    /// A filesystem or spawn error before the program ran.
    IoFailure,
    /// Cancelled by the caller.
    Cancelled,
}

/// Outcome of one execution. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout/stderr in arrival order, or a diagnostic.
    pub output: String,
    pub status: RunStatus,
    /// Exit code of the program, when it exited on its own.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Fold an error into a result.
    pub fn from_error(error: Error, elapsed: Duration) -> Self {
        let (status, output) = match error {
            Error::ToolchainNotFound { .. } | Error::UnsupportedLanguage(_) => {
                (RunStatus::ToolchainNotFound, error.to_string())
            }
            Error::Compilation { diagnostics, .. } => (RunStatus::CompileFailure, diagnostics),
            Error::Io(_) | Error::Spawn { .. } => (RunStatus::IoFailure, error.to_string()),
            Error::Timeout(_) => (RunStatus::RuntimeFailure, error.to_string()),
            Error::Aborted => (RunStatus::Cancelled, String::new()),
        };
        Self {
            output,
            status,
            exit_code: None,
            elapsed,
        }
    }

    /// True for a zero exit.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// True if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    /// True if the run got as far as a compiler or program verdict.
    pub fn reached_completion(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Success | RunStatus::RuntimeFailure | RunStatus::CompileFailure
        )
    }

    /// Apply the output protocol. Only program output is parsed; diagnostics
    /// from the engine itself stay plain text.
    pub fn classify(&self, workspace: &Path) -> ClassifiedOutput {
        match self.status {
            RunStatus::Success | RunStatus::RuntimeFailure => output::classify(&self.output, workspace),
            _ => ClassifiedOutput::text(self.output.trim_end_matches(['\n', '\r'])),
        }
    }
}

/// Start a prepared request, dispatching on the runner variant.
pub(crate) async fn launch(request: &ExecutionRequest, workspace: &Workspace) -> Result<EventStream> {
    match &request.language.runner {
        RunnerKind::Interpreted(config) => interpreted::launch(request, config, workspace).await,
        RunnerKind::Compiled(config) => compiled::launch(request, config, workspace).await,
    }
}

/// Substitute whole-argument placeholders.
fn expand_args(args: &[&str], bindings: &[(&str, &Path)]) -> Vec<OsString> {
    args.iter()
        .map(|arg| {
            bindings
                .iter()
                .find(|(key, _)| key == arg)
                .map(|(_, path)| path.as_os_str().to_os_string())
                .unwrap_or_else(|| OsString::from(*arg))
        })
        .collect()
}
