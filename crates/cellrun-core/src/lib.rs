//! Local execution engine for cellrun.
//!
//! This crate provides:
//! - Toolchain resolution over conventional install locations
//! - A data-driven language registry with interpreted and compiled runners
//! - Per-run temp artifacts that are removed on every exit path
//! - Buffered and incremental (streaming) execution with cancellation
//! - The output protocol: image markers and structured-data handoff
//! - Static analysis of imports for the auto-run path

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod output;
pub mod process;
pub mod runner;
pub mod stream;
pub mod toolchain;
pub mod workspace;

pub use analysis::{Analysis, analyze};
pub use cancel::AbortHandle;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use language::LanguageSpec;
pub use output::{ClassifiedOutput, classify};
pub use process::{EventSender, EventStream, StreamEvent};
pub use runner::{BridgeProvider, ExecutionRequest, ExecutionResult, RunStatus};
pub use stream::{PumpOptions, StreamOutcome, StreamingBackend, pump, run_streaming};
pub use toolchain::{EnvironmentProvider, NoEnvironment, ToolchainResolver};
pub use workspace::{ArtifactGuard, Workspace};
