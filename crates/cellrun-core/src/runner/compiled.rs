//! Compiled runner: compile to a temp binary, then run it.
//!
//! The compile phase is always consumed buffered; its diagnostics become the
//! cell output when it fails. Only the run phase streams.

use tokio::process::Command;

use super::{ExecutionRequest, expand_args};
use crate::error::{Error, Result};
use crate::language::CompiledConfig;
use crate::process::{EventStream, spawn_events};
use crate::stream::{PumpOptions, pump};
use crate::workspace::Workspace;

pub(super) async fn launch(
    request: &ExecutionRequest,
    config: &CompiledConfig,
    workspace: &Workspace,
) -> Result<EventStream> {
    let source = workspace.artifact(request.run_id, request.language.suffix);
    let binary = workspace.binary(request.run_id);
    source.write(&request.source).await?;

    let mut compile = Command::new(&request.executable);
    compile
        .args(expand_args(
            config.compile_args,
            &[("{src}", source.path()), ("{bin}", binary.path())],
        ))
        .current_dir(workspace.root());

    tracing::debug!(
        "Compiling {} cell with {}",
        request.language.name,
        request.executable.display()
    );
    let events = spawn_events(compile, Vec::new())?;
    let outcome = pump(events, &request.cancel, PumpOptions::buffered(request.timeout), |_| {}).await;

    if outcome.cancelled {
        return Err(Error::Aborted);
    }
    if outcome.timed_out {
        return Err(Error::Timeout(outcome.elapsed));
    }
    if outcome.exit_code != Some(0) {
        tracing::debug!(
            "{} compile failed with {:?}",
            request.language.name,
            outcome.exit_code
        );
        return Err(Error::Compilation {
            language: request.language.name.to_string(),
            diagnostics: outcome.text,
        });
    }

    let mut run = Command::new(binary.path());
    run.current_dir(workspace.root());
    spawn_events(run, vec![source, binary])
}
