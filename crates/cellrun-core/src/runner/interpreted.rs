//! Interpreted runner: temp file plus interpreter.

use tokio::process::Command;

use super::{ExecutionRequest, expand_args};
use crate::error::Result;
use crate::language::InterpretedConfig;
use crate::process::{EventStream, spawn_events};
use crate::toolchain::expand_home;
use crate::workspace::Workspace;

pub(super) async fn launch(
    request: &ExecutionRequest,
    config: &InterpretedConfig,
    workspace: &Workspace,
) -> Result<EventStream> {
    let script = workspace.artifact(request.run_id, request.language.suffix);
    script.write(&request.source).await?;

    let mut command = Command::new(&request.executable);
    command
        .args(expand_args(config.args, &[("{file}", script.path())]))
        .current_dir(workspace.root());
    for (key, value) in config.env {
        command.env(key, expand_home(value));
    }

    tracing::debug!(
        "Running {} cell via {}",
        request.language.name,
        request.executable.display()
    );
    spawn_events(command, vec![script])
}
