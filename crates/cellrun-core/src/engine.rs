//! Execution dispatcher.
//!
//! [`Engine`] is the single entry point the session layer talks to. It owns
//! the session workspace and the toolchain resolver, picks the runner for a
//! language tag, and folds every failure into an [`ExecutionResult`].

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cancel::AbortHandle;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::language;
use crate::output::ClassifiedOutput;
use crate::process::EventStream;
use crate::runner::{self, BridgeProvider, ExecutionRequest, ExecutionResult, compose_source};
use crate::stream::{PumpOptions, StreamingBackend, pump};
use crate::toolchain::{EnvironmentProvider, NoEnvironment, ToolchainResolver};
use crate::workspace::Workspace;

/// Runs cells in external processes.
pub struct Engine {
    config: EngineConfig,
    workspace: Workspace,
    resolver: ToolchainResolver,
    environment: Arc<dyn EnvironmentProvider>,
    bridge: Option<Arc<dyn BridgeProvider>>,
}

impl Engine {
    /// Create an engine. The workspace directory is created on first run.
    pub fn new(config: EngineConfig) -> Self {
        let workspace = match &config.workspace_root {
            Some(root) => Workspace::new(root),
            None => Workspace::for_session(),
        };
        Self {
            config,
            workspace,
            resolver: ToolchainResolver::new(),
            environment: Arc::new(NoEnvironment),
            bridge: None,
        }
    }

    /// Use a custom toolchain resolver.
    pub fn with_resolver(mut self, resolver: ToolchainResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use an environment provider for interpreter overrides.
    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentProvider>) -> Self {
        self.environment = environment;
        self
    }

    /// Splice a bridge snippet into primary-language cells.
    pub fn with_bridge(mut self, bridge: Arc<dyn BridgeProvider>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Resolve the language and toolchain and compose the source.
    ///
    /// Nothing is spawned; a missing toolchain fails here.
    pub fn prepare(&self, language: &str, source: &str, cancel: &AbortHandle) -> Result<ExecutionRequest> {
        let spec = language::lookup(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))?;

        let override_path = self.environment.interpreter_override(spec.name);
        let executable = self.resolver.resolve(spec, override_path.as_deref())?;

        let run_id = Uuid::new_v4();
        let bridge = self
            .bridge
            .as_ref()
            .filter(|_| self.is_primary(spec.name))
            .and_then(|bridge| bridge.snippet(spec.name));
        let source = compose_source(spec, source, self.workspace.root(), run_id, bridge.as_deref());

        Ok(ExecutionRequest {
            run_id,
            language: spec,
            executable,
            source,
            cancel: cancel.clone(),
            timeout: self.config.run_timeout(spec.name),
        })
    }

    /// Prepare and start a run, returning its event stream.
    pub async fn launch(&self, language: &str, source: &str, cancel: &AbortHandle) -> Result<EventStream> {
        let request = self.prepare(language, source, cancel)?;
        self.workspace.ensure()?;

        tracing::info!(
            "Dispatching {} run {} ({})",
            request.language.name,
            request.run_id.simple(),
            request.executable.display()
        );
        runner::launch(&request, &self.workspace).await
    }

    /// Run to completion and return the captured output.
    pub async fn execute(&self, language: &str, source: &str, cancel: &AbortHandle) -> ExecutionResult {
        let options = PumpOptions::buffered(self.config.run_timeout(language));
        self.execute_with(language, source, cancel, options, |_| {}).await
    }

    /// Run to completion, reporting accumulated output at most once per
    /// flush interval.
    pub async fn execute_streaming<F>(
        &self,
        language: &str,
        source: &str,
        cancel: &AbortHandle,
        on_flush: F,
    ) -> ExecutionResult
    where
        F: FnMut(&str),
    {
        let options = PumpOptions::streaming(self.config.flush_interval(), self.config.run_timeout(language));
        self.execute_with(language, source, cancel, options, on_flush).await
    }

    async fn execute_with<F>(
        &self,
        language: &str,
        source: &str,
        cancel: &AbortHandle,
        options: PumpOptions,
        on_flush: F,
    ) -> ExecutionResult
    where
        F: FnMut(&str),
    {
        let start = Instant::now();
        let mut result = match self.launch(language, source, cancel).await {
            Ok(events) => pump(events, cancel, options, on_flush).await.into_result(),
            Err(e) => ExecutionResult::from_error(e, start.elapsed()),
        };
        // Include the compile phase, if any.
        result.elapsed = start.elapsed();
        tracing::debug!(
            "{} run finished: {:?} in {:?}",
            language,
            result.status,
            result.elapsed
        );
        result
    }

    /// Classify a result against this engine's workspace.
    pub fn classify(&self, result: &ExecutionResult) -> ClassifiedOutput {
        result.classify(self.workspace.root())
    }

    fn is_primary(&self, name: &str) -> bool {
        language::lookup(&self.config.primary_language).is_some_and(|spec| spec.name == name)
    }
}

impl StreamingBackend for Engine {
    fn open<'a>(
        &'a self,
        language: &'a str,
        source: &'a str,
        cancel: &'a AbortHandle,
    ) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(self.launch(language, source, cancel))
    }

    fn workspace_root(&self) -> &Path {
        self.workspace.root()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workspace", &self.workspace)
            .field("resolver", &self.resolver)
            .field("bridge", &self.bridge.is_some())
            .finish_non_exhaustive()
    }
}
