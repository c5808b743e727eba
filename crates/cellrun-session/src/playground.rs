//! Single-buffer interactive playground.
//!
//! The playground holds one cell. With auto-run enabled, every edit goes
//! through the [`Coordinator`]: after the quiet period the source is
//! analysed, and only a still-current edit is dispatched. Output streams
//! into the cell at a bounded rate while the program runs.
//!
//! Programs that open a GUI are never auto-run, since they would block
//! waiting for a window; an explicit [`Playground::run`] still runs them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cellrun_core::{
    Analysis, Engine, EngineConfig, PumpOptions, RunStatus, StreamingBackend, analyze, run_streaming,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cell::{Cell, CellId};
use crate::coordinator::{Coordinator, EditTicket};
use crate::events::{EVENT_CHANNEL_CAPACITY, SessionEvent};
use crate::kernel::{Kernel, KernelStatus};

/// Identity of the playground's only cell.
pub const PLAYGROUND_CELL: CellId = CellId::new(0);

/// Observable playground state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaygroundState {
    pub cell: Cell,
    /// Analysis of the last dispatched or blocked edit.
    pub analysis: Option<Analysis>,
    pub auto_run: bool,
    /// Why the last auto-run was skipped.
    pub blocked: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Edit-driven: debounced, GUI programs skipped.
    Auto,
    /// Explicit request: immediate.
    Manual,
}

struct Inner {
    backend: Arc<dyn StreamingBackend>,
    config: EngineConfig,
    coordinator: Coordinator,
    kernel: Kernel,
    state: watch::Sender<PlaygroundState>,
    tx: broadcast::Sender<SessionEvent>,
    /// Generation whose run currently marks the cell as running (0 = none).
    running_generation: AtomicU64,
}

impl Inner {
    fn broadcast(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    fn snapshot_source(&self) -> (String, String) {
        let state = self.state.borrow();
        (state.cell.language.clone(), state.cell.source.clone())
    }

    /// Analyse, then run if the ticket is still current. `None` means the
    /// edit was superseded or blocked before anything was dispatched.
    async fn pipeline(self: Arc<Self>, ticket: EditTicket, trigger: Trigger) -> Option<RunStatus> {
        if trigger == Trigger::Auto && !self.coordinator.debounce(&ticket).await {
            return None;
        }

        let (language, source) = self.snapshot_source();
        let analysis = analyze(&language, &source);
        if !ticket.is_current() {
            return None;
        }

        let blocked = match (&analysis.gui_framework, trigger) {
            (Some(gui), Trigger::Auto) => Some(format!(
                "{gui} programs open a window and are not run automatically; run them explicitly"
            )),
            _ => None,
        };
        self.state.send_modify(|state| {
            state.analysis = Some(analysis.clone());
            state.blocked = blocked.clone();
        });
        self.broadcast(SessionEvent::AnalysisReady {
            cell_id: PLAYGROUND_CELL,
            analysis,
        });
        if let Some(reason) = blocked {
            tracing::info!("Auto-run skipped: {}", reason);
            self.broadcast(SessionEvent::AutoRunBlocked {
                cell_id: PLAYGROUND_CELL,
                reason,
            });
            return None;
        }

        Some(self.dispatch(&ticket, &language, &source).await)
    }

    async fn dispatch(&self, ticket: &EditTicket, language: &str, source: &str) -> RunStatus {
        let generation = ticket.generation();
        self.running_generation.store(generation, Ordering::Release);
        self.state.send_modify(|state| state.cell.begin_run());
        let kernel_ticket = self.kernel.begin();
        self.broadcast(SessionEvent::CellStarted {
            cell_id: PLAYGROUND_CELL,
        });
        tracing::info!("Auto-running {} (generation {})", language, generation);

        let options = PumpOptions::streaming(self.config.flush_interval(), self.config.run_timeout(language));
        let result = run_streaming(
            self.backend.as_ref(),
            language,
            source,
            ticket.cancel(),
            options,
            |text| {
                if ticket.is_latest() {
                    self.state.send_modify(|state| state.cell.show_partial(text));
                    self.broadcast(SessionEvent::CellOutput {
                        cell_id: PLAYGROUND_CELL,
                        text: text.to_string(),
                    });
                }
            },
        )
        .await;

        let owns_cell = self
            .running_generation
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        // A newer edit owns the cell now; a user interrupt does not.
        if !ticket.is_latest() {
            self.kernel.finish(kernel_ticket, false);
            if owns_cell {
                self.state.send_modify(|state| state.cell.abandon_run());
            }
            tracing::debug!("Generation {} superseded", generation);
            return RunStatus::Cancelled;
        }

        let ordinal = self.kernel.finish(kernel_ticket, result.reached_completion());
        let classified = result.classify(self.backend.workspace_root());
        self.state
            .send_modify(|state| state.cell.apply(&result, classified.clone(), ordinal));
        self.broadcast(SessionEvent::CellCompleted {
            cell_id: PLAYGROUND_CELL,
            status: result.status,
            execution_ordinal: ordinal,
            exit_code: result.exit_code,
            duration_ms: result.elapsed.as_millis() as u64,
            output: classified,
        });
        result.status
    }
}

/// Thread-safe handle to a playground.
#[derive(Clone)]
pub struct Playground {
    inner: Arc<Inner>,
}

impl Playground {
    /// Create a playground running on a local engine.
    pub fn new(engine: Engine, language: impl Into<String>) -> Self {
        let config = engine.config().clone();
        Self::with_backend(Arc::new(engine), config, language)
    }

    /// Create a playground on any streaming backend.
    pub fn with_backend(
        backend: Arc<dyn StreamingBackend>,
        config: EngineConfig,
        language: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(PlaygroundState {
            cell: Cell::code(PLAYGROUND_CELL, language, String::new()),
            analysis: None,
            auto_run: true,
            blocked: None,
        });
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                coordinator: Coordinator::new(config.debounce()),
                config,
                kernel: Kernel::new(),
                state,
                tx,
                running_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> PlaygroundState {
        self.inner.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<PlaygroundState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to playground events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.tx.subscribe()
    }

    pub fn kernel_status(&self) -> KernelStatus {
        self.inner.kernel.status()
    }

    /// Replace the source. With auto-run enabled this schedules a debounced
    /// pipeline (must be called within a Tokio runtime) and returns its
    /// handle; earlier pending pipelines are cancelled.
    pub fn edit(&self, source: impl Into<String>) -> Option<JoinHandle<Option<RunStatus>>> {
        let source = source.into();
        self.inner.state.send_modify(|state| state.cell.source = source);
        self.schedule_auto()
    }

    /// Change the language. Schedules an auto-run like [`Playground::edit`].
    pub fn set_language(&self, language: impl Into<String>) -> Option<JoinHandle<Option<RunStatus>>> {
        let language = language.into();
        self.inner.state.send_modify(|state| state.cell.language = language);
        self.schedule_auto()
    }

    /// Enable or disable auto-run. Disabling cancels pending work.
    pub fn set_auto_run(&self, enabled: bool) {
        self.inner.state.send_modify(|state| state.auto_run = enabled);
        if !enabled {
            self.inner.coordinator.cancel_pending();
        }
    }

    /// Run the current source now, superseding any pending auto-run.
    /// Returns `None` if a newer edit superseded this run before dispatch.
    pub async fn run(&self) -> Option<RunStatus> {
        let ticket = self.inner.coordinator.schedule();
        self.inner.clone().pipeline(ticket, Trigger::Manual).await
    }

    /// Cancel the pending or running pipeline. Returns `true` if there was
    /// one.
    pub fn interrupt(&self) -> bool {
        self.inner.coordinator.cancel_pending()
    }

    fn schedule_auto(&self) -> Option<JoinHandle<Option<RunStatus>>> {
        if !self.inner.state.borrow().auto_run {
            return None;
        }
        let ticket = self.inner.coordinator.schedule();
        Some(tokio::spawn(self.inner.clone().pipeline(ticket, Trigger::Auto)))
    }
}
