//! Notebook session management.
//!
//! A [`Notebook`] owns an ordered list of cells, the kernel state tracker
//! and a handle to the execution backend. Runs are buffered: a cell's output
//! is written once, when its run completes.
//!
//! Re-running a cell while an earlier run of it is still in flight cancels
//! the earlier run; only the newest run's result is applied.

use std::sync::Arc;

use cellrun_core::{
    AbortHandle, Engine, EngineConfig, PumpOptions, RunStatus, StreamingBackend, run_streaming,
};
use rustc_hash::FxHashMap;
use tokio::sync::{RwLock, broadcast, watch};
use uuid::Uuid;

use crate::cell::{Cell, CellId, CellKind};
use crate::error::{SessionError, SessionResult};
use crate::events::{EVENT_CHANNEL_CAPACITY, SessionEvent};
use crate::kernel::{Kernel, KernelStatus, RunTicket};

/// A run currently owning a cell.
struct ActiveRun {
    run_id: Uuid,
    cancel: AbortHandle,
}

#[derive(Default)]
struct NotebookState {
    cells: Vec<Cell>,
    active: FxHashMap<CellId, ActiveRun>,
    next_id: usize,
}

impl NotebookState {
    fn cell(&self, cell_id: CellId) -> SessionResult<&Cell> {
        self.cells
            .iter()
            .find(|c| c.id == cell_id)
            .ok_or(SessionError::CellNotFound(cell_id))
    }

    fn cell_mut(&mut self, cell_id: CellId) -> SessionResult<&mut Cell> {
        self.cells
            .iter_mut()
            .find(|c| c.id == cell_id)
            .ok_or(SessionError::CellNotFound(cell_id))
    }

    fn position(&self, cell_id: CellId) -> SessionResult<usize> {
        self.cells
            .iter()
            .position(|c| c.id == cell_id)
            .ok_or(SessionError::CellNotFound(cell_id))
    }
}

struct Inner {
    backend: Arc<dyn StreamingBackend>,
    config: EngineConfig,
    kernel: Kernel,
    state: RwLock<NotebookState>,
    tx: broadcast::Sender<SessionEvent>,
}

impl Inner {
    /// Broadcast an event, ignoring send failures.
    fn broadcast(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Apply a kernel transition and report a status change. Callers hold
    /// the state lock, which serializes transitions.
    fn kernel_transition<T>(&self, transition: impl FnOnce(&Kernel) -> T) -> T {
        let before = self.kernel.status();
        let value = transition(&self.kernel);
        let after = self.kernel.status();
        if before != after {
            self.broadcast(SessionEvent::KernelStatusChanged { status: after });
        }
        value
    }
}

/// Thread-safe handle to a notebook session.
#[derive(Clone)]
pub struct Notebook {
    inner: Arc<Inner>,
}

impl Notebook {
    /// Create a notebook running cells on a local engine.
    pub fn new(engine: Engine) -> Self {
        let config = engine.config().clone();
        Self::with_backend(Arc::new(engine), config)
    }

    /// Create a notebook on any streaming backend.
    pub fn with_backend(backend: Arc<dyn StreamingBackend>, config: EngineConfig) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                kernel: Kernel::new(),
                state: RwLock::new(NotebookState::default()),
                tx,
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.tx.subscribe()
    }

    pub fn kernel_status(&self) -> KernelStatus {
        self.inner.kernel.status()
    }

    /// Observe kernel status changes.
    pub fn watch_kernel(&self) -> watch::Receiver<KernelStatus> {
        self.inner.kernel.subscribe()
    }

    /// Last execution ordinal handed out.
    pub fn execution_count(&self) -> u64 {
        self.inner.kernel.execution_count()
    }

    /// Snapshot of all cells in order.
    pub async fn cells(&self) -> Vec<Cell> {
        self.inner.state.read().await.cells.clone()
    }

    /// Snapshot of one cell.
    pub async fn cell(&self, cell_id: CellId) -> SessionResult<Cell> {
        self.inner.state.read().await.cell(cell_id).cloned()
    }

    /// Append a code cell.
    pub async fn add_cell(&self, language: impl Into<String>, source: impl Into<String>) -> CellId {
        let mut state = self.inner.state.write().await;
        let id = CellId::new(state.next_id);
        state.next_id += 1;
        state.cells.push(Cell::code(id, language, source));
        id
    }

    /// Insert a cell after `after` (at the end when `None`).
    pub async fn insert_cell(
        &self,
        after: Option<CellId>,
        kind: CellKind,
        language: impl Into<String>,
        source: impl Into<String>,
    ) -> SessionResult<CellId> {
        let mut state = self.inner.state.write().await;
        let index = match after {
            Some(after) => state.position(after)? + 1,
            None => state.cells.len(),
        };
        let id = CellId::new(state.next_id);
        state.next_id += 1;
        state.cells.insert(index, Cell::new(id, kind, language, source));
        Ok(id)
    }

    /// Replace a cell's source. Takes effect on the next run.
    pub async fn edit_source(&self, cell_id: CellId, source: impl Into<String>) -> SessionResult<()> {
        let mut state = self.inner.state.write().await;
        state.cell_mut(cell_id)?.source = source.into();
        Ok(())
    }

    /// Change a cell's language tag.
    pub async fn set_language(&self, cell_id: CellId, language: impl Into<String>) -> SessionResult<()> {
        let mut state = self.inner.state.write().await;
        state.cell_mut(cell_id)?.language = language.into();
        Ok(())
    }

    /// Replace a cell's tags.
    pub async fn set_tags(&self, cell_id: CellId, tags: Vec<String>) -> SessionResult<()> {
        let mut state = self.inner.state.write().await;
        state.cell_mut(cell_id)?.tags = tags;
        Ok(())
    }

    /// Delete a cell, cancelling its run if one is in flight.
    pub async fn delete_cell(&self, cell_id: CellId) -> SessionResult<Cell> {
        let mut state = self.inner.state.write().await;
        let index = state.position(cell_id)?;
        if let Some(active) = state.active.remove(&cell_id) {
            active.cancel.abort();
        }
        Ok(state.cells.remove(index))
    }

    /// Run one cell and apply its result.
    ///
    /// Returns the outcome category. A run that was replaced by a newer run
    /// of the same cell, or discarded by a restart, reports `Cancelled` and
    /// leaves the cell untouched. If the cell was deleted while running, the
    /// result is [`SessionError::CellNotFound`].
    pub async fn run_cell(&self, cell_id: CellId) -> SessionResult<RunStatus> {
        let (run_id, cancel, language, source, ticket) = self.begin_run(cell_id).await?;
        self.inner.broadcast(SessionEvent::CellStarted { cell_id });
        tracing::info!("Running {} ({})", cell_id, language);

        let options = PumpOptions::buffered(self.inner.config.run_timeout(&language));
        let result = run_streaming(
            self.inner.backend.as_ref(),
            &language,
            &source,
            &cancel,
            options,
            |_| {},
        )
        .await;
        let classified = result.classify(self.inner.backend.workspace_root());

        let mut state = self.inner.state.write().await;
        let owns_cell = state
            .active
            .get(&cell_id)
            .is_some_and(|active| active.run_id == run_id);
        if !owns_cell {
            self.inner.kernel_transition(|kernel| kernel.finish(ticket, false));
            state.cell(cell_id)?;
            tracing::debug!("Discarding superseded run of {}", cell_id);
            return Ok(RunStatus::Cancelled);
        }
        state.active.remove(&cell_id);

        let stamp = result.reached_completion();
        let ordinal = self.inner.kernel_transition(|kernel| kernel.finish(ticket, stamp));

        let cell = state.cell_mut(cell_id)?;
        cell.apply(&result, classified.clone(), ordinal);
        drop(state);

        self.inner.broadcast(SessionEvent::CellCompleted {
            cell_id,
            status: result.status,
            execution_ordinal: ordinal,
            exit_code: result.exit_code,
            duration_ms: result.elapsed.as_millis() as u64,
            output: classified,
        });
        Ok(result.status)
    }

    async fn begin_run(&self, cell_id: CellId) -> SessionResult<(Uuid, AbortHandle, String, String, RunTicket)> {
        let mut state = self.inner.state.write().await;
        let cell = state.cell_mut(cell_id)?;
        if !cell.kind.is_runnable() {
            return Err(SessionError::NotRunnable(cell_id));
        }
        cell.begin_run();
        let language = cell.language.clone();
        let source = cell.source.clone();

        let run_id = Uuid::new_v4();
        let cancel = AbortHandle::new();
        let previous = state.active.insert(
            cell_id,
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!("Replacing in-flight run of {}", cell_id);
            previous.cancel.abort();
        }

        let ticket = self.inner.kernel_transition(Kernel::begin);
        Ok((run_id, cancel, language, source, ticket))
    }

    /// Run every runnable cell in order.
    ///
    /// Failures do not stop the sequence; a cancelled run does.
    pub async fn run_all(&self) -> SessionResult<Vec<(CellId, RunStatus)>> {
        let ids = self.runnable_ids(|_| true).await;
        self.run_sequence(ids).await
    }

    /// Run the runnable cells carrying `tag` (case-insensitive), in order.
    pub async fn run_tagged(&self, tag: &str) -> SessionResult<Vec<(CellId, RunStatus)>> {
        let ids = self.runnable_ids(|cell| cell.has_tag(tag)).await;
        self.run_sequence(ids).await
    }

    async fn runnable_ids(&self, filter: impl Fn(&Cell) -> bool) -> Vec<CellId> {
        let state = self.inner.state.read().await;
        state
            .cells
            .iter()
            .filter(|cell| cell.kind.is_runnable() && filter(cell))
            .map(|cell| cell.id)
            .collect()
    }

    async fn run_sequence(&self, ids: Vec<CellId>) -> SessionResult<Vec<(CellId, RunStatus)>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for cell_id in ids {
            match self.run_cell(cell_id).await {
                Ok(status) => {
                    outcomes.push((cell_id, status));
                    if status == RunStatus::Cancelled {
                        tracing::info!("Stopping sequence after {} was cancelled", cell_id);
                        break;
                    }
                }
                // Deleted while the sequence was running
                Err(SessionError::CellNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// Cancel the in-flight run of a cell. Returns `true` if a run was
    /// still going; runs already cancelled but not yet unwound don't count.
    pub async fn interrupt(&self, cell_id: CellId) -> bool {
        let state = self.inner.state.read().await;
        state
            .active
            .get(&cell_id)
            .is_some_and(|active| cancel_live(&active.cancel))
    }

    /// Cancel every in-flight run. Returns how many were cancelled by this
    /// call.
    pub async fn interrupt_all(&self) -> usize {
        let state = self.inner.state.read().await;
        state
            .active
            .values()
            .filter(|active| cancel_live(&active.cancel))
            .count()
    }

    /// Restart the kernel.
    ///
    /// Cancels in-flight runs, clears every cell's output and ordinal, and
    /// zeroes the execution counter. The kernel reports `Restarted` until
    /// the settle delay passes, then reverts to `Idle`. Sources are kept.
    pub async fn restart(&self) {
        let epoch = {
            let mut state = self.inner.state.write().await;
            for (_, active) in state.active.drain() {
                active.cancel.abort();
            }
            for cell in &mut state.cells {
                cell.clear_output();
                cell.abandon_run();
            }
            self.inner.kernel_transition(Kernel::restart)
        };
        self.inner.broadcast(SessionEvent::KernelRestarted);

        let inner = self.inner.clone();
        let settle = self.inner.config.restart_settle();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _state = inner.state.write().await;
            inner.kernel_transition(|kernel| kernel.settle(epoch));
        });
    }

    /// Clear every cell's output and ordinal without restarting.
    ///
    /// The execution counter keeps counting from where it was.
    pub async fn clear_outputs(&self) {
        let mut state = self.inner.state.write().await;
        for cell in &mut state.cells {
            cell.clear_output();
        }
        drop(state);
        self.inner.broadcast(SessionEvent::OutputsCleared);
    }
}

/// Abort a run that has not been aborted yet. Returns whether it was live.
fn cancel_live(cancel: &AbortHandle) -> bool {
    if cancel.is_aborted() {
        return false;
    }
    cancel.abort();
    true
}
