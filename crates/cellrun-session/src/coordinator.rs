//! Edit-driven debouncing.
//!
//! Every edit schedules a new pipeline generation and cancels the previous
//! one. A pipeline sleeps through the quiet period, analyses, and only then
//! dispatches, checking at each step that no newer edit has arrived:
//!
//! ```text
//! edit ─► schedule(gen N) ─► quiet period ─► analyze ─► is_latest? ─► run
//!  edit ─► schedule(gen N+1) cancels gen N at whichever step it is in
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cellrun_core::AbortHandle;

/// Generation-scoped cancellation for one pipeline.
#[derive(Debug, Clone)]
pub struct EditTicket {
    generation: u64,
    clock: Arc<AtomicU64>,
    cancel: AbortHandle,
}

impl EditTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while no newer generation has been scheduled.
    pub fn is_latest(&self) -> bool {
        self.clock.load(Ordering::Acquire) == self.generation
    }

    /// True while this pipeline may still proceed.
    pub fn is_current(&self) -> bool {
        self.is_latest() && !self.cancel.is_aborted()
    }

    /// Cancellation handle shared with the dispatched run.
    pub fn cancel(&self) -> &AbortHandle {
        &self.cancel
    }
}

/// Serializes analyze-then-run pipelines so that only the latest edit
/// survives.
#[derive(Debug)]
pub struct Coordinator {
    quiet_period: Duration,
    clock: Arc<AtomicU64>,
    pending: Mutex<Option<AbortHandle>>,
}

impl Coordinator {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            clock: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    /// Latest scheduled generation.
    pub fn generation(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Start a new generation, cancelling the previous pipeline.
    pub fn schedule(&self) -> EditTicket {
        let cancel = AbortHandle::new();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.clock.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if let Some(previous) = pending.replace(cancel.clone()) {
            if !previous.is_aborted() {
                tracing::debug!("Generation {} supersedes pending work", generation);
            }
            previous.abort();
        }

        EditTicket {
            generation,
            clock: self.clock.clone(),
            cancel,
        }
    }

    /// Wait out the quiet period. Returns `false` if the ticket was
    /// superseded or cancelled in the meantime.
    pub async fn debounce(&self, ticket: &EditTicket) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.quiet_period) => ticket.is_current(),
            _ = ticket.cancel.aborted() => false,
        }
    }

    /// Cancel the pending pipeline without scheduling a new one.
    /// Returns `true` if there was one to cancel.
    pub fn cancel_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_ref() {
            Some(handle) if !handle.is_aborted() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}
