//! Kernel state tracking.
//!
//! The kernel is the session-wide execution context: a status and the global
//! execution counter. All mutation happens under one lock, so stamping an
//! ordinal and flipping the status are a single step.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Session-wide kernel status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    #[default]
    Idle,
    Running,
    /// Transient state after a restart; reverts to `Idle` after a delay.
    Restarted,
}

#[derive(Debug, Default)]
struct Counter {
    /// Last ordinal handed out.
    count: u64,
    /// Bumped by every restart; runs begun earlier are not stamped.
    epoch: u64,
    in_flight: usize,
}

/// Proof that a run was registered with the kernel.
#[must_use = "pass the ticket to Kernel::finish"]
#[derive(Debug)]
pub struct RunTicket {
    epoch: u64,
}

/// Status plus global execution counter.
#[derive(Debug)]
pub struct Kernel {
    status: watch::Sender<KernelStatus>,
    counter: Mutex<Counter>,
}

impl Kernel {
    pub fn new() -> Self {
        let (status, _) = watch::channel(KernelStatus::Idle);
        Self {
            status,
            counter: Mutex::new(Counter::default()),
        }
    }

    pub fn status(&self) -> KernelStatus {
        *self.status.borrow()
    }

    /// Observe status changes.
    pub fn subscribe(&self) -> watch::Receiver<KernelStatus> {
        self.status.subscribe()
    }

    /// Last ordinal handed out (0 after a restart).
    pub fn execution_count(&self) -> u64 {
        self.lock().count
    }

    /// Register a dispatched run and enter `Running`.
    pub fn begin(&self) -> RunTicket {
        let mut counter = self.lock();
        counter.in_flight += 1;
        self.status.send_replace(KernelStatus::Running);
        RunTicket {
            epoch: counter.epoch,
        }
    }

    /// Unregister a run. When `stamp` is set the counter advances and the
    /// new value is returned as the run's ordinal. Runs that began before
    /// the last restart are ignored.
    pub fn finish(&self, ticket: RunTicket, stamp: bool) -> Option<u64> {
        let mut counter = self.lock();
        if ticket.epoch != counter.epoch {
            return None;
        }

        counter.in_flight = counter.in_flight.saturating_sub(1);
        let ordinal = stamp.then(|| {
            counter.count += 1;
            counter.count
        });
        if counter.in_flight == 0 {
            self.status.send_replace(KernelStatus::Idle);
        }
        ordinal
    }

    /// Zero the counter, forget in-flight runs and enter `Restarted`.
    /// Returns the new epoch for [`Kernel::settle`].
    pub fn restart(&self) -> u64 {
        let mut counter = self.lock();
        counter.count = 0;
        counter.epoch += 1;
        counter.in_flight = 0;
        self.status.send_replace(KernelStatus::Restarted);
        tracing::info!("Kernel restarted (epoch {})", counter.epoch);
        counter.epoch
    }

    /// Revert `Restarted` to `Idle` if nothing happened since the restart
    /// with the given epoch.
    pub fn settle(&self, epoch: u64) -> bool {
        let counter = self.lock();
        let settled = counter.epoch == epoch && counter.in_flight == 0 && self.status() == KernelStatus::Restarted;
        if settled {
            self.status.send_replace(KernelStatus::Idle);
        }
        settled
    }

    fn lock(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ordinals_are_global() {
        let kernel = Kernel::new();

        let a = kernel.begin();
        assert_eq!(kernel.status(), KernelStatus::Running);
        assert_eq!(kernel.finish(a, true), Some(1));
        assert_eq!(kernel.status(), KernelStatus::Idle);

        let b = kernel.begin();
        assert_eq!(kernel.finish(b, true), Some(2));
        assert_eq!(kernel.execution_count(), 2);
    }

    #[test]
    fn test_unstamped_run_keeps_counter() {
        let kernel = Kernel::new();
        let ticket = kernel.begin();
        assert_eq!(kernel.finish(ticket, false), None);
        assert_eq!(kernel.execution_count(), 0);
        assert_eq!(kernel.status(), KernelStatus::Idle);
    }

    #[test]
    fn test_running_until_last_run_finishes() {
        let kernel = Kernel::new();
        let a = kernel.begin();
        let b = kernel.begin();

        kernel.finish(a, true);
        assert_eq!(kernel.status(), KernelStatus::Running);
        kernel.finish(b, true);
        assert_eq!(kernel.status(), KernelStatus::Idle);
    }

    #[test]
    fn test_restart_discards_old_runs() {
        let kernel = Kernel::new();
        let first = kernel.begin();
        kernel.finish(first, true);
        let stale = kernel.begin();

        let epoch = kernel.restart();
        assert_eq!(kernel.status(), KernelStatus::Restarted);
        assert_eq!(kernel.execution_count(), 0);

        // A run from before the restart neither stamps nor changes status
        assert_eq!(kernel.finish(stale, true), None);
        assert_eq!(kernel.status(), KernelStatus::Restarted);

        assert!(kernel.settle(epoch));
        assert_eq!(kernel.status(), KernelStatus::Idle);

        let fresh = kernel.begin();
        assert_eq!(kernel.finish(fresh, true), Some(1));
    }

    #[test]
    fn test_settle_ignored_after_new_activity() {
        let kernel = Kernel::new();
        let epoch = kernel.restart();
        let ticket = kernel.begin();
        assert!(!kernel.settle(epoch));
        assert_eq!(kernel.status(), KernelStatus::Running);
        kernel.finish(ticket, false);

        let newer = kernel.restart();
        assert!(!kernel.settle(epoch));
        assert!(kernel.settle(newer));
    }

    #[test]
    fn test_concurrent_stamping_is_unique() {
        let kernel = Arc::new(Kernel::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let kernel = kernel.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter_map(|_| {
                            let ticket = kernel.begin();
                            kernel.finish(ticket, true)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=800).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let kernel = Kernel::new();
        let mut rx = kernel.subscribe();
        let ticket = kernel.begin();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), KernelStatus::Running);
        kernel.finish(ticket, true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), KernelStatus::Idle);
    }
}
