//! Notebook and playground sessions for cellrun.
//!
//! Both surfaces run cells through a [`cellrun_core::StreamingBackend`]
//! (normally a [`cellrun_core::Engine`]) and share the same cell model and
//! kernel bookkeeping:
//! - [`Notebook`]: many cells, buffered output, run / run all / run tagged,
//!   interrupt, restart, clear outputs
//! - [`Playground`]: one cell, debounced analyze-then-run on every edit,
//!   streamed output

pub mod cell;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod kernel;
pub mod playground;
pub mod session;

pub use cell::{Cell, CellId, CellKind, CellStatus};
pub use coordinator::{Coordinator, EditTicket};
pub use error::{SessionError, SessionResult};
pub use events::SessionEvent;
pub use kernel::{Kernel, KernelStatus, RunTicket};
pub use playground::{PLAYGROUND_CELL, Playground, PlaygroundState};
pub use session::Notebook;
