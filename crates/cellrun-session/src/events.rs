//! Events published by sessions.
//!
//! Both the notebook and the playground publish on a broadcast channel;
//! subscribers that fall behind lose the oldest events.

use cellrun_core::{Analysis, ClassifiedOutput, RunStatus};
use serde::{Deserialize, Serialize};

use crate::cell::CellId;
use crate::kernel::KernelStatus;

/// Capacity for the broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Messages sent from a session to its observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Cell execution started.
    CellStarted {
        cell_id: CellId,
    },

    /// Partial output of a streamed run (the whole buffer so far).
    CellOutput {
        cell_id: CellId,
        text: String,
    },

    /// Cell execution finished and its result was applied.
    CellCompleted {
        cell_id: CellId,
        status: RunStatus,
        /// Ordinal stamped on the cell, if this run was stamped.
        execution_ordinal: Option<u64>,
        exit_code: Option<i32>,
        /// Execution time in milliseconds.
        duration_ms: u64,
        output: ClassifiedOutput,
    },

    /// Static analysis of a pending auto-run.
    AnalysisReady {
        cell_id: CellId,
        analysis: Analysis,
    },

    /// Auto-run skipped because the program opens a GUI.
    AutoRunBlocked {
        cell_id: CellId,
        reason: String,
    },

    KernelStatusChanged {
        status: KernelStatus,
    },

    OutputsCleared,

    KernelRestarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::CellStarted {
            cell_id: CellId::new(42),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("cell_started"));

        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_completed_carries_classified_output() {
        let event = SessionEvent::CellCompleted {
            cell_id: CellId::new(1),
            status: RunStatus::Success,
            execution_ordinal: Some(3),
            exit_code: Some(0),
            duration_ms: 12,
            output: ClassifiedOutput::text("hi"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cell_completed");
        assert_eq!(json["status"], "success");
        assert_eq!(json["output"]["kind"], "text");
        assert_eq!(json["output"]["text"], "hi");
    }

    #[test]
    fn test_unit_variants() {
        let json = serde_json::to_string(&SessionEvent::KernelRestarted).unwrap();
        assert_eq!(json, r#"{"type":"kernel_restarted"}"#);
    }
}
