//! Observable cell model.
//!
//! The UI reads cells and may edit `source`, `language` and `tags`; every
//! other field is written by the session when a run starts or completes.

use std::fmt;
use std::path::PathBuf;

use cellrun_core::{ClassifiedOutput, ExecutionResult, RunStatus};
use serde::{Deserialize, Serialize};

/// Stable cell identity within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(usize);

impl CellId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// What a cell holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    #[default]
    Code,
    Markdown,
    Raw,
    /// Code generated from a procedure definition; runs like `Code`.
    Procedure,
}

impl CellKind {
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Code | Self::Procedure)
    }
}

/// Cell execution status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Not executed since creation, restart or clear.
    #[default]
    Idle,
    Running,
    Success,
    /// Runtime, compile, toolchain or IO failure.
    Error,
    /// Cancelled before completing.
    Interrupted,
}

/// One unit of source plus its accumulated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub kind: CellKind,
    pub language: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Surfaced output text (markers stripped).
    pub output: String,
    /// Images referenced by the output.
    pub images: Vec<PathBuf>,
    /// Structured-data reference from a handoff.
    pub structured: Option<PathBuf>,
    /// Global execution ordinal of the last completed run.
    pub execution_ordinal: Option<u64>,
    /// Exit code of the last run, annotated apart from the text.
    pub exit_code: Option<i32>,
    /// Outcome category of the last run.
    pub last_run: Option<RunStatus>,
    pub status: CellStatus,
}

impl Cell {
    pub fn new(id: CellId, kind: CellKind, language: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            language: language.into(),
            source: source.into(),
            tags: Vec::new(),
            output: String::new(),
            images: Vec::new(),
            structured: None,
            execution_ordinal: None,
            exit_code: None,
            last_run: None,
            status: CellStatus::Idle,
        }
    }

    /// Create a code cell.
    pub fn code(id: CellId, language: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(id, CellKind::Code, language, source)
    }

    pub fn is_running(&self) -> bool {
        self.status == CellStatus::Running
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// True if the output should be styled as a failure.
    pub fn is_failure(&self) -> bool {
        self.status == CellStatus::Error
    }

    pub(crate) fn begin_run(&mut self) {
        self.status = CellStatus::Running;
    }

    /// Replace the output with a streamed partial buffer.
    pub(crate) fn show_partial(&mut self, text: &str) {
        self.output.clear();
        self.output.push_str(text);
    }

    /// Write a completed run into the cell. `ordinal` is `None` for runs
    /// that are not stamped; the previous ordinal then stays.
    pub(crate) fn apply(&mut self, result: &ExecutionResult, classified: ClassifiedOutput, ordinal: Option<u64>) {
        self.images.clear();
        self.structured = None;
        match classified {
            ClassifiedOutput::Text { text } => self.output = text,
            ClassifiedOutput::TextWithImages { text, images } => {
                self.output = text;
                self.images = images;
            }
            ClassifiedOutput::StructuredHandoff { path } => {
                self.output.clear();
                self.structured = Some(path);
            }
        }

        if ordinal.is_some() {
            self.execution_ordinal = ordinal;
        }
        self.exit_code = result.exit_code;
        self.last_run = Some(result.status);
        self.status = match result.status {
            RunStatus::Success => CellStatus::Success,
            RunStatus::Cancelled => CellStatus::Interrupted,
            _ => CellStatus::Error,
        };
    }

    /// Drop the running state of a run whose result will never be applied.
    pub(crate) fn abandon_run(&mut self) {
        if self.is_running() {
            self.status = match self.last_run {
                None => CellStatus::Idle,
                Some(RunStatus::Success) => CellStatus::Success,
                Some(RunStatus::Cancelled) => CellStatus::Interrupted,
                Some(_) => CellStatus::Error,
            };
        }
    }

    /// Clear output and ordinal.
    pub(crate) fn clear_output(&mut self) {
        self.output.clear();
        self.images.clear();
        self.structured = None;
        self.execution_ordinal = None;
        self.exit_code = None;
        self.last_run = None;
        if !self.is_running() {
            self.status = CellStatus::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(status: RunStatus, exit_code: Option<i32>) -> ExecutionResult {
        ExecutionResult {
            output: String::new(),
            status,
            exit_code,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_cell_id_display() {
        assert_eq!(CellId::new(3).to_string(), "cell_3");
    }

    #[test]
    fn test_runnable_kinds() {
        assert!(CellKind::Code.is_runnable());
        assert!(CellKind::Procedure.is_runnable());
        assert!(!CellKind::Markdown.is_runnable());
        assert!(!CellKind::Raw.is_runnable());
    }

    #[test]
    fn test_apply_success_with_images() {
        let mut cell = Cell::code(CellId::new(0), "python", "plot()");
        cell.begin_run();
        cell.apply(
            &result(RunStatus::Success, Some(0)),
            ClassifiedOutput::TextWithImages {
                text: "done".into(),
                images: vec![PathBuf::from("/ws/plot.png")],
            },
            Some(4),
        );

        assert_eq!(cell.status, CellStatus::Success);
        assert_eq!(cell.output, "done");
        assert_eq!(cell.images, vec![PathBuf::from("/ws/plot.png")]);
        assert_eq!(cell.execution_ordinal, Some(4));
        assert!(!cell.is_running());
    }

    #[test]
    fn test_cancel_keeps_previous_ordinal() {
        let mut cell = Cell::code(CellId::new(0), "python", "x");
        cell.apply(&result(RunStatus::Success, Some(0)), ClassifiedOutput::text("1"), Some(1));

        cell.begin_run();
        cell.apply(&result(RunStatus::Cancelled, None), ClassifiedOutput::text("partial"), None);
        assert_eq!(cell.status, CellStatus::Interrupted);
        assert!(!cell.is_failure());
        assert_eq!(cell.execution_ordinal, Some(1));
        assert_eq!(cell.output, "partial");
    }

    #[test]
    fn test_handoff_clears_text() {
        let mut cell = Cell::code(CellId::new(0), "python", "x");
        cell.output = "old".into();
        cell.apply(
            &result(RunStatus::Success, Some(0)),
            ClassifiedOutput::StructuredHandoff {
                path: PathBuf::from("/tmp/x.parquet"),
            },
            Some(1),
        );
        assert_eq!(cell.output, "");
        assert_eq!(cell.structured, Some(PathBuf::from("/tmp/x.parquet")));
    }

    #[test]
    fn test_runtime_failure_annotates_exit_code() {
        let mut cell = Cell::code(CellId::new(0), "sh", "exit 2");
        cell.apply(&result(RunStatus::RuntimeFailure, Some(2)), ClassifiedOutput::text("boom"), Some(1));
        assert!(cell.is_failure());
        assert_eq!(cell.exit_code, Some(2));
        assert_eq!(cell.output, "boom");
    }

    #[test]
    fn test_clear_output() {
        let mut cell = Cell::code(CellId::new(0), "python", "x");
        cell.apply(&result(RunStatus::Success, Some(0)), ClassifiedOutput::text("1"), Some(7));
        cell.clear_output();
        assert_eq!(cell.status, CellStatus::Idle);
        assert_eq!(cell.execution_ordinal, None);
        assert!(cell.output.is_empty());
        assert_eq!(cell.source, "x");
    }

    #[test]
    fn test_abandon_restores_previous_status() {
        let mut cell = Cell::code(CellId::new(0), "python", "x");
        cell.begin_run();
        cell.abandon_run();
        assert_eq!(cell.status, CellStatus::Idle);

        cell.apply(&result(RunStatus::RuntimeFailure, Some(1)), ClassifiedOutput::text(""), Some(1));
        cell.begin_run();
        cell.abandon_run();
        assert_eq!(cell.status, CellStatus::Error);
    }
}
