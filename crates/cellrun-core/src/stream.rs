//! Consuming event streams.
//!
//! [`pump`] is the single consumer loop behind both delivery modes: with a
//! flush interval it reports accumulated output at a bounded rate, without
//! one it just buffers until the stream ends.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, sleep_until};

use crate::cancel::AbortHandle;
use crate::error::Result;
use crate::process::{EventStream, StreamEvent};
use crate::runner::{ExecutionResult, RunStatus};

/// Anything that can turn a cell into an event stream.
///
/// The local [`crate::Engine`] is the production implementation; tests and
/// hosts can plug in their own.
pub trait StreamingBackend: Send + Sync {
    /// Start executing `source` as `language`.
    ///
    /// `cancel` covers preparation (e.g. a compile phase); once the stream
    /// is returned, closing it stops the run.
    fn open<'a>(
        &'a self,
        language: &'a str,
        source: &'a str,
        cancel: &'a AbortHandle,
    ) -> BoxFuture<'a, Result<EventStream>>;

    /// Directory that relative output references resolve against.
    fn workspace_root(&self) -> &Path;
}

/// How [`pump`] consumes a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PumpOptions {
    /// Minimum spacing between flushes. `None` never flushes early.
    pub flush_interval: Option<Duration>,
    /// Wall-clock limit.
    pub timeout: Option<Duration>,
}

impl PumpOptions {
    /// Buffer everything until the stream ends.
    pub fn buffered(timeout: Option<Duration>) -> Self {
        Self {
            flush_interval: None,
            timeout,
        }
    }

    /// Flush at most once per `interval`.
    pub fn streaming(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            flush_interval: Some(interval),
            timeout,
        }
    }
}

/// What a consumed stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Combined stdout/stderr in arrival order.
    pub text: String,
    /// Exit code, if the producer reported one.
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl StreamOutcome {
    /// Convert into an execution result.
    pub fn into_result(self) -> ExecutionResult {
        let status = if self.cancelled {
            RunStatus::Cancelled
        } else if self.exit_code == Some(0) && !self.timed_out {
            RunStatus::Success
        } else {
            RunStatus::RuntimeFailure
        };

        let mut output = self.text;
        if self.timed_out {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!(
                "[execution timed out after {}s]",
                self.elapsed.as_secs()
            ));
        }

        ExecutionResult {
            output,
            status,
            exit_code: self.exit_code.filter(|_| !self.cancelled && !self.timed_out),
            elapsed: self.elapsed,
        }
    }
}

/// Consume `events` until the producer finishes, `cancel` fires, or the
/// timeout elapses.
///
/// `on_flush` receives the whole accumulated text, at most once per flush
/// interval and once more at the end if anything is unreported. The stream
/// is always closed before returning, so the producer's cleanup has run.
pub async fn pump<F>(
    mut events: EventStream,
    cancel: &AbortHandle,
    options: PumpOptions,
    mut on_flush: F,
) -> StreamOutcome
where
    F: FnMut(&str),
{
    let start = Instant::now();
    let deadline = options.timeout.map(|t| start + t);

    let mut text = String::new();
    let mut exit_code = None;
    let mut cancelled = false;
    let mut timed_out = false;
    let mut dirty = false;
    let mut last_flush = start;

    loop {
        let flush_at = options
            .flush_interval
            .filter(|_| dirty)
            .map(|interval| last_flush + interval);

        tokio::select! {
            biased;

            _ = cancel.aborted() => {
                cancelled = true;
                break;
            }
            _ = sleep_until_opt(deadline) => {
                tracing::debug!("Run exceeded {:?}", options.timeout);
                timed_out = true;
                break;
            }
            _ = sleep_until_opt(flush_at) => {
                on_flush(&text);
                dirty = false;
                last_flush = Instant::now();
            }
            event = events.next_event() => match event {
                Some(StreamEvent::Stdout(chunk)) | Some(StreamEvent::Stderr(chunk)) => {
                    text.push_str(&chunk);
                    dirty = true;
                }
                Some(StreamEvent::Exit(code)) => {
                    exit_code = Some(code);
                    break;
                }
                None => break,
            },
        }
    }

    events.close().await;

    if dirty && options.flush_interval.is_some() {
        on_flush(&text);
    }

    StreamOutcome {
        text,
        exit_code,
        cancelled,
        timed_out,
        elapsed: start.elapsed(),
    }
}

/// Open a stream on `backend` and consume it into a result.
pub async fn run_streaming<F>(
    backend: &dyn StreamingBackend,
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
    let mut result = match backend.open(language, source, cancel).await {
        Ok(events) => pump(events, cancel, options, on_flush).await.into_result(),
        Err(e) => ExecutionResult::from_error(e, start.elapsed()),
    };
    result.elapsed = start.elapsed();
    result
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
