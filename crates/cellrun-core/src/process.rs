//! Process output as a stream of events.
//!
//! A spawned process is owned by a pump task that forwards stdout/stderr
//! chunks as [`StreamEvent`]s and finishes with [`StreamEvent::Exit`]. The
//! pump also owns the run's [`ArtifactGuard`]s, so temp files outlive the
//! process and are removed right after it is reaped, on every exit path.
//!
//! ```text
//! Command ──spawn──► pump task ──mpsc──► EventStream (consumer)
//!                      │  ├── stdout reader
//!                      │  └── stderr reader
//!                      └── wait / kill ─► drop artifacts ─► drop sender (done)
//! ```

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::workspace::ArtifactGuard;

/// Channel capacity between a process pump and its consumer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read buffer size for process pipes.
const READ_CHUNK: usize = 8 * 1024;

/// One event of an incremental execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk written to stdout.
    Stdout(String),
    /// A chunk written to stderr.
    Stderr(String),
    /// The process exited. `-1` when it was killed by a signal.
    Exit(i32),
}

/// Consumer side of an event sequence.
///
/// Dropping the stream (or calling [`EventStream::close`]) tells the
/// producer to stop; `close` additionally waits until the producer has
/// finished its cleanup.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    stop: CancellationToken,
    done: oneshot::Receiver<()>,
}

/// Producer side of an event sequence.
///
/// The consumer's [`EventStream::close`] completes once every clone of the
/// sender has been dropped, so producers drop it only after cleanup.
pub struct EventSender {
    tx: mpsc::Sender<StreamEvent>,
    stop: CancellationToken,
    _done: oneshot::Sender<()>,
}

impl EventStream {
    /// Create a connected sender/stream pair.
    ///
    /// Streaming backends other than the local process pump use this to
    /// feed events into the engine.
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        (
            EventSender {
                tx,
                stop: stop.clone(),
                _done: done_tx,
            },
            EventStream {
                rx,
                stop,
                done: done_rx,
            },
        )
    }

    /// Receive the next event. `None` once the producer is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop the producer and wait until it has cleaned up.
    pub async fn close(mut self) {
        self.stop.cancel();
        self.rx.close();
        // Drain anything already buffered so a blocked send can complete.
        while self.rx.recv().await.is_some() {}
        let _ = (&mut self.done).await;
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl EventSender {
    /// Send an event. Returns `false` if the consumer has gone away.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// True once the consumer asked the producer to stop.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer asks the producer to stop.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}

/// Spawn `command` and stream its output.
///
/// `artifacts` are dropped (files removed) after the process has been
/// reaped or killed. Cancellation comes from the returned stream: closing
/// or dropping it kills the process.
///
/// # Errors
/// Returns [`Error::Spawn`] if the process cannot be started; the artifacts
/// are removed before returning.
pub fn spawn_events(mut command: Command, artifacts: Vec<ArtifactGuard>) -> Result<EventStream> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })?;
    tracing::debug!("Spawned {} (pid {:?})", program, child.id());

    let (sender, stream) = EventStream::channel();

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(tokio::spawn(forward(pipe, sender.tx.clone(), StreamEvent::Stdout)));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(tokio::spawn(forward(pipe, sender.tx.clone(), StreamEvent::Stderr)));
    }

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = sender.stopped() => None,
        };

        let exit_code = match status {
            Some(Ok(status)) => {
                // Readers finish at EOF once the process is gone, unless a
                // detached grandchild still holds the pipes.
                let drained = async {
                    for reader in readers.iter_mut() {
                        let _ = reader.await;
                    }
                };
                tokio::select! {
                    _ = drained => {}
                    _ = sender.stopped() => {}
                }
                Some(status.code().unwrap_or(-1))
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to wait for {}: {}", program, e);
                None
            }
            None => {
                tracing::debug!("Killing {} on request", program);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill {}: {}", program, e);
                }
                None
            }
        };
        for reader in &readers {
            reader.abort();
        }

        if let Some(code) = exit_code
            && !sender.is_stopped()
        {
            sender.send(StreamEvent::Exit(code)).await;
        }

        drop(child);
        drop(artifacts);
        drop(sender);
    });

    Ok(stream)
}

/// Forward a pipe as events until EOF or until the consumer is gone.
async fn forward<R>(pipe: R, tx: mpsc::Sender<StreamEvent>, wrap: fn(String) -> StreamEvent)
where
    R: AsyncRead + Unpin,
{
    let mut chunks = FramedRead::with_capacity(pipe, Utf8ChunkCodec, READ_CHUNK);

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(text) => {
                if tx.send(wrap(text)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!("Pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Decodes a byte stream into UTF-8 chunks of whatever size is available,
/// without waiting for line ends and never splitting a code point.
#[derive(Debug, Default, Clone, Copy)]
struct Utf8ChunkCodec;

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let valid = match std::str::from_utf8(&buf[..]) {
            Ok(_) => buf.len(),
            // Incomplete sequence at the end: hold it back for the next read.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => buf.len(),
        };
        if valid == 0 {
            return Ok(None);
        }

        let chunk = buf.split_to(valid);
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}
