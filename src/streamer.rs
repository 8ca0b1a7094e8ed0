//! Multi-pod log tailing into one file per container.
//!
//! A session runs two tasks joined by an in-memory pipe:
//!
//! - the upstream task drives a [`LogSource`], which writes one JSON record
//!   per line into the pipe, and drops its end of the pipe when the source is
//!   exhausted or the session token is cancelled;
//! - the demultiplexing task reads the pipe to EOF, appends each message to
//!   `<base>/<namespace>/<pod>/<container>.log`, closes every file and only
//!   then publishes the terminal [`SessionState`].

use crate::error::{CaptureError, Result};
use crate::outcome::{LineOutcome, OutcomeTally, SkipReason};
use crate::parser::{parse_line, strip_line_ending};
use crate::registry::OpenFileRegistry;
use crate::types::{ContainerKey, LogRecord, TaggedLine};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bytes buffered between the upstream and the demultiplexing task.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    /// The source ran out and every line was written.
    Drained,
    /// The session token was cancelled; buffered lines were still written.
    Cancelled,
}

impl SessionState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Drained | Self::Cancelled)
    }
}

/// Write end of the session pipe handed to a [`LogSource`].
pub struct LineSink {
    pipe: DuplexStream,
}

impl LineSink {
    /// Write one record as a JSON line.
    pub async fn send(&mut self, line: &TaggedLine) -> Result<()> {
        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');
        self.send_raw(&buf).await
    }

    /// Write bytes as they are. The caller is responsible for line framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.pipe
            .write_all(bytes)
            .await
            .map_err(CaptureError::PipeClosed)
    }
}

/// Producer of tagged log lines for a tail session.
///
/// `pump` should run until the source is exhausted. The session drops the
/// future on cancellation, so sources need no cancellation handling of their
/// own beyond being safe to drop.
pub trait LogSource: Send + 'static {
    fn pump(self, sink: LineSink) -> impl Future<Output = Result<()>> + Send;
}

/// What the demultiplexing task did over the whole session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxReport {
    pub tally: OutcomeTally,
    pub files_closed: usize,
}

/// Completion signal of a session. Cheap to clone; every clone observes the
/// same single transition to a finished state.
#[derive(Clone)]
pub struct Completion {
    state: watch::Receiver<SessionState>,
}

impl Completion {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_finished()
    }

    /// Wait until the session has finished writing and closed its files.
    pub async fn wait(&mut self) -> SessionState {
        let finished = self.state.wait_for(|s| s.is_finished()).await.map(|s| *s);
        match finished {
            Ok(state) => state,
            // the demultiplexing task is gone: nothing more will be written
            Err(_) => match self.state() {
                state if state.is_finished() => state,
                _ => SessionState::Cancelled,
            },
        }
    }
}

/// A running tail session.
pub struct TailSession {
    cancel: CancellationToken,
    completion: Completion,
    upstream: JoinHandle<()>,
    demux: JoinHandle<DemuxReport>,
}

impl TailSession {
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    /// Ask the session to stop. Lines already in the pipe are still written.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for both tasks and return the terminal state with the report.
    pub async fn wait(mut self) -> (SessionState, DemuxReport) {
        let state = self.completion.wait().await;
        if let Err(e) = self.upstream.await {
            error!("Upstream log task failed: {}", e);
        }
        let report = match self.demux.await {
            Ok(report) => report,
            Err(e) => {
                error!("Log writer task failed: {}", e);
                DemuxReport::default()
            }
        };
        (state, report)
    }
}

/// Tails a [`LogSource`] into per-container files under one base directory.
///
/// At most one session should write to a given base directory at a time.
pub struct MultiPodLogStreamer {
    output_dir: PathBuf,
    pipe_capacity: usize,
}

impl MultiPodLogStreamer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Spawn the session tasks. Must be called from within a Tokio runtime.
    pub fn start<S: LogSource>(self, cancel: CancellationToken, source: S) -> TailSession {
        let (write_end, read_end) = tokio::io::duplex(self.pipe_capacity);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        state_tx.send_replace(SessionState::Streaming);

        info!("Tailing logs into {}", self.output_dir.display());

        let upstream_cancel = cancel.clone();
        let upstream = tokio::spawn(async move {
            let sink = LineSink { pipe: write_end };
            tokio::select! {
                result = source.pump(sink) => match result {
                    Ok(()) => debug!("Log source reached end of stream"),
                    Err(e) => warn!("Log source stopped: {}", e),
                },
                _ = upstream_cancel.cancelled() => debug!("Log tail cancelled"),
            }
            // the sink is dropped with the pump future, closing the pipe
        });

        let registry = OpenFileRegistry::new(self.output_dir);
        let demux_cancel = cancel.clone();
        let demux = tokio::spawn(async move {
            let report = demultiplex(read_end, registry).await;
            let state = if demux_cancel.is_cancelled() {
                SessionState::Cancelled
            } else {
                SessionState::Drained
            };
            info!(
                "Log tail finished ({:?}): {} lines written, {} dropped, {} files",
                state,
                report.tally.written,
                report.tally.dropped(),
                report.files_closed
            );
            state_tx.send_replace(state);
            report
        });

        TailSession {
            cancel,
            completion: Completion { state: state_rx },
            upstream,
            demux,
        }
    }
}

fn record_target(record: &LogRecord) -> Option<ContainerKey> {
    Some(ContainerKey {
        namespace: record.namespace.clone()?,
        pod_name: record.pod_name.clone()?,
        container_name: record.container_name.clone()?,
    })
}

async fn route_line(registry: &mut OpenFileRegistry, line: &[u8]) -> LineOutcome {
    let record = match parse_line(line) {
        Ok(record) => record,
        Err(e) => return LineOutcome::Skipped(SkipReason::Malformed(e)),
    };
    match record_target(&record) {
        Some(key) => registry.append(&key, &record.message).await,
        None => LineOutcome::Skipped(SkipReason::NoTarget),
    }
}

/// Read the pipe to EOF, routing every line, then close all files.
async fn demultiplex(read_end: DuplexStream, mut registry: OpenFileRegistry) -> DemuxReport {
    let mut reader = BufReader::new(read_end);
    let mut tally = OutcomeTally::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = strip_line_ending(&buf);
                if line.trim_ascii().is_empty() {
                    continue;
                }
                let outcome = route_line(&mut registry, line).await;
                tally.record(outcome, line);
            }
            Err(e) => {
                warn!("Could not read log line from pipe: {}", e);
                break;
            }
        }
    }
    debug!(
        "Closing {} log files under {}",
        registry.len(),
        registry.base_dir().display()
    );
    let files_closed = registry.close_all().await;
    DemuxReport {
        tally,
        files_closed,
    }
}
