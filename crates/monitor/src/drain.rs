//! Per-process output drain.
//!
//! A drain reads one node's combined output line by line, classifies each
//! line and forwards the resulting events to the [`EventBus`] and the
//! [`DerivedStateTracker`].

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, NodeId};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::classifier::LineClassifier;
use crate::state::DerivedStateTracker;

/// Boxed stream of output lines from one process
pub type LineStream = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Merge a process's stdout and stderr into one line stream
///
/// Lines from each pipe keep their order; the two pipes interleave in
/// arrival order.
pub fn merged_lines<O, E>(stdout: O, stderr: E) -> LineStream
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(lossy_lines(stdout).merge(lossy_lines(stderr)))
}

/// Newline-separated lines from one pipe
///
/// Bytes that are not valid UTF-8 are replaced, so a garbled line is just an
/// unrecognized line. The stream ends after the first read error.
fn lossy_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::unfold(Some(BufReader::new(reader)), |reader| async move {
        let Some(mut reader) = reader else {
            return None;
        };

        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Why a drain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The process closed its output
    EndOfStream,
    /// The running flag was cleared
    Cancelled,
    /// Reading failed; an `Error` event was published
    Failed,
}

/// What one drain did before it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    pub node: NodeId,
    pub lines: usize,
    pub events: usize,
    pub outcome: DrainOutcome,
}

pub struct OutputDrain {
    node: NodeId,
    bus: EventBus,
    tracker: DerivedStateTracker,
    running: Arc<AtomicBool>,
    classifier: Arc<LineClassifier>,
}

impl OutputDrain {
    pub fn new(
        node: NodeId,
        bus: EventBus,
        tracker: DerivedStateTracker,
        running: Arc<AtomicBool>,
        classifier: Arc<LineClassifier>,
    ) -> Self {
        Self {
            node,
            bus,
            tracker,
            running,
            classifier,
        }
    }

    /// Run the drain on its own task
    pub fn spawn<S>(self, lines: S) -> JoinHandle<DrainSummary>
    where
        S: Stream<Item = io::Result<String>> + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(lines))
    }

    /// Consume `lines` until the stream ends, fails, or the running flag
    /// is cleared.
    ///
    /// The flag is checked after each line arrives and before it is
    /// processed, so nothing read after cancellation is published. After
    /// cancellation or a failure the rest of the stream is read and
    /// discarded; a closed pipe would kill the node on its next write.
    pub async fn run<S>(self, mut lines: S) -> DrainSummary
    where
        S: Stream<Item = io::Result<String>> + Unpin,
    {
        let mut summary = DrainSummary {
            node: self.node,
            lines: 0,
            events: 0,
            outcome: DrainOutcome::EndOfStream,
        };

        while let Some(next) = lines.next().await {
            if !self.running.load(Ordering::SeqCst) {
                summary.outcome = DrainOutcome::Cancelled;
                break;
            }

            match next {
                Ok(line) => {
                    summary.lines += 1;
                    if self.handle_line(&line) {
                        summary.events += 1;
                    }
                }
                Err(e) => {
                    warn!(node = self.node, error = %e, "Failed to read node output");
                    self.bus.publish(Event::error(self.node, e.to_string()));
                    summary.events += 1;
                    summary.outcome = DrainOutcome::Failed;
                    break;
                }
            }
        }

        if summary.outcome != DrainOutcome::EndOfStream {
            let mut discarded = 0usize;
            while lines.next().await.is_some() {
                discarded += 1;
            }
            trace!(node = self.node, discarded, "Discarded output after drain stopped");
        }

        debug!(
            node = summary.node,
            lines = summary.lines,
            events = summary.events,
            outcome = ?summary.outcome,
            "Output drain finished"
        );

        summary
    }

    fn handle_line(&self, line: &str) -> bool {
        let Some(event) = self.classifier.classify(line) else {
            trace!(node = self.node, line = %line, "Unrecognized output line");
            return false;
        };

        self.tracker.observe(&event);
        self.bus.publish(event);
        true
    }
}
