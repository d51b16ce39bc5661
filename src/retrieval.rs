//! Log retrieval over the link.
//!
//! A retrieval runs as its own tokio task, the secondary context next to the
//! supervisor:
//!
//! 1. status `Idle -> Reading`
//! 2. snapshot the log under the region lock
//! 3. write every record to the link, one at a time, without waiting for any
//!    acknowledgement
//! 4. status `Reading -> ReadDone`, then post [`Event::RetrievalFinished`]
//!
//! # Halt handshake
//!
//! The supervisor never mutates the region while a retrieval may still be
//! reading it. [`RetrievalTask::halt`] publishes a halt request on a `watch`
//! channel and then awaits the task's `JoinHandle`; the task checks the request
//! at every record boundary (and while blocked on a slow link), rolls an
//! unfinished read back to `Idle`, and returns. The join is the acknowledgement.

use crate::error::{AppResult, NodeError};
use crate::events::{Event, EventSender};
use crate::flash::FlashDevice;
use crate::storage::{LogHandle, LogStatus};
use crate::transport::SharedWriter;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a retrieval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Every record was written; status is `ReadDone`
    Completed {
        /// Records written
        sent: usize,
    },
    /// Stopped by a halt request; status rolled back to `Idle`
    Halted {
        /// Records written before the halt
        sent: usize,
    },
    /// Not started because the log was not `Idle`
    Skipped {
        /// Status found at start
        status: LogStatus,
    },
}

struct Running {
    halt: watch::Sender<bool>,
    handle: JoinHandle<AppResult<RetrievalOutcome>>,
}

/// Owner of the (at most one) running retrieval
pub struct RetrievalTask<F: FlashDevice + 'static> {
    log: LogHandle<F>,
    writer: SharedWriter,
    events: EventSender,
    running: Option<Running>,
}

impl<F: FlashDevice + 'static> RetrievalTask<F> {
    /// Retrieval over `writer`, reporting completion on `events`
    pub fn new(log: LogHandle<F>, writer: SharedWriter, events: EventSender) -> Self {
        Self {
            log,
            writer,
            events,
            running: None,
        }
    }

    /// Whether a retrieval task exists and has not returned yet
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Halt any running retrieval, then start a new one
    ///
    /// Ignored while the previous read awaits cleanup (`ReadDone`).
    pub async fn restart(&mut self) -> Option<RetrievalOutcome> {
        let previous = self.halt().await;

        let status = self.log.status();
        if status == LogStatus::ReadDone {
            debug!("Retrieval request ignored, previous read awaiting cleanup");
            return previous;
        }

        let (halt, halt_rx) = watch::channel(false);
        let handle = tokio::spawn(transmit(
            self.log.clone(),
            self.writer.clone(),
            self.events.clone(),
            halt_rx,
        ));
        self.running = Some(Running { halt, handle });
        previous
    }

    /// Collect the outcome of a retrieval that already returned
    ///
    /// Leaves a task that is still transmitting alone.
    pub async fn reap(&mut self) -> Option<RetrievalOutcome> {
        let finished = self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished());
        if finished {
            self.halt().await
        } else {
            None
        }
    }

    /// Stop the running retrieval and wait until it has let go of the log
    ///
    /// Idempotent; returns the outcome of the task that was reaped, if any.
    /// On return no retrieval is reading the region and the status is not
    /// `Reading`.
    pub async fn halt(&mut self) -> Option<RetrievalOutcome> {
        let running = self.running.take()?;
        // a send error only means the task already returned
        let _ = running.halt.send(true);

        let outcome = match running.handle.await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(error = %e, "Retrieval aborted");
                None
            }
            Err(e) => {
                warn!(error = %e, "Retrieval task did not exit cleanly");
                None
            }
        };
        if self.log.status_cell().abort_read() {
            debug!("Unfinished read rolled back to Idle");
        }
        outcome
    }
}

async fn transmit<F: FlashDevice>(
    log: LogHandle<F>,
    writer: SharedWriter,
    events: EventSender,
    mut halt: watch::Receiver<bool>,
) -> AppResult<RetrievalOutcome> {
    let status = log.status_cell();
    let snapshot = {
        let guard = log.lock();
        if let Err(e) = status.transition(LogStatus::Idle, LogStatus::Reading) {
            debug!(error = %e, "Retrieval not started");
            return Ok(RetrievalOutcome::Skipped {
                status: guard.status(),
            });
        }
        guard.snapshot()
    };
    info!(bytes = snapshot.len(), "Retrieval started");

    let mut sent = 0;
    for token in snapshot.records() {
        if *halt.borrow() {
            status.abort_read();
            return Ok(RetrievalOutcome::Halted { sent });
        }

        let write = async {
            let mut link = writer.lock().await;
            link.write_all(token).await?;
            link.flush().await
        };
        tokio::select! {
            biased;
            // a dropped sender counts as a halt request
            _ = halt.changed() => {
                status.abort_read();
                debug!(sent, "Retrieval halted");
                return Ok(RetrievalOutcome::Halted { sent });
            }
            written = write => {
                if let Err(e) = written {
                    status.abort_read();
                    return Err(NodeError::Retrieval(format!(
                        "link write failed after {sent} records: {e}"
                    )));
                }
            }
        }
        sent += 1;
    }

    status.transition(LogStatus::Reading, LogStatus::ReadDone)?;
    info!(sent, "Retrieval complete");
    events.post(Event::RetrievalFinished);
    Ok(RetrievalOutcome::Completed { sent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::flash::RamFlash;
    use crate::storage::FlashLog;
    use crate::transport::Link;
    use tokio::io::AsyncReadExt;

    fn handle_with(records: &[&str]) -> LogHandle<RamFlash> {
        let mut log = FlashLog::mount(RamFlash::new(2048, 1024, 256), 1024, 1024).unwrap();
        for record in records {
            log.append(record.as_bytes()).unwrap();
        }
        LogHandle::new(log)
    }

    #[tokio::test]
    async fn test_transmits_all_records_then_read_done() {
        let log = handle_with(&["\r$ec,1.234,4,10,0,0\n", "\r$ox,97.50,4,10,0,0\n"]);
        let (events, mut rx) = events::channel();
        let (mut host, node) = tokio::io::duplex(1024);
        let link = Link::from_io(node);
        let mut retrieval = RetrievalTask::new(log.clone(), link.writer, events);

        retrieval.restart().await;
        assert_eq!(rx.recv().await, Some(Event::RetrievalFinished));
        assert_eq!(log.status(), LogStatus::ReadDone);
        assert_eq!(
            retrieval.halt().await,
            Some(RetrievalOutcome::Completed { sent: 2 })
        );

        let mut received = vec![0u8; 40];
        host.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"\r$ec,1.234,4,10,0,0\n\r$ox,97.50,4,10,0,0\n");
    }

    #[tokio::test]
    async fn test_request_ignored_while_read_done() {
        let log = handle_with(&["a\n"]);
        log.status_cell().set(LogStatus::Reading).unwrap();
        log.status_cell().set(LogStatus::ReadDone).unwrap();
        let (events, _rx) = events::channel();
        let (_host, node) = tokio::io::duplex(64);
        let mut retrieval = RetrievalTask::new(log.clone(), Link::from_io(node).writer, events);

        retrieval.restart().await;
        assert!(!retrieval.is_running());
        assert_eq!(retrieval.halt().await, None);
        assert_eq!(log.status(), LogStatus::ReadDone);
    }

    #[tokio::test]
    async fn test_halt_unblocks_stalled_link() {
        let log = handle_with(&["\r$ec,1.000,1,1,1,1\n"; 8]);
        let (events, _rx) = events::channel();
        // nobody reads the host side: the second record blocks the writer
        let (_host, node) = tokio::io::duplex(24);
        let mut retrieval = RetrievalTask::new(log.clone(), Link::from_io(node).writer, events);

        retrieval.restart().await;
        while log.status() != LogStatus::Reading {
            tokio::task::yield_now().await;
        }
        let outcome = retrieval.halt().await;
        assert!(matches!(outcome, Some(RetrievalOutcome::Halted { sent }) if sent < 8));
        assert_eq!(log.status(), LogStatus::Idle);
        assert!(!retrieval.is_running());
        // the records are still there for the next request
        assert_eq!(log.snapshot().records().count(), 8);
    }

    #[tokio::test]
    async fn test_halt_without_task_is_noop() {
        let log = handle_with(&[]);
        let (events, _rx) = events::channel();
        let (_host, node) = tokio::io::duplex(64);
        let mut retrieval = RetrievalTask::new(log, Link::from_io(node).writer, events);
        assert_eq!(retrieval.halt().await, None);
        assert_eq!(retrieval.halt().await, None);
    }
}
