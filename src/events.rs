//! Events driving the supervisor loop.
//!
//! Trigger sources (periodic timers, the link receiver, the retrieval task) never
//! do work themselves. They post an [`Event`] into a bounded mpsc queue and return
//! immediately; the supervisor receives the events one at a time and owns every
//! state change.
//!
//! ```text
//! sample timer  ──┐
//! cleanup timer ──┤                         ┌─> SampleProducer + FlashLog::append
//! link receiver ──┼── mpsc (bounded) ──> Supervisor
//! retrieval     ──┘                         └─> RetrievalTask start/halt, erase
//! ```
//!
//! Posting uses `try_send`, so a trigger costs O(1) and never blocks. When the
//! queue is full the event is dropped: every trigger is periodic or repeatable,
//! and the next one carries the same request.

use crate::config::consts::EVENT_QUEUE_DEPTH;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Work requested of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Sampling period elapsed
    SampleTick,
    /// Cleanup period elapsed while the log was fully transmitted
    CleanupTick,
    /// Bytes arrived on the link
    RetrievalRequested,
    /// The retrieval task transmitted every record
    RetrievalFinished,
    /// Stop the loop
    Shutdown,
}

/// Cheap, cloneable handle for posting events
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Post without waiting; returns false once the supervisor is gone
    pub fn post(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                trace!(?event, "Event posted");
                true
            }
            Err(TrySendError::Full(event)) => {
                debug!(?event, "Event queue full, trigger dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the supervisor queue with the default depth
pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    channel_with_depth(EVENT_QUEUE_DEPTH)
}

/// Create the supervisor queue with an explicit depth
pub fn channel_with_depth(depth: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (EventSender { tx }, rx)
}
