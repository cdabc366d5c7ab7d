//! Bounded outbound queue shared between callers and a connection's writer.
//!
//! # How the queue is used
//!
//! Callers push payloads with [`OutboundQueue::push`], which never blocks:
//! when the queue is full the payload is handed back as
//! [`QueueError::Full`] and the caller logs a warning and drops it.  Keeping
//! the link alive is preferred over applying backpressure that could stall
//! the whole node.
//!
//! The writer task owns the single [`OutboundReceiver`] and writes items to
//! the socket in enqueue order.  Receiving [`Outbound::Shutdown`] (the
//! in-process form of the zero-length sentinel) tells the writer to close its
//! side of the connection and exit.
//!
//! The sentinel is pushed with [`OutboundQueue::shutdown`], which waits for
//! capacity instead of failing, so teardown is never lost to a full queue.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::descriptor::PeerId;

/// Default number of payloads buffered per queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors returned when a payload cannot be enqueued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue holds `capacity` items already; the payload was dropped.
    #[error("outbound queue full ({capacity} items), payload dropped")]
    Full { capacity: usize },

    /// Zero-length payloads are reserved for the shutdown sentinel.
    #[error("empty payloads cannot be queued")]
    EmptyPayload,

    /// The writer has exited and the queue no longer accepts items.
    #[error("outbound queue closed")]
    Closed,
}

/// An item travelling from producers to the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A payload to frame and write.
    Frame {
        payload: Vec<u8>,
        /// The peer the payload was received from when it is being relayed,
        /// or `None` for locally produced payloads.
        origin: Option<PeerId>,
    },
    /// Close the connection(s) served by this queue.
    Shutdown,
}

/// Creates a bounded queue holding at most `capacity` items.
///
/// A capacity of zero is raised to one.
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundQueue { tx }, OutboundReceiver { rx })
}

/// Producer side of the outbound queue.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundQueue {
    /// Enqueues a locally produced payload without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`], [`QueueError::EmptyPayload`], or
    /// [`QueueError::Closed`].  In every case the payload is dropped.
    pub fn push(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.enqueue(payload, None)
    }

    /// Enqueues a payload received from `origin` for relaying to peers.
    ///
    /// # Errors
    ///
    /// Same as [`OutboundQueue::push`].
    pub fn relay(&self, payload: Vec<u8>, origin: PeerId) -> Result<(), QueueError> {
        self.enqueue(payload, Some(origin))
    }

    /// Pushes the shutdown sentinel, waiting for capacity if necessary.
    ///
    /// Returns `false` if the writer has already exited.
    pub async fn shutdown(&self) -> bool {
        self.tx.send(Outbound::Shutdown).await.is_ok()
    }

    /// Maximum number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Returns `true` once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn enqueue(&self, payload: Vec<u8>, origin: Option<PeerId>) -> Result<(), QueueError> {
        if payload.is_empty() {
            return Err(QueueError::EmptyPayload);
        }
        match self.tx.try_send(Outbound::Frame { payload, origin }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.capacity(),
            }),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }
}

/// Consumer side of the outbound queue, owned by exactly one writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Outbound>,
}

impl OutboundReceiver {
    /// Waits for the next item.
    ///
    /// Once every producer has been dropped this yields
    /// [`Outbound::Shutdown`], so a writer always terminates.
    pub async fn recv(&mut self) -> Outbound {
        self.rx.recv().await.unwrap_or(Outbound::Shutdown)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
