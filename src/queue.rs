//! Bounded streaming queue between the scan workers and the bulk loader.
//!
//! Many producers, one consumer, fixed capacity. Every blocking operation waits
//! for a bounded time and then re-checks the shared [`Cancellation`], so neither
//! side can park forever. End of stream is an explicit [`Item::EndOfStream`]
//! pushed once per phase through an [`EndOfStreamLatch`].

use crate::cancel::Cancellation;
use crate::config::{OFFER_TIMEOUT, POLL_TIMEOUT};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
    Entity(T),
    EndOfStream,
}

/// Why a producer gave up on an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueStopped {
    #[error("copy cancelled")]
    Cancelled,
    #[error("consumer gone")]
    Disconnected,
}

/// Result of one bounded wait on the consumer side.
#[derive(Debug, PartialEq)]
pub enum Poll<T> {
    Item(T),
    EndOfStream,
    /// Nothing arrived within the poll timeout.
    Idle,
    /// Every producer was dropped without an end-of-stream marker.
    Closed,
}

/// Creates a queue holding at most `capacity` items.
pub fn bounded_queue<T>(
    capacity: usize,
    cancel: &Cancellation,
) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        QueueProducer {
            tx,
            cancel: cancel.clone(),
            offer_timeout: OFFER_TIMEOUT,
        },
        QueueConsumer {
            rx,
            cancel: cancel.clone(),
            poll_timeout: POLL_TIMEOUT,
        },
    )
}

pub struct QueueProducer<T> {
    tx: Sender<Item<T>>,
    cancel: Cancellation,
    offer_timeout: Duration,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
            offer_timeout: self.offer_timeout,
        }
    }
}

impl<T> QueueProducer<T> {
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = timeout;
        self
    }

    /// Pushes `entity`, retrying while the queue stays full and the copy is live.
    pub fn offer(&self, entity: T) -> Result<(), QueueStopped> {
        let mut item = Item::Entity(entity);
        loop {
            if self.cancel.is_cancelled() {
                return Err(QueueStopped::Cancelled);
            }
            match self.tx.send_timeout(item, self.offer_timeout) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    trace!("Queue full, retrying offer");
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueStopped::Disconnected),
            }
        }
    }

    /// Pushes the end-of-stream marker.
    ///
    /// After cancellation only one non-blocking attempt is made; the consumer
    /// notices the flag on its next poll if the queue happens to be full.
    pub fn finish(&self) -> Result<(), QueueStopped> {
        let mut item = Item::EndOfStream;
        loop {
            if self.cancel.is_cancelled() {
                return match self.tx.try_send(item) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => Err(QueueStopped::Cancelled),
                    Err(TrySendError::Disconnected(_)) => Err(QueueStopped::Disconnected),
                };
            }
            match self.tx.send_timeout(item, self.offer_timeout) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueStopped::Disconnected),
            }
        }
    }
}

pub struct QueueConsumer<T> {
    rx: Receiver<Item<T>>,
    cancel: Cancellation,
    poll_timeout: Duration,
}

impl<T> QueueConsumer<T> {
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Waits up to the poll timeout for the next item.
    pub fn poll(&self) -> Poll<T> {
        match self.rx.recv_timeout(self.poll_timeout) {
            Ok(Item::Entity(entity)) => Poll::Item(entity),
            Ok(Item::EndOfStream) => Poll::EndOfStream,
            Err(RecvTimeoutError::Timeout) => Poll::Idle,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Counts down once per producer task; the last arrival pushes end-of-stream.
#[derive(Debug)]
pub struct EndOfStreamLatch {
    remaining: AtomicUsize,
}

impl EndOfStreamLatch {
    pub fn new(producers: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(producers),
        }
    }

    /// Marks one producer done. Returns true for the arrival that pushed the marker.
    pub fn arrive<T>(&self, producer: &QueueProducer<T>) -> bool {
        let before = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if before == 1 {
            if let Err(stopped) = producer.finish() {
                debug!(reason = %stopped, "End-of-stream marker not pushed");
            }
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
