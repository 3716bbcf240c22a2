use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::cancel::CancellationToken;

/// The put timed out because the channel stayed full. Carries the item back
/// so the caller can retry without dropping it.
#[derive(Debug)]
pub struct PutTimeout<T>(pub T);

/// The get timed out because the channel stayed empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetTimeout;

/// The wait was abandoned because cancellation was raised. Carries the
/// undelivered item.
#[derive(Debug)]
pub struct Cancelled<T>(pub T);

/// Fixed-capacity FIFO hand-off between two stages.
///
/// Every clone holds both ends, so the channel never disconnects while the
/// orchestrator or a stage still holds it; the only failure mode of `put`
/// and `get` is a timeout.
pub struct BoundedChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> BoundedChannel<T> {
    /// # Panics
    /// Panics if `capacity` is 0; a zero-capacity channel would be a
    /// rendezvous, which the pipeline does not use.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be at least 1");
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Append `item`, blocking up to `timeout` while the channel is full.
    pub fn put(&self, item: T, timeout: Duration) -> Result<(), PutTimeout<T>> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) | Err(SendTimeoutError::Disconnected(item)) => {
                Err(PutTimeout(item))
            }
        }
    }

    /// Take the oldest item, blocking up to `timeout` while the channel is
    /// empty.
    pub fn get(&self, timeout: Duration) -> Result<T, GetTimeout> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Err(GetTimeout),
        }
    }

    /// Retry `put` across timeouts until it succeeds or `token` is raised.
    /// The item is never dropped while the run is live.
    pub fn put_until(
        &self,
        mut item: T,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<(), Cancelled<T>> {
        loop {
            match self.put(item, timeout) {
                Ok(()) => return Ok(()),
                Err(PutTimeout(back)) => {
                    if token.is_set() {
                        return Err(Cancelled(back));
                    }
                    item = back;
                }
            }
        }
    }

    /// Retry `get` across timeouts until an item arrives. Returns `None`
    /// once `token` is raised.
    pub fn get_until(&self, timeout: Duration, token: &CancellationToken) -> Option<T> {
        while !token.is_set() {
            if let Ok(item) = self.get(timeout) {
                return Some(item);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}
