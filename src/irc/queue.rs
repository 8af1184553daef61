//! Unbounded FIFO of inbound messages awaiting the application.
//!
//! Every operation takes the internal lock exactly once, so each one is
//! atomic with respect to concurrent pushes from the receive loop and pops
//! from application tasks. None of them block beyond that lock.

use crate::irc::message::ServerMessage;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<ServerMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message in receipt order.
    pub fn push(&self, message: ServerMessage) {
        self.lock().push_back(message);
    }

    /// Remove and return the oldest message, if any.
    pub fn try_pop(&self) -> Option<ServerMessage> {
        self.lock().pop_front()
    }

    /// Clone of the oldest message, left in place.
    pub fn peek(&self) -> Option<ServerMessage> {
        self.lock().front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop everything still queued.
    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave the deque half-modified,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ServerMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
