use super::{
    error::{Error, Result},
    notify::Notifier,
    pmt::Pmt,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

/// FIFO of messages for one message input port.
///
/// A bound of zero means unbounded. Posting to a full queue blocks until a
/// message is popped or the queue is closed.
#[derive(Debug)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    bound: usize,
    listener: Option<Arc<Notifier>>,
    publishers: AtomicUsize,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Pmt>,
    closed: bool,
}

impl MessageQueue {
    pub fn new(bound: usize) -> MessageQueue {
        MessageQueue::with_listener(bound, None)
    }

    /// Queue that raises `input_changed` on `listener` for every message.
    pub fn with_listener(bound: usize, listener: Option<Arc<Notifier>>) -> MessageQueue {
        MessageQueue {
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            bound,
            listener,
            publishers: AtomicUsize::new(0),
        }
    }

    pub fn post(&self, msg: Pmt) -> Result<()> {
        let mut state = self.lock();
        while !state.closed && self.bound != 0 && state.items.len() >= self.bound {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(Error::QueueClosed);
        }
        state.items.push_back(msg);
        drop(state);
        self.not_empty.notify_one();
        if let Some(listener) = &self.listener {
            listener.notify_input();
        }
        Ok(())
    }

    pub fn try_pop(&self) -> Option<Pmt> {
        let msg = self.lock().items.pop_front();
        if msg.is_some() {
            self.not_full.notify_one();
        }
        msg
    }

    /// Waits for a message. Returns `None` once the queue is closed and
    /// empty.
    pub fn pop_blocking(&self) -> Option<Pmt> {
        let mut state = self.lock();
        loop {
            if let Some(msg) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(msg);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes every queued message without blocking.
    pub fn flush(&self) -> Vec<Pmt> {
        let msgs = self.lock().items.drain(..).collect::<Vec<_>>();
        if !msgs.is_empty() {
            self.not_full.notify_all();
        }
        msgs
    }

    /// Rejects further posts and wakes every waiter. Queued messages can
    /// still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub(crate) fn add_publisher(&self) {
        self.publishers.fetch_add(1, Ordering::AcqRel);
    }

    /// Called when a publishing block finishes.
    pub(crate) fn release_publisher(&self) {
        let previous = self.publishers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
        // the consumer may be waiting for the last publisher to leave
        if let Some(listener) = &self.listener {
            listener.notify_input();
        }
    }

    pub(crate) fn has_publishers(&self) -> bool {
        self.publishers.load(Ordering::Acquire) != 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Message output ports of a block and the queues connected to them.
#[derive(Debug, Default)]
pub struct MessageOutputs {
    ports: Vec<(String, Vec<Arc<MessageQueue>>)>,
}

impl MessageOutputs {
    pub(crate) fn new(ports: Vec<(String, Vec<Arc<MessageQueue>>)>) -> MessageOutputs {
        MessageOutputs { ports }
    }

    /// Sends `msg` to every queue connected to `port`.
    ///
    /// Queues whose consumer has finished are skipped.
    pub fn post(&self, port: &str, msg: impl Into<Pmt>) -> Result<()> {
        let (_, queues) = self
            .ports
            .iter()
            .find(|(name, _)| name == port)
            .ok_or_else(|| Error::UnknownMessagePort(port.to_string()))?;
        let msg = msg.into();
        for queue in queues {
            match queue.post(msg.clone()) {
                Ok(()) => {}
                Err(Error::QueueClosed) => {
                    tracing::trace!(port, "dropping message posted to a closed queue");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.ports.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn queues(&self) -> impl Iterator<Item = &Arc<MessageQueue>> {
        self.ports.iter().flat_map(|(_, queues)| queues)
    }
}
