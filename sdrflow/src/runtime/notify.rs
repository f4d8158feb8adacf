use std::sync::{
    Condvar, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

/// A binary flag with a condition variable.
///
/// Raising the flag wakes the waiter. Waiting consumes the flag, so a raise
/// that happens between a readiness check and the wait is never lost.
#[derive(Debug, Default)]
pub(crate) struct Flag {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Flag {
    pub(crate) fn raise(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *set = true;
        self.cond.notify_all();
    }

    /// Returns `false` if the wait ended because of an interrupt.
    fn wait(&self, interrupted: &AtomicBool) -> bool {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            if interrupted.load(Ordering::Acquire) {
                return false;
            }
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
        *set = false;
        !interrupted.load(Ordering::Acquire)
    }

    fn wake(&self) {
        let _set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

/// Wake-up primitives of one block.
///
/// Upstream buffers raise `input_changed` when they commit items (or finish),
/// downstream readers raise `output_changed` when they consume items (or
/// detach). Message queues raise `input_changed` when a message is posted.
#[derive(Debug, Default)]
pub struct Notifier {
    input_changed: Flag,
    output_changed: Flag,
    interrupted: AtomicBool,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    pub fn notify_input(&self) {
        self.input_changed.raise();
    }

    pub fn notify_output(&self) {
        self.output_changed.raise();
    }

    /// Blocks until `input_changed` is raised. Returns `false` if interrupted.
    pub fn wait_input(&self) -> bool {
        self.input_changed.wait(&self.interrupted)
    }

    /// Blocks until `output_changed` is raised. Returns `false` if interrupted.
    pub fn wait_output(&self) -> bool {
        self.output_changed.wait(&self.interrupted)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        // taking each flag's lock before notifying guarantees that a waiter
        // either sees the interrupt or is already asleep on the condvar
        self.input_changed.wake();
        self.output_changed.wake();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}
