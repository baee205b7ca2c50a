use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::types::{LogLevel, PendingEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Available,
    Shutdown,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<PendingEntry>,
    suspended: bool,
    shutdown: bool,
}

/// FIFO of entries waiting for the writer.
///
/// "Entry available" is the condvar predicate `!entries.is_empty()`; shutdown
/// is a flag under the same mutex, so the writer's two-way wait is a single
/// condvar wait. Critical sections never do I/O.
#[derive(Default)]
pub(crate) struct IngestQueue {
    state: Mutex<QueueState>,
    signal: Condvar,
}

impl IngestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Hands the entry back if the queue is suspended or
    /// shut down.
    pub(crate) fn enqueue(&self, entry: PendingEntry) -> Result<(), PendingEntry> {
        let mut state = self.state.lock();
        if state.suspended || state.shutdown {
            return Err(entry);
        }
        let was_empty = state.entries.is_empty();
        state.entries.push_back(entry);
        if was_empty {
            self.signal.notify_one();
        }
        Ok(())
    }

    pub(crate) fn dequeue(&self) -> Option<PendingEntry> {
        self.state.lock().entries.pop_front()
    }

    /// Pop the head only if it is an `Ignore` marker.
    pub(crate) fn pop_ignored(&self) -> Option<PendingEntry> {
        let mut state = self.state.lock();
        match state.entries.front() {
            Some(head) if head.level == LogLevel::Ignore => state.entries.pop_front(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Block until an entry is available or shutdown was requested.
    /// Shutdown wins over pending entries.
    pub(crate) fn wait(&self) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Wake::Shutdown;
            }
            if !state.entries.is_empty() {
                return Wake::Available;
            }
            self.signal.wait(&mut state);
        }
    }

    /// Sleep for `timeout` unless shutdown is requested first. Returns `true`
    /// if shutdown was requested.
    pub(crate) fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.shutdown {
            let _ = self.signal.wait_for(&mut state, timeout);
        }
        state.shutdown
    }

    /// Hand back everything queued without changing the queue's state.
    pub(crate) fn drain(&self) -> Vec<PendingEntry> {
        self.state.lock().entries.drain(..).collect()
    }

    /// Stop accepting entries and hand back everything still queued.
    pub(crate) fn suspend(&self) -> Vec<PendingEntry> {
        let mut state = self.state.lock();
        state.suspended = true;
        state.entries.drain(..).collect()
    }

    pub(crate) fn resume(&self) {
        self.state.lock().suspended = false;
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Wake the writer for good and hand back everything still queued.
    pub(crate) fn shutdown(&self) -> Vec<PendingEntry> {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.signal.notify_all();
        state.entries.drain(..).collect()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}
