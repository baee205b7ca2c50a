use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::types::LogError;

#[derive(Default)]
struct LockState {
    /// Holder plus every queued waiter, including waiters that gave up but
    /// have not been skipped yet.
    count: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Mutual exclusion that hands ownership to waiters strictly in the order
/// they called `acquire`.
///
/// Async callers suspend on a oneshot; the writer thread, which cannot
/// suspend, blocks on the same oneshot with [`AsyncFairLock::acquire_blocking`].
/// Both kinds of waiters share one FIFO queue.
#[derive(Default)]
pub struct AsyncFairLock {
    state: Mutex<LockState>,
}

/// Releases the lock when dropped.
#[must_use]
pub struct FairLockGuard<'a> {
    lock: &'a AsyncFairLock,
}

impl Drop for FairLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

struct Waiter<'a> {
    lock: &'a AsyncFairLock,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        // Cancelled or dropped mid-wait. If the hand-off already happened,
        // pass ownership on instead of losing it.
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.lock.release();
        }
    }
}

impl AsyncFairLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if idle, otherwise join the queue.
    fn enter(&self) -> Option<oneshot::Receiver<()>> {
        let mut state = self.state.lock();
        state.count += 1;
        if state.count == 1 {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Some(rx)
    }

    pub async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<FairLockGuard<'_>, LogError> {
        let Some(rx) = self.enter() else {
            return Ok(FairLockGuard { lock: self });
        };

        let mut waiter = Waiter {
            lock: self,
            rx,
            granted: false,
        };

        let received = match cancel {
            Some(token) => tokio::select! {
                biased;
                res = &mut waiter.rx => Some(res),
                () = token.cancelled() => None,
            },
            None => Some((&mut waiter.rx).await),
        };

        match received {
            Some(Ok(())) => {
                waiter.granted = true;
                Ok(FairLockGuard { lock: self })
            }
            Some(Err(_)) => Err(LogError::GeneralError(
                "fair lock hand-off channel closed".to_string(),
            )),
            None => Err(LogError::Cancelled),
        }
    }

    /// Block the calling thread until the lock is granted.
    ///
    /// Must not be called from inside an async runtime.
    pub fn acquire_blocking(&self) -> Result<FairLockGuard<'_>, LogError> {
        if let Some(rx) = self.enter() {
            rx.blocking_recv().map_err(|_| {
                LogError::GeneralError("fair lock hand-off channel closed".to_string())
            })?;
        }
        Ok(FairLockGuard { lock: self })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.count -= 1;
        while let Some(next) = state.waiters.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
            // That waiter gave up; its slot is dropped.
            state.count -= 1;
        }
        debug_assert_eq!(state.count, 0);
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().count > 0
    }

    /// Waiters queued behind the current holder.
    pub fn queued(&self) -> usize {
        self.state.lock().count.saturating_sub(1)
    }
}
