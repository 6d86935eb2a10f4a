//! Shutdown fence for mutating store operations
//!
//! Every mutating operation holds a [`PendingOp`] while it runs. Closing
//! waits for the pending count to drain and only then raises the closed
//! flag, so work submitted before `close` returns is never dropped. Count
//! and flag share one atomic word: the flag can only be raised while the
//! count is zero, and the count can only grow while the flag is down.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

const CLOSED: usize = 1 << (usize::BITS - 1);

#[derive(Debug, Default)]
pub(crate) struct ShutdownGuard {
    state: AtomicUsize,
    drained: Notify,
}

/// Registration of one in-flight operation, released on drop
#[derive(Debug)]
pub(crate) struct PendingOp<'a> {
    guard: &'a ShutdownGuard,
}

impl Drop for PendingOp<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}

impl ShutdownGuard {
    /// Register an operation, or `None` if the guard is closed
    pub fn acquire(&self) -> Option<PendingOp<'_>> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & CLOSED != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(PendingOp { guard: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        if self.state.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) & CLOSED != 0
    }

    pub fn pending(&self) -> usize {
        self.state.load(Ordering::SeqCst) & !CLOSED
    }

    /// Wait for in-flight operations to finish, then refuse new ones
    ///
    /// Operations may keep registering while the wait is in progress; the
    /// flag goes up at the first instant the count is zero. Returns `true`
    /// for the call that actually closed the guard.
    pub async fn close(&self) -> bool {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            // must be registered before the count is read, or a release in
            // between would be missed
            drained.as_mut().enable();

            match self.state.load(Ordering::SeqCst) {
                CLOSED => return false,
                0 => {
                    if self
                        .state
                        .compare_exchange(0, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return true;
                    }
                    // lost the race to a new operation or another close
                }
                _ => drained.await,
            }
        }
    }
}
