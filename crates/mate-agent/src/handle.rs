//! A cloneable handle for stopping the session from other tasks.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A cloneable handle for stopping the session from other tasks.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop the in-flight turn. Does nothing when idle.
    pub fn stop(&self) {
        if self.is_running() {
            tracing::info!("Stop requested");
            self.cancel.lock().cancel();
        }
    }

    /// Whether a turn is in flight.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Mark a turn as started and hand out a fresh token for it.
    ///
    /// Fails with [`Error::Busy`] if another turn holds the handle.
    pub(crate) fn begin(&self) -> Result<(RunGuard, CancellationToken)> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        Ok((
            RunGuard {
                handle: self.clone(),
            },
            token,
        ))
    }
}

/// Clears the running flag when the turn ends, however it ends
pub(crate) struct RunGuard {
    handle: SessionHandle,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.handle.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_exclusive() {
        let handle = SessionHandle::new();
        let (guard, _token) = handle.begin().unwrap();
        assert!(handle.is_running());
        assert!(matches!(handle.begin(), Err(Error::Busy)));

        drop(guard);
        assert!(!handle.is_running());
        assert!(handle.begin().is_ok());
    }

    #[test]
    fn test_stop_cancels_current_token_only() {
        let handle = SessionHandle::new();
        handle.stop();

        let (guard, token) = handle.begin().unwrap();
        assert!(!token.is_cancelled());
        handle.clone().stop();
        assert!(token.is_cancelled());
        drop(guard);

        let (_guard, fresh) = handle.begin().unwrap();
        assert!(!fresh.is_cancelled());
    }
}
