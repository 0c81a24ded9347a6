//! A cloneable handle for poking the agent from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

use crate::conversation::LoopState;

/// A cloneable handle for poking the agent from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) state: Arc<Mutex<LoopState>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl AgentHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            state: Arc::new(Mutex::new(LoopState::Idle)),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the current run.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Install a fresh token and return it
    pub(crate) fn reset_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Current loop state
    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!("Loop state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub(crate) fn mark_running(&self) {
        self.is_running.store(true, Ordering::Release);
    }

    pub(crate) fn mark_idle(&self) {
        self.set_state(LoopState::Idle);
        self.is_running.store(false, Ordering::Release);
    }

    /// Whether the agent loop is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_fires_current_token() {
        let handle = AgentHandle::new();
        let token = handle.reset_cancel();
        assert!(!token.is_cancelled());
        handle.clone().abort();
        assert!(token.is_cancelled());

        let fresh = handle.reset_cancel();
        assert!(!fresh.is_cancelled());
        handle.abort();
        assert!(fresh.is_cancelled());
    }

    #[test]
    fn test_running_and_idle() {
        let handle = AgentHandle::new();
        assert!(!handle.is_running());

        handle.mark_running();
        handle.set_state(LoopState::Streaming);
        let observer = handle.clone();
        assert!(observer.is_running());
        assert_eq!(observer.state(), LoopState::Streaming);

        handle.mark_idle();
        assert!(!observer.is_running());
        assert_eq!(observer.state(), LoopState::Idle);
    }
}
