//! Gateway-wide shared state.
//!
//! Only immutable config and bookkeeping cross session boundaries; all
//! per-request state is owned by its session task.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct GatewayState {
    next_connection_id: Arc<AtomicU32>,
    active_sessions: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new() -> Self {
        Self {
            next_connection_id: Arc::new(AtomicU32::new(1)),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Monotonically assigned id, opaque to peers; reported in the MySQL
    /// handshake and the Postgres BackendKeyData.
    pub fn next_connection_id(&self) -> u32 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Token observed by the acceptor and every session loop. Sessions
    /// finish their current command before checking it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_monotonic() {
        let state = GatewayState::new();
        let a = state.next_connection_id();
        let b = state.next_connection_id();
        assert!(b > a);
    }

    #[test]
    fn session_accounting() {
        let state = GatewayState::new();
        state.session_opened();
        state.session_opened();
        state.session_closed();
        assert_eq!(state.active_sessions(), 1);
    }

    #[test]
    fn shutdown_propagates_to_clones() {
        let state = GatewayState::new();
        let token = state.shutdown_token();
        assert!(!token.is_cancelled());
        state.begin_shutdown();
        assert!(token.is_cancelled());
    }
}
