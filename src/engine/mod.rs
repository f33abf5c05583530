//! Protocol engines.
//!
//! One engine per supported wire protocol. The listener and session
//! controller depend only on this capability set, so adding a protocol means
//! adding an implementation, not touching the server.

pub mod mysql;
pub mod postgres;

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, BackendSession};
use crate::protocol::ProtocolError;

/// Why a session ended abnormally. Clean endings (quit, client EOF,
/// cooperative shutdown) are `Ok(())` from [`ProtocolEngine::serve`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-session state owned by exactly one session task.
#[derive(Debug, Clone)]
pub struct SessionCtx {
    pub connection_id: u32,
    pub peer: SocketAddr,
    /// Current schema/database name, seeded from the target configuration
    /// and updated by protocol-level schema switches.
    pub schema: String,
    pub shutdown: CancellationToken,
}

pub trait ProtocolEngine: Clone + Send + Sync + 'static {
    fn protocol(&self) -> &'static str;

    /// Complete wire bytes reporting a failed backend connect, written to
    /// the client before closing. The only message a session whose backend
    /// never came up will see.
    fn connect_failure(&self, message: &str) -> Bytes;

    /// Run the protocol's init sequence and command loop until the session
    /// ends. The caller owns teardown ordering: the backend session is
    /// closed after this returns and before the client socket drops.
    fn serve<S, B>(
        &self,
        io: S,
        ctx: SessionCtx,
        backend: &mut B,
    ) -> impl Future<Output = Result<(), SessionError>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        B: BackendSession;
}
