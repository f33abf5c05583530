//! Listener/acceptor and the per-connection session controller.
//!
//! One task per accepted socket. The controller owns lifecycle ordering:
//! backend connect first (its version feeds the handshake), then the
//! protocol's init sequence and command loop, then teardown with the backend
//! session closed before the client socket. Shutdown is cooperative:
//! sessions finish their current command and exit at the next read.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::backend::{BackendConnector, BackendSession};
use crate::config::{AppConfig, TargetConfig};
use crate::engine::{ProtocolEngine, SessionCtx};
use crate::state::GatewayState;

pub async fn run<E, C>(engine: E, connector: C, config: AppConfig, state: GatewayState) -> Result<()>
where
    E: ProtocolEngine,
    C: BackendConnector,
{
    let addr = format!("0.0.0.0:{}", config.listen_port());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        protocol = engine.protocol(),
        %addr,
        target_host = %config.target.host,
        target_port = config.target.port,
        "gateway listening"
    );
    run_with_listener(listener, engine, connector, config, state).await
}

/// Accept loop over an already-bound listener; split out so tests can bind
/// an ephemeral port themselves.
pub async fn run_with_listener<E, C>(
    listener: TcpListener,
    engine: E,
    connector: C,
    config: AppConfig,
    state: GatewayState,
) -> Result<()>
where
    E: ProtocolEngine,
    C: BackendConnector,
{
    let shutdown = state.shutdown_token();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let engine = engine.clone();
                let connector = connector.clone();
                let target = config.target.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    handle_session(engine, connector, target, state, stream, peer).await;
                });
            }
            Err(e) => {
                if shutdown.is_cancelled() {
                    break;
                }
                error!(error = %e, "accept failed");
            }
        }
    }
    info!("listener stopped, waiting for sessions to drain");
    Ok(())
}

async fn handle_session<E, C>(
    engine: E,
    connector: C,
    target: TargetConfig,
    state: GatewayState,
    mut stream: TcpStream,
    peer: SocketAddr,
) where
    E: ProtocolEngine,
    C: BackendConnector,
{
    state.session_opened();
    let connection_id = state.next_connection_id();
    info!(connection_id, %peer, protocol = engine.protocol(), "session opened");

    let ctx = SessionCtx {
        connection_id,
        peer,
        schema: target.database.clone(),
        shutdown: state.shutdown_token(),
    };

    match connector.connect(&target).await {
        Err(e) => {
            warn!(connection_id, error = %e, "backend connect failed");
            // Best-effort: the client may already be gone.
            let _ = stream.write_all(&engine.connect_failure(&e.to_string())).await;
            let _ = stream.shutdown().await;
        }
        Ok(mut backend) => {
            let result = engine.serve(&mut stream, ctx, &mut backend).await;
            // Backend session first, client socket second; both always run.
            backend.close().await;
            let _ = stream.shutdown().await;
            match result {
                Ok(()) => info!(connection_id, "session closed"),
                Err(e) => warn!(connection_id, error = %e, "session ended with error"),
            }
        }
    }
    state.session_closed();
}
