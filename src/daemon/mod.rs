//! Daemon mode for talkback - serves the orchestrator over IPC.

pub mod handler;

use crate::error::{Result, TalkbackError};
use crate::ipc::server::IpcServer;
use crate::pipeline::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Daemon state shared with the command handler.
pub struct DaemonState {
    /// The orchestrator; its blocking calls run on the blocking pool
    pub orchestrator: Arc<Orchestrator>,
    /// Signalled by the `shutdown` command
    pub shutdown: Arc<Notify>,
}

impl DaemonState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// Run the daemon: start the IPC server, wait for a signal or `shutdown`.
///
/// The caller owns the orchestrator and shuts it down after the runtime
/// exits, so blocking HTTP clients are never dropped on a runtime thread.
pub async fn run_daemon(
    orchestrator: Arc<Orchestrator>,
    socket_path: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let state = DaemonState::new(orchestrator);
    let shutdown = Arc::clone(&state.shutdown);

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path)?);

    tracing::info!(socket = %server.socket_path().display(), "IPC server listening");
    if !quiet {
        eprintln!(
            "IPC server listening at: {}",
            server.socket_path().display()
        );
        eprintln!("Daemon ready.");
    }

    let handler = handler::DaemonCommandHandler::new(state);

    let server_clone = Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move { server_clone.serve(handler).await });

    let exited_early = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down");
            None
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("Error setting up signal handler: {}", e);
            }
            tracing::info!("Received SIGTERM, shutting down");
            None
        }
        _ = shutdown.notified() => {
            tracing::info!("Shutdown requested over IPC");
            None
        }
        finished = &mut server_handle => Some(finished),
    };

    server.stop();
    let finished = match exited_early {
        Some(finished) => finished,
        None => server_handle.await,
    };
    match finished {
        Ok(Err(e)) => {
            tracing::error!("Daemon server failed: {}", e);
            return Err(e);
        }
        Err(e) => tracing::error!("Daemon server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    if !quiet {
        eprintln!("Daemon stopped.");
    }
    Ok(())
}

/// Wait for SIGTERM signal (used by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        TalkbackError::Other(format!("Failed to register SIGTERM handler: {}", e))
    })?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
