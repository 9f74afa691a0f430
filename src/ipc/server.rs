//! Unix socket listener that dispatches daemon control commands.

use crate::error::{Result, TalkbackError};
use crate::ipc::protocol::{Command, Response};
use crate::ipc::{read_line, write_line};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

/// Answers one decoded command.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

/// Serves control commands until [`IpcServer::stop`] is called.
pub struct IpcServer {
    socket_path: PathBuf,
    stop_requested: Notify,
}

/// Removes the socket file when the accept loop exits, however it exits.
struct BoundSocket<'a> {
    path: &'a Path,
}

impl Drop for BoundSocket<'_> {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(socket = %self.path.display(), "Failed to remove socket: {}", e);
        }
    }
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        Ok(Self {
            socket_path,
            stop_requested: Notify::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/talkback.sock`, or a per-user path under `/tmp`.
    pub fn default_socket_path() -> PathBuf {
        match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(runtime_dir) => PathBuf::from(runtime_dir).join("talkback.sock"),
            None => {
                // SAFETY: getuid has no preconditions and cannot fail.
                let uid = unsafe { libc::getuid() };
                PathBuf::from(format!("/tmp/talkback-{}.sock", uid))
            }
        }
    }

    /// Bind the socket and answer connections until stopped. A stale socket
    /// file left by a crashed daemon is replaced.
    pub async fn serve<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        match std::fs::remove_file(&self.socket_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(TalkbackError::IpcSocket {
                    message: format!("Failed to remove stale socket: {}", e),
                });
            }
            _ => {}
        }
        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| TalkbackError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        let _bound = BoundSocket {
            path: &self.socket_path,
        };

        let handler = Arc::new(handler);
        loop {
            tokio::select! {
                _ = self.stop_requested.notified() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| TalkbackError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    })?;
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = answer(stream, handler.as_ref()).await {
                            tracing::warn!("IPC client dropped: {}", e);
                        }
                    });
                }
            }
        }
    }

    /// End the accept loop; the socket file goes with it. Safe to call
    /// before `serve` has bound.
    pub fn stop(&self) {
        self.stop_requested.notify_one();
    }
}

async fn answer<H>(stream: UnixStream, handler: &H) -> Result<()>
where
    H: CommandHandler + ?Sized,
{
    let (reader, mut writer) = stream.into_split();
    let line = read_line(&mut BufReader::new(reader)).await?;
    if line.is_empty() {
        return Ok(());
    }
    tracing::debug!(command = %line, "IPC command");

    let response = match Command::from_json(&line) {
        Ok(command) => handler.handle(command).await,
        Err(e) => Response::Error {
            message: format!("Invalid command: {}", e),
        },
    };
    let json = response.to_json().map_err(|e| TalkbackError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    write_line(&mut writer, &json).await
}
