//! One-shot command client used by the control subcommands.

use crate::error::{Result, TalkbackError};
use crate::ipc::protocol::{Command, Response};
use crate::ipc::{read_line, write_line};
use std::path::Path;
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// Send `command` to the daemon listening on `socket_path` and wait for its
/// answer.
///
/// Fails with `IpcConnection` when nothing is listening or the daemon hangs
/// up without answering, and with `IpcProtocol` when the answer is not a
/// valid response.
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| TalkbackError::IpcConnection {
            message: format!("Failed to connect to daemon at {}: {}", socket_path.display(), e),
        })?;
    let (reader, mut writer) = stream.into_split();

    let json = command.to_json().map_err(|e| TalkbackError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;
    write_line(&mut writer, &json).await?;

    let line = read_line(&mut BufReader::new(reader)).await?;
    if line.is_empty() {
        return Err(TalkbackError::IpcConnection {
            message: "Daemon closed the connection without answering".to_string(),
        });
    }
    Response::from_json(&line).map_err(|e| TalkbackError::IpcProtocol {
        message: format!("Unexpected response {:?}: {}", line, e),
    })
}
