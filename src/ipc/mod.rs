//! Daemon control over a Unix socket.
//!
//! Each connection carries exactly one exchange: a JSON command line from the
//! client, then a JSON response line from the daemon.

pub mod client;
pub mod protocol;
pub mod server;

use crate::error::{Result, TalkbackError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Write one JSON message terminated by a newline.
pub(crate) async fn write_line<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = format!("{}\n", json);
    let sent = async {
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await
    };
    sent.await.map_err(|e| TalkbackError::IpcConnection {
        message: format!("Failed to write message: {}", e),
    })
}

/// Read one newline-terminated message. An empty string means the peer
/// closed the connection without sending anything.
pub(crate) async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| TalkbackError::IpcConnection {
            message: format!("Failed to read message: {}", e),
        })?;
    Ok(line.trim().to_string())
}
