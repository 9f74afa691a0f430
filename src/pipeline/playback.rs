//! Bounded playback queue between the chunk receiver and the audio sink.
//!
//! Each processing session gets its own playback worker thread. The receiver
//! pushes chunks into a bounded crossbeam channel; a full channel blocks the
//! receiver, so a slow device throttles a fast network source.

use crate::audio::sink::{Player, Release, WriteStatus};
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::AudioChunk;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What happened to a pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Queued,
    /// The session token fired; the chunk was dropped.
    Cancelled,
    /// The playback worker stopped (device error or cancellation).
    Closed,
}

/// Producer side of the playback queue.
pub struct PlaybackBuffer {
    tx: Sender<AudioChunk>,
    token: CancelToken,
    poll: Duration,
}

impl PlaybackBuffer {
    /// Enqueue a chunk, blocking while the queue is full.
    ///
    /// While blocked the token is re-checked every poll interval, so firing it
    /// always releases the producer.
    pub fn push(&self, chunk: AudioChunk) -> PushStatus {
        let mut chunk = chunk;
        loop {
            if self.token.is_fired() {
                return PushStatus::Cancelled;
            }
            match self.tx.send_timeout(chunk, self.poll) {
                Ok(()) => return PushStatus::Queued,
                Err(SendTimeoutError::Timeout(c)) => chunk = c,
                Err(SendTimeoutError::Disconnected(_)) => return PushStatus::Closed,
            }
        }
    }
}

/// Totals from one session's playback.
#[derive(Debug, Default)]
pub struct PlaybackReport {
    pub chunks_written: usize,
    pub bytes_written: usize,
    /// Writes were skipped because no backend is bound.
    pub backend_missing: bool,
    /// Writes stopped because the session token fired.
    pub cancelled: bool,
    /// Device failure that ended playback early.
    pub error: Option<TalkbackError>,
}

/// Consumer side: the playback worker thread.
pub struct PlaybackWorker {
    session_id: u64,
    handle: JoinHandle<PlaybackReport>,
}

impl PlaybackWorker {
    /// Wait for the worker to write everything it was given.
    ///
    /// Drop the `PlaybackBuffer` first, or this waits forever.
    pub fn finish(self) -> PlaybackReport {
        self.handle.join().unwrap_or_else(|_| PlaybackReport {
            error: Some(TalkbackError::Playback {
                message: format!("playback worker for session {} panicked", self.session_id),
            }),
            ..PlaybackReport::default()
        })
    }
}

/// Start a playback worker for one session.
pub fn spawn_playback(
    player: Arc<Player>,
    token: CancelToken,
    capacity: usize,
    session_id: u64,
) -> Result<(PlaybackBuffer, PlaybackWorker)> {
    let (tx, rx) = bounded(capacity.max(1));
    let worker_token = token.clone();

    let handle = thread::Builder::new()
        .name(format!("playback-{}", session_id))
        .spawn(move || playback_loop(session_id, rx, &player, &worker_token))
        .map_err(|e| TalkbackError::Playback {
            message: format!("Failed to spawn playback worker: {}", e),
        })?;

    Ok((
        PlaybackBuffer {
            tx,
            token,
            poll: Duration::from_millis(defaults::CANCEL_POLL_MS),
        },
        PlaybackWorker { session_id, handle },
    ))
}

fn playback_loop(
    session_id: u64,
    rx: Receiver<AudioChunk>,
    player: &Player,
    token: &CancelToken,
) -> PlaybackReport {
    let mut report = PlaybackReport::default();

    for chunk in rx.iter() {
        match player.write_unless_cancelled(&chunk, token) {
            Ok(WriteStatus::Written) => {
                report.chunks_written += 1;
                report.bytes_written += chunk.len();
            }
            Ok(WriteStatus::Cancelled) => {
                tracing::debug!(session = session_id, "Playback stopped by interruption");
                report.cancelled = true;
                break;
            }
            Err(TalkbackError::NoPlaybackBackend) => {
                if !report.backend_missing {
                    tracing::warn!(session = session_id, "No playback backend; skipping audio");
                    report.backend_missing = true;
                }
            }
            Err(e) => {
                tracing::error!(session = session_id, "Playback failed: {}", e);
                report.error = Some(e);
                break;
            }
        }
    }

    // The token can fire during the last write, leaving `cancelled` unset.
    if token.is_fired() {
        report.cancelled = true;
        player.release(token, Release::Discard);
    } else if report.error.is_none() && report.chunks_written > 0 {
        player.release(token, Release::Drain);
    }

    report
}
