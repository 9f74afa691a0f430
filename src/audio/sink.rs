//! Audio output: the `AudioSink` trait and the `Player` that binds one backend.
//!
//! Backends are probed once at startup in preference order; the first that
//! reports `can_play()` is bound for the life of the process.

use crate::audio::command_sink::CommandSink;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::AudioChunk;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Pluggable audio output device.
///
/// Implementations own their device exclusively; the `Player` serializes access.
/// Every blocking wait inside `write` and `close` watches the session token and
/// returns soon after it fires, discarding whatever the device still holds.
pub trait AudioSink: Send {
    /// Backend name for logging and `backends` output.
    fn name(&self) -> &str;

    /// Probe whether this backend can play on this machine.
    fn can_play(&self) -> bool;

    /// Blocking write of one chunk's PCM payload.
    fn write(&mut self, chunk: &AudioChunk, token: &CancelToken) -> Result<()>;

    /// Drop any audio queued in the device but not yet heard.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Let queued audio finish, then release the device. Further writes may
    /// reopen it.
    fn close(&mut self, token: &CancelToken) -> Result<()>;
}

/// Poll interval for token-aware waits inside sinks.
pub(crate) const SINK_WAIT_STEP: Duration = Duration::from_millis(10);

/// Result of a gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    Cancelled,
}

/// How a session hands the device back when its playback ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Play out what is queued, then close.
    Drain,
    /// Drop what is queued.
    Discard,
}

struct Bound {
    sink: Option<Box<dyn AudioSink>>,
    /// Token of the session that last wrote to the device.
    owner: Option<CancelToken>,
}

/// The bound output backend, shared by `Arc` across sessions.
pub struct Player {
    bound: Mutex<Bound>,
    backend: Option<String>,
}

impl Player {
    /// Bind the first candidate that can play; none available leaves the
    /// player unavailable and every write fails with `NoPlaybackBackend`.
    pub fn probe(candidates: Vec<Box<dyn AudioSink>>) -> Self {
        for candidate in candidates {
            if candidate.can_play() {
                tracing::info!(backend = candidate.name(), "Playback backend selected");
                return Self::with_sink(candidate);
            }
            tracing::debug!(backend = candidate.name(), "Playback backend unavailable");
        }

        tracing::warn!("No playback backend available; replies will not be spoken");
        Self::unavailable()
    }

    /// A player with no backend bound.
    pub fn unavailable() -> Self {
        Self {
            bound: Mutex::new(Bound {
                sink: None,
                owner: None,
            }),
            backend: None,
        }
    }

    /// Bind a specific sink without probing.
    pub fn with_sink(sink: Box<dyn AudioSink>) -> Self {
        let name = sink.name().to_string();
        Self {
            bound: Mutex::new(Bound {
                sink: Some(sink),
                owner: None,
            }),
            backend: Some(name),
        }
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Bound> {
        self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a chunk outside any session.
    pub fn write(&self, chunk: &AudioChunk) -> Result<()> {
        match self.lock().sink.as_mut() {
            Some(sink) => sink.write(chunk, &CancelToken::new()),
            None => Err(TalkbackError::NoPlaybackBackend),
        }
    }

    /// Write a chunk unless `token` has fired.
    ///
    /// The token is checked after the device lock is taken, so a token fired
    /// before this call is never followed by device output. A token fired
    /// during the write cuts it short.
    pub fn write_unless_cancelled(
        &self,
        chunk: &AudioChunk,
        token: &CancelToken,
    ) -> Result<WriteStatus> {
        let mut bound = self.lock();
        if token.is_fired() {
            return Ok(WriteStatus::Cancelled);
        }
        let Bound { sink, owner } = &mut *bound;
        match sink.as_mut() {
            Some(sink) => {
                *owner = Some(token.clone());
                sink.write(chunk, token).map(|()| WriteStatus::Written)
            }
            None => Err(TalkbackError::NoPlaybackBackend),
        }
    }

    /// End a session's use of the device.
    ///
    /// Does nothing if another session has written since, so a late
    /// interrupted worker cannot touch the next reply's audio.
    pub fn release(&self, token: &CancelToken, how: Release) {
        let mut bound = self.lock();
        if !bound.owner.as_ref().is_some_and(|o| o.same_session(token)) {
            tracing::debug!("Device already taken by a newer session; skipping release");
            return;
        }
        bound.owner = None;
        if let Some(sink) = bound.sink.as_mut() {
            let result = match how {
                Release::Drain => sink.close(token),
                Release::Discard => sink.reset(),
            };
            if let Err(e) = result {
                tracing::warn!(backend = sink.name(), ?how, "Failed to release playback: {}", e);
            }
        }
    }

    /// Drop queued device audio if the device is not mid-write.
    ///
    /// Returns false when the lock was busy; the writer watches its token and
    /// discards its own audio once the token fires.
    pub fn try_reset(&self) -> bool {
        let mut bound = match self.bound.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(e)) => e.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return false,
        };
        if let Some(sink) = bound.sink.as_mut()
            && let Err(e) = sink.reset()
        {
            tracing::warn!(backend = sink.name(), "Failed to reset playback: {}", e);
        }
        true
    }

    /// Let queued audio finish, then release the device.
    pub fn close(&self) {
        let mut bound = self.lock();
        bound.owner = None;
        if let Some(sink) = bound.sink.as_mut()
            && let Err(e) = sink.close(&CancelToken::new())
        {
            tracing::warn!(backend = sink.name(), "Failed to close playback: {}", e);
        }
    }
}

/// Build playback candidates from configured backend names, in order.
///
/// `cpal` maps to the in-process output stream; any other name is treated as
/// an external player program reading raw PCM on stdin.
pub fn build_candidates(names: &[String], sample_rate: u32) -> Vec<Box<dyn AudioSink>> {
    let mut candidates: Vec<Box<dyn AudioSink>> = Vec::new();
    for name in names {
        match name.as_str() {
            "cpal" => {
                #[cfg(feature = "cpal-audio")]
                candidates.push(Box::new(crate::audio::cpal_sink::CpalSink::new(
                    sample_rate,
                )));
                #[cfg(not(feature = "cpal-audio"))]
                tracing::debug!("cpal playback not compiled in");
            }
            program => match CommandSink::for_program(program, sample_rate) {
                Some(sink) => candidates.push(Box::new(sink)),
                None => tracing::warn!(backend = program, "Unknown playback backend"),
            },
        }
    }
    candidates
}

/// Probe status of each configured backend, for the `backends` command.
pub fn describe_backends(names: &[String], sample_rate: u32) -> Vec<(String, bool)> {
    build_candidates(names, sample_rate)
        .iter()
        .map(|sink| (sink.name().to_string(), sink.can_play()))
        .collect()
}

/// Sink that records every chunk; for tests and dry runs.
///
/// Clones share the record, so a test can keep one and hand the other to a
/// `Player`.
#[derive(Clone, Default)]
pub struct CollectorSink {
    written: Arc<Mutex<Vec<AudioChunk>>>,
    resets: Arc<Mutex<usize>>,
    closed: Arc<Mutex<bool>>,
    write_delay: Duration,
    unavailable: bool,
    fail_writes: bool,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each write block for `delay`, like a real device draining.
    /// A fired token ends the wait early.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Report `can_play() == false`.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Fail every write with a playback error.
    pub fn with_write_failure(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.chunks()
            .into_iter()
            .flat_map(|c| c.payload)
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn reset_count(&self) -> usize {
        *self.resets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioSink for CollectorSink {
    fn name(&self) -> &str {
        "collector"
    }

    fn can_play(&self) -> bool {
        !self.unavailable
    }

    fn write(&mut self, chunk: &AudioChunk, token: &CancelToken) -> Result<()> {
        if self.fail_writes {
            return Err(TalkbackError::Playback {
                message: "collector configured to fail".to_string(),
            });
        }
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(chunk.clone());

        let deadline = Instant::now() + self.write_delay;
        while !token.is_fired() && Instant::now() < deadline {
            std::thread::sleep(SINK_WAIT_STEP.min(deadline.saturating_duration_since(Instant::now())));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        *self.resets.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn close(&mut self, _token: &CancelToken) -> Result<()> {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, len: usize) -> AudioChunk {
        AudioChunk::new(seq, vec![seq as u8; len], false)
    }

    #[test]
    fn test_first_available_backend_is_bound() {
        let skipped = CollectorSink::new().unavailable();
        let chosen = CollectorSink::new();
        let player = Player::probe(vec![Box::new(skipped.clone()), Box::new(chosen.clone())]);

        assert!(player.is_available());
        player.write(&chunk(0, 4)).unwrap();
        assert_eq!(chosen.write_count(), 1);
        assert_eq!(skipped.write_count(), 0);
    }

    #[test]
    fn test_no_backend_fails_every_write() {
        let player = Player::probe(vec![Box::new(CollectorSink::new().unavailable())]);

        assert!(!player.is_available());
        assert!(player.backend_name().is_none());
        assert!(matches!(
            player.write(&chunk(0, 4)),
            Err(TalkbackError::NoPlaybackBackend)
        ));
        assert!(matches!(
            player.write_unless_cancelled(&chunk(0, 4), &CancelToken::new()),
            Err(TalkbackError::NoPlaybackBackend)
        ));
    }

    #[test]
    fn test_fired_token_suppresses_write() {
        let sink = CollectorSink::new();
        let player = Player::with_sink(Box::new(sink.clone()));
        let token = CancelToken::new();

        assert_eq!(
            player.write_unless_cancelled(&chunk(0, 8), &token).unwrap(),
            WriteStatus::Written
        );
        token.fire();
        assert_eq!(
            player.write_unless_cancelled(&chunk(1, 8), &token).unwrap(),
            WriteStatus::Cancelled
        );
        assert_eq!(sink.write_count(), 1);
    }

    #[test]
    fn test_try_reset_and_close_reach_sink() {
        let sink = CollectorSink::new();
        let player = Player::with_sink(Box::new(sink.clone()));

        assert!(player.try_reset());
        player.close();
        assert_eq!(sink.reset_count(), 1);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_firing_token_cuts_blocking_write_short() {
        let sink = CollectorSink::new().with_write_delay(Duration::from_secs(5));
        let player = Arc::new(Player::with_sink(Box::new(sink.clone())));
        let token = CancelToken::new();

        let writer = {
            let player = Arc::clone(&player);
            let token = token.clone();
            std::thread::spawn(move || player.write_unless_cancelled(&chunk(0, 8), &token))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!player.try_reset(), "device is mid-write");

        let fired_at = Instant::now();
        token.fire();
        assert_eq!(writer.join().unwrap().unwrap(), WriteStatus::Written);
        assert!(fired_at.elapsed() < Duration::from_secs(1));

        player.release(&token, Release::Discard);
        assert_eq!(sink.reset_count(), 1);
        assert!(!sink.is_closed());
    }

    #[test]
    fn test_release_skipped_once_a_newer_session_writes() {
        let sink = CollectorSink::new();
        let player = Player::with_sink(Box::new(sink.clone()));
        let stale = CancelToken::new();
        let fresh = CancelToken::new();

        player.write_unless_cancelled(&chunk(0, 4), &stale).unwrap();
        stale.fire();
        player.write_unless_cancelled(&chunk(1, 4), &fresh).unwrap();

        player.release(&stale, Release::Discard);
        assert_eq!(sink.reset_count(), 0);

        player.release(&fresh, Release::Drain);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_release_without_writes_is_noop() {
        let sink = CollectorSink::new();
        let player = Player::with_sink(Box::new(sink.clone()));
        player.release(&CancelToken::new(), Release::Drain);
        assert!(!sink.is_closed());
    }

    #[test]
    fn test_try_reset_on_unavailable_player_is_noop() {
        assert!(Player::unavailable().try_reset());
    }

    #[test]
    fn test_build_candidates_keeps_order_and_skips_unknown() {
        let names: Vec<String> = ["aplay", "winamp", "paplay"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let candidates = build_candidates(&names, 24000);
        let names: Vec<&str> = candidates.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["aplay", "paplay"]);
    }

    #[test]
    fn test_collector_bytes_concatenate_in_order() {
        let mut sink = CollectorSink::new();
        let token = CancelToken::new();
        sink.write(&chunk(0, 2), &token).unwrap();
        sink.write(&chunk(1, 3), &token).unwrap();
        assert_eq!(sink.bytes(), vec![0, 0, 1, 1, 1]);
    }
}
