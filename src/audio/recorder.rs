//! Utterance capture on a dedicated thread.
//!
//! The `Recorder` owns the input `AudioSource`. `start()` opens the device and
//! hands it to a capture thread that fills a `RecordingSession`; `stop()` joins
//! the thread, gets the source back, and returns the utterance as WAV bytes.

use crate::audio::source::AudioSource;
use crate::audio::wav::encode_wav;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

/// Reads allowed after stop is requested, so a source that never runs dry
/// cannot hold the capture thread open.
const MAX_DRAIN_READS: usize = 64;

/// Called from the capture thread as soon as a read fails, with the
/// recording id and the error.
pub type CaptureFailureHook = Arc<dyn Fn(u64, &TalkbackError) + Send + Sync>;

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Active,
    Stopped,
}

/// Frames captured for one utterance. Mutated only by the capture thread.
#[derive(Debug)]
pub struct RecordingSession {
    pub id: u64,
    pub start_time: Instant,
    pub started_at: SystemTime,
    pub state: RecordingState,
    frame_size: usize,
    frames: Vec<Vec<i16>>,
    partial: Vec<i16>,
}

impl RecordingSession {
    pub fn new(id: u64, frame_size: usize) -> Self {
        Self {
            id,
            start_time: Instant::now(),
            started_at: SystemTime::now(),
            state: RecordingState::Idle,
            frame_size: frame_size.max(1),
            frames: Vec::new(),
            partial: Vec::new(),
        }
    }

    /// Append samples, cutting them into fixed-size frames.
    pub fn push_samples(&mut self, samples: &[i16]) {
        self.partial.extend_from_slice(samples);
        while self.partial.len() >= self.frame_size {
            let rest = self.partial.split_off(self.frame_size);
            self.frames.push(std::mem::replace(&mut self.partial, rest));
        }
    }

    /// Close the session, keeping a short trailing frame if there is one.
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            self.frames.push(std::mem::take(&mut self.partial));
        }
        self.state = RecordingState::Stopped;
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len() + usize::from(!self.partial.is_empty())
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(Vec::len).sum::<usize>() + self.partial.len()
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / sample_rate as f64)
    }

    pub fn samples(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        out.extend_from_slice(&self.partial);
        out
    }
}

/// A finished utterance.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: u64,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub sample_rate: u32,
    pub wav: Vec<u8>,
}

struct CaptureOutcome {
    session: RecordingSession,
    source: Box<dyn AudioSource>,
    error: Option<TalkbackError>,
}

struct ActiveCapture {
    id: u64,
    running: Arc<AtomicBool>,
    /// `None` if the thread never received the source.
    handle: JoinHandle<Option<CaptureOutcome>>,
}

/// Owns the input device; at most one capture is active at a time.
pub struct Recorder {
    source: Option<Box<dyn AudioSource>>,
    sample_rate: u32,
    frame_size: usize,
    poll_interval: Duration,
    active: Option<ActiveCapture>,
    next_id: u64,
    failure_hook: Option<CaptureFailureHook>,
    #[cfg(test)]
    refuse_spawn: bool,
}

impl Recorder {
    pub fn new(source: Box<dyn AudioSource>, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            source: Some(source),
            sample_rate,
            frame_size,
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
            active: None,
            next_id: 1,
            failure_hook: None,
            #[cfg(test)]
            refuse_spawn: false,
        }
    }

    /// Get told about read failures while they happen rather than at `stop()`.
    pub fn on_capture_failure(&mut self, hook: CaptureFailureHook) {
        self.failure_hook = Some(hook);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// True while a capture thread is running and has not hit a read error.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.running.load(Ordering::SeqCst) && !a.handle.is_finished())
    }

    /// True if a capture was started and has not been collected by `stop()`.
    pub fn is_started(&self) -> bool {
        self.active.is_some()
    }

    /// Open the device and start capturing. Returns the recording id.
    ///
    /// # Errors
    /// `InvalidState` if already recording; the source's device error if it
    /// cannot be opened (the recorder stays idle and reusable).
    pub fn start(&mut self) -> Result<u64> {
        if self.active.is_some() {
            return Err(TalkbackError::InvalidState {
                message: "recording already in progress".to_string(),
            });
        }

        let mut source = self.source.take().ok_or_else(|| TalkbackError::AudioDevice {
            message: "input device was lost by a previous capture".to_string(),
        })?;

        if let Err(e) = source.start() {
            self.source = Some(source);
            return Err(e);
        }

        let id = self.next_id;
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let frame_size = self.frame_size;
        let poll = self.poll_interval;
        let hook = self.failure_hook.clone();

        // The source is sent only once the thread exists, so a failed spawn
        // leaves it here for the next attempt.
        let (source_tx, source_rx) = bounded::<Box<dyn AudioSource>>(1);
        let spawned = self.spawn_capture(id, move || {
            let source = source_rx.recv().ok()?;
            Some(capture_loop(id, source, frame_size, poll, thread_running, hook))
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.release_source(source);
                return Err(TalkbackError::AudioCapture {
                    message: format!("Failed to spawn capture thread: {}", e),
                });
            }
        };
        if let Err(returned) = source_tx.send(source) {
            self.release_source(returned.0);
            return Err(TalkbackError::AudioCapture {
                message: "capture thread exited before receiving the device".to_string(),
            });
        }

        self.next_id += 1;
        tracing::debug!(recording = id, "Capture started");
        self.active = Some(ActiveCapture {
            id,
            running,
            handle,
        });
        Ok(id)
    }

    /// Stop capturing and return the utterance as WAV.
    ///
    /// # Errors
    /// `InvalidState` if not recording; `AudioCapture` if a read failed
    /// mid-capture (the recorder is idle again either way).
    pub fn stop(&mut self) -> Result<Recording> {
        let active = self.active.take().ok_or_else(|| TalkbackError::InvalidState {
            message: "not recording".to_string(),
        })?;

        active.running.store(false, Ordering::SeqCst);
        let outcome = active
            .handle
            .join()
            .ok()
            .flatten()
            .ok_or_else(|| TalkbackError::AudioCapture {
                message: format!("capture thread for recording {} did not finish", active.id),
            })?;

        self.source = Some(outcome.source);
        if let Some(error) = outcome.error {
            return Err(error);
        }

        let session = outcome.session;
        let duration = session.duration(self.sample_rate);
        let wav = encode_wav(&session.samples(), self.sample_rate)?;

        tracing::debug!(
            recording = session.id,
            frames = session.frame_count(),
            duration_ms = duration.as_millis() as u64,
            "Capture stopped"
        );

        Ok(Recording {
            id: session.id,
            started_at: session.started_at,
            duration,
            sample_rate: self.sample_rate,
            wav,
        })
    }

    fn spawn_capture<F>(
        &self,
        id: u64,
        body: F,
    ) -> std::io::Result<JoinHandle<Option<CaptureOutcome>>>
    where
        F: FnOnce() -> Option<CaptureOutcome> + Send + 'static,
    {
        #[cfg(test)]
        if self.refuse_spawn {
            return Err(std::io::Error::other("thread limit reached"));
        }
        thread::Builder::new()
            .name(format!("capture-{}", id))
            .spawn(body)
    }

    /// Close a started source that never reached a capture thread and keep it.
    fn release_source(&mut self, mut source: Box<dyn AudioSource>) {
        if let Err(e) = source.stop() {
            tracing::warn!("Failed to stop input device: {}", e);
        }
        self.source = Some(source);
    }

    /// Stop capturing and drop whatever was recorded.
    pub fn discard(&mut self) -> Result<()> {
        match self.stop() {
            Ok(recording) => {
                tracing::debug!(recording = recording.id, "Recording discarded");
                Ok(())
            }
            Err(TalkbackError::AudioCapture { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.active.is_some()
            && let Err(e) = self.stop()
        {
            tracing::debug!("Capture ended with error on drop: {}", e);
        }
    }
}

fn capture_loop(
    id: u64,
    mut source: Box<dyn AudioSource>,
    frame_size: usize,
    poll: Duration,
    running: Arc<AtomicBool>,
    hook: Option<CaptureFailureHook>,
) -> CaptureOutcome {
    let mut session = RecordingSession::new(id, frame_size);
    session.state = RecordingState::Active;
    let mut error = None;
    let mut drain_reads = 0;

    loop {
        let stopping = !running.load(Ordering::SeqCst);
        if stopping {
            drain_reads += 1;
            if drain_reads > MAX_DRAIN_READS {
                break;
            }
        }

        match source.read_samples() {
            Ok(samples) if samples.is_empty() => {
                if stopping {
                    break;
                }
                thread::sleep(poll);
            }
            Ok(samples) => {
                session.push_samples(&samples);
                if !stopping {
                    thread::sleep(poll);
                }
            }
            Err(e) => {
                tracing::error!(recording = id, "Capture read failed: {}", e);
                running.store(false, Ordering::SeqCst);
                if let Some(hook) = &hook {
                    hook(id, &e);
                }
                error = Some(e);
                break;
            }
        }
    }

    if let Err(e) = source.stop() {
        tracing::warn!(recording = id, "Failed to stop input device: {}", e);
    }
    session.finish();

    CaptureOutcome {
        session,
        source,
        error,
    }
}
