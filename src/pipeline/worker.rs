//! The per-session background pipeline: transcribe → respond → speak.
//!
//! Each processing session runs on its own thread. The session checks its
//! cancel token before every stage and every observable effect; once the
//! token fires it keeps running only long enough to let in-flight calls
//! return, and produces nothing further.

use crate::audio::sink::Player;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::events::{EventReporter, SessionEvent};
use crate::pipeline::playback::{PlaybackBuffer, PushStatus, spawn_playback};
use crate::pipeline::types::{OrchestratorState, SessionOutcome};
use crate::reply::responder::Responder;
use crate::stt::transcriber::Transcriber;
use crate::tts::oneshot::{OneShotSynthesizer, single_chunk};
use crate::tts::streaming::StreamingSynthesizer;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// The session currently allowed to produce effects.
#[derive(Debug, Clone)]
pub(crate) struct LiveSession {
    pub id: u64,
    pub token: CancelToken,
}

/// State shared between the orchestrator and its session workers.
///
/// Every transition and every event emitted by a session happens under this
/// lock, and `begin_recording` fires the live token under it too, so a
/// session can never emit after it was superseded.
#[derive(Debug)]
pub(crate) struct LiveState {
    pub state: OrchestratorState,
    pub session: Option<LiveSession>,
    pub last_outcome: Option<SessionOutcome>,
}

impl LiveState {
    pub fn new() -> Self {
        Self {
            state: OrchestratorState::Idle,
            session: None,
            last_outcome: None,
        }
    }
}

pub(crate) type SharedState = Arc<Mutex<LiveState>>;

pub(crate) fn lock_state(shared: &SharedState) -> MutexGuard<'_, LiveState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Everything needed to turn reply text into sound.
pub struct Speech {
    /// `None` sends every reply straight to the one-shot path.
    pub streaming: Option<StreamingSynthesizer>,
    pub oneshot: Arc<dyn OneShotSynthesizer>,
    pub player: Arc<Player>,
    pub voice: String,
    pub playback_queue: usize,
}

/// Collaborators shared read-only by every session.
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub speech: Speech,
    pub reporter: Arc<dyn EventReporter>,
}

/// One processing session's view of the shared state.
pub struct SessionContext {
    id: u64,
    token: CancelToken,
    shared: SharedState,
    reporter: Arc<dyn EventReporter>,
}

impl SessionContext {
    pub(crate) fn new(
        id: u64,
        token: CancelToken,
        shared: SharedState,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            id,
            token,
            shared,
            reporter,
        }
    }

    /// A context that is live until its own token fires; used by `say`.
    pub fn standalone(id: u64, token: CancelToken, reporter: Arc<dyn EventReporter>) -> Self {
        let mut state = LiveState::new();
        state.session = Some(LiveSession {
            id,
            token: token.clone(),
        });
        Self::new(id, token, Arc::new(Mutex::new(state)), reporter)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    fn live<'a>(&self, shared: &'a mut LiveState) -> Option<&'a mut LiveState> {
        let live = !self.token.is_fired()
            && shared.session.as_ref().is_some_and(|s| s.id == self.id);
        live.then_some(shared)
    }

    /// Move to `state` if still live. Returns false once superseded.
    pub fn enter(&self, state: OrchestratorState) -> bool {
        let mut guard = lock_state(&self.shared);
        let Some(shared) = self.live(&mut guard) else {
            return false;
        };
        shared.state = state;
        self.reporter.report(&SessionEvent::StateChanged {
            session: self.id,
            state,
        });
        true
    }

    /// Report `event` if still live. Returns false once superseded.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let mut guard = lock_state(&self.shared);
        if self.live(&mut guard).is_none() {
            return false;
        }
        self.reporter.report(&event);
        true
    }

    /// Settle the shared state; a superseded session leaves no trace.
    fn settle(&self, outcome: &SessionOutcome) {
        let mut guard = lock_state(&self.shared);
        let Some(shared) = self.live(&mut guard) else {
            return;
        };
        shared.session = None;
        shared.state = OrchestratorState::Idle;
        shared.last_outcome = Some(outcome.clone());
        self.reporter.report(&SessionEvent::Finished {
            session: self.id,
            outcome: outcome.clone(),
        });
    }
}

/// Run one processing session to its terminal state.
pub fn run_session(ctx: &SessionContext, services: &Services, wav: &[u8]) -> SessionOutcome {
    let started = Instant::now();
    let result = process(ctx, services, wav);

    let outcome = match result {
        _ if ctx.token.is_fired() => SessionOutcome::Interrupted,
        Ok(()) => SessionOutcome::Completed,
        Err(e) => SessionOutcome::Failed {
            message: e.to_string(),
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        SessionOutcome::Completed => {
            tracing::info!(session = ctx.id, elapsed_ms, "Session completed")
        }
        SessionOutcome::Interrupted => {
            tracing::debug!(session = ctx.id, elapsed_ms, "Session interrupted")
        }
        SessionOutcome::Failed { message } => {
            tracing::error!(session = ctx.id, elapsed_ms, "Session failed: {}", message)
        }
    }

    ctx.settle(&outcome);
    outcome
}

/// Cancellation is not an error: every early exit on a fired token returns
/// `Ok` and the caller settles on `Interrupted`.
fn process(ctx: &SessionContext, services: &Services, wav: &[u8]) -> Result<()> {
    if ctx.token.is_fired() {
        return Ok(());
    }

    tracing::debug!(
        session = ctx.id,
        bytes = wav.len(),
        transcriber = services.transcriber.name(),
        "Transcribing"
    );
    let transcript = services.transcriber.transcribe(wav)?;
    if transcript.trim().is_empty() {
        return Err(TalkbackError::EmptyResult {
            stage: "Transcription".to_string(),
        });
    }
    if !ctx.emit(SessionEvent::Transcript {
        session: ctx.id,
        text: transcript.clone(),
    }) {
        return Ok(());
    }

    if !ctx.enter(OrchestratorState::Responding) {
        return Ok(());
    }
    let reply = services.responder.respond(&transcript)?;
    if reply.trim().is_empty() {
        return Err(TalkbackError::EmptyResult {
            stage: "Response".to_string(),
        });
    }
    if !ctx.emit(SessionEvent::Reply {
        session: ctx.id,
        text: reply.clone(),
    }) {
        return Ok(());
    }

    speak(ctx, &services.speech, &reply)
}

/// Synthesize `text` and play it, streaming when possible.
///
/// Falls back to a single one-shot request when the streaming channel is
/// unavailable or yields no audio. A missing playback backend is reported
/// as a warning and does not fail the call.
pub fn speak(ctx: &SessionContext, speech: &Speech, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(TalkbackError::InvalidState {
            message: "nothing to synthesize".to_string(),
        });
    }
    if !ctx.enter(OrchestratorState::Synthesizing) {
        return Ok(());
    }

    let (buffer, worker) = spawn_playback(
        Arc::clone(&speech.player),
        ctx.token.clone(),
        speech.playback_queue,
        ctx.id,
    )?;
    let delivered = deliver(ctx, speech, text, &buffer);
    drop(buffer);
    let report = worker.finish();

    delivered?;
    if let Some(e) = report.error {
        return Err(e);
    }
    if report.backend_missing {
        ctx.emit(SessionEvent::PlaybackUnavailable { session: ctx.id });
    }
    tracing::debug!(
        session = ctx.id,
        chunks = report.chunks_written,
        bytes = report.bytes_written,
        "Playback finished"
    );
    Ok(())
}

fn deliver(
    ctx: &SessionContext,
    speech: &Speech,
    text: &str,
    buffer: &PlaybackBuffer,
) -> Result<()> {
    let Some(streaming) = &speech.streaming else {
        return deliver_oneshot(ctx, speech, text, buffer);
    };

    match deliver_streaming(ctx, streaming, &speech.voice, text, buffer) {
        Err(TalkbackError::StreamUnavailable { message }) => {
            if ctx.token.is_fired() {
                return Ok(());
            }
            tracing::info!(
                session = ctx.id,
                "Streaming unavailable ({}), using one-shot synthesis",
                message
            );
            deliver_oneshot(ctx, speech, text, buffer)
        }
        other => other,
    }
}

fn deliver_streaming(
    ctx: &SessionContext,
    streaming: &StreamingSynthesizer,
    voice: &str,
    text: &str,
    buffer: &PlaybackBuffer,
) -> Result<()> {
    let stream = streaming.synthesize_streaming(text, voice, &ctx.token)?;
    let mut playing = false;

    for item in stream {
        let chunk = item?;
        if !playing {
            if !ctx.enter(OrchestratorState::Playing) {
                return Ok(());
            }
            playing = true;
        }
        // A closed queue means the playback worker stopped; its report says why.
        if buffer.push(chunk) != PushStatus::Queued {
            return Ok(());
        }
    }
    Ok(())
}

fn deliver_oneshot(
    ctx: &SessionContext,
    speech: &Speech,
    text: &str,
    buffer: &PlaybackBuffer,
) -> Result<()> {
    let audio = speech.oneshot.synthesize(text, &speech.voice)?;
    tracing::debug!(session = ctx.id, bytes = audio.len(), "One-shot synthesis complete");

    if !ctx.enter(OrchestratorState::Playing) {
        return Ok(());
    }
    buffer.push(single_chunk(audio));
    Ok(())
}
