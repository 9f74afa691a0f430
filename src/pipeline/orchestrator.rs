//! The orchestrator state machine.
//!
//! Sequences Recorder → Transcriber → Responder → synthesis/playback and owns
//! the interruption protocol. Control calls (`begin_recording`,
//! `end_recording`, `cancel`) return promptly; processing runs on one
//! background thread per session.

use crate::audio::recorder::Recorder;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::events::SessionEvent;
use crate::pipeline::types::{OrchestratorState, SessionOutcome};
use crate::pipeline::worker::{
    LiveSession, LiveState, Services, SessionContext, SharedState, lock_state, run_session,
};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Snapshot of the orchestrator for status queries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Status {
    pub state: OrchestratorState,
    pub live_session: Option<u64>,
    pub last_outcome: Option<SessionOutcome>,
}

#[derive(Debug, Default)]
struct OutcomeSlot {
    outcome: Mutex<Option<SessionOutcome>>,
    ready: Condvar,
}

/// Handle to a processing session, used only to observe its terminal state.
///
/// Cloning is cheap; dropping a handle does not affect the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    slot: Arc<OutcomeSlot>,
}

impl SessionHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            slot: Arc::new(OutcomeSlot::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn complete(&self, outcome: SessionOutcome) {
        *self.slot.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
        self.slot.ready.notify_all();
    }

    /// The terminal outcome, if reached.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.slot
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Block until the session reaches a terminal state.
    pub fn wait(&self) -> SessionOutcome {
        let mut guard = self.slot.outcome.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = self
                .slot
                .ready
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block up to `timeout`; `None` if the session is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SessionOutcome> {
        let guard = self.slot.outcome.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .slot
            .ready
            .wait_timeout_while(guard, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

/// Voice interaction state machine.
pub struct Orchestrator {
    recorder: Mutex<Recorder>,
    services: Arc<Services>,
    min_duration: Duration,
    shared: SharedState,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(mut recorder: Recorder, services: Services, min_duration: Duration) -> Self {
        let shared: SharedState = Arc::new(Mutex::new(LiveState::new()));
        let services = Arc::new(services);

        // Report a dead microphone right away instead of at end_recording.
        let hook_shared = Arc::clone(&shared);
        let hook_services = Arc::clone(&services);
        recorder.on_capture_failure(Arc::new(move |recording, error: &TalkbackError| {
            let was_recording = {
                let mut state = lock_state(&hook_shared);
                let was_recording = state.state == OrchestratorState::Recording;
                if was_recording {
                    state.state = OrchestratorState::Idle;
                }
                was_recording
            };
            let reporter = &hook_services.reporter;
            reporter.report(&SessionEvent::CaptureFailed {
                message: error.to_string(),
            });
            if was_recording {
                reporter.report(&SessionEvent::StateChanged {
                    session: recording,
                    state: OrchestratorState::Idle,
                });
            }
        }));

        Self {
            recorder: Mutex::new(recorder),
            services,
            min_duration,
            shared,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: OrchestratorState, session: u64) {
        lock_state(&self.shared).state = state;
        self.services
            .reporter
            .report(&SessionEvent::StateChanged { session, state });
    }

    /// Disqualify the live session, if any. Returns its id.
    fn interrupt_live(&self) -> Option<u64> {
        let mut shared = lock_state(&self.shared);
        let live = shared.session.take()?;
        if live.token.fire() {
            tracing::debug!(session = live.id, "Interrupting session");
        }
        shared.last_outcome = Some(SessionOutcome::Interrupted);
        shared.state = OrchestratorState::Idle;
        Some(live.id)
    }

    /// Start a new utterance, interrupting whatever the previous one is doing.
    ///
    /// Never waits for the interrupted session to notice.
    ///
    /// # Errors
    /// `InvalidState` if already recording; the device error if the input
    /// cannot be opened (the orchestrator stays idle).
    pub fn begin_recording(&self) -> Result<u64> {
        let mut recorder = self.recorder();
        if recorder.is_started() && !recorder.is_active() {
            // The capture died and was already reported; collect it.
            recorder.discard()?;
        }
        if recorder.is_started() {
            return Err(TalkbackError::InvalidState {
                message: "already recording".to_string(),
            });
        }

        if self.interrupt_live().is_some() && !self.services.speech.player.try_reset() {
            tracing::debug!("Playback busy; interrupted session will stop after its current write");
        }

        let id = match recorder.start() {
            Ok(id) => id,
            Err(e) => {
                self.services.reporter.report(&SessionEvent::CaptureFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.set_state(OrchestratorState::Recording, id);
        self.services
            .reporter
            .report(&SessionEvent::RecordingStarted { recording: id });
        if !recorder.is_active() {
            // Capture failed before the state above was visible to the hook.
            lock_state(&self.shared).state = OrchestratorState::Idle;
        }
        Ok(id)
    }

    /// Finish the utterance and hand it to a new processing session.
    ///
    /// Returns `None` when the utterance was too short to process.
    ///
    /// # Errors
    /// `InvalidState` if not recording; `AudioCapture` if capture failed
    /// (reported, orchestrator back to idle).
    pub fn end_recording(&self) -> Result<Option<SessionHandle>> {
        let recording = {
            let mut recorder = self.recorder();
            let already_reported = recorder.is_started() && !recorder.is_active();
            match recorder.stop() {
                Ok(recording) => recording,
                Err(e @ TalkbackError::InvalidState { .. }) => return Err(e),
                Err(e) if already_reported => {
                    lock_state(&self.shared).state = OrchestratorState::Idle;
                    return Err(e);
                }
                Err(e) => {
                    self.set_state(OrchestratorState::Idle, 0);
                    self.services.reporter.report(&SessionEvent::CaptureFailed {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        };

        if recording.duration < self.min_duration {
            self.set_state(OrchestratorState::Idle, recording.id);
            self.services
                .reporter
                .report(&SessionEvent::RecordingDiscarded {
                    recording: recording.id,
                    duration: recording.duration,
                });
            return Ok(None);
        }

        let id = recording.id;
        let token = CancelToken::new();
        let handle = SessionHandle::new(id);
        {
            let mut shared = lock_state(&self.shared);
            shared.session = Some(LiveSession {
                id,
                token: token.clone(),
            });
            shared.state = OrchestratorState::Transcribing;
        }
        self.services.reporter.report(&SessionEvent::StateChanged {
            session: id,
            state: OrchestratorState::Transcribing,
        });

        let ctx = SessionContext::new(
            id,
            token,
            Arc::clone(&self.shared),
            Arc::clone(&self.services.reporter),
        );
        let services = Arc::clone(&self.services);
        let worker_handle = handle.clone();

        let spawned = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || {
                let outcome = run_session(&ctx, &services, &recording.wav);
                worker_handle.complete(outcome);
            });

        match spawned {
            Ok(join) => {
                let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
                reap_finished(&mut workers);
                workers.push(join);
                Ok(Some(handle))
            }
            Err(e) => {
                let mut shared = lock_state(&self.shared);
                shared.session = None;
                shared.state = OrchestratorState::Idle;
                Err(TalkbackError::Other(format!(
                    "Failed to spawn session worker: {}",
                    e
                )))
            }
        }
    }

    /// Drop an active recording unprocessed and interrupt the live session.
    ///
    /// Returns true if there was anything to cancel.
    pub fn cancel(&self) -> Result<bool> {
        let mut cancelled = false;
        {
            let mut recorder = self.recorder();
            if recorder.is_started() {
                recorder.discard()?;
                cancelled = true;
            }
        }

        if self.interrupt_live().is_some() {
            self.services.speech.player.try_reset();
            cancelled = true;
        }

        if cancelled {
            self.set_state(OrchestratorState::Idle, 0);
        }
        Ok(cancelled)
    }

    /// Start recording if idle, otherwise finish the current recording.
    pub fn toggle(&self) -> Result<Option<SessionHandle>> {
        if self.is_recording() {
            self.end_recording()
        } else {
            self.begin_recording().map(|_| None)
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder().is_started()
    }

    pub fn state(&self) -> OrchestratorState {
        lock_state(&self.shared).state
    }

    /// Id of the session currently allowed to produce effects.
    pub fn live_session(&self) -> Option<u64> {
        lock_state(&self.shared).session.as_ref().map(|s| s.id)
    }

    pub fn last_outcome(&self) -> Option<SessionOutcome> {
        lock_state(&self.shared).last_outcome.clone()
    }

    /// Name of the bound playback backend, if any.
    pub fn playback_backend(&self) -> Option<String> {
        self.services.speech.player.backend_name().map(str::to_string)
    }

    pub fn status(&self) -> Status {
        let shared = lock_state(&self.shared);
        Status {
            state: shared.state,
            live_session: shared.session.as_ref().map(|s| s.id),
            last_outcome: shared.last_outcome.clone(),
        }
    }

    /// Cancel everything and wait for every session worker to exit.
    ///
    /// Workers blocked in a network call finish it before exiting.
    pub fn shutdown(&self) {
        if let Err(e) = self.cancel() {
            tracing::warn!("Failed to cancel during shutdown: {}", e);
        }

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Session worker panicked");
            }
        }
        self.services.speech.player.close();
    }
}

fn reap_finished(workers: &mut Vec<JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        workers.drain(..).partition(|w| w.is_finished());
    for worker in finished {
        if worker.join().is_err() {
            tracing::error!("Session worker panicked");
        }
    }
    *workers = running;
}
