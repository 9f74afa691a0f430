//! Observable session events and the reporters that surface them.
//!
//! Events are the only user-visible effects of a processing session besides
//! audio. A session emits them only while it is live.

use crate::pipeline::types::{OrchestratorState, SessionOutcome};
use crossbeam_channel::Sender;
use owo_colors::OwoColorize;
use std::time::Duration;

/// Something the user should see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        session: u64,
        state: OrchestratorState,
    },
    RecordingStarted {
        recording: u64,
    },
    /// The utterance was too short (or cancelled) and will not be processed.
    RecordingDiscarded {
        recording: u64,
        duration: Duration,
    },
    CaptureFailed {
        message: String,
    },
    Transcript {
        session: u64,
        text: String,
    },
    Reply {
        session: u64,
        text: String,
    },
    PlaybackUnavailable {
        session: u64,
    },
    Finished {
        session: u64,
        outcome: SessionOutcome,
    },
}

/// Sink for session events.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &SessionEvent);
}

/// Renders events as status lines on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter {
    quiet: bool,
}

impl LogReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl EventReporter for LogReporter {
    fn report(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { session, state } => {
                tracing::debug!(session, state = %state, "State changed");
            }
            SessionEvent::RecordingStarted { recording } => {
                tracing::debug!(recording, "Recording started");
                if !self.quiet {
                    eprintln!("{}", "● Recording...".red());
                }
            }
            SessionEvent::RecordingDiscarded {
                recording,
                duration,
            } => {
                tracing::info!(
                    recording,
                    duration_ms = duration.as_millis() as u64,
                    "Recording too short, discarded"
                );
                if !self.quiet {
                    eprintln!(
                        "{}",
                        format!("Recording too short ({:.1}s), ignored", duration.as_secs_f32())
                            .dimmed()
                    );
                }
            }
            SessionEvent::CaptureFailed { message } => {
                eprintln!("{} {}", "Recording failed:".red().bold(), message);
            }
            SessionEvent::Transcript { session, text } => {
                tracing::info!(session, "Transcript: {}", text);
                if !self.quiet {
                    eprintln!("{} {}", "You:".cyan().bold(), text);
                }
            }
            SessionEvent::Reply { session, text } => {
                tracing::info!(session, "Reply: {}", text);
                if !self.quiet {
                    eprintln!("{} {}", "Reply:".green().bold(), text);
                }
            }
            SessionEvent::PlaybackUnavailable { session } => {
                eprintln!(
                    "{} session {}: no audio output available, reply not spoken",
                    "Warning:".yellow().bold(),
                    session
                );
            }
            SessionEvent::Finished { session, outcome } => match outcome {
                SessionOutcome::Failed { message } => {
                    eprintln!("{} {}", "Error:".red().bold(), message);
                }
                other => tracing::debug!(session, outcome = %other, "Session finished"),
            },
        }
    }
}

/// Forwards events to a crossbeam channel; for tests and the daemon.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: Sender<SessionEvent>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl EventReporter for ChannelReporter {
    fn report(&self, event: &SessionEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            tracing::trace!("Event channel full or closed, dropping event");
        }
    }
}

/// Fans one event out to several reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn EventReporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn EventReporter>>) -> Self {
        Self { reporters }
    }
}

impl EventReporter for MultiReporter {
    fn report(&self, event: &SessionEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}
