//! talkback - push-to-talk voice conversations
//!
//! Record an utterance, transcribe it, generate a reply and speak it back
//! with streamed synthesis. Starting a new utterance interrupts the reply.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod pipeline;
pub mod reply;
pub mod stt;
pub mod tts;

// Composition root - needs everything
pub mod app;

// Collaborator seams
pub use audio::sink::AudioSink;
pub use audio::source::AudioSource;
pub use reply::responder::Responder;
pub use stt::transcriber::Transcriber;
pub use tts::channel::{ChannelConnector, SpeechChannel};
pub use tts::oneshot::OneShotSynthesizer;

// Pipeline
pub use pipeline::orchestrator::{Orchestrator, SessionHandle, Status};
pub use pipeline::types::{AudioChunk, OrchestratorState, SessionOutcome};

// Error handling
pub use error::{Result, TalkbackError};

// Config
pub use config::Config;
pub use credentials::ServiceConfig;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_appends_hash_only_when_known() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
