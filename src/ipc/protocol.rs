//! JSON message protocol for IPC communication between CLI and daemon.
//!
//! One command per connection, one line of JSON each way.

use crate::pipeline::types::{OrchestratorState, SessionOutcome};
use serde::{Deserialize, Serialize};

/// Commands sent by CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start recording if idle, otherwise stop and process
    Toggle,
    /// Start recording, interrupting any reply in progress
    Start,
    /// Stop recording and process the utterance
    Stop,
    /// Discard the recording and interrupt any reply in progress
    Cancel,
    /// Get daemon status
    Status,
    /// Shutdown the daemon
    Shutdown,
}

impl Command {
    /// Serialize command to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize command from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent by daemon to CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded
    Ok,
    /// Recording started
    Recording { recording: u64 },
    /// Recording stopped; `session` is `None` when the utterance was too short
    Processing { session: Option<u64> },
    /// Current daemon status
    Status {
        state: OrchestratorState,
        live_session: Option<u64>,
        last_outcome: Option<SessionOutcome>,
        playback_backend: Option<String>,
        daemon_version: String,
    },
    /// Error occurred
    Error { message: String },
}

impl Response {
    /// Serialize response to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize response from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_all_variants_serialize() {
        let commands = vec![
            Command::Toggle,
            Command::Start,
            Command::Stop,
            Command::Cancel,
            Command::Status,
            Command::Shutdown,
        ];

        for cmd in commands {
            let json = cmd.to_json().expect("should serialize");
            let deserialized = Command::from_json(&json).expect("should deserialize");
            assert_eq!(cmd, deserialized, "roundtrip failed for {:?}", cmd);
        }
    }

    #[test]
    fn test_command_json_format_examples() {
        assert_eq!(Command::Toggle.to_json().unwrap(), r#"{"type":"toggle"}"#);
        assert_eq!(Command::Start.to_json().unwrap(), r#"{"type":"start"}"#);
        assert_eq!(Command::Cancel.to_json().unwrap(), r#"{"type":"cancel"}"#);
    }

    #[test]
    fn test_response_json_format_examples() {
        assert_eq!(Response::Ok.to_json().unwrap(), r#"{"type":"ok"}"#);
        assert_eq!(
            Response::Recording { recording: 3 }.to_json().unwrap(),
            r#"{"type":"recording","recording":3}"#
        );
        assert_eq!(
            Response::Processing { session: None }.to_json().unwrap(),
            r#"{"type":"processing","session":null}"#
        );
    }

    #[test]
    fn test_status_carries_outcome() {
        let resp = Response::Status {
            state: OrchestratorState::Playing,
            live_session: Some(4),
            last_outcome: Some(SessionOutcome::Failed {
                message: "transcription request failed: HTTP 500".to_string(),
            }),
            playback_backend: Some("paplay".to_string()),
            daemon_version: "0.1.0".to_string(),
        };
        let json = resp.to_json().expect("should serialize");
        assert!(json.contains(r#""state":"playing""#));
        assert!(json.contains(r#""outcome":"failed""#));
        assert_eq!(Response::from_json(&json).unwrap(), resp);
    }

    #[test]
    fn test_invalid_json_returns_error() {
        assert!(Command::from_json(r#"{"type": "unknown_command"}"#).is_err());
        assert!(Command::from_json(r#"{"invalid": "json"}"#).is_err());
        assert!(Command::from_json("not json at all").is_err());
    }

    #[test]
    fn test_response_error_with_special_chars() {
        let resp = Response::Error {
            message: r#"Error: "quoted" (timeout)"#.to_string(),
        };
        let json = resp.to_json().expect("should serialize");
        assert_eq!(Response::from_json(&json).unwrap(), resp);
    }
}
