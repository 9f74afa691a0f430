//! Data types shared by the synthesis, playback and session stages.

use std::fmt;

/// One decoded unit of synthesized PCM audio.
///
/// Produced by a synthesizer, consumed exactly once by the audio sink, in
/// strictly increasing `sequence_no` order. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position in the reply's audio, starting at 0.
    pub sequence_no: u64,
    /// Raw 16-bit little-endian mono PCM.
    pub payload: Vec<u8>,
    /// Set on the final chunk of a reply.
    pub is_last: bool,
}

impl AudioChunk {
    pub fn new(sequence_no: u64, payload: Vec<u8>, is_last: bool) -> Self {
        Self {
            sequence_no,
            payload,
            is_last,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Stage of the orchestrator as seen from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Recording,
    Transcribing,
    Responding,
    Synthesizing,
    Playing,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Responding => "responding",
            Self::Synthesizing => "synthesizing",
            Self::Playing => "playing",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a processing session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Interrupted,
    Failed { message: String },
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_chunk_len() {
        let chunk = AudioChunk::new(0, vec![0; 4096], false);
        assert_eq!(chunk.len(), 4096);
        assert!(!chunk.is_empty());
        assert!(AudioChunk::new(1, Vec::new(), true).is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(OrchestratorState::Synthesizing.to_string(), "synthesizing");
        assert_eq!(
            serde_json::to_string(&OrchestratorState::Playing).unwrap(),
            "\"playing\""
        );
    }

    #[test]
    fn test_outcome_predicates_and_display() {
        let failed = SessionOutcome::Failed {
            message: "boom".to_string(),
        };
        assert!(failed.is_failed());
        assert_eq!(failed.to_string(), "failed: boom");
        assert!(SessionOutcome::Completed.is_completed());
        assert!(SessionOutcome::Interrupted.is_interrupted());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_string(&SessionOutcome::Failed {
            message: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"failed","message":"x"}"#);
    }
}
