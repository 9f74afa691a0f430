//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Credential unavailable at {path}: {message}")]
    CredentialMissing { path: String, message: String },

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("No audio playback backend available")]
    NoPlaybackBackend,

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // Collaborator errors
    #[error("{service} request failed: {message}")]
    Transport { service: String, message: String },

    #[error("Streaming synthesis unavailable: {message}")]
    StreamUnavailable { message: String },

    #[error("Malformed audio chunk: {message}")]
    Decode { message: String },

    #[error("{stage} result is empty")]
    EmptyResult { stage: String },

    // Control errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// Build a transport error for the named collaborator.
    pub fn transport(service: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkbackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = TalkbackError::ConfigInvalidValue {
            key: "sample_rate".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for sample_rate: must be positive"
        );
    }

    #[test]
    fn test_credential_missing_display() {
        let error = TalkbackError::CredentialMissing {
            path: "neuroKEY.txt".to_string(),
            message: "file is empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Credential unavailable at neuroKEY.txt: file is empty"
        );
    }

    #[test]
    fn test_audio_capture_display() {
        let error = TalkbackError::AudioCapture {
            message: "buffer overflow".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture failed: buffer overflow");
    }

    #[test]
    fn test_transport_helper_display() {
        let error = TalkbackError::transport("transcription", "HTTP 500: boom");
        assert_eq!(
            error.to_string(),
            "transcription request failed: HTTP 500: boom"
        );
    }

    #[test]
    fn test_stream_unavailable_display() {
        let error = TalkbackError::StreamUnavailable {
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Streaming synthesis unavailable: connection refused"
        );
    }

    #[test]
    fn test_empty_result_display() {
        let error = TalkbackError::EmptyResult {
            stage: "Transcription".to_string(),
        };
        assert_eq!(error.to_string(), "Transcription result is empty");
    }

    #[test]
    fn test_no_playback_backend_display() {
        assert_eq!(
            TalkbackError::NoPlaybackBackend.to_string(),
            "No audio playback backend available"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: TalkbackError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: TalkbackError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: TalkbackError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TalkbackError>();
        assert_sync::<TalkbackError>();
    }
}
