use crate::credentials::{ServiceConfig, ensure_success, http_client};
use crate::error::{Result, TalkbackError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SERVICE: &str = "transcription";

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (remote service vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete WAV file to text.
    ///
    /// A blank result is returned as-is; the caller decides what it means.
    fn transcribe(&self, wav: &[u8]) -> Result<String>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe(&self, wav: &[u8]) -> Result<String> {
        (**self).transcribe(wav)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Multipart upload to the `/audio/transcriptions` endpoint.
pub struct HttpTranscriber {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
}

impl HttpTranscriber {
    pub fn new(service: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(service, SERVICE)?,
            url: service.transcription_url(),
            api_key: service.stt_api_key().to_string(),
        })
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::blocking::multipart::Part::bytes(wav.to_vec())
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;

        let body: TranscriptionResponse = ensure_success(SERVICE, response)?
            .json()
            .map_err(|e| TalkbackError::transport(SERVICE, format!("Invalid response: {}", e)))?;

        Ok(body.text)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    response: String,
    failure: Option<String>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    last_audio_len: Arc<Mutex<Option<usize>>>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            failure: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            last_audio_len: Arc::new(Mutex::new(None)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail like an HTTP 500
    pub fn with_failure(mut self) -> Self {
        self.failure = Some("HTTP 500: internal error".to_string());
        self
    }

    /// Configure each call to take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls made so far (shared between clones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Size of the last WAV buffer received.
    pub fn last_audio_len(&self) -> Option<usize> {
        *self.last_audio_len.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, wav: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_audio_len.lock().unwrap_or_else(|e| e.into_inner()) = Some(wav.len());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.failure {
            Some(message) => Err(TalkbackError::transport(SERVICE, message.clone())),
            None => Ok(self.response.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
