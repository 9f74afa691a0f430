//! One-shot synthesis: a single request returning the whole reply's audio.

use crate::audio::wav::pcm_payload;
use crate::credentials::{ServiceConfig, ensure_success, http_client};
use crate::error::{Result, TalkbackError};
use crate::pipeline::types::AudioChunk;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const SERVICE: &str = "speech";

/// Synthesizes a complete reply in one call.
pub trait OneShotSynthesizer: Send + Sync {
    /// Return raw 16-bit mono PCM at the playback rate.
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

impl<T: OneShotSynthesizer> OneShotSynthesizer for Arc<T> {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        (**self).synthesize(text, voice)
    }
}

/// Wrap a complete buffer as the only, final chunk of a reply.
pub fn single_chunk(audio: Vec<u8>) -> AudioChunk {
    AudioChunk::new(0, audio, true)
}

/// The `/audio/speech` endpoint expects a capitalized voice name.
pub fn speech_voice_name(voice: &str) -> String {
    let mut chars = voice.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: String,
    response_format: &'a str,
}

/// HTTP client for `/audio/speech`.
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    response_format: String,
    sample_rate: u32,
}

impl HttpSynthesizer {
    /// `sample_rate` is the playback rate WAV responses are converted to.
    pub fn new(service: &ServiceConfig, response_format: &str, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            client: http_client(service, SERVICE)?,
            url: service.speech_url(),
            api_key: service.api_key().to_string(),
            response_format: response_format.to_string(),
            sample_rate,
        })
    }

    fn request<'a>(&'a self, text: &'a str, voice: &str) -> SpeechRequest<'a> {
        SpeechRequest {
            input: text,
            voice: speech_voice_name(voice),
            response_format: &self.response_format,
        }
    }
}

impl OneShotSynthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        tracing::debug!(voice, format = %self.response_format, "One-shot synthesis request");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(text, voice))
            .send()
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;

        let audio = ensure_success(SERVICE, response)?
            .bytes()
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;

        pcm_payload(audio.to_vec(), self.sample_rate)
    }
}

/// Mock one-shot synthesizer for testing
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    audio: Vec<u8>,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSynthesizer {
    pub fn new(audio: Vec<u8>) -> Self {
        Self {
            audio,
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OneShotSynthesizer for MockSynthesizer {
    fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(TalkbackError::transport(SERVICE, "HTTP 500: synthesis failed"));
        }
        Ok(self.audio.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::canned_http;
    use std::time::Duration;

    #[test]
    fn test_voice_is_capitalized() {
        assert_eq!(speech_voice_name("ara"), "Ara");
        assert_eq!(speech_voice_name("Rex"), "Rex");
        assert_eq!(speech_voice_name(""), "");
    }

    #[test]
    fn test_request_body_shape() {
        let service =
            ServiceConfig::new("https://api.example.com/v1", "k", "k", Duration::from_secs(5));
        let synth = HttpSynthesizer::new(&service, "wav", 24000).unwrap();
        let json = serde_json::to_value(synth.request("hi there", "ara")).unwrap();

        assert_eq!(json["input"], "hi there");
        assert_eq!(json["voice"], "Ara");
        assert_eq!(json["response_format"], "wav");
        assert_eq!(synth.url, "https://api.example.com/v1/audio/speech");
    }

    #[test]
    fn test_single_chunk_is_final() {
        let chunk = single_chunk(vec![1, 2, 3]);
        assert_eq!(chunk.sequence_no, 0);
        assert!(chunk.is_last);
        assert_eq!(chunk.len(), 3);
    }

    #[test]
    fn test_mock_synthesizer_counts_calls() {
        let synth = MockSynthesizer::new(vec![0; 10]);
        assert_eq!(synth.synthesize("x", "ara").unwrap().len(), 10);
        assert_eq!(synth.calls(), 1);

        let failing = MockSynthesizer::new(vec![]).with_failure();
        assert!(failing.synthesize("x", "ara").is_err());
    }

    #[test]
    fn test_http_error_status_is_transport_error() {
        let (service, server) = canned_http::serve_once("429 Too Many Requests", "slow down");
        let synth = HttpSynthesizer::new(&service, "wav", 24000).unwrap();

        match synth.synthesize("hello", "ara") {
            Err(TalkbackError::Transport { service, message }) => {
                assert_eq!(service, "speech");
                assert!(message.starts_with("HTTP 429"), "{}", message);
            }
            other => panic!("Expected Transport error, got {:?}", other),
        }
        assert_eq!(server.join().unwrap(), "POST /v1/audio/speech HTTP/1.1");
    }

    #[test]
    fn test_raw_pcm_response_passes_through() {
        let (service, server) = canned_http::serve_once("200 OK", "\u{1}\u{2}\u{3}\u{4}");
        let synth = HttpSynthesizer::new(&service, "pcm", 24000).unwrap();

        assert_eq!(synth.synthesize("hello", "ara").unwrap(), vec![1, 2, 3, 4]);
        server.join().unwrap();
    }
}
