//! API credentials and derived service endpoints.
//!
//! Loaded once at startup and shared read-only (behind `Arc`) by every
//! collaborator; nothing here is mutated after construction.

use crate::config::ApiConfig;
use crate::error::{Result, TalkbackError};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable that bypasses the key file.
pub const API_KEY_ENV: &str = "TALKBACK_API_KEY";

/// Immutable service settings shared by all collaborators.
#[derive(Clone)]
pub struct ServiceConfig {
    base_url: String,
    api_key: String,
    stt_api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("stt_api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ServiceConfig {
    /// Build from explicit values (tests and embedding).
    pub fn new(base_url: &str, api_key: &str, stt_api_key: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            stt_api_key: stt_api_key.to_string(),
            timeout,
        }
    }

    /// Load keys according to the API configuration.
    ///
    /// `TALKBACK_API_KEY` wins over both key files when set and non-empty.
    /// Otherwise the key file must exist and hold a non-blank key; the
    /// transcription key file defaults to the main one.
    pub fn load(config: &ApiConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            let key = key.trim();
            return Ok(Self::new(&config.base_url, key, key, timeout));
        }

        let api_key = read_key_file(&config.key_file)?;
        let stt_api_key = match &config.stt_key_file {
            Some(path) => read_key_file(path)?,
            None => api_key.clone(),
        };

        Ok(Self::new(&config.base_url, &api_key, &stt_api_key, timeout))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn stt_api_key(&self) -> &str {
        &self.stt_api_key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transcription_url(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }

    /// WebSocket endpoint for streaming synthesis.
    pub fn streaming_speech_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/realtime/audio/speech")
    }
}

/// Build a blocking HTTP client with the configured timeout.
pub(crate) fn http_client(
    service: &ServiceConfig,
    name: &str,
) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(service.timeout())
        .build()
        .map_err(|e| TalkbackError::transport(name, format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into a transport error carrying status and body.
pub(crate) fn ensure_success(
    name: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(TalkbackError::transport(
        name,
        format!("HTTP {}: {}", status.as_u16(), body.trim()),
    ))
}

/// Read and trim a key file.
fn read_key_file(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).map_err(|e| TalkbackError::CredentialMissing {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let key = contents.trim();
    if key.is_empty() {
        return Err(TalkbackError::CredentialMissing {
            path: path.display().to_string(),
            message: "file is empty".to_string(),
        });
    }

    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn key_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn api_config(key_file: &Path) -> ApiConfig {
        ApiConfig {
            key_file: key_file.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoints_derive_from_base_url() {
        let service = ServiceConfig::new(
            "https://api.x.ai/v1/",
            "k",
            "k",
            Duration::from_secs(30),
        );

        assert_eq!(
            service.transcription_url(),
            "https://api.x.ai/v1/audio/transcriptions"
        );
        assert_eq!(service.chat_url(), "https://api.x.ai/v1/chat/completions");
        assert_eq!(service.speech_url(), "https://api.x.ai/v1/audio/speech");
        assert_eq!(
            service.streaming_speech_url(),
            "wss://api.x.ai/v1/realtime/audio/speech"
        );
    }

    #[test]
    fn test_plain_http_maps_to_ws() {
        let service = ServiceConfig::new("http://localhost:9000", "k", "k", Duration::ZERO);
        assert_eq!(
            service.streaming_speech_url(),
            "ws://localhost:9000/realtime/audio/speech"
        );
    }

    #[test]
    fn test_load_trims_key_and_reuses_it_for_stt() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(API_KEY_ENV) };

        let file = key_file("  xai-secret\n");
        let service = ServiceConfig::load(&api_config(file.path())).unwrap();

        assert_eq!(service.api_key(), "xai-secret");
        assert_eq!(service.stt_api_key(), "xai-secret");
        assert_eq!(service.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_uses_separate_stt_key_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(API_KEY_ENV) };

        let main = key_file("main-key");
        let stt = key_file("stt-key");
        let config = ApiConfig {
            stt_key_file: Some(stt.path().to_path_buf()),
            ..api_config(main.path())
        };

        let service = ServiceConfig::load(&config).unwrap();
        assert_eq!(service.api_key(), "main-key");
        assert_eq!(service.stt_api_key(), "stt-key");
    }

    #[test]
    fn test_missing_key_file_is_credential_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(API_KEY_ENV) };

        let config = api_config(&PathBuf::from("/tmp/talkback_no_such_key_file_98765"));
        match ServiceConfig::load(&config) {
            Err(TalkbackError::CredentialMissing { path, .. }) => {
                assert!(path.contains("talkback_no_such_key_file_98765"));
            }
            other => panic!("Expected CredentialMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_key_file_is_credential_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var(API_KEY_ENV) };

        let file = key_file("   \n");
        match ServiceConfig::load(&api_config(file.path())) {
            Err(TalkbackError::CredentialMissing { message, .. }) => {
                assert_eq!(message, "file is empty");
            }
            other => panic!("Expected CredentialMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_env_key_overrides_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var(API_KEY_ENV, "env-key") };

        let config = api_config(&PathBuf::from("/tmp/talkback_no_such_key_file_98765"));
        let service = ServiceConfig::load(&config).unwrap();
        assert_eq!(service.api_key(), "env-key");
        assert_eq!(service.stt_api_key(), "env-key");

        unsafe { std::env::remove_var(API_KEY_ENV) };
    }

    #[test]
    fn test_debug_redacts_keys() {
        let service = ServiceConfig::new("https://x", "secret", "secret", Duration::ZERO);
        let debug = format!("{:?}", service);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }
}

/// Single-request HTTP server for exercising the real clients.
#[cfg(test)]
pub(crate) mod canned_http {
    use super::ServiceConfig;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// Answer one request with `status` and `body`, then stop.
    ///
    /// Returns a service pointed at the server and a handle yielding the
    /// request line that was received.
    pub fn serve_once(status: &str, body: &str) -> (ServiceConfig, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0usize;
            let mut chunked = false;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                let lower = header.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                } else if lower.starts_with("transfer-encoding:") && lower.contains("chunked") {
                    chunked = true;
                }
            }

            if chunked {
                loop {
                    let mut size = String::new();
                    reader.read_line(&mut size).unwrap();
                    let size = usize::from_str_radix(size.trim(), 16).unwrap();
                    let mut data = vec![0u8; size + 2];
                    reader.read_exact(&mut data).unwrap();
                    if size == 0 {
                        break;
                    }
                }
            } else {
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
            }

            reader.get_mut().write_all(response.as_bytes()).unwrap();
            request_line.trim_end().to_string()
        });

        let service = ServiceConfig::new(
            &format!("http://{}/v1", addr),
            "key",
            "stt-key",
            Duration::from_secs(5),
        );
        (service, handle)
    }
}
