use crate::defaults;
use crate::error::{Result, TalkbackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub api: ApiConfig,
    pub reply: ReplyConfig,
    pub voice: VoiceConfig,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_size: usize,
    pub min_duration_ms: u32,
    pub playback_backends: Vec<String>,
    pub playback_queue: usize,
}

/// Service endpoint and credential configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub key_file: PathBuf,
    pub stt_key_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

/// Response-generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplyConfig {
    pub model: String,
    pub temperature: f32,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice: String,
    pub streaming: bool,
    pub fallback_format: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            min_duration_ms: defaults::MIN_DURATION_MS,
            playback_backends: defaults::PLAYBACK_BACKENDS
                .iter()
                .map(|b| b.to_string())
                .collect(),
            playback_queue: defaults::PLAYBACK_QUEUE,
        }
    }
}

impl AudioConfig {
    /// Minimum utterance length worth processing.
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_duration_ms))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            key_file: PathBuf::from(defaults::KEY_FILE),
            stt_key_file: None,
            timeout_secs: defaults::TIMEOUT_SECS,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            model: defaults::REPLY_MODEL.to_string(),
            temperature: defaults::REPLY_TEMPERATURE,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: defaults::VOICE.to_string(),
            streaming: true,
            fallback_format: defaults::FALLBACK_FORMAT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TALKBACK_BASE_URL → api.base_url
    /// - TALKBACK_VOICE → voice.voice
    /// - TALKBACK_MODEL → reply.model
    /// - TALKBACK_AUDIO_DEVICE → audio.device
    ///
    /// TALKBACK_API_KEY is read by credential loading, not here.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("TALKBACK_BASE_URL")
            && !url.is_empty()
        {
            self.api.base_url = url;
        }

        if let Ok(voice) = std::env::var("TALKBACK_VOICE")
            && !voice.is_empty()
        {
            self.voice.voice = voice;
        }

        if let Ok(model) = std::env::var("TALKBACK_MODEL")
            && !model.is_empty()
        {
            self.reply.model = model;
        }

        if let Ok(device) = std::env::var("TALKBACK_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Reject values that would break capture, playback or requests.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(TalkbackError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be positive");
        }
        if self.audio.frame_size == 0 {
            return invalid("audio.frame_size", "must be positive");
        }
        if self.audio.playback_queue == 0 {
            return invalid("audio.playback_queue", "must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.reply.temperature) {
            return invalid("reply.temperature", "must be between 0 and 2");
        }
        if self.voice.voice.trim().is_empty() {
            return invalid("voice.voice", "must not be empty");
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return invalid("api.base_url", "must start with http:// or https://");
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux, or a relative
    /// `talkback.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("talkback").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("talkback.toml"))
    }
}
