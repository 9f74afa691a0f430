//! Default configuration constants for talkback.
//!
//! Shared constants used across configuration types, collaborators and tests
//! so the same values are never spelled twice.

/// Default capture/playback sample rate in Hz.
///
/// The synthesis service streams 24kHz PCM, so capture uses the same rate
/// and playback needs no resampling.
pub const SAMPLE_RATE: u32 = 24000;

/// Capture and playback are mono.
pub const CHANNELS: u16 = 1;

/// Bytes per sample (16-bit linear PCM).
pub const SAMPLE_WIDTH: u32 = 2;

/// Samples per captured frame.
pub const FRAME_SIZE: usize = 1024;

/// Recordings shorter than this are discarded without processing.
pub const MIN_DURATION_MS: u32 = 500;

/// Capacity of the playback queue between the chunk receiver and the sink.
pub const PLAYBACK_QUEUE: usize = 4;

/// Playback backends probed at startup, in order of preference.
pub const PLAYBACK_BACKENDS: &[&str] = &["cpal", "pw-play", "paplay", "aplay"];

/// Base URL for all service endpoints.
pub const BASE_URL: &str = "https://api.x.ai/v1";

/// File holding the API key.
pub const KEY_FILE: &str = "neuroKEY.txt";

/// Request timeout for the plain HTTP collaborators.
pub const TIMEOUT_SECS: u64 = 30;

/// Response-generation model.
pub const REPLY_MODEL: &str = "grok-4";

/// Response-generation sampling temperature.
pub const REPLY_TEMPERATURE: f32 = 0.7;

/// Voice selector for synthesis.
pub const VOICE: &str = "ara";

/// Container requested from the one-shot synthesis endpoint.
pub const FALLBACK_FORMAT: &str = "wav";

/// How often a blocked producer re-checks its cancel token.
pub const CANCEL_POLL_MS: u64 = 50;

/// Capture thread polling interval (~60Hz).
pub const CAPTURE_POLL_MS: u64 = 16;
