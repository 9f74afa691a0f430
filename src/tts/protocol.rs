//! Wire messages for the streaming synthesis channel.
//!
//! Client → server:
//! `{"type":"config","data":{"voice_id":"ara"}}`, then
//! `{"type":"text_chunk","data":{"text":"...","is_last":true}}`.
//!
//! Server → client: `{"data":{"data":{"audio":"<base64 pcm>","is_last":false}}}`.

use crate::error::{Result, TalkbackError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Config { voice_id: String },
    TextChunk { text: String, is_last: bool },
}

impl ClientMessage {
    pub fn config(voice: &str) -> Self {
        Self::Config {
            voice_id: voice.to_string(),
        }
    }

    /// The whole reply as one final text chunk.
    pub fn full_text(text: &str) -> Self {
        Self::TextChunk {
            text: text.to_string(),
            is_last: true,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Payload,
}

#[derive(Deserialize)]
struct Payload {
    data: AudioPayload,
}

#[derive(Deserialize)]
struct AudioPayload {
    audio: String,
    #[serde(default)]
    is_last: bool,
}

/// One decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChunk {
    /// Raw PCM bytes; may be empty.
    pub audio: Vec<u8>,
    pub is_last: bool,
}

/// Decode a server message.
///
/// # Errors
/// `Decode` if the message is not JSON, lacks `data.data.audio`, or the audio
/// is not valid base64.
pub fn parse_server_message(text: &str) -> Result<ServerChunk> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| TalkbackError::Decode {
        message: format!("Invalid synthesis message: {}", e),
    })?;

    let payload = envelope.data.data;
    let audio = STANDARD
        .decode(payload.audio.as_bytes())
        .map_err(|e| TalkbackError::Decode {
            message: format!("Invalid base64 audio: {}", e),
        })?;

    Ok(ServerChunk {
        audio,
        is_last: payload.is_last,
    })
}

/// Encode a server message; used by test doubles of the service.
pub fn encode_server_message(audio: &[u8], is_last: bool) -> String {
    serde_json::json!({
        "data": {
            "data": {
                "audio": STANDARD.encode(audio),
                "is_last": is_last,
            }
        }
    })
    .to_string()
}
