//! Speech synthesis: the streaming channel and the one-shot fallback.

pub mod channel;
pub mod oneshot;
pub mod protocol;
pub mod streaming;

pub use channel::{
    ChannelConnector, ScriptStep, ScriptedConnector, SpeechChannel, WebSocketConnector,
};
pub use oneshot::{HttpSynthesizer, MockSynthesizer, OneShotSynthesizer};
pub use streaming::{ChunkStream, StreamingSynthesizer, SynthesisMetrics};
