//! Audio input (capture, recording) and output (playback sinks).

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod command_sink;
#[cfg(feature = "cpal-audio")]
pub mod cpal_sink;
pub mod recorder;
pub mod sink;
pub mod source;
pub mod wav;

pub use recorder::{Recorder, Recording};
pub use sink::{AudioSink, CollectorSink, Player};
pub use source::{AudioSource, MockAudioSource};
