//! Speech-to-text collaborator.

pub mod transcriber;

pub use transcriber::{HttpTranscriber, MockTranscriber, Transcriber};
