//! Session pipeline: the orchestrator, per-session workers and playback.
//!
//! Every processing session runs on its own thread and feeds a dedicated
//! playback worker through a bounded crossbeam channel for backpressure.

pub mod cancel;
pub mod events;
pub mod orchestrator;
pub mod playback;
pub mod types;
pub mod worker;

pub use cancel::CancelToken;
pub use events::{ChannelReporter, EventReporter, LogReporter, MultiReporter, SessionEvent};
pub use orchestrator::{Orchestrator, SessionHandle, Status};
pub use playback::{PlaybackBuffer, PlaybackReport, PlaybackWorker, PushStatus, spawn_playback};
pub use types::{AudioChunk, OrchestratorState, SessionOutcome};
pub use worker::{Services, SessionContext, Speech, run_session, speak};
