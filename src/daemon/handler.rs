//! Command handler implementation for the daemon.

use crate::daemon::DaemonState;
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::pipeline::orchestrator::Orchestrator;
use std::sync::Arc;

/// Command handler for daemon IPC commands.
pub struct DaemonCommandHandler {
    state: Arc<DaemonState>,
}

impl DaemonCommandHandler {
    /// Creates a new command handler.
    pub fn new(state: DaemonState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Run an orchestrator call off the async workers; device open and
    /// capture join may block briefly.
    async fn blocking<F>(&self, f: F) -> Response
    where
        F: FnOnce(&Orchestrator) -> Response + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.state.orchestrator);
        match tokio::task::spawn_blocking(move || f(&orchestrator)).await {
            Ok(response) => response,
            Err(e) => Response::Error {
                message: format!("Command task failed: {}", e),
            },
        }
    }

    async fn start_recording(&self) -> Response {
        self.blocking(|orch| match orch.begin_recording() {
            Ok(recording) => Response::Recording { recording },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        })
        .await
    }

    async fn stop_recording(&self) -> Response {
        self.blocking(|orch| match orch.end_recording() {
            Ok(handle) => Response::Processing {
                session: handle.map(|h| h.id()),
            },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        })
        .await
    }

    async fn toggle_recording(&self) -> Response {
        if self.state.orchestrator.is_recording() {
            self.stop_recording().await
        } else {
            self.start_recording().await
        }
    }

    async fn cancel(&self) -> Response {
        self.blocking(|orch| match orch.cancel() {
            Ok(true) => Response::Ok,
            Ok(false) => Response::Error {
                message: "Nothing to cancel".to_string(),
            },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        })
        .await
    }

    fn get_status(&self) -> Response {
        let orchestrator = &self.state.orchestrator;
        let status = orchestrator.status();
        Response::Status {
            state: status.state,
            live_session: status.live_session,
            last_outcome: status.last_outcome,
            playback_backend: orchestrator.playback_backend(),
            daemon_version: crate::version_string(),
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Start => self.start_recording().await,
            Command::Stop => self.stop_recording().await,
            Command::Cancel => self.cancel().await,
            Command::Toggle => self.toggle_recording().await,
            Command::Status => self.get_status(),
            Command::Shutdown => {
                self.state.shutdown.notify_one();
                Response::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::Recorder;
    use crate::audio::sink::{CollectorSink, Player};
    use crate::audio::source::MockAudioSource;
    use crate::pipeline::events::LogReporter;
    use crate::pipeline::types::OrchestratorState;
    use crate::pipeline::worker::{Services, Speech};
    use crate::reply::responder::MockResponder;
    use crate::stt::transcriber::MockTranscriber;
    use crate::tts::oneshot::MockSynthesizer;
    use std::time::Duration;

    fn create_test_handler() -> DaemonCommandHandler {
        let services = Services {
            transcriber: Arc::new(MockTranscriber::new()),
            responder: Arc::new(MockResponder::new()),
            speech: Speech {
                streaming: None,
                oneshot: Arc::new(MockSynthesizer::new(vec![0; 32])),
                player: Arc::new(Player::with_sink(Box::new(CollectorSink::new()))),
                voice: "ara".to_string(),
                playback_queue: 2,
            },
            reporter: Arc::new(LogReporter::new(true)),
        };
        let recorder = Recorder::new(
            Box::new(MockAudioSource::new().with_duration(1.0, 24000, 1024)),
            24000,
            1024,
        );
        let orchestrator = Orchestrator::new(recorder, services, Duration::from_millis(500));
        DaemonCommandHandler::new(DaemonState::new(Arc::new(orchestrator)))
    }

    #[tokio::test]
    async fn test_handler_status_when_idle() {
        let handler = create_test_handler();

        match handler.handle(Command::Status).await {
            Response::Status {
                state,
                live_session,
                last_outcome,
                playback_backend,
                ..
            } => {
                assert_eq!(state, OrchestratorState::Idle);
                assert_eq!(live_session, None);
                assert_eq!(last_outcome, None);
                assert_eq!(playback_backend.as_deref(), Some("collector"));
            }
            other => panic!("Expected Status response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_stop_when_not_recording() {
        let handler = create_test_handler();
        match handler.handle(Command::Stop).await {
            Response::Error { message } => assert!(message.contains("not recording")),
            other => panic!("Expected Error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_start_then_cancel() {
        let handler = create_test_handler();

        assert!(matches!(
            handler.handle(Command::Start).await,
            Response::Recording { .. }
        ));
        assert_eq!(handler.handle(Command::Cancel).await, Response::Ok);
        assert!(matches!(
            handler.handle(Command::Cancel).await,
            Response::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_handler_toggle_starts_then_processes() {
        let handler = create_test_handler();

        assert!(matches!(
            handler.handle(Command::Toggle).await,
            Response::Recording { .. }
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            handler.handle(Command::Toggle).await,
            Response::Processing { session: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_handler_shutdown_notifies() {
        let handler = create_test_handler();
        let shutdown = Arc::clone(&handler.state.shutdown);

        assert_eq!(handler.handle(Command::Shutdown).await, Response::Ok);
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .expect("shutdown permit stored");
    }
}
