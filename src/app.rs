//! Voice conversation entry points.
//!
//! Wires configuration, credentials, collaborators and audio devices into an
//! `Orchestrator`, and runs the terminal push-to-talk loop and `say`.

#[cfg(feature = "cpal-audio")]
use crate::audio::capture::{CpalAudioSource, suppress_audio_warnings};
use crate::audio::recorder::Recorder;
use crate::audio::sink::{Player, build_candidates};
use crate::audio::source::AudioSource;
use crate::config::{AudioConfig, Config};
use crate::credentials::ServiceConfig;
#[cfg(not(feature = "cpal-audio"))]
use crate::error::TalkbackError;
use crate::error::Result;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::events::{EventReporter, LogReporter};
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::worker::{Services, SessionContext, Speech, speak};
use crate::reply::responder::ChatResponder;
use crate::stt::transcriber::HttpTranscriber;
use crate::tts::channel::WebSocketConnector;
use crate::tts::oneshot::HttpSynthesizer;
use crate::tts::streaming::StreamingSynthesizer;
use owo_colors::OwoColorize;
use std::io::BufRead;
use std::sync::Arc;

/// Command-line overrides layered on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub no_stream: bool,
}

impl Overrides {
    /// Apply the overrides and validate the result.
    pub fn apply(self, mut config: Config) -> Result<Config> {
        if let Some(device) = self.device {
            config.audio.device = Some(device);
        }
        if let Some(voice) = self.voice {
            config.voice.voice = voice;
        }
        if let Some(model) = self.model {
            config.reply.model = model;
        }
        if self.no_stream {
            config.voice.streaming = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Build the speech half of the pipeline: synthesizers plus the probed player.
pub fn build_speech(config: &Config, service: &ServiceConfig) -> Result<Speech> {
    let player = Player::probe(build_candidates(
        &config.audio.playback_backends,
        config.audio.sample_rate,
    ));

    let streaming = config.voice.streaming.then(|| {
        StreamingSynthesizer::new(
            Arc::new(WebSocketConnector::new(service)),
            config.audio.sample_rate,
        )
    });
    if streaming.is_none() {
        tracing::info!("Streaming synthesis disabled, using one-shot synthesis");
    }

    Ok(Speech {
        streaming,
        oneshot: Arc::new(HttpSynthesizer::new(
            service,
            &config.voice.fallback_format,
            config.audio.sample_rate,
        )?),
        player: Arc::new(player),
        voice: config.voice.voice.clone(),
        playback_queue: config.audio.playback_queue,
    })
}

/// Build a ready-to-use orchestrator from configuration.
///
/// Fails on missing credentials or when no input device can be opened.
pub fn build_orchestrator(config: &Config, quiet: bool) -> Result<Orchestrator> {
    let service = ServiceConfig::load(&config.api)?;

    let services = Services {
        transcriber: Arc::new(HttpTranscriber::new(&service)?),
        responder: Arc::new(ChatResponder::new(&service, &config.reply)?),
        speech: build_speech(config, &service)?,
        reporter: Arc::new(LogReporter::new(quiet)),
    };

    let recorder = Recorder::new(
        open_audio_source(&config.audio)?,
        config.audio.sample_rate,
        config.audio.frame_size,
    );

    tracing::info!(
        model = %config.reply.model,
        voice = %config.voice.voice,
        streaming = config.voice.streaming,
        "Pipeline ready"
    );

    Ok(Orchestrator::new(
        recorder,
        services,
        config.audio.min_duration(),
    ))
}

#[cfg(feature = "cpal-audio")]
fn open_audio_source(audio: &AudioConfig) -> Result<Box<dyn AudioSource>> {
    suppress_audio_warnings();
    Ok(Box::new(CpalAudioSource::new(
        audio.device.as_deref(),
        audio.sample_rate,
    )?))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_audio_source(_audio: &AudioConfig) -> Result<Box<dyn AudioSource>> {
    Err(TalkbackError::AudioDevice {
        message: "built without microphone support (enable the cpal-audio feature)".to_string(),
    })
}

/// Terminal push-to-talk: Enter starts, Enter stops, `c` cancels, `q` quits.
///
/// Pressing Enter while a reply is playing interrupts it and starts a new
/// recording.
pub fn run_interactive(config: &Config, quiet: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, quiet)?;

    if !quiet {
        eprintln!(
            "{}",
            "Press Enter to talk, Enter again to send. 'c' cancels, 'q' quits.".dimmed()
        );
    }

    let result = interactive_loop(&orchestrator, std::io::stdin().lock(), quiet);
    orchestrator.shutdown();
    result
}

fn interactive_loop(orchestrator: &Orchestrator, input: impl BufRead, quiet: bool) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        match line.trim() {
            "q" | "quit" | "exit" => break,
            "c" | "cancel" => match orchestrator.cancel() {
                Ok(true) => {
                    if !quiet {
                        eprintln!("{}", "Cancelled".dimmed());
                    }
                }
                Ok(false) => {}
                Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
            },
            "" => {
                if let Err(e) = orchestrator.toggle() {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                } else if !quiet && orchestrator.is_recording() {
                    eprintln!("{}", "Press Enter to send".dimmed());
                }
            }
            other => eprintln!(
                "{} unknown input '{}' (Enter, c or q)",
                "Warning:".yellow().bold(),
                other
            ),
        }
    }
    Ok(())
}

/// Speak `text` through the configured voice and wait for playback to end.
pub fn run_say(config: &Config, text: &str, quiet: bool) -> Result<()> {
    let service = ServiceConfig::load(&config.api)?;
    let speech = build_speech(config, &service)?;
    let reporter: Arc<dyn EventReporter> = Arc::new(LogReporter::new(quiet));

    let ctx = SessionContext::standalone(0, CancelToken::new(), reporter);
    speak(&ctx, &speech, text)
}
