use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use talkback::app::{Overrides, build_orchestrator, run_interactive, run_say};
use talkback::audio::sink::describe_backends;
use talkback::cli::{Cli, Commands};
use talkback::config::Config;
use talkback::daemon::run_daemon;
use talkback::ipc::client::send_command;
use talkback::ipc::protocol::{Command, Response};
use talkback::ipc::server::IpcServer;
use talkback::logging::init_logging;

// Synchronous on purpose: the blocking HTTP clients must be built and
// dropped outside any tokio runtime.
fn main() -> Result<()> {
    let Cli {
        command,
        config: config_path,
        quiet,
        verbose,
        device,
        voice,
        model,
        no_stream,
    } = Cli::parse();

    init_logging(verbose, quiet);

    let overrides = Overrides {
        device,
        voice,
        model,
        no_stream,
    };

    match command {
        None => {
            let config = load_config(config_path.as_deref(), overrides)?;
            run_interactive(&config, quiet)?;
        }
        Some(Commands::Say { text }) => {
            let config = load_config(config_path.as_deref(), overrides)?;
            run_say(&config, &text.join(" "), quiet)?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Backends) => {
            let config = load_config(config_path.as_deref(), overrides)?;
            list_backends(&config);
        }
        Some(Commands::Daemon { socket }) => {
            let config = load_config(config_path.as_deref(), overrides)?;
            daemon_command(&config, socket, quiet)?;
        }
        Some(Commands::Start { socket }) => ipc_command(socket, Command::Start)?,
        Some(Commands::Stop { socket }) => ipc_command(socket, Command::Stop)?,
        Some(Commands::Toggle { socket }) => ipc_command(socket, Command::Toggle)?,
        Some(Commands::Cancel { socket }) => ipc_command(socket, Command::Cancel)?,
        Some(Commands::Status { socket }) => ipc_command(socket, Command::Status)?,
        Some(Commands::Shutdown { socket }) => ipc_command(socket, Command::Shutdown)?,
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "talkback",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration, apply env and CLI overrides, validate.
fn load_config(custom_path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(overrides.apply(config.with_env_overrides())?)
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = talkback::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    eprintln!("Built without microphone support (enable the cpal-audio feature)");
    std::process::exit(1);
}

/// List configured playback backends in preference order.
fn list_backends(config: &Config) {
    let backends = describe_backends(&config.audio.playback_backends, config.audio.sample_rate);
    if backends.is_empty() {
        println!("No playback backends configured");
        return;
    }

    let selected = backends.iter().position(|(_, available)| *available);
    println!("Playback backends (preference order):");
    for (idx, (name, available)) in backends.iter().enumerate() {
        if Some(idx) == selected {
            println!("  {} {} {}", "●".green(), name, "(selected)".green());
        } else if *available {
            println!("  ○ {}", name);
        } else {
            println!("  ○ {} {}", name.dimmed(), "(unavailable)".dimmed());
        }
    }
}

/// Run the daemon until a signal or `shutdown`, then drain sessions.
fn daemon_command(config: &Config, socket: Option<PathBuf>, quiet: bool) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config, quiet)?);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run_daemon(Arc::clone(&orchestrator), socket, quiet));
    drop(runtime);

    orchestrator.shutdown();
    Ok(result?)
}

/// Send one command to the daemon and render the response.
fn ipc_command(socket: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(send_command(&socket_path, command)) {
        Ok(response) => render_response(response),
        Err(e) => {
            eprintln!(
                "{}",
                format!("Failed to communicate with daemon: {}", e).red()
            );
            eprintln!("Is the daemon running? Start it with: talkback daemon");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn render_response(response: Response) {
    match response {
        Response::Ok => {
            println!("{}", "OK".green());
        }
        Response::Recording { recording } => {
            println!("{} (recording {})", "Recording".red(), recording);
        }
        Response::Processing {
            session: Some(session),
        } => {
            println!("{} session {}", "Processing".green(), session);
        }
        Response::Processing { session: None } => {
            println!("{}", "Recording too short, discarded".yellow());
        }
        Response::Status {
            state,
            live_session,
            last_outcome,
            playback_backend,
            daemon_version,
        } => {
            let client_version = talkback::version_string();

            println!("Status:");
            println!("  {}    {}", "Client:".dimmed(), client_version);
            print!("  {}    {}", "Daemon:".dimmed(), daemon_version);
            if client_version != daemon_version {
                print!(" {}", "(version mismatch!)".yellow());
            }
            println!();
            println!("  {}     {}", "State:".dimmed(), state);
            if let Some(session) = live_session {
                println!("  {}   {}", "Session:".dimmed(), session);
            }
            if let Some(outcome) = last_outcome {
                println!("  {}      {}", "Last:".dimmed(), outcome);
            }
            match playback_backend {
                Some(backend) => println!("  {}  {}", "Playback:".dimmed(), backend),
                None => println!("  {}  {}", "Playback:".dimmed(), "none".yellow()),
            }
        }
        Response::Error { message } => {
            eprintln!("{}", format!("Error: {}", message).red());
            std::process::exit(1);
        }
    }
}
