//! Command-line interface for talkback
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Push-to-talk voice conversations
#[derive(Parser, Debug)]
#[command(
    name = "talkback",
    version,
    about = "Push-to-talk voice conversations: speak, get a spoken reply, interrupt any time"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (e.g., hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Synthesis voice (e.g., ara, rex, eve)
    #[arg(long, global = true, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Reply model
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Skip the streaming channel and always use one-shot synthesis
    #[arg(long, global = true)]
    pub no_stream: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak the given text and exit
    Say {
        /// Text to speak
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// List available audio input devices
    Devices,

    /// List playback backends and whether each can play here
    Backends,

    /// Start the daemon (foreground process)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Start recording via IPC, interrupting any reply in progress
    Start {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop recording and get a reply via IPC
    Stop {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Toggle recording on/off via IPC
    Toggle {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Discard the recording and silence the reply via IPC
    Cancel {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Get daemon status via IPC
    Status {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop the daemon via IPC
    Shutdown {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/talkback.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Commands {
    /// Socket override for the IPC client subcommands.
    pub fn socket(&self) -> Option<&PathBuf> {
        match self {
            Self::Daemon { socket }
            | Self::Start { socket }
            | Self::Stop { socket }
            | Self::Toggle { socket }
            | Self::Cancel { socket }
            | Self::Status { socket }
            | Self::Shutdown { socket } => socket.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["talkback"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.device.is_none());
        assert!(cli.voice.is_none());
        assert!(cli.model.is_none());
        assert!(!cli.no_stream);
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["talkback", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_with_options() {
        let cli = Cli::try_parse_from([
            "talkback",
            "--device",
            "hw:0",
            "--voice",
            "rex",
            "--model",
            "grok-3",
            "--no-stream",
        ])
        .unwrap();

        assert_eq!(cli.device.as_deref(), Some("hw:0"));
        assert_eq!(cli.voice.as_deref(), Some("rex"));
        assert_eq!(cli.model.as_deref(), Some("grok-3"));
        assert!(cli.no_stream);
    }

    #[test]
    fn test_parse_say_joins_words() {
        let cli = Cli::try_parse_from(["talkback", "say", "hello", "there"]).unwrap();
        match cli.command {
            Some(Commands::Say { text }) => assert_eq!(text, vec!["hello", "there"]),
            other => panic!("Expected Say command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_say_requires_text() {
        assert!(Cli::try_parse_from(["talkback", "say"]).is_err());
    }

    #[test]
    fn test_parse_devices_and_backends() {
        let cli = Cli::try_parse_from(["talkback", "devices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices)));

        let cli = Cli::try_parse_from(["talkback", "backends"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Backends)));
    }

    #[test]
    fn test_parse_ipc_commands_with_socket() {
        for name in ["daemon", "start", "stop", "toggle", "cancel", "status", "shutdown"] {
            let cli =
                Cli::try_parse_from(["talkback", name, "--socket", "/tmp/tb.sock"]).unwrap();
            let command = cli.command.expect("subcommand parsed");
            assert_eq!(
                command.socket(),
                Some(&PathBuf::from("/tmp/tb.sock")),
                "socket for {}",
                name
            );
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["talkback", "status", "-q", "--config", "/c.toml"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/c.toml")));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["talkback", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }
}
