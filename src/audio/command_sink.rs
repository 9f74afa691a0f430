//! Playback through an external player process reading raw PCM on stdin.

use crate::audio::sink::{AudioSink, SINK_WAIT_STEP};
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::AudioChunk;
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};

/// Bytes written to the player per pipe write.
const PIPE_SLICE: usize = 4096;

/// Player program fed 16-bit mono PCM through a pipe.
///
/// One process lives for one reply: it is spawned on the first write and
/// drained (stdin closed, process awaited) after the chunk marked `is_last`.
pub struct CommandSink {
    name: String,
    program: String,
    args: Vec<String>,
    child: Option<(Child, ChildStdin)>,
}

impl CommandSink {
    pub fn new(name: &str, program: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args,
            child: None,
        }
    }

    /// Known player programs with their raw-PCM arguments.
    pub fn for_program(program: &str, sample_rate: u32) -> Option<Self> {
        let rate = sample_rate.to_string();
        let args: Vec<String> = match program {
            "pw-play" => vec![
                "--format".into(),
                "s16".into(),
                "--rate".into(),
                rate,
                "--channels".into(),
                "1".into(),
                "-".into(),
            ],
            "paplay" => vec![
                "--raw".into(),
                "--format=s16le".into(),
                format!("--rate={}", rate),
                "--channels=1".into(),
            ],
            "aplay" => vec![
                "-q".into(),
                "-t".into(),
                "raw".into(),
                "-f".into(),
                "S16_LE".into(),
                "-r".into(),
                rate,
                "-c".into(),
                "1".into(),
                "-".into(),
            ],
            _ => return None,
        };
        Some(Self::new(program, program, args))
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn spawn(&self) -> Result<(Child, ChildStdin)> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TalkbackError::Playback {
                message: format!("Failed to start {}: {}", self.program, e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| TalkbackError::Playback {
            message: format!("{} has no stdin", self.program),
        })?;
        Ok((child, stdin))
    }

    /// Close stdin and wait for the player to finish what it was given.
    /// A fired token kills the player instead.
    fn drain(&mut self, token: &CancelToken) -> Result<()> {
        let Some((mut child, stdin)) = self.child.take() else {
            return Ok(());
        };
        drop(stdin);
        loop {
            if let Some(status) = child.try_wait()? {
                if !status.success() && !token.is_fired() {
                    return Err(TalkbackError::Playback {
                        message: format!("{} exited with {}", self.program, status),
                    });
                }
                return Ok(());
            }
            if token.is_fired() {
                if let Err(e) = child.kill() {
                    tracing::debug!(program = %self.program, "Kill failed: {}", e);
                }
                child.wait()?;
                return Ok(());
            }
            std::thread::sleep(SINK_WAIT_STEP);
        }
    }

    /// Feed the pipe in slices so a fired token is noticed while the player
    /// is still consuming earlier audio.
    fn feed(&mut self, payload: &[u8], token: &CancelToken) -> std::io::Result<()> {
        if let Some((_, stdin)) = self.child.as_mut() {
            for slice in payload.chunks(PIPE_SLICE) {
                if token.is_fired() {
                    break;
                }
                stdin.write_all(slice)?;
            }
        }
        Ok(())
    }
}

impl AudioSink for CommandSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_play(&self) -> bool {
        match Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::debug!(program = %self.program, "Probe failed: {}", e);
                false
            }
        }
    }

    fn write(&mut self, chunk: &AudioChunk, token: &CancelToken) -> Result<()> {
        if self.child.is_none() {
            self.child = Some(self.spawn()?);
        }

        if let Err(e) = self.feed(&chunk.payload, token) {
            self.reset()?;
            return Err(TalkbackError::Playback {
                message: format!("Failed to write to {}: {}", self.program, e),
            });
        }

        if token.is_fired() {
            self.reset()
        } else if chunk.is_last {
            self.drain(token)
        } else {
            Ok(())
        }
    }

    fn reset(&mut self) -> Result<()> {
        if let Some((mut child, stdin)) = self.child.take() {
            drop(stdin);
            if let Err(e) = child.kill() {
                tracing::debug!(program = %self.program, "Kill failed: {}", e);
            }
            child.wait()?;
        }
        Ok(())
    }

    fn close(&mut self, token: &CancelToken) -> Result<()> {
        self.drain(token)
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            tracing::debug!(program = %self.program, "Cleanup failed: {}", e);
        }
    }
}
