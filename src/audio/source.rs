use crate::error::{Result, TalkbackError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for audio input devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// Exactly one `Recorder` owns a source at a time.
pub trait AudioSource: Send {
    /// Open the device and begin buffering audio.
    ///
    /// # Errors
    /// `AudioDevice`/`AudioDeviceNotFound` when the device cannot be opened.
    fn start(&mut self) -> Result<()>;

    /// Stop buffering and release the device stream.
    fn stop(&mut self) -> Result<()>;

    /// Take the 16-bit PCM samples buffered since the last read.
    ///
    /// An empty vector means nothing new has arrived yet.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Mock audio source for testing
///
/// Either repeats one sample block on every read (`with_samples`) or plays a
/// script of blocks once per `start()` and then reports silence (`with_script`).
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    started: Arc<AtomicBool>,
    samples: Vec<i16>,
    script: Option<VecDeque<Vec<i16>>>,
    script_blocks: Vec<Vec<i16>>,
    should_fail_start: bool,
    should_fail_stop: bool,
    fail_read_after: Option<usize>,
    reads: usize,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            samples: vec![0i16; 160],
            script: None,
            script_blocks: Vec::new(),
            should_fail_start: false,
            should_fail_stop: false,
            fail_read_after: None,
            reads: 0,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self.script = None;
        self
    }

    /// Configure the mock to return each block once, then empty reads
    pub fn with_script(mut self, blocks: Vec<Vec<i16>>) -> Self {
        self.script = Some(blocks.iter().cloned().collect());
        self.script_blocks = blocks;
        self
    }

    /// Convenience: a script totalling `seconds` of audio at `sample_rate`,
    /// delivered in blocks of `frame_size` samples.
    pub fn with_duration(self, seconds: f32, sample_rate: u32, frame_size: usize) -> Self {
        let total = (seconds * sample_rate as f32).round() as usize;
        let mut blocks = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(frame_size.max(1));
            blocks.push(vec![100i16; n]);
            remaining -= n;
        }
        self.with_script(blocks)
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on every read
    pub fn with_read_failure(self) -> Self {
        self.with_read_failure_after(0)
    }

    /// Configure the mock to fail once `reads` successful reads have happened
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Shared view of the started flag, usable after the mock is boxed away.
    pub fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(TalkbackError::AudioDevice {
                message: self.error_message.clone(),
            })
        } else {
            if self.script.is_some() {
                self.script = Some(self.script_blocks.iter().cloned().collect());
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(TalkbackError::AudioDevice {
                message: self.error_message.clone(),
            })
        } else {
            self.started.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if let Some(limit) = self.fail_read_after
            && self.reads >= limit
        {
            return Err(TalkbackError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.reads += 1;

        match self.script.as_mut() {
            Some(script) => Ok(script.pop_front().unwrap_or_default()),
            None => Ok(self.samples.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![100i16, 200, 300, 400, 500];
        let mut source = MockAudioSource::new().with_samples(test_samples.clone());

        assert_eq!(source.read_samples().unwrap(), test_samples);
        assert_eq!(source.read_samples().unwrap(), test_samples);
    }

    #[test]
    fn test_mock_audio_source_script_then_silence() {
        let mut source = MockAudioSource::new().with_script(vec![vec![1, 2], vec![3]]);

        assert_eq!(source.read_samples().unwrap(), vec![1, 2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
        assert!(source.read_samples().unwrap().is_empty());
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_mock_audio_source_script_replays_after_restart() {
        let mut source = MockAudioSource::new().with_script(vec![vec![7]]);

        source.start().unwrap();
        assert_eq!(source.read_samples().unwrap(), vec![7]);
        assert!(source.read_samples().unwrap().is_empty());
        source.stop().unwrap();

        source.start().unwrap();
        assert_eq!(source.read_samples().unwrap(), vec![7]);
    }

    #[test]
    fn test_mock_audio_source_with_duration_totals_samples() {
        let mut source = MockAudioSource::new().with_duration(0.5, 24000, 1024);

        let mut total = 0;
        loop {
            let block = source.read_samples().unwrap();
            if block.is_empty() {
                break;
            }
            assert!(block.len() <= 1024);
            total += block.len();
        }
        assert_eq!(total, 12000);
    }

    #[test]
    fn test_mock_audio_source_returns_read_error_when_configured() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(TalkbackError::AudioCapture { message }) => {
                assert_eq!(message, "buffer overflow");
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_mock_audio_source_fails_after_n_reads() {
        let mut source = MockAudioSource::new()
            .with_samples(vec![1])
            .with_read_failure_after(2);

        assert!(source.read_samples().is_ok());
        assert!(source.read_samples().is_ok());
        assert!(source.read_samples().is_err());
    }

    #[test]
    fn test_mock_audio_source_start_stop_state_management() {
        let mut source = MockAudioSource::new();
        let flag = source.started_flag();

        assert!(!source.is_started());
        source.start().unwrap();
        assert!(source.is_started());
        assert!(flag.load(Ordering::SeqCst));
        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_start_failure_is_device_error() {
        let mut source = MockAudioSource::new()
            .with_start_failure()
            .with_error_message("device not found");

        match source.start() {
            Err(TalkbackError::AudioDevice { message }) => {
                assert_eq!(message, "device not found");
            }
            _ => panic!("Expected AudioDevice error"),
        }
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_stop_failure_keeps_started() {
        let mut source = MockAudioSource::new().with_stop_failure();

        source.start().unwrap();
        assert!(source.stop().is_err());
        assert!(source.is_started());
    }

    #[test]
    fn test_audio_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![1i16, 2, 3, 4, 5]));

        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap(), vec![1i16, 2, 3, 4, 5]);
        assert!(source.stop().is_ok());
    }
}
