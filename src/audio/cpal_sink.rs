//! In-process playback through a CPAL output stream.

use crate::audio::capture::with_suppressed_stderr;
use crate::audio::sink::{AudioSink, SINK_WAIT_STEP};
use crate::audio::wav::bytes_to_samples;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::AudioChunk;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Writes block while more than this much audio is queued.
const MAX_QUEUED_MS: u64 = 500;

/// SAFETY: the stream is only touched by the thread holding the `Player` lock.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Output stream fed from a sample queue filled by `write`.
///
/// The device is opened on the first write and kept open until `close`.
pub struct CpalSink {
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<i16>>>,
    stream: Option<SendableStream>,
}

impl CpalSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stream: None,
        }
    }

    fn max_queued(&self) -> usize {
        (self.sample_rate as u64 * MAX_QUEUED_MS / 1000) as usize
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn open(&self) -> Result<cpal::Stream> {
        let device = with_suppressed_stderr(|| cpal::default_host().default_output_device())
            .ok_or(TalkbackError::NoPlaybackBackend)?;

        let rate: cpal::SampleRate = self.sample_rate;
        let supported = device
            .supported_output_configs()
            .map_err(|e| TalkbackError::Playback {
                message: format!("Failed to query output configs: {}", e),
            })?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(|c| c.channels())
            .ok_or_else(|| TalkbackError::Playback {
                message: format!("No output config supports {}Hz", self.sample_rate),
            })?
            .with_sample_rate(rate);

        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.description().map(|d| d.name().to_string()).unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels,
            ?format,
            "Opening playback stream"
        );

        let err_callback = |err| tracing::error!("Playback stream error: {}", err);
        let queue = Arc::clone(&self.queue);

        let stream = match format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill_frames(data, channels, &queue, |s| s);
                },
                err_callback,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_frames(data, channels, &queue, |s| s as f32 / i16::MAX as f32);
                },
                err_callback,
                None,
            ),
            other => {
                return Err(TalkbackError::Playback {
                    message: format!("Unsupported output sample format: {:?}", other),
                });
            }
        }
        .map_err(|e| TalkbackError::Playback {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| TalkbackError::Playback {
            message: format!("Failed to start output stream: {}", e),
        })?;
        Ok(stream)
    }

    /// Block until the device has played down to `limit` samples. A fired
    /// token empties the queue instead.
    fn wait_until_queued_at_most(&self, limit: usize, token: &CancelToken) {
        while self.queued() > limit {
            if token.is_fired() {
                self.clear();
                return;
            }
            std::thread::sleep(SINK_WAIT_STEP);
        }
    }

    fn clear(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Pop one mono sample per output frame, duplicating across channels;
/// silence when the queue runs dry.
fn fill_frames<T: Copy + Default>(
    data: &mut [T],
    channels: usize,
    queue: &Mutex<VecDeque<i16>>,
    convert: impl Fn(i16) -> T,
) {
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    for frame in data.chunks_mut(channels.max(1)) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.fill(value);
    }
}

impl AudioSink for CpalSink {
    fn name(&self) -> &str {
        "cpal"
    }

    fn can_play(&self) -> bool {
        with_suppressed_stderr(|| cpal::default_host().default_output_device().is_some())
    }

    fn write(&mut self, chunk: &AudioChunk, token: &CancelToken) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(SendableStream(self.open()?));
        }

        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(bytes_to_samples(&chunk.payload));

        let limit = if chunk.is_last { 0 } else { self.max_queued() };
        self.wait_until_queued_at_most(limit, token);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn close(&mut self, token: &CancelToken) -> Result<()> {
        if self.stream.is_some() {
            self.wait_until_queued_at_most(0, token);
        }
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| TalkbackError::Playback {
                message: format!("Failed to stop output stream: {}", e),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_frames_duplicates_across_channels() {
        let queue = Mutex::new(VecDeque::from(vec![10i16, 20]));
        let mut out = [0i16; 6];
        fill_frames(&mut out, 2, &queue, |s| s);
        assert_eq!(out, [10, 10, 20, 20, 0, 0]);
        assert!(queue.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fill_frames_converts_to_float() {
        let queue = Mutex::new(VecDeque::from(vec![i16::MAX]));
        let mut out = [0.5f32; 2];
        fill_frames(&mut out, 1, &queue, |s| s as f32 / i16::MAX as f32);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn test_reset_clears_queue() {
        let mut sink = CpalSink::new(24000);
        sink.queue.lock().unwrap().extend([1, 2, 3]);
        sink.reset().unwrap();
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn test_fired_token_empties_queue_instead_of_waiting() {
        let sink = CpalSink::new(24000);
        sink.queue.lock().unwrap().extend(vec![1i16; 48000]);
        let token = CancelToken::new();
        token.fire();

        sink.wait_until_queued_at_most(0, &token);
        assert_eq!(sink.queued(), 0);
    }

    #[test]
    fn test_queue_limit_is_half_a_second() {
        assert_eq!(CpalSink::new(24000).max_queued(), 12000);
    }
}
