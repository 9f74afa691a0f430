//! Streaming synthesis: text in, a lazy sequence of audio chunks out.

use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::types::AudioChunk;
use crate::tts::channel::{ChannelConnector, SpeechChannel};
use crate::tts::protocol::{ClientMessage, parse_server_message};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timing and volume of one synthesis stream. Diagnostics only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisMetrics {
    /// Text sent → first non-empty chunk.
    pub first_chunk_latency: Option<Duration>,
    /// Connect → end of stream (or now, while still running).
    pub elapsed: Duration,
    pub total_bytes: usize,
    pub chunk_count: usize,
    /// Playback length of the received audio.
    pub audio_duration: Duration,
    /// Elapsed time over audio duration; below 1.0 means faster than real time.
    pub streaming_ratio: Option<f64>,
}

/// Opens synthesis channels and turns replies into chunk streams.
pub struct StreamingSynthesizer {
    connector: Arc<dyn ChannelConnector>,
    sample_rate: u32,
}

impl StreamingSynthesizer {
    pub fn new(connector: Arc<dyn ChannelConnector>, sample_rate: u32) -> Self {
        Self {
            connector,
            sample_rate,
        }
    }

    /// Open a channel, send the voice and the full text, and return the
    /// stream of audio chunks as they arrive.
    ///
    /// # Errors
    /// `StreamUnavailable` if the channel cannot be opened or the request
    /// cannot be sent.
    pub fn synthesize_streaming(
        &self,
        text: &str,
        voice: &str,
        token: &CancelToken,
    ) -> Result<ChunkStream> {
        let started = Instant::now();
        let mut channel =
            self.connector
                .connect()
                .map_err(|e| TalkbackError::StreamUnavailable {
                    message: e.to_string(),
                })?;

        let send = |channel: &mut Box<dyn SpeechChannel>, message: ClientMessage| -> Result<()> {
            channel
                .send(&message.to_json()?)
                .map_err(|e| TalkbackError::StreamUnavailable {
                    message: e.to_string(),
                })
        };
        send(&mut channel, ClientMessage::config(voice))?;
        send(&mut channel, ClientMessage::full_text(text))?;

        tracing::debug!(voice, chars = text.chars().count(), "Synthesis request sent");

        Ok(ChunkStream {
            channel: Some(channel),
            token: token.clone(),
            sample_rate: self.sample_rate,
            started,
            request_sent: Instant::now(),
            first_chunk_at: None,
            finished_at: None,
            next_sequence: 0,
            total_bytes: 0,
        })
    }
}

/// Lazy, finite, non-restartable sequence of audio chunks.
///
/// Yields each non-empty chunk as soon as it is decoded. Ends after a chunk
/// flagged `is_last`, when the channel closes normally, or when the token
/// fires. A stream that ends before any audio yields `StreamUnavailable`.
pub struct ChunkStream {
    channel: Option<Box<dyn SpeechChannel>>,
    token: CancelToken,
    sample_rate: u32,
    started: Instant,
    request_sent: Instant,
    first_chunk_at: Option<Instant>,
    finished_at: Option<Instant>,
    next_sequence: u64,
    total_bytes: usize,
}

impl ChunkStream {
    pub fn metrics(&self) -> SynthesisMetrics {
        let end = self.finished_at.unwrap_or_else(Instant::now);
        let elapsed = end.duration_since(self.started);
        let bytes_per_second =
            self.sample_rate as f64 * defaults::CHANNELS as f64 * defaults::SAMPLE_WIDTH as f64;
        let audio_secs = if bytes_per_second > 0.0 {
            self.total_bytes as f64 / bytes_per_second
        } else {
            0.0
        };

        SynthesisMetrics {
            first_chunk_latency: self
                .first_chunk_at
                .map(|t| t.duration_since(self.request_sent)),
            elapsed,
            total_bytes: self.total_bytes,
            chunk_count: self.next_sequence as usize,
            audio_duration: Duration::from_secs_f64(audio_secs),
            streaming_ratio: (audio_secs > 0.0).then(|| elapsed.as_secs_f64() / audio_secs),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.channel.is_none()
    }

    fn finish(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            self.finished_at = Some(Instant::now());

            let m = self.metrics();
            if self.token.is_fired() {
                tracing::debug!(
                    chunks = m.chunk_count,
                    bytes = m.total_bytes,
                    "Synthesis stream abandoned"
                );
            } else {
                tracing::info!(
                    chunks = m.chunk_count,
                    bytes = m.total_bytes,
                    first_chunk_ms = m.first_chunk_latency.map(|d| d.as_millis() as u64),
                    elapsed_ms = m.elapsed.as_millis() as u64,
                    audio_ms = m.audio_duration.as_millis() as u64,
                    ratio = m.streaming_ratio,
                    "Synthesis stream complete"
                );
            }
        }
    }

    /// End the stream with `error`, or `StreamUnavailable` if nothing was
    /// yielded yet. An undecodable first message (a server error frame)
    /// counts as unavailable too; after audio it stays a `Decode` failure.
    fn fail(&mut self, error: TalkbackError) -> Option<Result<AudioChunk>> {
        self.finish();
        if self.next_sequence == 0 {
            return Some(Err(TalkbackError::StreamUnavailable {
                message: error.to_string(),
            }));
        }
        Some(Err(error))
    }

    /// End the stream normally.
    fn end(&mut self) -> Option<Result<AudioChunk>> {
        self.finish();
        if self.next_sequence == 0 && !self.token.is_fired() {
            return Some(Err(TalkbackError::StreamUnavailable {
                message: "channel closed before any audio arrived".to_string(),
            }));
        }
        None
    }
}

impl Iterator for ChunkStream {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let channel = self.channel.as_mut()?;

            if self.token.is_fired() {
                return self.end();
            }

            let message = match channel.recv() {
                Ok(Some(message)) => message,
                Ok(None) => return self.end(),
                Err(e) => return self.fail(e),
            };

            if self.token.is_fired() {
                return self.end();
            }

            let chunk = match parse_server_message(&message) {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(e),
            };

            if chunk.audio.is_empty() {
                if chunk.is_last {
                    return self.end();
                }
                continue;
            }

            if self.first_chunk_at.is_none() {
                let now = Instant::now();
                tracing::debug!(
                    latency_ms = now.duration_since(self.request_sent).as_millis() as u64,
                    "First audio chunk"
                );
                self.first_chunk_at = Some(now);
            }

            let audio_chunk = AudioChunk::new(self.next_sequence, chunk.audio, chunk.is_last);
            self.next_sequence += 1;
            self.total_bytes += audio_chunk.len();
            tracing::trace!(
                seq = audio_chunk.sequence_no,
                bytes = audio_chunk.len(),
                is_last = audio_chunk.is_last,
                "Audio chunk"
            );

            if audio_chunk.is_last {
                self.finish();
            }
            return Some(Ok(audio_chunk));
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::channel::{ScriptStep, ScriptedConnector};
    use crate::tts::protocol::encode_server_message;

    fn msg(len: usize, is_last: bool) -> ScriptStep {
        ScriptStep::Message(encode_server_message(&vec![7u8; len], is_last))
    }

    fn synth(connector: &ScriptedConnector) -> StreamingSynthesizer {
        StreamingSynthesizer::new(Arc::new(connector.clone()), 24000)
    }

    #[test]
    fn test_sends_config_then_full_text() {
        let connector = ScriptedConnector::new(vec![msg(4, true)]);
        let stream = synth(&connector)
            .synthesize_streaming("hi there", "ara", &CancelToken::new())
            .unwrap();
        drop(stream);

        assert_eq!(
            connector.sent(),
            vec![
                r#"{"type":"config","data":{"voice_id":"ara"}}"#.to_string(),
                r#"{"type":"text_chunk","data":{"text":"hi there","is_last":true}}"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_yields_chunks_in_order_and_stops_at_last() {
        let connector = ScriptedConnector::new(vec![
            msg(4096, false),
            msg(4096, false),
            msg(2048, true),
            msg(999, false),
        ]);
        let mut stream = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap();

        let chunks: Vec<AudioChunk> = stream.by_ref().map(|c| c.unwrap()).collect();
        let sizes: Vec<usize> = chunks.iter().map(AudioChunk::len).collect();
        let seqs: Vec<u64> = chunks.iter().map(|c| c.sequence_no).collect();

        assert_eq!(sizes, vec![4096, 4096, 2048]);
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(chunks[2].is_last);
        assert!(stream.is_finished());

        let metrics = stream.metrics();
        assert_eq!(metrics.total_bytes, 10240);
        assert_eq!(metrics.chunk_count, 3);
        assert!(metrics.first_chunk_latency.is_some());
        assert!(metrics.streaming_ratio.is_some());
    }

    #[test]
    fn test_empty_payloads_are_skipped() {
        let connector = ScriptedConnector::new(vec![msg(0, false), msg(8, false), msg(0, true)]);
        let chunks: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().sequence_no, 0);
    }

    #[test]
    fn test_normal_close_ends_stream() {
        let connector = ScriptedConnector::new(vec![msg(8, false), ScriptStep::Close]);
        let results: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn test_connect_failure_is_stream_unavailable() {
        let connector = ScriptedConnector::refusing("connection refused");
        let result = synth(&connector).synthesize_streaming("x", "ara", &CancelToken::new());

        assert!(matches!(
            result,
            Err(TalkbackError::StreamUnavailable { .. })
        ));
    }

    #[test]
    fn test_close_before_audio_is_stream_unavailable() {
        let connector = ScriptedConnector::new(vec![msg(0, false), ScriptStep::Close]);
        let results: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(TalkbackError::StreamUnavailable { .. })
        ));
    }

    #[test]
    fn test_broken_connection_after_audio_is_transport_error() {
        let connector =
            ScriptedConnector::new(vec![msg(8, false), ScriptStep::Fail("reset".to_string())]);
        let results: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(TalkbackError::Transport { .. })));
    }

    #[test]
    fn test_malformed_chunk_is_decode_error() {
        let connector = ScriptedConnector::new(vec![
            msg(8, false),
            ScriptStep::Message("garbage".to_string()),
            msg(8, true),
        ]);
        let results: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(TalkbackError::Decode { .. })));
    }

    #[test]
    fn test_error_frame_before_audio_is_stream_unavailable() {
        let connector = ScriptedConnector::new(vec![ScriptStep::Message(
            r#"{"type":"error","message":"voice not found"}"#.to_string(),
        )]);
        let results: Vec<_> = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(TalkbackError::StreamUnavailable { message }) => {
                assert!(message.starts_with("Malformed audio chunk"), "{}", message);
            }
            other => panic!("Expected StreamUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_fired_token_stops_yielding() {
        let token = CancelToken::new();
        let connector = ScriptedConnector::new(vec![msg(8, false), msg(8, false), msg(8, true)]);
        let mut stream = synth(&connector)
            .synthesize_streaming("x", "ara", &token)
            .unwrap();

        assert!(stream.next().unwrap().is_ok());
        token.fire();
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert!(stream.is_finished());
    }

    #[test]
    fn test_token_fired_before_any_audio_is_silent() {
        let token = CancelToken::new();
        token.fire();
        let connector = ScriptedConnector::new(vec![msg(8, true)]);
        let mut stream = synth(&connector)
            .synthesize_streaming("x", "ara", &token)
            .unwrap();

        assert!(stream.next().is_none());
    }

    #[test]
    fn test_metrics_audio_duration() {
        let connector = ScriptedConnector::new(vec![msg(48000, true)]);
        let mut stream = synth(&connector)
            .synthesize_streaming("x", "ara", &CancelToken::new())
            .unwrap();
        assert!(stream.next().unwrap().is_ok());

        assert_eq!(stream.metrics().audio_duration, Duration::from_secs(1));
    }
}
