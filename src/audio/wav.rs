//! WAV container helpers: encode captured audio, unwrap synthesized audio.

use crate::error::{Result, TalkbackError};
use std::io::Cursor;

/// Encode mono 16-bit samples as a complete in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to create WAV writer: {}", e),
            })?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to write WAV sample: {}", e),
                })?;
        }
        writer.finalize().map_err(|e| TalkbackError::AudioCapture {
            message: format!("Failed to finalize WAV: {}", e),
        })?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV file to mono 16-bit samples at `target_rate`.
///
/// Stereo input is downmixed and other rates are resampled.
pub fn decode_wav(data: &[u8], target_rate: u32) -> Result<Vec<i16>> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| TalkbackError::Decode {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(TalkbackError::Decode {
            message: format!(
                "Unsupported WAV format: {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TalkbackError::Decode {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono = downmix(raw, spec.channels.into());
    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Average interleaved frames down to one channel. A trailing partial frame
/// is dropped.
pub fn downmix(samples: Vec<i16>, channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Normalize a synthesis payload to raw little-endian PCM at `sample_rate`.
///
/// Payloads that carry a RIFF header are unwrapped; anything else is assumed
/// to already be raw PCM and is returned unchanged.
pub fn pcm_payload(data: Vec<u8>, sample_rate: u32) -> Result<Vec<u8>> {
    if !is_wav(&data) {
        return Ok(data);
    }
    let samples = decode_wav(&data, sample_rate)?;
    Ok(samples_to_bytes(&samples))
}

/// True when the buffer starts with a RIFF/WAVE header.
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Serialize samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes into samples. A trailing odd byte is dropped.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn encode_wav_writes_header_and_samples() {
        let wav = encode_wav(&[1, -1, 300], 24000).unwrap();

        assert!(is_wav(&wav));
        assert_eq!(wav.len(), 44 + 6);

        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn encode_wav_of_empty_buffer_is_header_only() {
        let wav = encode_wav(&[], 24000).unwrap();
        assert_eq!(wav.len(), 44);
    }

    #[test]
    fn decode_wav_downmixes_stereo() {
        let data = make_wav_data(24000, 2, &[100, 300, -200, -400]);
        let samples = decode_wav(&data, 24000).unwrap();
        assert_eq!(samples, vec![200, -300]);
    }

    #[test]
    fn decode_wav_resamples_to_target_rate() {
        let data = make_wav_data(48000, 1, &vec![1000i16; 4800]);
        let samples = decode_wav(&data, 24000).unwrap();
        assert_eq!(samples.len(), 2400);
        assert!(samples.iter().all(|&s| s == 1000));
    }

    #[test]
    fn decode_wav_rejects_garbage() {
        let result = decode_wav(b"RIFF\x00\x00\x00\x00WAVEjunk", 24000);
        assert!(matches!(result, Err(TalkbackError::Decode { .. })));
    }

    #[test]
    fn pcm_payload_unwraps_riff() {
        let data = make_wav_data(24000, 1, &[1, 2, 3]);
        let pcm = pcm_payload(data, 24000).unwrap();
        assert_eq!(pcm, vec![1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn pcm_payload_passes_raw_pcm_through() {
        let raw = vec![9u8, 8, 7, 6];
        assert_eq!(pcm_payload(raw.clone(), 24000).unwrap(), raw);
    }

    #[test]
    fn byte_conversion_is_little_endian() {
        assert_eq!(samples_to_bytes(&[0x0102, -1]), vec![0x02, 0x01, 0xff, 0xff]);
        assert_eq!(bytes_to_samples(&[0x02, 0x01, 0xff, 0xff, 0x05]), vec![0x0102, -1]);
    }

    #[test]
    fn downmix_averages_frames_and_drops_partial_tail() {
        assert_eq!(downmix(vec![100, 300, -100, -300, 5], 2), vec![200, -200]);
        assert_eq!(downmix(vec![1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 24000, 24000), samples);
    }

    #[test]
    fn resample_downsample_halves_length() {
        let samples: Vec<i16> = (0..480).collect();
        let out = resample(&samples, 48000, 24000);
        assert_eq!(out.len(), 240);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 2);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 48000, 24000).is_empty());
        assert_eq!(resample(&[7], 16000, 24000), vec![7, 7]);
    }
}
