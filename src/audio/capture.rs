//! Microphone capture through cpal.

use crate::audio::source::AudioSource;
use crate::audio::wav::{downmix, resample};
use crate::error::{Result, TalkbackError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr redirected to /dev/null.
///
/// Host enumeration prints ALSA/JACK noise that means nothing to users.
/// Not safe against other threads writing fd 2 concurrently.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire diagnostics before any device is opened.
///
/// Must run before other threads exist since it mutates the environment.
pub fn suppress_audio_warnings() {
    // SAFETY: called before the orchestrator spawns any thread
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
    }
}

/// Sound servers that handle resampling and routing themselves.
const SOUND_SERVERS: &[&str] = &["pipewire", "pulse"];

/// Endpoints that never carry a voice.
const NON_VOICE: &[&str] = &["surround", "front:", "rear:", "hdmi", "s/pdif", "digital output"];

fn is_sound_server(name: &str) -> bool {
    let lower = name.to_lowercase();
    SOUND_SERVERS.iter().any(|s| lower.contains(s))
}

fn is_voice_input(name: &str) -> bool {
    let lower = name.to_lowercase();
    !NON_VOICE.iter().any(|p| lower.contains(p))
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

fn input_devices(host: &cpal::Host) -> Result<Vec<(String, cpal::Device)>> {
    let devices = host.input_devices().map_err(|e| TalkbackError::AudioDevice {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    Ok(devices
        .filter_map(|d| device_name(&d).map(|name| (name, d)))
        .collect())
}

/// Names of usable input devices; sound servers are marked "\[recommended\]".
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| input_devices(&cpal::default_host()))?;
    Ok(devices
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| is_voice_input(name))
        .map(|name| {
            if is_sound_server(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// The named device, or else a sound server, or else the host default.
fn open_device(wanted: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let mut devices = input_devices(&host)?;
    let position = match wanted {
        Some(wanted) => Some(
            devices
                .iter()
                .position(|(name, _)| name == wanted)
                .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                })?,
        ),
        None => devices.iter().position(|(name, _)| is_sound_server(name)),
    };
    match position {
        Some(i) => Ok(devices.swap_remove(i).1),
        None => host
            .default_input_device()
            .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                device: "default".to_string(),
            }),
    }
}

/// Stream layout the device delivers and what it takes to reach mono at
/// the recording rate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CaptureFormat {
    sample_format: SampleFormat,
    channels: u16,
    rate: u32,
}

impl CaptureFormat {
    fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.channels,
            sample_rate: self.rate,
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

fn is_capturable(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::I16 | SampleFormat::F32)
}

/// Choose among `(format, channels, min_rate, max_rate)` ranges: one that
/// covers `target_rate` with the fewest channels, preferring i16. Without
/// one, `fallback` is captured as-is and converted in software.
fn choose_format(
    ranges: &[(SampleFormat, u16, u32, u32)],
    target_rate: u32,
    fallback: Option<CaptureFormat>,
) -> Result<CaptureFormat> {
    let exact = ranges
        .iter()
        .filter(|(format, _, min, max)| {
            is_capturable(*format) && *min <= target_rate && target_rate <= *max
        })
        .min_by_key(|(format, channels, _, _)| (*channels, *format != SampleFormat::I16));
    if let Some(&(sample_format, channels, _, _)) = exact {
        return Ok(CaptureFormat {
            sample_format,
            channels,
            rate: target_rate,
        });
    }
    fallback
        .filter(|f| is_capturable(f.sample_format))
        .ok_or_else(|| TalkbackError::AudioDevice {
            message: format!(
                "Input device offers neither i16 nor f32 samples near {}Hz; try --device",
                target_rate
            ),
        })
}

/// Convert one callback's worth of interleaved samples to mono i16 at
/// `target_rate`.
fn to_recording<T>(data: &[T], format: &CaptureFormat, target_rate: u32) -> Vec<i16>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let samples: Vec<i16> = data.iter().map(|&s| i16::from_sample_(s)).collect();
    resample(&downmix(samples, format.channels.into()), format.rate, target_rate)
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created, paused and dropped only by its owning
/// `CpalAudioSource`, which is driven from one thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Captures mono 16-bit PCM at the recording rate from a cpal input device.
pub struct CpalAudioSource {
    device: cpal::Device,
    format: CaptureFormat,
    sample_rate: u32,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl CpalAudioSource {
    /// Open `device_name`, or the best default when `None`, and settle the
    /// capture format up front.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let (device, format) = with_suppressed_stderr(|| {
            let device = open_device(device_name)?;
            let format = negotiate(&device, sample_rate)?;
            Ok::<_, TalkbackError>((device, format))
        })?;

        if format.rate != sample_rate || format.channels != 1 {
            tracing::info!(
                channels = format.channels,
                rate = format.rate,
                "Device capture converted to mono {}Hz in software",
                sample_rate
            );
        }

        Ok(Self {
            device,
            format,
            sample_rate,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream_error: Arc::new(Mutex::new(None)),
        })
    }

    fn build_stream<T>(&self) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        i16: FromSample<T>,
    {
        let format = self.format;
        let target_rate = self.sample_rate;
        let buffer = Arc::clone(&self.buffer);
        let stream_error = Arc::clone(&self.stream_error);

        self.device
            .build_input_stream(
                &format.stream_config(),
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples = to_recording(data, &format, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&samples);
                    }
                },
                move |err| {
                    tracing::error!("Capture stream error: {}", err);
                    if let Ok(mut slot) = stream_error.lock() {
                        slot.get_or_insert_with(|| err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| TalkbackError::AudioDevice {
                message: format!("Failed to open capture stream: {}", e),
            })
    }
}

fn negotiate(device: &cpal::Device, target_rate: u32) -> Result<CaptureFormat> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| TalkbackError::AudioDevice {
            message: format!("Failed to query input configs: {}", e),
        })?
        .map(|r| {
            (
                r.sample_format(),
                r.channels(),
                r.min_sample_rate(),
                r.max_sample_rate(),
            )
        })
        .collect();
    let fallback = device.default_input_config().ok().map(|c| CaptureFormat {
        sample_format: c.sample_format(),
        channels: c.channels(),
        rate: c.sample_rate(),
    });
    choose_format(&ranges, target_rate, fallback)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        if let Ok(mut slot) = self.stream_error.lock() {
            slot.take();
        }

        let stream = match self.format.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>()?,
            _ => self.build_stream::<i16>()?,
        };
        stream.play().map_err(|e| TalkbackError::AudioDevice {
            message: format!("Failed to start capture stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(SendableStream(stream)) = self.stream.take() {
            stream.pause().map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to stop capture stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let failed = self
            .stream_error
            .lock()
            .map_err(|e| TalkbackError::AudioCapture {
                message: format!("Failed to lock stream error: {}", e),
            })?
            .take();
        if let Some(message) = failed {
            return Err(TalkbackError::AudioCapture { message });
        }

        let mut buffer = self.buffer.lock().map_err(|e| TalkbackError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}
