//! Microphone capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a lock, or perform I/O, so the callback
//! writes straight into an SPSC ring buffer producer whose `push_slice` is
//! lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`MicrophoneTrack`] must be created and dropped on the same OS
//! thread; the publisher does this by opening it inside `spawn_blocking`.

pub mod device;
pub mod levels;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleRate, Stream, StreamConfig,
};

use ringbuf::{traits::Split, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::Result;
#[cfg(feature = "audio-cpal")]
use crate::error::VoiceError;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half of the capture ring — held by the audio callback.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the capture ring — held by the publish pump.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz. The pump drains every
/// few milliseconds, so this is generous headroom.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create the matched producer/consumer pair for one capture session.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Capture processing hints, passed through unchanged in the track
/// announcement. The remote end owns the corresponding filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CaptureHints {
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            auto_gain_control: true,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Handle to the live microphone stream.
///
/// **Not `Send`** — bound to its creation thread. The owning thread drops it
/// to release the device.
pub struct MicrophoneTrack {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to make the callback a no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl MicrophoneTrack {
    /// Open an input device by preferred name, falling back to the system
    /// default and then the first available input.
    pub fn open(
        producer: CaptureProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected =
                        devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if selected.is_none() {
                        warn!("preferred input device '{preferred}' not found, falling back");
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = match selected.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;
                let fallback = devices.next().ok_or(VoiceError::NoDefaultInputDevice)?;
                warn!("no default input device, falling back to first available input");
                fallback
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, producer, Arc::clone(&running), |s| s)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, producer, Arc::clone(&running), |s| {
                    s as f32 / 32768.0
                })
            }
            cpal::SampleFormat::U8 => {
                build_stream::<u8>(&device, &config, producer, Arc::clone(&running), |s| {
                    (s as f32 - 128.0) / 128.0
                })
            }
            fmt => {
                return Err(VoiceError::AudioDevice(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Build one input stream for sample type `T`, mixing interleaved channels
/// down to mono f32 and pushing into the ring.
#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: CaptureProducer,
    running: Arc<AtomicBool>,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let ch = config.channels as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                if ch == 1 {
                    for (dst, s) in mix_buf.iter_mut().zip(data.iter()) {
                        *dst = to_f32(*s);
                    }
                } else {
                    for (f, dst) in mix_buf.iter_mut().enumerate() {
                        let base = f * ch;
                        let mut sum = 0f32;
                        for c in 0..ch {
                            sum += to_f32(data[base + c]);
                        }
                        *dst = sum / ch as f32;
                    }
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!(
                        "capture ring full: dropped {} frames",
                        mix_buf.len() - written
                    );
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| VoiceError::AudioDevice(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicrophoneTrack {
    pub fn open(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(crate::error::VoiceError::AudioDevice(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
