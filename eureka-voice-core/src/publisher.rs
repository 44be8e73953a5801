//! Local track acquisition and publishing.
//!
//! The publisher opens the microphone inside `spawn_blocking` (the cpal
//! stream is `!Send`, so the device is created, pumped, and dropped on one
//! thread), confirms readiness back to the async caller over a sync channel,
//! and then runs the pump: drain the capture ring, convert to the publish
//! rate, feed the analysis window, and hand PCM16-LE frames to the async
//! half for binary publish into the session.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::levels::AnalysisWindow;
use crate::audio::resample::RateConverter;
use crate::audio::{create_capture_ring, CaptureHints, Consumer, MicrophoneTrack};
use crate::error::{Result, VoiceError};
use crate::wire::TrackAnnounce;

/// Samples drained from the ring per pump iteration (20 ms at 48 kHz).
const PUMP_CHUNK: usize = 960;

/// Sleep when the ring is empty, avoiding a busy loop on the pump thread.
const PUMP_SLEEP_EMPTY: Duration = Duration::from_millis(5);

/// Frame channel depth; the socket writer drains continuously.
const FRAME_CHANNEL_CAP: usize = 64;

/// Publisher configuration, taken from the session config.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Sample rate of the published track (Hz).
    pub publish_sample_rate: u32,
    /// Device-filter flags forwarded in the track announcement.
    pub hints: CaptureHints,
    /// Input device to prefer; `None` uses the system default.
    pub preferred_device: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_sample_rate: 16_000,
            hints: CaptureHints::default(),
            preferred_device: None,
        }
    }
}

/// Handle to the live published track. Releasing it stops the pump and
/// drops the device on its owning thread.
#[derive(Debug)]
pub struct PublishedTrack {
    running: Arc<AtomicBool>,
    pump: tokio::task::JoinHandle<()>,
    hints: CaptureHints,
    publish_sample_rate: u32,
    /// Rate the device actually captures at.
    pub capture_sample_rate: u32,
}

impl PublishedTrack {
    /// The one announcement message sent before binary frames.
    pub fn announce(&self) -> TrackAnnounce {
        TrackAnnounce::pcm16(self.publish_sample_rate, self.hints)
    }

    /// Stop the pump and wait for the device to be released.
    pub async fn release(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.pump.await;
        debug!("published track released");
    }
}

/// Acquires the microphone and starts the publish pump.
pub struct AudioTrackPublisher;

impl AudioTrackPublisher {
    /// Open the microphone and start pumping PCM16-LE frames.
    ///
    /// Returns once the device is confirmed open (or failed). The returned
    /// receiver yields encoded frames for the session socket; `window`
    /// receives publish-rate samples for the level analyzer.
    ///
    /// # Errors
    /// `VoiceError::Publish` when the device cannot be acquired or the
    /// stream cannot be built, `VoiceError::Resource` when the rate
    /// converter cannot be initialised for the device's capture rate. Any
    /// partially acquired device is dropped on the pump thread before the
    /// error surfaces.
    pub async fn publish(
        config: PublisherConfig,
        window: AnalysisWindow,
    ) -> Result<(PublishedTrack, mpsc::Receiver<Vec<u8>>)> {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(FRAME_CHANNEL_CAP);
        let (producer, mut consumer) = create_capture_ring();
        let running = Arc::new(AtomicBool::new(true));

        // Sync channel: pump thread reports open success/failure, carrying
        // the actual capture sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let running_pump = Arc::clone(&running);
        let preferred = config.preferred_device.clone();
        let publish_rate = config.publish_sample_rate;

        let pump = tokio::task::spawn_blocking(move || {
            // Device open must happen on THIS thread — cpal::Stream is !Send.
            let track = match MicrophoneTrack::open(
                producer,
                Arc::clone(&running_pump),
                preferred.as_deref(),
            ) {
                Ok(t) => t,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running_pump.store(false, Ordering::SeqCst);
                    return;
                }
            };

            // The converter must exist before the caller is told the track is
            // ready; a failure here has to surface from `publish`, not as a
            // mid-session frame drop.
            let mut converter = match RateConverter::new(track.sample_rate, publish_rate, PUMP_CHUNK)
            {
                Ok(c) => c,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running_pump.store(false, Ordering::SeqCst);
                    track.stop();
                    return;
                }
            };

            let _ = open_tx.send(Ok(track.sample_rate));

            let mut raw = vec![0f32; PUMP_CHUNK];
            while running_pump.load(Ordering::Relaxed) {
                let n = consumer.pop_slice(&mut raw);
                if n == 0 {
                    std::thread::sleep(PUMP_SLEEP_EMPTY);
                    continue;
                }

                let converted = converter.process(&raw[..n]);
                if converted.is_empty() {
                    continue;
                }

                window.push(&converted);

                let mut frame = Vec::with_capacity(converted.len() * 2);
                for &sample in &converted {
                    let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                    frame.extend_from_slice(&v.to_le_bytes());
                }
                if frame_tx.blocking_send(frame).is_err() {
                    // Receiver gone — the session ended without us.
                    break;
                }
            }

            track.stop();
            // Stream drops here, releasing the device on this thread.
            drop(track);
        });

        match open_rx.recv() {
            Ok(Ok(capture_sample_rate)) => {
                info!(capture_sample_rate, publish_rate, "microphone track published");
                Ok((
                    PublishedTrack {
                        running,
                        pump,
                        hints: config.hints,
                        publish_sample_rate: publish_rate,
                        capture_sample_rate,
                    },
                    frame_rx,
                ))
            }
            Ok(Err(e @ VoiceError::Resource(_))) => Err(e),
            Ok(Err(e)) => Err(VoiceError::Publish(format!("device acquisition: {e}"))),
            Err(_) => Err(VoiceError::Publish(
                "capture thread died before confirming device open".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announce_reflects_publisher_config() {
        let track = PublishedTrack {
            running: Arc::new(AtomicBool::new(false)),
            pump: tokio::task::spawn_blocking(|| {}),
            hints: CaptureHints {
                auto_gain_control: false,
                echo_cancellation: true,
                noise_suppression: true,
            },
            publish_sample_rate: 16_000,
            capture_sample_rate: 48_000,
        };
        let announce = track.announce();
        assert_eq!(announce.sample_rate, 16_000);
        assert_eq!(announce.channels, 1);
        assert!(!announce.hints.auto_gain_control);
    }

    #[tokio::test]
    async fn unconvertible_publish_rate_fails_before_the_track_is_confirmed() {
        // A zero publish rate can never yield a working converter. Whatever
        // the host audio setup, `publish` must return Err here rather than
        // confirming a track whose pump dies on its first frame. On a
        // machine with an input device this exercises the converter-init
        // path (Resource); without one, device acquisition fails first.
        let config = PublisherConfig {
            publish_sample_rate: 0,
            ..PublisherConfig::default()
        };
        let err = AudioTrackPublisher::publish(config, AnalysisWindow::new())
            .await
            .expect_err("a zero publish rate must not produce a live track");
        assert!(
            matches!(err, VoiceError::Resource(_) | VoiceError::Publish(_)),
            "unexpected error variant: {err}"
        );
    }

    #[test]
    fn pcm16_conversion_round_trips_extremes() {
        // Same conversion the pump applies.
        let to_pcm16 = |s: f32| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(2.0), i16::MAX);
        assert_eq!(to_pcm16(-1.0), -i16::MAX);
    }
}
