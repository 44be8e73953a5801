//! Network-backed session: connector → publisher → analyzer/receiver.
//!
//! One select loop owns the whole live session: analyzer ticks read the
//! rolling capture window and emit levels, PCM frames from the publish pump
//! go out as binary socket messages, and inbound text frames run through the
//! transcription receiver. The loop ends on cancellation, on a final
//! transcript (graceful end), or on remote drop — and every exit path
//! releases the track before `run` returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::audio::levels::{average_level, band_levels, AnalysisWindow, SpectrumAnalyzer, FFT_SIZE};
use crate::connector::{ConnectorConfig, SessionConnector, SessionLink};
use crate::error::{Result, VoiceError};
use crate::identity::IdentityProvider;
use crate::publisher::{AudioTrackPublisher, PublisherConfig};
use crate::receiver::{Inbound, TranscriptionReceiver};
use crate::session::provider::{ProviderEvent, SessionProvider, SessionRun};
use crate::session::SessionConfig;

pub struct LiveSessionProvider {
    connector: SessionConnector,
    identity: Arc<dyn IdentityProvider>,
    publisher: PublisherConfig,
    band_count: usize,
    analyzer_interval: Duration,
}

impl LiveSessionProvider {
    pub fn new(config: &SessionConfig, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        let connector = SessionConnector::new(ConnectorConfig {
            token_endpoint: config.token_endpoint.clone(),
            connect_timeout: config.connect_timeout,
        })?;
        Ok(Self {
            connector,
            identity,
            publisher: PublisherConfig {
                publish_sample_rate: config.publish_sample_rate,
                hints: config.capture_hints,
                preferred_device: config.preferred_input_device.clone(),
            },
            band_count: config.band_count,
            analyzer_interval: config.analyzer_interval,
        })
    }
}

#[async_trait]
impl SessionProvider for LiveSessionProvider {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn run(&self, run: SessionRun) -> Result<()> {
        let SessionRun { events, mut cancel } = run;

        let identity = self.identity.next();
        let SessionLink {
            room,
            mut sink,
            mut stream,
        } = self.connector.connect(&identity).await?;
        let _ = events.send(ProviderEvent::Connected).await;

        let window = AnalysisWindow::new();
        let (track, mut frames) =
            AudioTrackPublisher::publish(self.publisher.clone(), window.clone()).await?;

        let announce = serde_json::to_string(&track.announce())?;
        if let Err(e) = sink.send(Message::Text(announce.into())).await {
            track.release().await;
            return Err(VoiceError::Publish(format!("track announce failed: {e}")));
        }
        let _ = events.send(ProviderEvent::TrackPublished).await;
        info!(room = room.as_str(), "live session listening");

        let mut analyzer = SpectrumAnalyzer::new();
        let mut window_buf = [0f32; FFT_SIZE];
        let mut receiver = TranscriptionReceiver::new();
        let mut tick = tokio::time::interval(self.analyzer_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = tick.tick() => {
                    window.snapshot(&mut window_buf);
                    let bins = analyzer.analyze(&window_buf);
                    let event = ProviderEvent::Levels {
                        average: average_level(bins),
                        bands: band_levels(bins, self.band_count),
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }

                frame = frames.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                                warn!("frame publish failed: {e}");
                                let _ = events
                                    .send(ProviderEvent::Disconnected {
                                        reason: format!("publish failed: {e}"),
                                    })
                                    .await;
                                break;
                            }
                        }
                        None => {
                            // Pump thread ended on its own — device trouble.
                            let _ = events
                                .send(ProviderEvent::Disconnected {
                                    reason: "audio capture ended unexpectedly".into(),
                                })
                                .await;
                            break;
                        }
                    }
                }

                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if apply_inbound(&mut receiver, text.as_bytes(), &events).await {
                                // Finalized — graceful end.
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(payload))) => {
                            if apply_inbound(&mut receiver, &payload, &events).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("remote closed: {} {}", f.code, f.reason))
                                .unwrap_or_else(|| "remote closed".into());
                            let _ = events.send(ProviderEvent::Disconnected { reason }).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events
                                .send(ProviderEvent::Disconnected {
                                    reason: format!("session socket error: {e}"),
                                })
                                .await;
                            break;
                        }
                        None => {
                            let _ = events
                                .send(ProviderEvent::Disconnected {
                                    reason: "session stream ended".into(),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            malformed = receiver.malformed_count(),
            finalized = receiver.is_finalized(),
            "live session ending"
        );
        track.release().await;
        let _ = sink.close().await;
        Ok(())
    }
}

/// Feed one payload through the receiver and forward the result.
///
/// Returns `true` when the payload finalized the transcript.
async fn apply_inbound(
    receiver: &mut TranscriptionReceiver,
    payload: &[u8],
    events: &tokio::sync::mpsc::Sender<ProviderEvent>,
) -> bool {
    match receiver.accept(payload) {
        Some(Inbound::Transcript { text, is_final }) => {
            let _ = events
                .send(ProviderEvent::Transcript { text, is_final })
                .await;
            is_final
        }
        Some(Inbound::Agent { text }) => {
            let _ = events.send(ProviderEvent::Agent { text }).await;
            false
        }
        None => false,
    }
}
