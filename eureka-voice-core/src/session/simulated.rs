//! Deterministic scripted session, used when no backend is available.
//!
//! The timeline mirrors a real session closely enough that the controller
//! cannot tell the difference: a connect delay, randomized level ticks while
//! "listening", then a scripted transcript revealed one character at a time
//! with per-character jitter. Everything runs on cancellable timers — no
//! real I/O — and `stop()` aborts all of it mid-flight.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::Result;
use crate::session::provider::{ProviderEvent, SessionProvider, SessionRun};

/// Default scripted intake sentence.
pub const DEFAULT_SCRIPT: &str = "I need a web app for tracking satellite logistics \
with real-time orbital positioning and cargo manifest management...";

/// Timing and content of the scripted session.
#[derive(Debug, Clone)]
pub struct SimulatedTimeline {
    /// Handshake stand-in before `Connected`.
    pub connect_delay: Duration,
    /// Interval between randomized level emissions.
    pub level_interval: Duration,
    /// Listening time before the transcript starts revealing.
    pub reveal_delay: Duration,
    /// Per-character jitter bounds.
    pub char_delay_min: Duration,
    pub char_delay_max: Duration,
    /// Text revealed one character at a time.
    pub script: String,
    /// Seed for reproducible level/jitter sequences; `None` seeds from
    /// entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatedTimeline {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_secs(1),
            level_interval: Duration::from_millis(80),
            reveal_delay: Duration::from_secs(2),
            char_delay_min: Duration::from_millis(30),
            char_delay_max: Duration::from_millis(70),
            script: DEFAULT_SCRIPT.into(),
            seed: None,
        }
    }
}

/// Scripted stand-in for the full network pipeline.
pub struct SimulatedSessionProvider {
    timeline: SimulatedTimeline,
    band_count: usize,
}

impl SimulatedSessionProvider {
    pub fn new(timeline: SimulatedTimeline, band_count: usize) -> Self {
        Self {
            timeline,
            band_count,
        }
    }

    fn random_levels(&self, rng: &mut SmallRng) -> ProviderEvent {
        let bands = (0..self.band_count)
            .map(|_| rng.gen::<f32>() * 0.8 + 0.2)
            .collect();
        let average = rng.gen::<f32>() * 0.7 + 0.3;
        ProviderEvent::Levels { average, bands }
    }

    fn char_jitter(&self, rng: &mut SmallRng) -> Duration {
        let min = self.timeline.char_delay_min;
        let max = self.timeline.char_delay_max.max(min);
        if max == min {
            return min;
        }
        min + Duration::from_millis(rng.gen_range(0..=(max - min).as_millis() as u64))
    }
}

#[async_trait]
impl SessionProvider for SimulatedSessionProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn run(&self, run: SessionRun) -> Result<()> {
        let SessionRun { events, mut cancel } = run;
        let mut rng = match self.timeline.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        if !cancel.delay(self.timeline.connect_delay).await {
            return Ok(());
        }
        if events.send(ProviderEvent::Connected).await.is_err() {
            return Ok(());
        }
        let _ = events.send(ProviderEvent::TrackPublished).await;

        let mut level_tick = tokio::time::interval(self.timeline.level_interval);
        level_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let reveal_start = tokio::time::sleep(self.timeline.reveal_delay);
        tokio::pin!(reveal_start);

        // Listening phase: levels only, until the reveal starts.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = level_tick.tick() => {
                    let _ = events.send(self.random_levels(&mut rng)).await;
                }
                _ = &mut reveal_start => break,
            }
        }

        let _ = events.send(ProviderEvent::Processing).await;
        debug!(chars = self.timeline.script.chars().count(), "revealing scripted transcript");

        // Reveal phase: levels keep flowing while the script types out.
        let chars: Vec<char> = self.timeline.script.chars().collect();
        let mut revealed = 0usize;
        let mut next_char = tokio::time::sleep(self.char_jitter(&mut rng));
        tokio::pin!(next_char);

        while revealed < chars.len() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = level_tick.tick() => {
                    let _ = events.send(self.random_levels(&mut rng)).await;
                }
                _ = &mut next_char => {
                    revealed += 1;
                    let text: String = chars[..revealed].iter().collect();
                    let is_final = revealed == chars.len();
                    if events
                        .send(ProviderEvent::Transcript { text, is_final })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    if !is_final {
                        let jitter = self.char_jitter(&mut rng);
                        next_char.as_mut().reset(tokio::time::Instant::now() + jitter);
                    }
                }
            }
        }

        Ok(())
    }
}
