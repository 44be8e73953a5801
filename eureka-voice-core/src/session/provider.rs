//! The session-provider seam.
//!
//! A provider runs one whole session — handshake, track publish, level
//! analysis, transcript receive — and reports progress as [`ProviderEvent`]s.
//! The controller applies those events to its state machine without knowing
//! which variant produced them, so the network-backed and simulated paths
//! stay interchangeable (and test doubles slot in the same way).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identity::{IdentityProvider, RandomIdentity};
use crate::session::live::LiveSessionProvider;
use crate::session::simulated::SimulatedSessionProvider;
use crate::session::SessionConfig;
use crate::tasks::Cancellation;

/// Which provider variant a controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Token service + realtime socket + microphone.
    Live,
    /// Deterministic scripted timeline, no I/O.
    Simulated,
}

/// Progress report emitted by a running provider, in session order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Handshake succeeded.
    Connected,
    /// Local track is live in the session.
    TrackPublished,
    /// One analyzer tick worth of visualization levels.
    Levels { average: f32, bands: Vec<f32> },
    /// Transcript replacement; `is_final` marks the terminal text.
    Transcript { text: String, is_final: bool },
    /// Agent side-channel output.
    Agent { text: String },
    /// The provider entered its post-capture phase.
    Processing,
    /// The remote end dropped the session.
    Disconnected { reason: String },
}

/// Everything a provider needs for one run.
pub struct SessionRun {
    /// Event channel into the controller's apply loop.
    pub events: mpsc::Sender<ProviderEvent>,
    /// Session-wide cancellation token; every internal timer and loop must
    /// select on it.
    pub cancel: Cancellation,
}

/// One interchangeable session implementation.
///
/// `run` drives a complete session and returns when it ends: `Ok(())` for a
/// clean end (finalized, cancelled, or remote-dropped after reporting
/// `Disconnected`), `Err` for a failure the controller should surface as the
/// error state. All resources must be released before `run` returns.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, run: SessionRun) -> Result<()>;
}

/// Build the provider variant selected by `config.mode`.
pub fn from_config(config: &SessionConfig) -> Result<Arc<dyn SessionProvider>> {
    let identity: Arc<dyn IdentityProvider> =
        Arc::new(RandomIdentity::new(config.room_prefix.clone()));
    from_config_with_identity(config, identity)
}

/// Like [`from_config`] with an injected identity generator (deterministic
/// connection scenarios in tests).
pub fn from_config_with_identity(
    config: &SessionConfig,
    identity: Arc<dyn IdentityProvider>,
) -> Result<Arc<dyn SessionProvider>> {
    Ok(match config.mode {
        SessionMode::Live => Arc::new(LiveSessionProvider::new(config, identity)?),
        SessionMode::Simulated => Arc::new(SimulatedSessionProvider::new(
            config.simulated.clone(),
            config.band_count,
        )),
    })
}
