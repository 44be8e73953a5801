//! Persisted application settings.
//!
//! Stored as camelCase JSON so the file can be shared with (or edited
//! alongside) the web-based intake client's configuration. Every field has a
//! default; a missing or partial file never blocks startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use eureka_voice_core::audio::CaptureHints;
use eureka_voice_core::session::simulated::SimulatedTimeline;
use eureka_voice_core::{SessionConfig, SessionMode};

const SETTINGS_DIR: &str = "eureka-voice";
const SETTINGS_FILE: &str = "settings.json";

const MIN_BANDS: usize = 1;
const MAX_BANDS: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Token service endpoint for live sessions.
    pub token_endpoint: String,
    /// Run against the scripted provider instead of the network.
    pub simulate: bool,
    /// Number of visualization bands.
    pub band_count: usize,
    /// Input device to prefer; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Hard cap on session length in seconds; 0 disables the cap.
    pub max_session_secs: u64,
    /// Seconds the error state stays visible before resetting; 0 keeps it.
    pub error_reset_secs: u64,
    /// Override for the simulated transcript.
    pub script: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            token_endpoint: "http://localhost:3000/api/session-token".into(),
            simulate: false,
            band_count: 12,
            preferred_input_device: None,
            auto_gain_control: true,
            echo_cancellation: true,
            noise_suppression: true,
            max_session_secs: 120,
            error_reset_secs: 10,
            script: None,
        }
    }
}

impl AppSettings {
    /// Clamp out-of-range values instead of failing on them.
    pub fn normalize(&mut self) {
        if !(MIN_BANDS..=MAX_BANDS).contains(&self.band_count) {
            warn!(
                band_count = self.band_count,
                "band count out of range, clamping"
            );
            self.band_count = self.band_count.clamp(MIN_BANDS, MAX_BANDS);
        }
        if self.token_endpoint.trim().is_empty() {
            self.token_endpoint = Self::default().token_endpoint;
        }
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let mut settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing settings from {}", path.display()))?;
        settings.normalize();
        Ok(settings)
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating settings dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, raw)
            .with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }

    /// The session configuration these settings describe.
    pub fn session_config(&self) -> SessionConfig {
        let mut simulated = SimulatedTimeline::default();
        if let Some(script) = &self.script {
            simulated.script = script.clone();
        }
        SessionConfig {
            mode: if self.simulate {
                SessionMode::Simulated
            } else {
                SessionMode::Live
            },
            token_endpoint: self.token_endpoint.clone(),
            band_count: self.band_count,
            capture_hints: CaptureHints {
                auto_gain_control: self.auto_gain_control,
                echo_cancellation: self.echo_cancellation,
                noise_suppression: self.noise_suppression,
            },
            preferred_input_device: self.preferred_input_device.clone(),
            max_session: match self.max_session_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            error_reset: match self.error_reset_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            simulated,
            ..SessionConfig::default()
        }
    }
}

/// Platform config location: `%APPDATA%` on Windows, `$XDG_CONFIG_HOME`
/// (falling back to `~/.config`) elsewhere.
pub fn default_settings_path() -> PathBuf {
    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    };
    base.unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_DIR)
        .join(SETTINGS_FILE)
}
