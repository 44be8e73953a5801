//! Interactive host for the voice-intake session engine.
//!
//! Runs the controller in a terminal: Enter toggles the session, `q` quits.
//! Status, levels, and transcript updates stream in over the controller's
//! broadcast channels; logs go to stderr so the meter on stdout stays
//! readable.

mod settings;

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use eureka_voice_core::audio::device::list_input_devices;
use eureka_voice_core::{SessionStatus, VoiceSessionController};

use settings::{default_settings_path, AppSettings};

const METER_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser, Debug)]
#[command(name = "eureka-voice", about = "Voice intake session client", version)]
struct Cli {
    /// Settings file (defaults to the platform config directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Use the scripted provider instead of the network.
    #[arg(long)]
    simulate: bool,

    /// Token service endpoint override.
    #[arg(long)]
    endpoint: Option<String>,

    /// Number of visualization bands.
    #[arg(long)]
    bands: Option<usize>,

    /// Preferred input device name.
    #[arg(long)]
    device: Option<String>,

    /// Scripted transcript override (implies --simulate).
    #[arg(long)]
    script: Option<String>,

    /// List available input devices and exit.
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn apply_to(&self, settings: &mut AppSettings) {
        if self.simulate || self.script.is_some() {
            settings.simulate = true;
        }
        if let Some(endpoint) = &self.endpoint {
            settings.token_endpoint = endpoint.clone();
        }
        if let Some(bands) = self.bands {
            settings.band_count = bands;
        }
        if let Some(device) = &self.device {
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(script) = &self.script {
            settings.script = Some(script.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = list_input_devices().context("listing input devices")?;
        if devices.is_empty() {
            println!("no input devices found");
        }
        for device in devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{marker}", device.name);
        }
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = AppSettings::load(&settings_path)?;
    if !settings_path.exists() {
        // Seed the file before CLI overrides, so flags stay per-invocation.
        settings
            .save(&settings_path)
            .with_context(|| format!("seeding settings at {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "wrote default settings file");
    }
    cli.apply_to(&mut settings);
    settings.normalize();
    info!(
        mode = if settings.simulate { "simulated" } else { "live" },
        bands = settings.band_count,
        "starting"
    );

    let controller = VoiceSessionController::new(settings.session_config())
        .context("building session controller")?;
    controller.on_complete(|text| {
        println!("\n=== final transcript ===\n{text}\n========================");
    });

    spawn_renderers(&controller);

    println!("Enter: start/stop a session   q: quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "q" | "quit" => break,
            "" => controller.toggle().await,
            other => println!("unrecognized input {other:?} (Enter toggles, q quits)"),
        }
    }

    controller.stop().await;
    info!("session stats: {:?}", controller.diagnostics());
    Ok(())
}

/// Print status, level, and transcript streams as they arrive.
fn spawn_renderers(controller: &VoiceSessionController) {
    let mut status = controller.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(event) => {
                    match event.detail {
                        Some(detail) => println!("\n[{}] {detail}", label(event.status)),
                        None => println!("\n[{}]", label(event.status)),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    let mut transcripts = controller.subscribe_transcripts();
    tokio::spawn(async move {
        loop {
            match transcripts.recv().await {
                Ok(event) => {
                    // Replacement semantics: rewrite the current line.
                    print!("\r\x1b[2K> {}", event.text);
                    let _ = std::io::stdout().flush();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    let mut levels = controller.subscribe_levels();
    tokio::spawn(async move {
        loop {
            match levels.recv().await {
                Ok(event) => {
                    print!("\r\x1b[2K{} {:>4.0}%", meter(&event.bands), event.average * 100.0);
                    let _ = std::io::stdout().flush();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
}

fn label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Connecting => "connecting",
        SessionStatus::Connected => "connected",
        SessionStatus::Listening => "listening",
        SessionStatus::Processing => "processing",
        SessionStatus::Complete => "complete",
        SessionStatus::Error => "error",
        SessionStatus::Disconnected => "disconnected",
    }
}

/// One glyph per band, scaled across the meter alphabet.
fn meter(bands: &[f32]) -> String {
    bands
        .iter()
        .map(|level| {
            let idx = (level.clamp(0.0, 1.0) * (METER_GLYPHS.len() - 1) as f32).round() as usize;
            METER_GLYPHS[idx]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_maps_extremes_to_first_and_last_glyphs() {
        let bar = meter(&[0.0, 1.0, 2.0, -1.0]);
        let glyphs: Vec<char> = bar.chars().collect();
        assert_eq!(glyphs[0], METER_GLYPHS[0]);
        assert_eq!(glyphs[1], METER_GLYPHS[7]);
        assert_eq!(glyphs[2], METER_GLYPHS[7]);
        assert_eq!(glyphs[3], METER_GLYPHS[0]);
    }

    #[test]
    fn cli_script_implies_simulate() {
        let cli = Cli::parse_from(["eureka-voice", "--script", "hello there"]);
        let mut settings = AppSettings::default();
        cli.apply_to(&mut settings);
        assert!(settings.simulate);
        assert_eq!(settings.script.as_deref(), Some("hello there"));
    }

    #[test]
    fn cli_overrides_replace_settings_values() {
        let cli = Cli::parse_from([
            "eureka-voice",
            "--endpoint",
            "http://example:9000/token",
            "--bands",
            "5",
            "--device",
            "USB Mic",
        ]);
        let mut settings = AppSettings::default();
        cli.apply_to(&mut settings);
        assert_eq!(settings.token_endpoint, "http://example:9000/token");
        assert_eq!(settings.band_count, 5);
        assert_eq!(settings.preferred_input_device.as_deref(), Some("USB Mic"));
        assert!(!settings.simulate);
    }
}
