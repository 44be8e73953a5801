//! eureka-voice-core — realtime voice-intake session engine.
//!
//! The crate drives one voice session at a time: acquire the microphone,
//! publish a PCM16 track into a realtime room, stream visualization levels,
//! and collect the transcript until the remote service commits a final one.
//! A deterministic simulated provider stands in for the whole network path
//! when no backend is available.
//!
//! ## Pipeline
//!
//! ```text
//!  toggle()                       ┌────────────────────┐
//!  ───────►  VoiceSessionController ──► SessionProvider │ (live | simulated)
//!                   ▲                  └───────┬────────┘
//!                   │ ProviderEvents           │ live:
//!                   │                          ▼
//!            state machine          SessionConnector (token + socket)
//!            + broadcasts                      │
//!         (status / levels /        AudioTrackPublisher (cpal → resample
//!          transcripts)                        │          → PCM16 frames)
//!                                   AudioLevelAnalyzer (FFT → bands)
//!                                   TranscriptionReceiver (replace + latch)
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use eureka_voice_core::session::{SessionConfig, VoiceSessionController};
//!
//! # async fn demo() -> eureka_voice_core::Result<()> {
//! let controller = VoiceSessionController::new(SessionConfig::default())?;
//! controller.on_complete(|text| println!("final transcript: {text}"));
//! controller.toggle().await; // start
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod connector;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod publisher;
pub mod receiver;
pub mod session;
pub mod tasks;
pub mod wire;

pub use error::{Result, VoiceError};
pub use ipc::events::{
    LevelsEvent, SessionSnapshot, SessionStatus, StatusEvent, TranscriptEvent, TranscriptKind,
};
pub use session::provider::SessionMode;
pub use session::{SessionConfig, VoiceSessionController};
