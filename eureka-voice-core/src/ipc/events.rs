//! Event types emitted to the embedding UI.
//!
//! ## Streams
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `StatusEvent` | `VoiceSessionController::subscribe_status` |
//! | `LevelsEvent` | `VoiceSessionController::subscribe_levels` |
//! | `TranscriptEvent` | `VoiceSessionController::subscribe_transcripts` |
//!
//! `SessionSnapshot` is the pull-side view returned by
//! `VoiceSessionController::snapshot`, shaped for direct JSON hand-off.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Current state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session; `toggle()` starts one.
    Idle,
    /// Token fetch + session handshake in progress.
    Connecting,
    /// Handshake succeeded; local track not yet published.
    Connected,
    /// Microphone track live, levels and transcripts flowing.
    Listening,
    /// Utterance captured; awaiting/receiving the finalized transcript.
    Processing,
    /// Final transcript delivered; teardown imminent.
    Complete,
    /// A session stage failed — see the accompanying detail message.
    Error,
    /// The remote end dropped the session.
    Disconnected,
}

impl SessionStatus {
    /// `true` while a session owns resources (anything between `toggle()` and
    /// the post-teardown idle reset).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting
                | SessionStatus::Connected
                | SessionStatus::Listening
                | SessionStatus::Processing
        )
    }
}

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Audio level events
// ---------------------------------------------------------------------------

/// Emitted on each analyzer tick while the session is listening.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelsEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Overall level in [0.0, 1.0] (mean spectrum magnitude / ceiling).
    pub average: f32,
    /// Fixed-length per-band levels, each in [0.0, 1.0].
    pub bands: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Distinguishes streaming partials from the committed final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    /// Streaming partial — the next event replaces this text wholesale.
    Partial,
    /// Committed final — the utterance is complete and will not change.
    Final,
}

/// Emitted whenever the transcript text is replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Full transcript text (replacement, not a delta).
    pub text: String,
    pub kind: TranscriptKind,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the session, pull-side counterpart of the streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Convenience flag: `status == listening`.
    pub is_listening: bool,
    /// Current transcript text (empty when idle).
    pub transcript: String,
    /// Overall audio level in [0.0, 1.0].
    pub audio_level: f32,
    /// Per-band levels; length is fixed for the life of the controller.
    pub audio_levels: Vec<f32>,
    /// Present only when `status == error`.
    pub error: Option<String>,
}
