//! Inbound data-channel handling: transcript state and finalization.
//!
//! The receiver decodes each payload through [`wire::InboundMessage`] and
//! maintains the current transcript. Transcript text is replaced wholesale on
//! every update (the remote service sends full text, not deltas) and latches
//! on the first final message; anything arriving after the latch is ignored
//! because the utterance is complete. Malformed payloads are expected noise
//! on the channel, not failures — they are dropped with a debug log and
//! mutate nothing.

use tracing::debug;

use crate::wire::InboundMessage;

/// A decoded inbound update worth forwarding.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Transcript replacement; `is_final` marks the terminal text.
    Transcript { text: String, is_final: bool },
    /// Agent side-channel output. Observability only.
    Agent { text: String },
}

/// Per-session transcript state machine.
#[derive(Debug, Default)]
pub struct TranscriptionReceiver {
    transcript: String,
    finalized: bool,
    malformed: u64,
}

impl TranscriptionReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one raw payload and apply it.
    ///
    /// Returns the update to forward, or `None` when the payload was
    /// malformed, unknown, or arrived after finalization.
    pub fn accept(&mut self, payload: &[u8]) -> Option<Inbound> {
        let message = match InboundMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                self.malformed += 1;
                debug!(error = %e, "dropped malformed session payload");
                return None;
            }
        };

        match message {
            InboundMessage::Transcription { text, is_final } => {
                if self.finalized {
                    debug!("ignoring transcription after finalization");
                    return None;
                }
                self.transcript = text.clone();
                if is_final {
                    self.finalized = true;
                }
                Some(Inbound::Transcript { text, is_final })
            }
            InboundMessage::AgentResponse { text } => Some(Inbound::Agent { text }),
            InboundMessage::Unknown => None,
        }
    }

    /// Current transcript text (empty until the first update).
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// `true` once a final transcription was applied.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Count of dropped undecodable payloads.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}
