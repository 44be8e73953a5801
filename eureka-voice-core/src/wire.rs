//! JSON schema of the session's external surfaces.
//!
//! Two wire formats live here:
//!
//! 1. Token exchange — `TokenRequest`/`TokenResponse`, camelCase, POSTed to
//!    the credential endpoint before the session socket opens.
//! 2. Data channel — `InboundMessage` for text frames arriving over the open
//!    session, `TrackAnnounce` for the one message the publisher sends before
//!    streaming binary PCM.
//!
//! Decoding is strict about shape but tolerant of unknown message types:
//! a `type` we do not recognise maps to `InboundMessage::Unknown` and the
//! receiver ignores it, while a frame that fails to parse at all is dropped
//! by the caller.

use serde::{Deserialize, Serialize};

use crate::audio::CaptureHints;

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

/// Body POSTed to the token endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest<'a> {
    pub room_name: &'a str,
    pub identity: &'a str,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Bearer credential for the session socket.
    pub token: String,
    /// Realtime endpoint to open the session against.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Data channel — inbound
// ---------------------------------------------------------------------------

/// One text frame received over the session's data channel.
///
/// Field names are fixed by the remote service (`text`, `is_final`), so no
/// rename pass is applied to them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Incremental or final transcript for the current utterance.
    Transcription {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    /// Conversational output from the remote agent. Observability only.
    AgentResponse {
        #[serde(default)]
        text: String,
    },
    /// Any `type` this client does not understand.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Decode one raw data-channel payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

// ---------------------------------------------------------------------------
// Data channel — outbound
// ---------------------------------------------------------------------------

/// Sent once by the publisher before the first binary PCM frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAnnounce {
    /// Constant `"track"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub encoding: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture processing the remote end should apply; passed through
    /// unchanged from the session configuration.
    pub hints: CaptureHints,
}

impl TrackAnnounce {
    pub fn pcm16(sample_rate: u32, hints: CaptureHints) -> Self {
        Self {
            kind: "track",
            encoding: "pcm_s16le",
            sample_rate,
            channels: 1,
            hints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_partial_transcription() {
        let msg = InboundMessage::decode(br#"{"type":"transcription","text":"hel"}"#)
            .expect("decode transcription");
        assert_eq!(
            msg,
            InboundMessage::Transcription {
                text: "hel".into(),
                is_final: false,
            }
        );
    }

    #[test]
    fn decodes_final_transcription() {
        let msg =
            InboundMessage::decode(br#"{"type":"transcription","text":"hello","is_final":true}"#)
                .expect("decode final transcription");
        assert_eq!(
            msg,
            InboundMessage::Transcription {
                text: "hello".into(),
                is_final: true,
            }
        );
    }

    #[test]
    fn decodes_agent_response() {
        let msg = InboundMessage::decode(br#"{"type":"agent_response","text":"noted"}"#)
            .expect("decode agent response");
        assert_eq!(msg, InboundMessage::AgentResponse { text: "noted".into() });
    }

    #[test]
    fn unknown_type_maps_to_unknown_variant() {
        let msg = InboundMessage::decode(br#"{"type":"heartbeat","ts":12}"#)
            .expect("unknown types must still decode");
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn missing_type_is_a_decode_error() {
        assert!(InboundMessage::decode(br#"{"text":"orphan"}"#).is_err());
    }

    #[test]
    fn non_json_payload_is_a_decode_error() {
        assert!(InboundMessage::decode(b"not json at all").is_err());
    }

    #[test]
    fn token_request_serializes_camel_case() {
        let req = TokenRequest {
            room_name: "eureka-intake-17",
            identity: "user-ab12cd",
        };
        let json = serde_json::to_value(&req).expect("serialize token request");
        assert_eq!(json["roomName"], "eureka-intake-17");
        assert_eq!(json["identity"], "user-ab12cd");
    }

    #[test]
    fn token_response_parses_token_and_url() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"token":"jwt-here","url":"wss://rt.example/session"}"#)
                .expect("parse token response");
        assert_eq!(resp.token, "jwt-here");
        assert_eq!(resp.url, "wss://rt.example/session");
    }

    #[test]
    fn track_announce_serializes_camel_case_with_hints() {
        let announce = TrackAnnounce::pcm16(16_000, CaptureHints::default());
        let json = serde_json::to_value(&announce).expect("serialize announce");
        assert_eq!(json["type"], "track");
        assert_eq!(json["encoding"], "pcm_s16le");
        assert_eq!(json["sampleRate"], 16_000);
        assert_eq!(json["channels"], 1);
        assert_eq!(json["hints"]["autoGainControl"], true);
        assert_eq!(json["hints"]["echoCancellation"], true);
        assert_eq!(json["hints"]["noiseSuppression"], true);
    }
}
