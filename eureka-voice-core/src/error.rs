use thiserror::Error;

/// All errors produced by eureka-voice-core.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("resource error: {0}")]
    Resource(String),

    #[error("malformed session payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceError>;
