//! Error types for the Cadence gateway

use thiserror::Error;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Cadence gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session key fetch failed or returned an empty key
    #[error("auth error: {0}")]
    Auth(String),

    /// Capture device denied or unavailable
    #[error("capture device error: {0}")]
    CaptureDevice(String),

    /// Transcription channel closed abnormally or errored
    #[error("transcription channel error: {0}")]
    TranscriptionChannel(String),

    /// Response generation backend call failed
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech synthesis request failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio playback or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
