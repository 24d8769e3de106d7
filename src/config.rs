//! Gateway configuration
//!
//! Loaded from a TOML file (`--config` path or the platform config
//! directory). Every field has a default so a missing file still yields a
//! usable configuration; the session-key endpoint is the one value that must
//! be present before a session can start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio capture settings
    pub capture: CaptureConfig,
    /// Streaming transcription settings
    pub transcription: TranscriptionConfig,
    /// Response generation backend settings
    pub generation: GenerationConfig,
    /// Speech synthesis settings
    pub synthesis: SynthesisConfig,
    /// Session key issuance settings
    pub auth: AuthConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interval between audio chunks sent to the transcription channel (ms)
    pub chunk_interval_ms: u64,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 250,
            sample_rate: 16_000,
        }
    }
}

/// Streaming transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// WebSocket endpoint for the streaming STT service
    pub endpoint: String,
    /// STT model identifier
    pub model: String,
    /// Request smart formatting from the service
    pub smart_format: bool,
    /// Request punctuation from the service
    pub punctuate: bool,
    /// Request sentiment tagging from the service
    pub sentiment: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2".to_string(),
            smart_format: true,
            punctuate: true,
            sentiment: true,
        }
    }
}

impl TranscriptionConfig {
    /// Build the full channel URL with query parameters
    #[must_use]
    pub fn channel_url(&self, sample_rate: u32) -> String {
        format!(
            "{}?model={}&encoding=linear16&sample_rate={}&smart_format={}&punctuate={}&sentiment={}",
            self.endpoint, self.model, sample_rate, self.smart_format, self.punctuate,
            self.sentiment,
        )
    }
}

/// Response generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// HTTP endpoint of the text-generation backend
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// HTTP endpoint of the synthesis service
    pub endpoint: String,
    /// Voice/model identifier
    pub voice: String,
    /// Playback sample rate for synthesized audio in Hz
    pub sample_rate: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepgram.com/v1/speak".to_string(),
            voice: "aura-asteria-en".to_string(),
            sample_rate: 24_000,
        }
    }
}

impl SynthesisConfig {
    /// Build the full request URL with query parameters
    #[must_use]
    pub fn request_url(&self) -> String {
        format!(
            "{}?model={}&encoding=linear16&sample_rate={}&container=none",
            self.endpoint, self.voice, self.sample_rate
        )
    }
}

/// Session key issuance configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HTTP endpoint that issues short-lived session keys
    pub endpoint: String,
}

impl Config {
    /// Load configuration from an explicit path, or the default location
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Default config file location (`<config dir>/cadence/config.toml`)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cadence")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Validate that the fields required to start a session are present
    ///
    /// # Errors
    ///
    /// Returns error if the auth or generation endpoint is missing.
    pub fn validate_for_session(&self) -> Result<()> {
        if self.auth.endpoint.trim().is_empty() {
            return Err(Error::Config(
                "auth.endpoint required to start a session".to_string(),
            ));
        }
        if self.generation.endpoint.trim().is_empty() {
            return Err(Error::Config(
                "generation.endpoint required to start a session".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_cadence() {
        let config = Config::default();
        assert_eq!(config.capture.chunk_interval_ms, 250);
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.transcription.model, "nova-2");
        assert!(config.transcription.sentiment);
        assert_eq!(config.generation.timeout_secs, 30);
    }

    #[test]
    fn test_channel_url_carries_params() {
        let config = TranscriptionConfig::default();
        let url = config.channel_url(16_000);
        assert!(url.starts_with("wss://"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("sentiment=true"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generation]
            endpoint = "http://localhost:9000/respond"
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.endpoint, "http://localhost:9000/respond");
        assert_eq!(config.capture.chunk_interval_ms, 250);
        assert_eq!(config.synthesis.voice, "aura-asteria-en");
    }

    #[test]
    fn test_session_validation_requires_endpoints() {
        let config = Config::default();
        assert!(config.validate_for_session().is_err());

        let mut config = Config::default();
        config.auth.endpoint = "http://localhost:9000/auth".to_string();
        config.generation.endpoint = "http://localhost:9000/respond".to_string();
        assert!(config.validate_for_session().is_ok());
    }
}
