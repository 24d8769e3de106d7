//! Response generation backend
//!
//! The backend receives one finalized utterance and returns response text,
//! either as a single payload or as ordered incremental chunks. The gateway
//! only depends on the [`ResponseGenerator`] trait so tests run without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::voice::transcribe::Utterance;
use crate::{Error, Result};

/// Generated response text for one turn
#[derive(Debug, Clone)]
pub struct ResponseText {
    /// Full response text
    pub full: String,
    /// Ordered incremental chunks, when the backend streamed its output
    pub chunks: Option<Vec<String>>,
}

impl ResponseText {
    /// A single-payload response
    #[must_use]
    pub fn complete(full: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            chunks: None,
        }
    }
}

/// A text-generation backend
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a response to one finalized utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the backend call fails or times out.
    async fn generate(&self, utterance: &Utterance) -> Result<ResponseText>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    sentiment: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP backend returning a single JSON payload
pub struct HttpResponseGenerator {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpResponseGenerator {
    /// Create a generator from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is empty.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::Config(
                "generation endpoint required".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate(&self, utterance: &Utterance) -> Result<ResponseText> {
        tracing::debug!(text = %utterance.text, "requesting response");

        let request = GenerateRequest {
            text: &utterance.text,
            sentiment: utterance.sentiment.as_str(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Generation("backend call timed out".to_string())
                } else {
                    Error::Generation(format!("backend call failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("backend error {status}: {body}")));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("malformed backend response: {e}")))?;

        tracing::info!(chars = result.response.len(), "response received");
        Ok(ResponseText::complete(result.response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_response_has_no_chunks() {
        let response = ResponseText::complete("It is sunny.");
        assert_eq!(response.full, "It is sunny.");
        assert!(response.chunks.is_none());
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let config = GenerationConfig {
            endpoint: String::new(),
            timeout_secs: 30,
        };
        assert!(HttpResponseGenerator::new(&config).is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateRequest {
            text: "What's the weather?",
            sentiment: "neutral",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "What's the weather?");
        assert_eq!(json["sentiment"], "neutral");
    }
}
