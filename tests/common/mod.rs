//! Shared test utilities
//!
//! Mock generation, synthesis, and playback so turn-taking tests run
//! without a network or audio hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use cadence_gateway::voice::{AudioFrame, AudioSink, Sentiment, SpeechSynthesizer, Utterance};
use cadence_gateway::{Error, ResponseGenerator, ResponseText, Result};

/// Build a finalized utterance with neutral sentiment
#[must_use]
pub fn utterance(text: &str) -> Utterance {
    Utterance {
        text: text.to_string(),
        sentiment: Sentiment::Neutral,
        timestamp: Utc::now(),
    }
}

/// Generator that returns a fixed reply, optionally after a delay
pub struct ScriptedGenerator {
    reply: String,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Arc<Self> {
        Self::with_delay(reply, Duration::ZERO)
    }

    pub fn with_delay(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Utterance texts this generator was called with, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, utterance: &Utterance) -> Result<ResponseText> {
        self.calls.lock().unwrap().push(utterance.text.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ResponseText::complete(self.reply.clone()))
    }
}

/// Generator that always fails
pub struct FailingGenerator {
    message: String,
}

impl FailingGenerator {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    async fn generate(&self, _utterance: &Utterance) -> Result<ResponseText> {
        Err(Error::Generation(self.message.clone()))
    }
}

/// Synthesizer that echoes the unit text back as audio bytes
///
/// Per-text delays let a test force later units to resolve before earlier
/// ones; texts in the failure set return an error instead.
#[derive(Default)]
pub struct MockSynthesizer {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    #[must_use]
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failures.insert(text.to_string());
        self
    }

    /// Unit texts requested for synthesis, in dispatch order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(text) {
            return Err(Error::Synthesis(format!("mock failure for {text:?}")));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Sink that records played frames and simulates playback time
pub struct RecordingSink {
    played: Mutex<Vec<AudioFrame>>,
    per_frame_delay: Duration,
}

impl RecordingSink {
    pub fn new(per_frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            per_frame_delay,
        })
    }

    /// Sequence indices of played frames, in playback order
    pub fn indices(&self) -> Vec<u32> {
        self.played.lock().unwrap().iter().map(|f| f.index).collect()
    }

    /// Played frame payloads decoded back to text, in playback order
    pub fn texts(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|f| String::from_utf8_lossy(&f.data).into_owned())
            .collect()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, frame: AudioFrame) -> Result<()> {
        self.played.lock().unwrap().push(frame);
        tokio::time::sleep(self.per_frame_delay).await;
        Ok(())
    }
}
