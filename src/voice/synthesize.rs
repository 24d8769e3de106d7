//! Speech synthesis pipeline
//!
//! Response text is split into ordered speech units at sentence boundaries;
//! each unit's audio is fetched concurrently to hide synthesis latency while
//! the ordered player guarantees in-order playback. Sequence indices are
//! assigned at split time, never at fetch completion, so a fast unit can
//! never jump the queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SynthesisConfig;
use crate::voice::playback::OrderedAudioPlayer;
use crate::{Error, Result};

/// One text fragment submitted for synthesis, with its ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechUnit {
    /// Sequence index, assigned at split time; the sole ordering key
    pub index: u32,
    /// Text to synthesize
    pub text: String,
}

/// A speech synthesis service
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one unit of text to raw audio bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] if the request fails.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Split response text into speech units
///
/// Splits on sentence-terminal punctuation (`.`, `!`, `?`), keeping the
/// terminator attached to the preceding unit. A trailing fragment with no
/// terminator is still a unit. Empty and whitespace-only fragments are
/// dropped before index assignment.
#[must_use]
pub fn split_speech_units(text: &str) -> Vec<SpeechUnit> {
    let mut units = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            push_unit(&mut units, &mut current);
        }
    }
    push_unit(&mut units, &mut current);

    units
}

fn push_unit(units: &mut Vec<SpeechUnit>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        #[allow(clippy::cast_possible_truncation)]
        let index = units.len() as u32;
        units.push(SpeechUnit {
            index,
            text: trimmed.to_string(),
        });
    }
    current.clear();
}

/// Dispatches one turn's response text into the playback queue
pub struct SpeechSynthesisPipeline<S> {
    synthesizer: Arc<S>,
}

impl<S: SpeechSynthesizer + 'static> SpeechSynthesisPipeline<S> {
    #[must_use]
    pub fn new(synthesizer: Arc<S>) -> Self {
        Self { synthesizer }
    }

    /// Split `text` and issue concurrent synthesis requests for each unit
    ///
    /// Playback slots are reserved in index order before any fetch is
    /// spawned, then the end-of-turn marker is enqueued, so the player's
    /// drained signal covers every unit of this turn. A unit whose fetch
    /// fails resolves its slot empty: it is logged and skipped in playback,
    /// and sibling units are unaffected.
    ///
    /// Returns the number of units dispatched.
    pub fn speak(&self, player: &OrderedAudioPlayer, text: &str) -> usize {
        let units = split_speech_units(text);
        let count = units.len();

        for unit in units {
            let slot = player.reserve(unit.index);
            let synthesizer = Arc::clone(&self.synthesizer);
            tokio::spawn(async move {
                match synthesizer.synthesize(&unit.text).await {
                    Ok(audio) => {
                        tracing::debug!(index = unit.index, bytes = audio.len(), "unit synthesized");
                        let _ = slot.send(Some(audio));
                    }
                    Err(e) => {
                        tracing::warn!(index = unit.index, error = %e, "unit synthesis failed");
                        let _ = slot.send(None);
                    }
                }
            });
        }

        player.finish_turn();
        tracing::debug!(units = count, "turn dispatched to synthesis");
        count
    }
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

/// HTTP synthesis service (one-shot request per unit)
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    url: String,
    credential: String,
}

impl HttpSpeechSynthesizer {
    /// Create a synthesizer from configuration and the session key
    #[must_use]
    pub fn new(config: &SynthesisConfig, key: &crate::auth::SessionKey) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.request_url(),
            credential: format!("Token {}", key.expose()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", &self.credential)
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("speak request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("speak error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_two_sentences() {
        let units = split_speech_units("Hello there. How are you?");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[0].text, "Hello there.");
        assert_eq!(units[1].index, 1);
        assert_eq!(units[1].text, "How are you?");
    }

    #[test]
    fn test_split_keeps_terminator() {
        let units = split_speech_units("Wow! Really?");
        assert_eq!(units[0].text, "Wow!");
        assert_eq!(units[1].text, "Really?");
    }

    #[test]
    fn test_trailing_fragment_is_a_unit() {
        let units = split_speech_units("First sentence. and a trailing fragment");
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].text, "and a trailing fragment");
    }

    #[test]
    fn test_blank_fragments_dropped_before_indexing() {
        let units = split_speech_units("One. Two.   \n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "One.");
        assert_eq!(units[1].index, 1);
        assert_eq!(units[1].text, "Two.");
    }

    #[test]
    fn test_bare_terminator_kept_as_unit() {
        let units = split_speech_units("One. . Two.");
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].text, ".");
    }

    #[test]
    fn test_whitespace_only_input() {
        assert!(split_speech_units("   \n\t ").is_empty());
        assert!(split_speech_units("").is_empty());
    }

    #[test]
    fn test_single_sentence_single_unit() {
        let units = split_speech_units("It is sunny.");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "It is sunny.");
    }
}
