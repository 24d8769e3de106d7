//! Streaming transcription channel
//!
//! Wraps a bidirectional WebSocket to the STT service: gated capture audio
//! goes out as binary frames, JSON events come back and are parsed exactly
//! once at the channel boundary into [`TranscriptEvent`]. The
//! [`EndpointPolicy`] decides when the accumulated transcript is a complete
//! utterance worth handing to the turn controller.
//!
//! A bare `is_final` is not trusted on its own — it can fire mid-utterance
//! on short pauses. An utterance is complete on `is_final && speech_final`
//! with non-empty text, or on an `UtteranceEnd` event with finalized text
//! still pending (the endpointing-timeout fallback).

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::SessionKey;
use crate::config::{CaptureConfig, TranscriptionConfig};
use crate::{Error, Result};

/// Sentiment tag supplied by the STT service
///
/// Carried through as an opinion tag on the utterance; never used for
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    /// Lowercase wire form, as sent to the generation backend
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// One inbound event from the transcription channel, parsed at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Interim hypothesis; updates the live display only
    Partial { text: String },
    /// Finalized segment; `speech_final` marks an explicit end of speech
    Final {
        text: String,
        speech_final: bool,
        sentiment: Sentiment,
    },
    /// Endpointing fallback: no further speech followed the last final
    UtteranceEnd,
    /// Channel metadata; ignored
    Metadata,
    /// Service-reported error
    Error(String),
}

/// A finalized unit of user speech, one conversational turn input
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub sentiment: Sentiment,
    pub timestamp: DateTime<Utc>,
}

// Wire shape of the service's JSON messages.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    Results {
        channel: WireChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd {},
    Metadata {},
    Error {
        #[serde(default)]
        description: String,
    },
}

#[derive(Deserialize)]
struct WireChannel {
    alternatives: Vec<WireAlternative>,
}

#[derive(Deserialize)]
struct WireAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    sentiment: Option<Sentiment>,
}

/// Parse one inbound text frame into a [`TranscriptEvent`]
///
/// # Errors
///
/// Returns error if the frame is not valid JSON for any known message kind.
pub fn parse_stt_message(raw: &str) -> Result<TranscriptEvent> {
    let message: WireMessage = serde_json::from_str(raw)?;

    Ok(match message {
        WireMessage::Results {
            channel,
            is_final,
            speech_final,
        } => {
            let alternative = channel.alternatives.into_iter().next();
            let text = alternative
                .as_ref()
                .map(|a| a.transcript.clone())
                .unwrap_or_default();
            if is_final {
                TranscriptEvent::Final {
                    text,
                    speech_final,
                    sentiment: alternative.and_then(|a| a.sentiment).unwrap_or_default(),
                }
            } else {
                TranscriptEvent::Partial { text }
            }
        }
        WireMessage::UtteranceEnd {} => TranscriptEvent::UtteranceEnd,
        WireMessage::Metadata {} => TranscriptEvent::Metadata,
        WireMessage::Error { description } => TranscriptEvent::Error(description),
    })
}

/// Utterance completion policy
///
/// Accumulates finalized segments and decides when they form a complete
/// utterance. Interim text is tracked separately for live display.
#[derive(Debug, Default)]
pub struct EndpointPolicy {
    pending: String,
    pending_sentiment: Sentiment,
    interim: String,
}

impl EndpointPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interim hypothesis for live display
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Feed one event; returns a finalized utterance when complete
    pub fn on_event(&mut self, event: TranscriptEvent) -> Option<Utterance> {
        match event {
            TranscriptEvent::Partial { text } => {
                if !text.trim().is_empty() {
                    self.interim = text;
                }
                None
            }
            TranscriptEvent::Final {
                text,
                speech_final,
                sentiment,
            } => {
                if !text.trim().is_empty() {
                    if !self.pending.is_empty() {
                        self.pending.push(' ');
                    }
                    self.pending.push_str(text.trim());
                    self.pending_sentiment = sentiment;
                }
                self.interim.clear();
                if speech_final {
                    self.take_pending()
                } else {
                    None
                }
            }
            TranscriptEvent::UtteranceEnd => self.take_pending(),
            TranscriptEvent::Metadata | TranscriptEvent::Error(_) => None,
        }
    }

    fn take_pending(&mut self) -> Option<Utterance> {
        let text = std::mem::take(&mut self.pending);
        let sentiment = std::mem::take(&mut self.pending_sentiment);
        if text.trim().is_empty() {
            return None;
        }
        Some(Utterance {
            text,
            sentiment,
            timestamp: Utc::now(),
        })
    }
}

/// Classify a close code: true if the closure is abnormal
///
/// Normal (1000) and going-away (1001) closes end the session quietly; any
/// other code stops the session as a channel error.
#[must_use]
pub fn is_abnormal_close(code: CloseCode) -> bool {
    !matches!(code, CloseCode::Normal | CloseCode::Away)
}

/// Why the transcription channel ended
#[derive(Debug)]
pub enum ChannelClose {
    /// Expected close (idle timeout, explicit teardown)
    Normal,
    /// Abnormal close or service error; the session must stop
    Abnormal(String),
}

/// A live bidirectional transcription channel
pub struct TranscriptionSession {
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl TranscriptionSession {
    /// Open the channel and start pumping
    ///
    /// Audio chunks from `chunk_rx` are forwarded as binary frames; parsed
    /// events are classified by the endpoint policy, finalized utterances go
    /// to `utterance_tx` and interim text to `interim_tx`. When the channel
    /// ends, `closed_tx` reports whether the closure was expected or a
    /// session-stopping error.
    ///
    /// # Errors
    ///
    /// Returns error if the WebSocket handshake fails.
    pub async fn connect(
        config: &TranscriptionConfig,
        capture: &CaptureConfig,
        key: &SessionKey,
        mut chunk_rx: mpsc::Receiver<Vec<u8>>,
        utterance_tx: mpsc::Sender<Utterance>,
        interim_tx: mpsc::Sender<String>,
        closed_tx: oneshot::Sender<ChannelClose>,
    ) -> Result<Self> {
        let url = config.channel_url(capture.sample_rate);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::TranscriptionChannel(format!("bad channel url: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Token {}", key.expose())
                .parse()
                .map_err(|_| Error::TranscriptionChannel("invalid credential".to_string()))?,
        );

        let (stream, _) = connect_async(request).await?;
        tracing::info!(model = %config.model, "transcription channel open");

        let (mut ws_tx, mut ws_rx) = stream.split();

        let outbound = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Binary(chunk.into())).await {
                    tracing::warn!(error = %e, "audio send failed, closing outbound pump");
                    break;
                }
            }
            // Graceful teardown: tell the service the stream is done.
            let _ = ws_tx
                .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                .await;
            let _ = ws_tx.close().await;
            tracing::debug!("outbound audio pump closed");
        });

        let inbound = tokio::spawn(async move {
            let mut policy = EndpointPolicy::new();
            let mut close = ChannelClose::Normal;

            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => match parse_stt_message(&text) {
                        Ok(TranscriptEvent::Error(description)) => {
                            tracing::error!(%description, "transcription service error");
                            close = ChannelClose::Abnormal(description);
                            break;
                        }
                        Ok(event) => {
                            let was_partial = matches!(event, TranscriptEvent::Partial { .. });
                            if let Some(utterance) = policy.on_event(event) {
                                if utterance_tx.send(utterance).await.is_err() {
                                    break;
                                }
                            } else if was_partial {
                                let _ = interim_tx.try_send(policy.interim().to_string());
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "unrecognized channel message");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let abnormal = frame.as_ref().is_some_and(|f| is_abnormal_close(f.code));
                        if abnormal {
                            tracing::error!(frame = ?frame, "transcription channel closed abnormally");
                            close = ChannelClose::Abnormal(format!("close frame: {frame:?}"));
                        } else {
                            tracing::info!("transcription channel closed");
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "transcription channel error");
                        close = ChannelClose::Abnormal(e.to_string());
                        break;
                    }
                }
            }
            let _ = closed_tx.send(close);
            tracing::debug!("inbound event pump closed");
        });

        Ok(Self { outbound, inbound })
    }

    /// Tear down both pumps; idempotent
    pub fn close(&self) {
        self.outbound.abort();
        self.inbound.abort();
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}
