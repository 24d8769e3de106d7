//! Cadence Gateway - real-time voice turn-taking for AI assistants
//!
//! Mediates between a live audio capture source, a streaming speech-to-text
//! service, a text-generation backend, and a speech synthesis service so a
//! human and an agent can hold a spoken conversation without talking over
//! each other.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌───────────────────┐
//! │ AudioCapture │──→│ TranscriptionSession  │──→│  TurnController   │
//! └──────▲───────┘   │  (streaming channel)  │   │  (state machine)  │
//!        │           └───────────────────────┘   └─────────┬─────────┘
//!        │ re-arm                                          │
//!        │           ┌───────────────────────┐   ┌─────────▼─────────┐
//!        └───────────│  OrderedAudioPlayer   │←──│ SynthesisPipeline │
//!          drained   │  (FIFO, backpressure) │   │ (parallel fetch)  │
//!                    └───────────────────────┘   └───────────────────┘
//! ```
//!
//! The capture gate is closed while the agent thinks and speaks; synthesized
//! audio chunks are fetched concurrently but played strictly in order, and
//! the player's drained signal is the only thing that re-opens the gate.

pub mod auth;
pub mod config;
pub mod error;
pub mod generate;
pub mod turn;
pub mod voice;

pub use auth::{fetch_session_key, SessionKey};
pub use config::Config;
pub use error::{Error, Result};
pub use generate::{HttpResponseGenerator, ResponseGenerator, ResponseText};
pub use turn::{StopHandle, TurnController, TurnState, TurnUpdate};
pub use voice::{
    AudioCapture, AudioFrame, AudioSink, CaptureGate, CpalSink, EndpointPolicy, GateView,
    OrderedAudioPlayer, Sentiment, SpeechSynthesisPipeline, SpeechSynthesizer, SpeechUnit,
    TranscriptEvent, TranscriptionSession, Utterance,
};
