//! Voice processing module
//!
//! Handles audio capture and gating, the streaming transcription channel,
//! ordered speech synthesis, and backpressured playback.

pub mod capture;
pub mod playback;
pub mod synthesize;
pub mod transcribe;

pub use capture::{
    samples_to_pcm16, samples_to_wav, spawn_chunk_pump, AudioCapture, CaptureGate, GateView,
    SAMPLE_RATE,
};
pub use playback::{AudioFrame, AudioSink, CpalSink, OrderedAudioPlayer};
pub use synthesize::{
    split_speech_units, HttpSpeechSynthesizer, SpeechSynthesisPipeline, SpeechSynthesizer,
    SpeechUnit,
};
pub use transcribe::{
    is_abnormal_close, parse_stt_message, ChannelClose, EndpointPolicy, Sentiment,
    TranscriptEvent, TranscriptionSession, Utterance,
};
