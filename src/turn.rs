//! Turn controller
//!
//! The state machine that arbitrates who holds the floor. It owns the
//! capture gate and the turn state; no other component mutates either. One
//! utterance is processed end to end at a time: the gate is closed before
//! the turn's first await, the response is generated, its audio is played in
//! order, and only the player's drained signal (or a fail-open error path)
//! re-opens the gate.
//!
//! ```text
//! Idle → Listening → Thinking → Speaking → Listening (loop)
//!              └────────┴──────────┴──→ Idle (on stop)
//! ```
//!
//! A final transcript arriving while a turn is in flight is discarded
//! silently: the gate is closed during Thinking/Speaking, so the case is a
//! race at the gate-close instant, and replaying stale speech after a long
//! turn would be worse than dropping it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::generate::ResponseGenerator;
use crate::voice::capture::CaptureGate;
use crate::voice::playback::{AudioSink, OrderedAudioPlayer};
use crate::voice::synthesize::{SpeechSynthesisPipeline, SpeechSynthesizer};
use crate::voice::transcribe::Utterance;
use crate::Result;

/// Conversation turn state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No session running
    Idle,
    /// Gate armed, waiting for a finalized utterance
    Listening,
    /// Utterance dispatched to the generation backend
    Thinking,
    /// Response audio queued or playing
    Speaking,
}

/// Status updates surfaced to the caller (rendered as status text, not
/// bubbled as panics)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnUpdate {
    /// State transition
    State(TurnState),
    /// Finalized user transcript for this turn
    Transcript(String),
    /// Generated response text for this turn
    Response(String),
    /// Turn-level error, surfaced in place of a response
    Error(String),
}

/// Handle for requesting a session stop; cloneable, idempotent
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
}

impl StopHandle {
    /// Create a stop handle and the receiver the controller listens on
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request stop; safe to call repeatedly
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The turn-taking state machine
pub struct TurnController<G, S> {
    generator: Arc<G>,
    pipeline: SpeechSynthesisPipeline<S>,
    sink: Arc<dyn AudioSink>,
    gate: CaptureGate,
    state: TurnState,
    updates: mpsc::Sender<TurnUpdate>,
}

enum TurnOutcome {
    Response(crate::generate::ResponseText),
    Failed(String),
}

impl<G, S> TurnController<G, S>
where
    G: ResponseGenerator + 'static,
    S: SpeechSynthesizer + 'static,
{
    /// Create a controller; the gate starts disarmed, the state `Idle`
    #[must_use]
    pub fn new(
        generator: Arc<G>,
        synthesizer: Arc<S>,
        sink: Arc<dyn AudioSink>,
        updates: mpsc::Sender<TurnUpdate>,
    ) -> Self {
        Self {
            generator,
            pipeline: SpeechSynthesisPipeline::new(synthesizer),
            sink,
            gate: CaptureGate::new(),
            state: TurnState::Idle,
            updates,
        }
    }

    /// Read-only view of the capture gate for the chunk pump
    #[must_use]
    pub fn gate_view(&self) -> crate::voice::capture::GateView {
        self.gate.view()
    }

    /// Current turn state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Run the session until stop is requested or the utterance source ends
    ///
    /// Arms the gate, then loops over finalized utterances, generation
    /// results, and the playback drained signal. On return the gate is
    /// disarmed, any in-flight work is cancelled, and the state is `Idle`.
    ///
    /// # Errors
    ///
    /// Currently infallible at the loop level; turn-level failures are
    /// surfaced as [`TurnUpdate::Error`] and handled fail-open.
    pub async fn run(
        &mut self,
        mut utterances: mpsc::Receiver<Utterance>,
        mut stop_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        self.gate.arm();
        self.set_state(TurnState::Listening).await;

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<TurnOutcome>(1);
        let mut generation: Option<tokio::task::JoinHandle<()>> = None;
        let mut player: Option<OrderedAudioPlayer> = None;
        let mut drained_rx: Option<oneshot::Receiver<()>> = None;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("stop requested");
                    break;
                }

                utterance = utterances.recv() => {
                    let Some(utterance) = utterance else {
                        tracing::info!("utterance source closed");
                        break;
                    };
                    self.on_utterance(utterance, &outcome_tx, &mut generation).await;
                }

                Some(outcome) = outcome_rx.recv() => {
                    generation = None;
                    self.on_outcome(outcome, &mut player, &mut drained_rx).await;
                }

                () = maybe_drained(&mut drained_rx) => {
                    drained_rx = None;
                    player = None;
                    tracing::debug!("turn playback drained");
                    self.gate.arm();
                    self.set_state(TurnState::Listening).await;
                }
            }
        }

        // Teardown: idempotent, leaves the gate closed until a fresh start.
        if let Some(task) = generation.take() {
            task.abort();
        }
        if let Some(p) = player.take() {
            p.cancel();
        }
        self.gate.disarm();
        self.set_state(TurnState::Idle).await;
        Ok(())
    }

    async fn on_utterance(
        &mut self,
        utterance: Utterance,
        outcome_tx: &mpsc::Sender<TurnOutcome>,
        generation: &mut Option<tokio::task::JoinHandle<()>>,
    ) {
        if self.state != TurnState::Listening {
            tracing::debug!(text = %utterance.text, state = ?self.state, "utterance discarded mid-turn");
            return;
        }
        if utterance.text.trim().is_empty() {
            return;
        }

        // Close the race window against the capture cadence: the gate must
        // be shut before this turn's first await.
        self.gate.disarm();
        self.set_state(TurnState::Thinking).await;
        let _ = self
            .updates
            .send(TurnUpdate::Transcript(utterance.text.clone()))
            .await;

        let generator = Arc::clone(&self.generator);
        let outcome_tx = outcome_tx.clone();
        *generation = Some(tokio::spawn(async move {
            let outcome = match generator.generate(&utterance).await {
                Ok(response) => TurnOutcome::Response(response),
                Err(e) => TurnOutcome::Failed(e.to_string()),
            };
            let _ = outcome_tx.send(outcome).await;
        }));
    }

    async fn on_outcome(
        &mut self,
        outcome: TurnOutcome,
        player: &mut Option<OrderedAudioPlayer>,
        drained_rx: &mut Option<oneshot::Receiver<()>>,
    ) {
        if self.state != TurnState::Thinking {
            tracing::debug!(state = ?self.state, "stale generation outcome ignored");
            return;
        }

        match outcome {
            TurnOutcome::Response(response) => {
                let _ = self
                    .updates
                    .send(TurnUpdate::Response(response.full.clone()))
                    .await;
                self.set_state(TurnState::Speaking).await;

                let (drained_tx, rx) = oneshot::channel();
                let p = OrderedAudioPlayer::start(Arc::clone(&self.sink), drained_tx);
                let units = match response.chunks {
                    // Streamed chunks already carry the backend's ordering.
                    Some(chunks) => {
                        let text = chunks.concat();
                        self.pipeline.speak(&p, &text)
                    }
                    None => self.pipeline.speak(&p, &response.full),
                };

                if units == 0 {
                    // Nothing speakable; the marker alone will drain.
                    tracing::debug!("response produced no speech units");
                }
                *player = Some(p);
                *drained_rx = Some(rx);
            }
            TurnOutcome::Failed(message) => {
                // Fail-open: never leave the conversation permanently muted.
                tracing::error!(error = %message, "generation failed, re-arming capture");
                let _ = self.updates.send(TurnUpdate::Error(message)).await;
                self.gate.arm();
                self.set_state(TurnState::Listening).await;
            }
        }
    }

    async fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "turn state");
            self.state = state;
            let _ = self.updates.send(TurnUpdate::State(state)).await;
        }
    }
}

// Pending while no turn is playing; resolves on the drained signal. A
// dropped sender only happens at teardown, when this future is gone too.
async fn maybe_drained(rx: &mut Option<oneshot::Receiver<()>>) {
    match rx {
        Some(receiver) => {
            let _ = receiver.await;
        }
        None => std::future::pending().await,
    }
}
