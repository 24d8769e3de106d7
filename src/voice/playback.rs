//! Ordered audio playback
//!
//! Synthesized audio for one turn arrives as independently-fetched chunks
//! that may resolve in any order. The player reserves a playback slot for
//! each speech unit the moment its fetch is issued, then a drain task plays
//! the slots strictly in reservation order, awaiting each unit's audio if it
//! has not resolved yet. The sink accepts one buffer at a time; `play`
//! returns only when that buffer has fully played, so ordering and
//! non-overlap fall out of the drain loop itself.
//!
//! The "fully drained" signal is marker-based: the pipeline enqueues an
//! end-of-turn marker after the last reservation, and the signal fires
//! exactly once when the drain loop reaches it. There is no empty-queue
//! check to race against. A cancelled turn never emits the signal, and
//! cancellation resets the sink so a buffer already handed to the device
//! stops early instead of playing out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// One resolved buffer of synthesized audio for a speech unit
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence index of the speech unit this audio belongs to
    pub index: u32,
    /// Raw audio bytes (little-endian 16-bit PCM)
    pub data: Vec<u8>,
}

/// An audio output that accepts one buffer at a time
///
/// `play` must resolve only when the handed-off buffer has finished playing;
/// the player relies on this for both ordering and the drained signal.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one buffer to completion
    ///
    /// # Errors
    ///
    /// Returns error if the audio device rejects or aborts playback.
    async fn play(&self, frame: AudioFrame) -> Result<()>;

    /// Interrupt the buffer currently inside `play`, if any
    ///
    /// Called on explicit cancellation. The default is a no-op for sinks
    /// whose playback stops when the `play` future is dropped; a sink that
    /// hands the buffer to a device must cut it off here.
    fn reset(&self) {}
}

/// Sender half of a reserved playback slot
///
/// The synthesis task resolves it with audio, or `None` for a failed unit
/// (skipped in playback so the turn still completes).
pub type SlotSender = oneshot::Sender<Option<Vec<u8>>>;

enum QueueEntry {
    Unit {
        index: u32,
        audio: oneshot::Receiver<Option<Vec<u8>>>,
    },
    EndOfTurn,
}

/// FIFO playback queue for one turn
///
/// Created when a turn enters `Speaking`, torn down when the turn completes
/// or is cancelled.
pub struct OrderedAudioPlayer {
    queue_tx: mpsc::UnboundedSender<QueueEntry>,
    cancel_tx: watch::Sender<bool>,
    sink: Arc<dyn AudioSink>,
    task: JoinHandle<()>,
}

impl OrderedAudioPlayer {
    /// Start the drain task for a new turn
    ///
    /// `drained_tx` fires exactly once, when every queued unit has finished
    /// playing; it never fires for a cancelled turn.
    #[must_use]
    pub fn start(sink: Arc<dyn AudioSink>, drained_tx: oneshot::Sender<()>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(drain_loop(
            queue_rx,
            Arc::clone(&sink),
            drained_tx,
            cancel_rx,
        ));

        Self {
            queue_tx,
            cancel_tx,
            sink,
            task,
        }
    }

    /// Reserve the next playback slot for a speech unit
    ///
    /// Must be called in sequence-index order at the moment the unit's fetch
    /// is issued; the returned sender is handed to the fetch task. Reserving
    /// the slot up front is what decouples playback order from fetch
    /// completion order.
    #[must_use]
    pub fn reserve(&self, index: u32) -> SlotSender {
        let (audio_tx, audio_rx) = oneshot::channel();
        if self
            .queue_tx
            .send(QueueEntry::Unit {
                index,
                audio: audio_rx,
            })
            .is_err()
        {
            tracing::warn!(index, "playback queue closed, slot will be discarded");
        }
        audio_tx
    }

    /// Mark the turn's unit sequence as complete
    ///
    /// Enqueued after the last reservation; the drained signal fires when the
    /// drain loop reaches this marker.
    pub fn finish_turn(&self) {
        let _ = self.queue_tx.send(QueueEntry::EndOfTurn);
    }

    /// Cancel playback for this turn
    ///
    /// Clears the queue, abandons pending fetch results, suppresses the
    /// drained signal, and resets the sink so a buffer already handed to the
    /// device stops early. Idempotent.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.task.abort();
        self.sink.reset();
        tracing::debug!("playback cancelled");
    }
}

impl Drop for OrderedAudioPlayer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drain_loop(
    mut queue_rx: mpsc::UnboundedReceiver<QueueEntry>,
    sink: Arc<dyn AudioSink>,
    drained_tx: oneshot::Sender<()>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel_rx.changed() => return,
            entry = queue_rx.recv() => entry,
        };

        match entry {
            Some(QueueEntry::Unit { index, audio }) => {
                // Head-of-queue await: this is what enforces ordering even
                // when a later unit's fetch resolved first.
                let resolved = tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => return,
                    resolved = audio => resolved,
                };

                match resolved {
                    Ok(Some(data)) if !data.is_empty() => {
                        tracing::debug!(index, bytes = data.len(), "playing unit");
                        let played = tokio::select! {
                            biased;
                            _ = cancel_rx.changed() => return,
                            played = sink.play(AudioFrame { index, data }) => played,
                        };
                        if let Err(e) = played {
                            tracing::warn!(index, error = %e, "unit playback failed, skipping");
                        }
                    }
                    Ok(_) => {
                        tracing::debug!(index, "unit resolved empty, skipping");
                    }
                    Err(_) => {
                        tracing::debug!(index, "unit fetch abandoned, skipping");
                    }
                }
            }
            Some(QueueEntry::EndOfTurn) => {
                tracing::debug!("playback queue drained");
                let _ = drained_tx.send(());
                return;
            }
            None => return,
        }
    }
}

/// Plays PCM16 audio on the default output device
pub struct CpalSink {
    sample_rate: u32,
    abort: Arc<AtomicBool>,
}

impl CpalSink {
    /// Create a sink for the given synthesis sample rate
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, frame: AudioFrame) -> Result<()> {
        let sample_rate = self.sample_rate;
        let abort = Arc::clone(&self.abort);
        abort.store(false, Ordering::SeqCst);
        // cpal streams aren't Send; build and run the stream on a blocking
        // thread and resolve when the buffer has been consumed. Aborting the
        // returned future cannot stop the blocking thread, so the wait loop
        // watches the abort flag instead.
        tokio::task::spawn_blocking(move || {
            let samples = pcm16_to_samples(&frame.data);
            play_samples_blocking(&samples, sample_rate, &abort)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn reset(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

/// Convert little-endian 16-bit PCM bytes to f32 samples
#[must_use]
pub fn pcm16_to_samples(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32768.0)
        .collect()
}

/// Play samples to the default output device, blocking until finished or the
/// abort flag is raised
fn play_samples_blocking(samples: &[f32], sample_rate: u32, abort: &AtomicBool) -> Result<()> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleRate;
    use std::sync::{Arc, Mutex};

    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() <= 2
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = config.channels as usize;

    let samples = Arc::new(samples.to_vec());
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_cb.lock().unwrap();
                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples_cb.len() {
                        samples_cb[*pos]
                    } else {
                        *finished_cb.lock().unwrap() = true;
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    if *pos < samples_cb.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate);
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !*finished.lock().unwrap() {
        if abort.load(Ordering::SeqCst) {
            tracing::debug!("buffer playback interrupted");
            break;
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "buffer playback complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        played: Mutex<Vec<u32>>,
        per_frame_delay: Duration,
    }

    impl RecordingSink {
        fn new(per_frame_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                played: Mutex::new(Vec::new()),
                per_frame_delay,
            })
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, frame: AudioFrame) -> Result<()> {
            self.played.lock().unwrap().push(frame.index);
            tokio::time::sleep(self.per_frame_delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_plays_in_reservation_order_despite_resolution_order() {
        let sink = RecordingSink::new(Duration::from_millis(5));
        let (drained_tx, drained_rx) = oneshot::channel();
        let player = OrderedAudioPlayer::start(sink.clone(), drained_tx);

        let slot0 = player.reserve(0);
        let slot1 = player.reserve(1);
        let slot2 = player.reserve(2);
        player.finish_turn();

        // Resolve out of order: 2 first, 0 last
        slot2.send(Some(vec![3u8; 4])).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        slot1.send(Some(vec![2u8; 4])).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        slot0.send(Some(vec![1u8; 4])).unwrap();

        tokio::time::timeout(Duration::from_secs(1), drained_rx)
            .await
            .expect("drained signal")
            .unwrap();

        assert_eq!(*sink.played.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_unit_skipped_turn_completes() {
        let sink = RecordingSink::new(Duration::from_millis(1));
        let (drained_tx, drained_rx) = oneshot::channel();
        let player = OrderedAudioPlayer::start(sink.clone(), drained_tx);

        let slot0 = player.reserve(0);
        let slot1 = player.reserve(1);
        player.finish_turn();

        slot0.send(None).unwrap(); // synthesis failed
        slot1.send(Some(vec![9u8; 4])).unwrap();

        tokio::time::timeout(Duration::from_secs(1), drained_rx)
            .await
            .expect("drained signal")
            .unwrap();

        assert_eq!(*sink.played.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_abandoned_slot_skipped() {
        let sink = RecordingSink::new(Duration::from_millis(1));
        let (drained_tx, drained_rx) = oneshot::channel();
        let player = OrderedAudioPlayer::start(sink.clone(), drained_tx);

        let slot0 = player.reserve(0);
        let slot1 = player.reserve(1);
        player.finish_turn();

        drop(slot0); // fetch task died without resolving
        slot1.send(Some(vec![9u8; 4])).unwrap();

        tokio::time::timeout(Duration::from_secs(1), drained_rx)
            .await
            .expect("drained signal")
            .unwrap();

        assert_eq!(*sink.played.lock().unwrap(), vec![1]);
    }

    struct InterruptibleSink {
        playing: AtomicBool,
        cut_short: AtomicBool,
    }

    impl InterruptibleSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                playing: AtomicBool::new(false),
                cut_short: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl AudioSink for InterruptibleSink {
        async fn play(&self, _frame: AudioFrame) -> Result<()> {
            self.playing.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn reset(&self) {
            if self.playing.load(Ordering::SeqCst) {
                self.cut_short.store(true, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_buffer_inside_sink() {
        let sink = InterruptibleSink::new();
        let (drained_tx, _drained_rx) = oneshot::channel();
        let player = OrderedAudioPlayer::start(sink.clone(), drained_tx);

        let slot = player.reserve(0);
        player.finish_turn();
        slot.send(Some(vec![1u8; 4])).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sink.playing.load(Ordering::SeqCst), "buffer should be mid-play");

        player.cancel();
        assert!(
            sink.cut_short.load(Ordering::SeqCst),
            "cancel must reach the buffer already inside the sink"
        );
    }

    #[tokio::test]
    async fn test_cancel_suppresses_drained_signal() {
        let sink = RecordingSink::new(Duration::from_millis(50));
        let (drained_tx, drained_rx) = oneshot::channel();
        let player = OrderedAudioPlayer::start(sink.clone(), drained_tx);

        let slot0 = player.reserve(0);
        player.finish_turn();
        slot0.send(Some(vec![1u8; 4])).unwrap();

        // Cancel while the first buffer is still playing
        tokio::time::sleep(Duration::from_millis(10)).await;
        player.cancel();
        player.cancel(); // idempotent

        let drained = tokio::time::timeout(Duration::from_millis(200), drained_rx).await;
        assert!(
            !matches!(drained, Ok(Ok(()))),
            "cancelled turn must not emit drained"
        );
    }

    #[test]
    fn test_pcm16_roundtrip() {
        let samples = pcm16_to_samples(&[0x00, 0x00, 0xff, 0x7f, 0x00, 0x80]);
        assert_eq!(samples.len(), 3);
        assert!((samples[0]).abs() < f32::EPSILON);
        assert!(samples[1] > 0.99);
        assert!(samples[2] < -0.99);
    }
}
