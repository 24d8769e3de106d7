//! Audio capture from microphone
//!
//! The cpal stream fills a shared sample buffer continuously; the chunk pump
//! drains it on a fixed cadence and forwards PCM chunks to the transcription
//! channel only while the capture gate is armed. The gate is the single
//! point that enforces "no capture audio while the agent is thinking or
//! speaking".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Write half of the capture gate, held by the turn controller
///
/// The controller is the only component that arms or disarms capture; every
/// other component sees a read-only [`GateView`].
#[derive(Debug)]
pub struct CaptureGate {
    armed: Arc<AtomicBool>,
}

/// Read-only view of the capture gate
#[derive(Debug, Clone)]
pub struct GateView {
    armed: Arc<AtomicBool>,
}

impl CaptureGate {
    /// Create a new gate, initially disarmed
    #[must_use]
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the capture channel
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
        tracing::debug!("capture gate armed");
    }

    /// Close the capture channel
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
        tracing::debug!("capture gate disarmed");
    }

    /// Whether capture audio may currently be forwarded
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Create a read-only view for the capture side
    #[must_use]
    pub fn view(&self) -> GateView {
        GateView {
            armed: Arc::clone(&self.armed),
        }
    }
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateView {
    /// Whether capture audio may currently be forwarded
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

/// Shared buffer the cpal callback writes into and the pump drains
pub type SharedSampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Captures audio from the default input device
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    buffer: SharedSampleBuffer,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device is available. Fatal to
    /// session start; not retried.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::CaptureDevice("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::CaptureDevice(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::CaptureDevice("no suitable capture config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio into the shared buffer
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::CaptureDevice("no input device".to_string()))?;

        let config = self.config.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::CaptureDevice(e.to_string()))?;

        stream.play().map_err(|e| Error::CaptureDevice(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Handle to the shared sample buffer, for the chunk pump
    #[must_use]
    pub fn buffer(&self) -> SharedSampleBuffer {
        Arc::clone(&self.buffer)
    }

    /// Get captured audio and clear the buffer
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

}

/// Spawn the chunk pump
///
/// Every `interval`, drains the shared buffer and forwards the samples as
/// little-endian 16-bit PCM — but only while the gate is armed. Samples
/// accumulated while disarmed are discarded on the spot so stale audio (the
/// agent's own speech picked up by the mic) never reaches the transcription
/// channel. The pump exits when the chunk receiver is dropped.
pub fn spawn_chunk_pump(
    buffer: SharedSampleBuffer,
    gate: GateView,
    interval: Duration,
    chunk_tx: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if chunk_tx.is_closed() {
                tracing::debug!("chunk receiver closed, pump exiting");
                break;
            }

            let samples = buffer
                .lock()
                .map(|mut buf| std::mem::take(&mut *buf))
                .unwrap_or_default();

            if !gate.is_armed() || samples.is_empty() {
                continue;
            }

            let chunk = samples_to_pcm16(&samples);
            if chunk_tx.send(chunk).await.is_err() {
                tracing::debug!("chunk receiver closed, pump exiting");
                break;
            }
        }
    })
}

/// Convert f32 samples to little-endian 16-bit PCM bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&sample_i16.to_le_bytes());
    }
    out
}

/// Convert f32 samples to WAV bytes (mic-test recording)
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_disarmed() {
        let gate = CaptureGate::new();
        assert!(!gate.is_armed());
        assert!(!gate.view().is_armed());
    }

    #[test]
    fn test_gate_view_tracks_owner() {
        let gate = CaptureGate::new();
        let view = gate.view();

        gate.arm();
        assert!(view.is_armed());

        gate.disarm();
        assert!(!view.is_armed());
    }

    #[test]
    fn test_samples_to_pcm16_clamps() {
        let pcm = samples_to_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(pcm.len(), 8);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), 32767);
        // Overdriven sample clamps instead of wrapping
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), 32767);
    }

    #[tokio::test]
    async fn test_pump_respects_gate() {
        let buffer: SharedSampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let gate = CaptureGate::new();
        let (tx, mut rx) = mpsc::channel(16);

        let pump = spawn_chunk_pump(
            Arc::clone(&buffer),
            gate.view(),
            Duration::from_millis(10),
            tx,
        );

        // Disarmed: samples are discarded, nothing forwarded
        buffer.lock().unwrap().extend_from_slice(&[0.5f32; 160]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(buffer.lock().unwrap().is_empty());

        // Armed: samples flow through as PCM
        gate.arm();
        buffer.lock().unwrap().extend_from_slice(&[0.5f32; 160]);
        let chunk = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("pump should forward while armed")
            .unwrap();
        assert_eq!(chunk.len(), 320);

        // Dropping the receiver stops the pump
        drop(rx);
        tokio::time::timeout(Duration::from_millis(200), pump)
            .await
            .expect("pump should exit once the receiver is gone")
            .unwrap();
    }
}
